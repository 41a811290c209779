use std::{
    ffi::OsString,
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use stampsync_common::error::Error;
use walkdir::WalkDir;

use crate::{
    ListPage, ObjectInfo, ObjectMetadata, ObjectStore, PutMode, invalid_input, uri::ObjectUri,
};

/// Files whose name starts with this prefix are bookkeeping, never objects.
const HIDDEN_PREFIX: &str = ".stampsync-";
const TEMP_PREFIX: &str = ".stampsync-tmp";
const METADATA_PREFIX: &str = ".stampsync-meta.";

pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// A `LocalFsObjectStore` implementation that manages objects on the local filesystem,
/// confined to a specified root directory.
///
/// Every bucket is a direct subdirectory of the root and every key is a path
/// relative to its bucket directory, so `s3://bucket/a/b.txt` is stored at
/// `<root>/bucket/a/b.txt`. Writes go through a temporary file in the target
/// directory and are renamed into place, so readers never observe a partially
/// written object. User metadata lives in a hidden JSON file next to the
/// object (`.stampsync-meta.<name>`) and is invisible to listings.
pub struct LocalFsObjectStore {
    /// The top-level directory for this object store.
    root: PathBuf,
    page_size: usize,
}

impl LocalFsObjectStore {
    /// Creates a new `LocalFsObjectStore` with the given root directory.
    ///
    /// The root directory will be created if it does not exist.
    pub fn new(root: &Path) -> stampsync_common::Result<LocalFsObjectStore> {
        if root.as_os_str().is_empty() {
            return Err(Error::invalid_arg(
                "root",
                "local object store root must not be empty",
            ));
        }
        std::fs::create_dir_all(root)
            .map_err(|e| Error::io(root.display().to_string(), e))?;
        Ok(LocalFsObjectStore {
            root: root.to_path_buf(),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Sets the maximum number of objects returned by one `list_page` call.
    pub fn with_page_size(mut self, page_size: usize) -> LocalFsObjectStore {
        self.page_size = page_size.max(1);
        self
    }

    /// Returns the file system path of the store's top-level directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the directory of a bucket.
    pub fn create_bucket(&self, bucket: &str) -> std::io::Result<()> {
        let uri = ObjectUri::new(bucket, "").map_err(|e| invalid_input("create_bucket", e))?;
        std::fs::create_dir_all(self.object_path(&uri))
    }

    /// Converts an [`ObjectUri`] to a local filesystem path.
    pub fn object_path(&self, uri: &ObjectUri) -> PathBuf {
        let mut path = self.root.join(uri.bucket());
        for component in uri.components() {
            path.push(component);
        }
        path
    }

    fn metadata_path(&self, uri: &ObjectUri) -> PathBuf {
        let path = self.object_path(uri);
        let mut name = OsString::from(METADATA_PREFIX);
        name.push(path.file_name().unwrap_or_default());
        path.with_file_name(name)
    }

    fn require_object(&self, uri: &ObjectUri) -> std::io::Result<PathBuf> {
        let path = self.object_path(uri);
        if !uri.is_container() && path.is_file() {
            Ok(path)
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("object '{uri}' not found"),
            ))
        }
    }

    fn bucket_path(&self, uri: &ObjectUri) -> std::io::Result<PathBuf> {
        let path = self.root.join(uri.bucket());
        if path.is_dir() {
            Ok(path)
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("bucket '{}' does not exist", uri.bucket()),
            ))
        }
    }

    fn object_info(&self, uri: ObjectUri, metadata: &std::fs::Metadata) -> ObjectInfo {
        let last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        ObjectInfo {
            uri,
            size: metadata.len(),
            last_modified,
            etag: None,
        }
    }

    fn write_atomic(
        &self,
        uri: &ObjectUri,
        mode: PutMode,
        fill: impl FnOnce(&mut File) -> std::io::Result<()>,
    ) -> std::io::Result<()> {
        if uri.is_container() {
            return Err(invalid_input("put", format!("'{uri}' is a container")));
        }
        self.bucket_path(uri)?;
        let path = self.object_path(uri);
        let parent = path
            .parent()
            .ok_or_else(|| invalid_input("put", format!("'{uri}' has no parent")))?;
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent)?;
        fill(tmp.as_file_mut())?;
        tmp.as_file_mut().flush()?;

        let persisted = match mode {
            PutMode::Overwrite => tmp.persist(&path),
            PutMode::Create => tmp.persist_noclobber(&path),
        };
        persisted.map_err(|e| e.error)?;
        remove_if_exists(&self.metadata_path(uri))
    }
}

impl ObjectStore for LocalFsObjectStore {
    fn list_page(
        &self,
        prefix: &ObjectUri,
        continuation: Option<&str>,
    ) -> std::io::Result<ListPage> {
        let bucket_path = self.bucket_path(prefix)?;
        let walk_root = {
            let mut dir = bucket_path.clone();
            for component in prefix.container_key().split('/').filter(|s| !s.is_empty()) {
                dir.push(component);
            }
            dir
        };
        if !walk_root.is_dir() {
            return Ok(ListPage::default());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&walk_root).follow_links(false) {
            let entry = entry.map_err(std::io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy().starts_with(HIDDEN_PREFIX) {
                continue;
            }
            let Some(key) = relative_key(&bucket_path, entry.path()) else {
                log::warn!("skipping non-UTF-8 path {}", entry.path().display());
                continue;
            };
            if !key.starts_with(prefix.key()) {
                continue;
            }
            if continuation.is_some_and(|after| key.as_str() <= after) {
                continue;
            }
            entries.push((key, entry.path().to_path_buf()));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let has_more = entries.len() > self.page_size;
        entries.truncate(self.page_size);
        let next = if has_more {
            entries.last().map(|(key, _)| key.clone())
        } else {
            None
        };

        let mut objects = Vec::with_capacity(entries.len());
        for (key, path) in entries {
            let metadata = match std::fs::metadata(&path) {
                Ok(metadata) => metadata,
                // Removed between the walk and the stat.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            let uri = ObjectUri::new(prefix.bucket(), key).map_err(|e| invalid_input("list", e))?;
            objects.push(self.object_info(uri, &metadata));
        }
        Ok(ListPage { objects, next })
    }

    fn head(&self, uri: &ObjectUri) -> std::io::Result<Option<ObjectInfo>> {
        if uri.is_container() {
            return Ok(None);
        }
        self.bucket_path(uri)?;
        match std::fs::metadata(self.object_path(uri)) {
            Ok(metadata) if metadata.is_file() => {
                Ok(Some(self.object_info(uri.clone(), &metadata)))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn get(&self, uri: &ObjectUri) -> std::io::Result<Vec<u8>> {
        let mut data = Vec::new();
        self.open(uri)?.read_to_end(&mut data)?;
        Ok(data)
    }

    fn open(&self, uri: &ObjectUri) -> std::io::Result<Box<dyn Read + Send>> {
        if uri.is_container() {
            return Err(invalid_input("open", format!("'{uri}' is a container")));
        }
        let file = File::open(self.object_path(uri))?;
        Ok(Box::new(std::io::BufReader::new(file)))
    }

    fn put(&self, uri: &ObjectUri, data: &[u8], mode: PutMode) -> std::io::Result<()> {
        self.write_atomic(uri, mode, |file| file.write_all(data))
    }

    fn put_file(&self, uri: &ObjectUri, path: &Path, mode: PutMode) -> std::io::Result<()> {
        let mut source = File::open(path)?;
        self.write_atomic(uri, mode, |file| {
            std::io::copy(&mut source, file)?;
            Ok(())
        })
    }

    fn delete(&self, uri: &ObjectUri) -> std::io::Result<()> {
        if uri.is_container() {
            return Err(invalid_input("delete", format!("'{uri}' is a container")));
        }
        remove_if_exists(&self.object_path(uri))?;
        remove_if_exists(&self.metadata_path(uri))
    }

    fn copy(&self, from: &ObjectUri, to: &ObjectUri) -> std::io::Result<()> {
        let source = self.object_path(from);
        self.put_file(to, &source, PutMode::Overwrite)?;
        let metadata = self.metadata(from)?;
        if metadata.is_empty() {
            return Ok(());
        }
        self.replace_metadata(to, &metadata)
    }

    fn metadata(&self, uri: &ObjectUri) -> std::io::Result<ObjectMetadata> {
        self.require_object(uri)?;
        match std::fs::read(self.metadata_path(uri)) {
            Ok(data) => serde_json::from_slice(&data)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ObjectMetadata::new()),
            Err(e) => Err(e),
        }
    }

    /// Writes the metadata file only; the object and its mtime are untouched.
    fn replace_metadata(&self, uri: &ObjectUri, metadata: &ObjectMetadata) -> std::io::Result<()> {
        let path = self.require_object(uri)?;
        let parent = path
            .parent()
            .ok_or_else(|| invalid_input("metadata", format!("'{uri}' has no parent")))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent)?;
        serde_json::to_writer(tmp.as_file_mut(), metadata)?;
        tmp.as_file_mut().flush()?;
        tmp.persist(self.metadata_path(uri)).map_err(|e| e.error)?;
        Ok(())
    }

    fn supports_conditional_put(&self) -> bool {
        true
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn relative_key(bucket_path: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(bucket_path).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        parts.push(component.as_os_str().to_str()?);
    }
    Some(parts.join("/"))
}

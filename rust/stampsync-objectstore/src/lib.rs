//! *Object Store* abstraction: a minimal, synchronous "storage service" client
//! covering the requests the reconciliation and publish paths issue against a
//! flat, S3-like keyspace (paginated listing, HEAD, whole-object GET/PUT,
//! DELETE and server-side COPY).

pub mod local_store;
pub mod memory_store;
#[cfg(feature = "s3")]
pub mod s3_store;
pub mod uri;

use std::{collections::BTreeMap, io::Read, path::Path};

use chrono::{DateTime, Utc};

pub use uri::ObjectUri;

/// Metadata of a single remote object, as reported by a listing or a HEAD request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub uri: ObjectUri,
    pub size: u64,
    /// Some listings omit the timestamp; a HEAD request is then needed to obtain it.
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// User-defined metadata of an object (the `x-amz-meta-*` headers on S3).
pub type ObjectMetadata = BTreeMap<String, String>;

/// One page of a listing. `next` is the continuation token for the following
/// page, `None` when the listing is exhausted.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    pub next: Option<String>,
}

/// Write disposition of a `put` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Replace any existing object.
    Overwrite,
    /// Fail with `io::ErrorKind::AlreadyExists` if the object exists.
    ///
    /// Stores that do not report [`ObjectStore::supports_conditional_put`] may
    /// implement this as a non-atomic check followed by a write.
    Create,
}

/// The `ObjectStore` trait represents a "storage service" abstraction.
///
/// Absence is reported as `io::ErrorKind::NotFound` (or `Ok(None)` from
/// [`ObjectStore::head`]); create-conflicts as `io::ErrorKind::AlreadyExists`.
pub trait ObjectStore: Send + Sync + 'static {
    /// Returns one page of objects whose key starts with the key of `prefix`,
    /// in lexicographic key order.
    fn list_page(&self, prefix: &ObjectUri, continuation: Option<&str>)
    -> std::io::Result<ListPage>;

    /// Returns the metadata of the object, or `None` if it does not exist.
    fn head(&self, uri: &ObjectUri) -> std::io::Result<Option<ObjectInfo>>;

    /// Reads the full content of the object.
    fn get(&self, uri: &ObjectUri) -> std::io::Result<Vec<u8>>;

    /// Opens the object for streaming reads.
    fn open(&self, uri: &ObjectUri) -> std::io::Result<Box<dyn Read + Send>> {
        let data = self.get(uri)?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    fn put(&self, uri: &ObjectUri, data: &[u8], mode: PutMode) -> std::io::Result<()>;

    /// Uploads the content of a local file.
    fn put_file(&self, uri: &ObjectUri, path: &Path, mode: PutMode) -> std::io::Result<()> {
        let data = std::fs::read(path)?;
        self.put(uri, &data, mode)
    }

    /// Deletes the object. Deleting a missing object succeeds.
    fn delete(&self, uri: &ObjectUri) -> std::io::Result<()>;

    /// Server-side copy of `from` to `to`, overwriting `to`.
    fn copy(&self, from: &ObjectUri, to: &ObjectUri) -> std::io::Result<()>;

    /// Returns the user metadata of the object, `NotFound` if it does not exist.
    fn metadata(&self, uri: &ObjectUri) -> std::io::Result<ObjectMetadata>;

    /// Replaces the user metadata of an existing object, keeping its content.
    ///
    /// Stores that cannot edit metadata in place rewrite the object, which
    /// also moves its modification time. Writes through `put` drop the
    /// metadata of the object they replace; `copy` carries it over.
    fn replace_metadata(&self, uri: &ObjectUri, metadata: &ObjectMetadata) -> std::io::Result<()>;

    /// Whether [`PutMode::Create`] is an atomic create-if-absent.
    fn supports_conditional_put(&self) -> bool {
        false
    }

    /// Lists all objects under the prefix, following continuation tokens
    /// until the listing is exhausted.
    fn list_all(&self, prefix: &ObjectUri) -> std::io::Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = self.list_page(prefix, continuation.as_deref())?;
            objects.extend(page.objects);
            match page.next {
                Some(next) if Some(&next) != continuation.as_ref() => continuation = Some(next),
                Some(_) => {
                    return Err(std::io::Error::other(format!(
                        "listing of '{prefix}' returned a repeated continuation token"
                    )));
                }
                None => break,
            }
        }
        Ok(objects)
    }

    fn exists(&self, uri: &ObjectUri) -> std::io::Result<bool> {
        Ok(self.head(uri)?.is_some())
    }
}

/// Maps a "bad uri" style failure into the `io::Error` shape the store trait uses.
pub(crate) fn invalid_input(op: &str, e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("{op}: invalid uri: {e}"),
    )
}

//! Object store fixtures with controlled modification times.

use std::{
    io::Read,
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, TimeZone, Utc};
use filetime::FileTime;
use stampsync_objectstore::{
    ListPage, ObjectInfo, ObjectMetadata, ObjectStore, ObjectUri, PutMode,
    local_store::LocalFsObjectStore, memory_store::MemoryObjectStore,
};

/// 2023-11-14T22:13:20Z; a round base for test timestamps.
pub const BASE_TIME: i64 = 1_700_000_000;

/// The UTC time `BASE_TIME + offset_seconds`.
pub fn ts(offset_seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(BASE_TIME + offset_seconds, 0)
        .single()
        .expect("valid timestamp")
}

pub fn uri(s: &str) -> ObjectUri {
    ObjectUri::parse(s).unwrap_or_else(|e| panic!("invalid test uri '{s}': {e}"))
}

/// A memory store holding `objects` as `(uri, content, offset_seconds)`.
pub fn memory_store(objects: &[(&str, &[u8], i64)]) -> Arc<MemoryObjectStore> {
    let store = Arc::new(MemoryObjectStore::new());
    for (u, data, offset) in objects {
        store.insert(&uri(u), data.to_vec(), ts(*offset));
    }
    store
}

/// Writes an object to a local store and sets its mtime to `ts(offset_seconds)`.
pub fn put_local(
    store: &LocalFsObjectStore,
    object: &ObjectUri,
    data: &[u8],
    offset_seconds: i64,
) -> anyhow::Result<()> {
    store.create_bucket(object.bucket())?;
    store.put(object, data, PutMode::Overwrite)?;
    let time = FileTime::from_unix_time(BASE_TIME + offset_seconds, 0);
    filetime::set_file_times(store.object_path(object), time, time)?;
    Ok(())
}

/// Simulates a concurrent writer: `head` reports the given objects as absent
/// for a limited number of calls although they exist, so the next create-only
/// write conflicts. Every other request goes to the inner store.
pub struct ConcealingStore {
    inner: Arc<dyn ObjectStore>,
    hidden: Mutex<Vec<(ObjectUri, usize)>>,
}

impl ConcealingStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> ConcealingStore {
        ConcealingStore {
            inner,
            hidden: Mutex::new(Vec::new()),
        }
    }

    /// Hides `uri` from the next `head_calls` HEAD requests.
    pub fn conceal(&self, uri: &ObjectUri, head_calls: usize) {
        self.hidden.lock().unwrap().push((uri.clone(), head_calls));
    }

    fn take_hidden(&self, uri: &ObjectUri) -> bool {
        let mut hidden = self.hidden.lock().unwrap();
        match hidden.iter_mut().find(|(u, left)| u == uri && *left > 0) {
            Some((_, left)) => {
                *left -= 1;
                true
            }
            None => false,
        }
    }
}

impl ObjectStore for ConcealingStore {
    fn list_page(
        &self,
        prefix: &ObjectUri,
        continuation: Option<&str>,
    ) -> std::io::Result<ListPage> {
        self.inner.list_page(prefix, continuation)
    }

    fn head(&self, uri: &ObjectUri) -> std::io::Result<Option<ObjectInfo>> {
        if self.take_hidden(uri) {
            return Ok(None);
        }
        self.inner.head(uri)
    }

    fn get(&self, uri: &ObjectUri) -> std::io::Result<Vec<u8>> {
        self.inner.get(uri)
    }

    fn open(&self, uri: &ObjectUri) -> std::io::Result<Box<dyn Read + Send>> {
        self.inner.open(uri)
    }

    fn put(&self, uri: &ObjectUri, data: &[u8], mode: PutMode) -> std::io::Result<()> {
        self.inner.put(uri, data, mode)
    }

    fn put_file(&self, uri: &ObjectUri, path: &Path, mode: PutMode) -> std::io::Result<()> {
        self.inner.put_file(uri, path, mode)
    }

    fn delete(&self, uri: &ObjectUri) -> std::io::Result<()> {
        self.inner.delete(uri)
    }

    fn copy(&self, from: &ObjectUri, to: &ObjectUri) -> std::io::Result<()> {
        self.inner.copy(from, to)
    }

    fn metadata(&self, uri: &ObjectUri) -> std::io::Result<ObjectMetadata> {
        self.inner.metadata(uri)
    }

    fn replace_metadata(&self, uri: &ObjectUri, metadata: &ObjectMetadata) -> std::io::Result<()> {
        self.inner.replace_metadata(uri, metadata)
    }

    fn supports_conditional_put(&self) -> bool {
        self.inner.supports_conditional_put()
    }
}

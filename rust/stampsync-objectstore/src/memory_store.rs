//! An in-memory `ObjectStore` with a controllable clock and fault injection.
//! Used by tests and dry runs; listings are deterministic.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use xxhash_rust::xxh3::xxh3_64;

use crate::{ListPage, ObjectInfo, ObjectMetadata, ObjectStore, PutMode, uri::ObjectUri};

pub const DEFAULT_PAGE_SIZE: usize = 1000;

struct Entry {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
    metadata: ObjectMetadata,
}

/// Number of requests served, per request type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    pub list: usize,
    pub head: usize,
    pub get: usize,
    pub put: usize,
    pub delete: usize,
    pub copy: usize,
}

#[derive(Default)]
struct Faults {
    listing: bool,
    head: HashSet<ObjectUri>,
    get: HashSet<ObjectUri>,
    put: HashSet<ObjectUri>,
    corrupt_puts: usize,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectUri, Entry>,
    clock: Option<DateTime<Utc>>,
    omit_listing_timestamps: bool,
    faults: Faults,
    counts: RequestCounts,
}

pub struct MemoryObjectStore {
    state: Mutex<State>,
    page_size: usize,
    conditional_put: bool,
}

impl MemoryObjectStore {
    pub fn new() -> MemoryObjectStore {
        MemoryObjectStore {
            state: Mutex::new(State::default()),
            page_size: DEFAULT_PAGE_SIZE,
            conditional_put: true,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> MemoryObjectStore {
        self.page_size = page_size.max(1);
        self
    }

    /// Reports no conditional-put support, so callers fall back to an
    /// existence check followed by a plain write.
    pub fn without_conditional_put(mut self) -> MemoryObjectStore {
        self.conditional_put = false;
        self
    }

    /// Fixes the timestamp assigned to subsequent writes. `None` restores the
    /// system clock.
    pub fn set_clock(&self, now: Option<DateTime<Utc>>) {
        self.state.lock().unwrap().clock = now;
    }

    /// Stores an object with an explicit modification time, bypassing the
    /// request counters and fault injection.
    pub fn insert(&self, uri: &ObjectUri, data: impl Into<Vec<u8>>, last_modified: DateTime<Utc>) {
        self.state.lock().unwrap().objects.insert(
            uri.clone(),
            Entry {
                data: data.into(),
                last_modified,
                metadata: ObjectMetadata::new(),
            },
        );
    }

    /// Changes the modification time of an existing object. Returns `false`
    /// if the object does not exist.
    pub fn set_last_modified(&self, uri: &ObjectUri, last_modified: DateTime<Utc>) -> bool {
        match self.state.lock().unwrap().objects.get_mut(uri) {
            Some(entry) => {
                entry.last_modified = last_modified;
                true
            }
            None => false,
        }
    }

    /// Content of an object, bypassing the request counters.
    pub fn content(&self, uri: &ObjectUri) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(uri)
            .map(|e| e.data.clone())
    }

    pub fn keys(&self) -> Vec<ObjectUri> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    /// Listings report no modification times, forcing callers to HEAD.
    pub fn omit_listing_timestamps(&self, omit: bool) {
        self.state.lock().unwrap().omit_listing_timestamps = omit;
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state.lock().unwrap().faults.listing = fail;
    }

    pub fn fail_head(&self, uri: &ObjectUri) {
        self.state.lock().unwrap().faults.head.insert(uri.clone());
    }

    pub fn fail_get(&self, uri: &ObjectUri) {
        self.state.lock().unwrap().faults.get.insert(uri.clone());
    }

    pub fn fail_put(&self, uri: &ObjectUri) {
        self.state.lock().unwrap().faults.put.insert(uri.clone());
    }

    /// The next `count` writes store a damaged copy of the payload.
    pub fn corrupt_puts(&self, count: usize) {
        self.state.lock().unwrap().faults.corrupt_puts = count;
    }

    pub fn clear_faults(&self) {
        self.state.lock().unwrap().faults = Faults::default();
    }

    pub fn requests(&self) -> RequestCounts {
        self.state.lock().unwrap().counts
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    fn info(&self, uri: &ObjectUri, entry: &Entry, listing: bool) -> ObjectInfo {
        ObjectInfo {
            uri: uri.clone(),
            size: entry.data.len() as u64,
            last_modified: if listing && self.omit_listing_timestamps {
                None
            } else {
                Some(entry.last_modified)
            },
            etag: Some(format!("{:016x}", xxh3_64(&entry.data))),
        }
    }

    fn write(&mut self, uri: &ObjectUri, data: &[u8], metadata: ObjectMetadata) {
        let mut data = data.to_vec();
        if self.faults.corrupt_puts > 0 {
            self.faults.corrupt_puts -= 1;
            match data.last_mut() {
                Some(last) => *last ^= 0xff,
                None => data.push(0),
            }
        }
        let last_modified = self.now();
        self.objects.insert(
            uri.clone(),
            Entry {
                data,
                last_modified,
                metadata,
            },
        );
    }
}

fn injected(op: &str, uri: &ObjectUri) -> std::io::Error {
    std::io::Error::other(format!("injected {op} failure for '{uri}'"))
}

fn not_found(uri: &ObjectUri) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("object '{uri}' not found"),
    )
}

impl ObjectStore for MemoryObjectStore {
    fn list_page(
        &self,
        prefix: &ObjectUri,
        continuation: Option<&str>,
    ) -> std::io::Result<ListPage> {
        let mut state = self.state.lock().unwrap();
        state.counts.list += 1;
        if state.faults.listing {
            return Err(injected("list", prefix));
        }

        let mut objects = Vec::new();
        let mut next = None;
        for (uri, entry) in state.objects.range(prefix.clone()..) {
            if !prefix.has_in_scope(uri) {
                break;
            }
            if continuation.is_some_and(|after| uri.key() <= after) {
                continue;
            }
            if objects.len() == self.page_size {
                next = objects.last().map(|o: &ObjectInfo| o.uri.key().to_string());
                break;
            }
            objects.push(state.info(uri, entry, true));
        }
        Ok(ListPage { objects, next })
    }

    fn head(&self, uri: &ObjectUri) -> std::io::Result<Option<ObjectInfo>> {
        let mut state = self.state.lock().unwrap();
        state.counts.head += 1;
        if state.faults.head.contains(uri) {
            return Err(injected("head", uri));
        }
        Ok(state.objects.get(uri).map(|e| state.info(uri, e, false)))
    }

    fn get(&self, uri: &ObjectUri) -> std::io::Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.counts.get += 1;
        if state.faults.get.contains(uri) {
            return Err(injected("get", uri));
        }
        state
            .objects
            .get(uri)
            .map(|e| e.data.clone())
            .ok_or_else(|| not_found(uri))
    }

    fn put(&self, uri: &ObjectUri, data: &[u8], mode: PutMode) -> std::io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.counts.put += 1;
        if state.faults.put.contains(uri) {
            return Err(injected("put", uri));
        }
        if mode == PutMode::Create && state.objects.contains_key(uri) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("object '{uri}' already exists"),
            ));
        }
        state.write(uri, data, ObjectMetadata::new());
        Ok(())
    }

    fn delete(&self, uri: &ObjectUri) -> std::io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.counts.delete += 1;
        state.objects.remove(uri);
        Ok(())
    }

    fn copy(&self, from: &ObjectUri, to: &ObjectUri) -> std::io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.counts.copy += 1;
        if state.faults.put.contains(to) {
            return Err(injected("copy", to));
        }
        let (data, metadata) = state
            .objects
            .get(from)
            .map(|e| (e.data.clone(), e.metadata.clone()))
            .ok_or_else(|| not_found(from))?;
        state.write(to, &data, metadata);
        Ok(())
    }

    fn metadata(&self, uri: &ObjectUri) -> std::io::Result<ObjectMetadata> {
        let mut state = self.state.lock().unwrap();
        state.counts.head += 1;
        if state.faults.head.contains(uri) {
            return Err(injected("head", uri));
        }
        state
            .objects
            .get(uri)
            .map(|e| e.metadata.clone())
            .ok_or_else(|| not_found(uri))
    }

    /// Behaves like an S3 copy onto itself: the modification time moves to
    /// the store clock.
    fn replace_metadata(&self, uri: &ObjectUri, metadata: &ObjectMetadata) -> std::io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.counts.copy += 1;
        if state.faults.put.contains(uri) {
            return Err(injected("copy", uri));
        }
        let now = state.now();
        let entry = state.objects.get_mut(uri).ok_or_else(|| not_found(uri))?;
        entry.metadata = metadata.clone();
        entry.last_modified = now;
        Ok(())
    }

    fn supports_conditional_put(&self) -> bool {
        self.conditional_put
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn uri(s: &str) -> ObjectUri {
        ObjectUri::parse(s).unwrap()
    }

    #[test]
    fn test_pagination_covers_every_key_once() {
        let store = MemoryObjectStore::new().with_page_size(3);
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for i in 0..10 {
            store.insert(&uri(&format!("s3://b/p/{i:02}")), "x", ts);
        }
        store.insert(&uri("s3://b/q/00"), "x", ts);

        let all = store.list_all(&uri("s3://b/p/")).unwrap();
        assert_eq!(all.len(), 10);
        assert_eq!(all[0].uri.key(), "p/00");
        assert_eq!(all[9].uri.key(), "p/09");
        assert_eq!(store.requests().list, 4);
    }

    #[test]
    fn test_faults_and_timestamps() {
        let store = MemoryObjectStore::new();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = uri("s3://b/a");
        store.insert(&a, "x", ts);

        store.omit_listing_timestamps(true);
        let listed = store.list_all(&uri("s3://b/")).unwrap();
        assert_eq!(listed[0].last_modified, None);
        assert_eq!(store.head(&a).unwrap().unwrap().last_modified, Some(ts));

        store.fail_head(&a);
        assert!(store.head(&a).is_err());
        store.fail_listing(true);
        assert!(store.list_all(&uri("s3://b/")).is_err());
        store.clear_faults();
        assert!(store.head(&a).is_ok());
    }

    #[test]
    fn test_clock_and_create() {
        let store = MemoryObjectStore::new();
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        store.set_clock(Some(ts));
        let a = uri("s3://b/a");
        store.put(&a, b"1", PutMode::Create).unwrap();
        assert_eq!(store.head(&a).unwrap().unwrap().last_modified, Some(ts));
        let err = store.put(&a, b"2", PutMode::Create).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(store.content(&a).unwrap(), b"1");
    }

    #[test]
    fn test_metadata_follows_copies_not_puts() {
        let store = MemoryObjectStore::new();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let a = uri("s3://b/a");
        store.insert(&a, "x", ts);
        assert!(store.metadata(&a).unwrap().is_empty());

        store.set_clock(Some(later));
        let metadata = ObjectMetadata::from([("k".to_string(), "v".to_string())]);
        store.replace_metadata(&a, &metadata).unwrap();
        assert_eq!(store.metadata(&a).unwrap(), metadata);
        assert_eq!(store.head(&a).unwrap().unwrap().last_modified, Some(later));
        assert_eq!(store.content(&a).unwrap(), b"x");

        let b = uri("s3://b/b");
        store.copy(&a, &b).unwrap();
        assert_eq!(store.metadata(&b).unwrap(), metadata);
        store.put(&a, b"y", PutMode::Overwrite).unwrap();
        assert!(store.metadata(&a).unwrap().is_empty());

        let missing = uri("s3://b/missing");
        assert_eq!(
            store.replace_metadata(&missing, &metadata).unwrap_err().kind(),
            std::io::ErrorKind::NotFound
        );
    }
}

//! Mirrors the state of a remote prefix into local stamps without reading
//! any object content.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use stampsync_common::error::Error;
use stampsync_objectstore::{ObjectInfo, ObjectStore, ObjectUri};
use walkdir::WalkDir;

use crate::{
    path_mapper::PathMapper,
    stamp::{Freshness, StampId, StampMode, write_stamp},
};

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub mode: StampMode,
    /// Key suffixes to consider (any-of); empty considers every key.
    pub extension_filter: Vec<String>,
    /// Delete local stamps in scope that no longer have a remote counterpart.
    pub remove_dangling: bool,
    /// HEAD every object instead of trusting the listing's timestamps.
    pub refresh_metadata: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            mode: StampMode::per_object(),
            extension_filter: Vec::new(),
            remove_dangling: false,
            refresh_metadata: false,
        }
    }
}

impl ReconcileOptions {
    fn accepts_key(&self, key: &str) -> bool {
        self.extension_filter.is_empty()
            || self
                .extension_filter
                .iter()
                .any(|ext| key.ends_with(ext.as_str()))
    }
}

/// Lists every object under `prefix` whose key matches `pattern`
/// (a glob over the full key), excluding folder placeholders.
pub fn list_objects(
    store: &dyn ObjectStore,
    prefix: &ObjectUri,
    pattern: Option<&str>,
) -> stampsync_common::Result<Vec<ObjectUri>> {
    let pattern = pattern
        .map(glob::Pattern::new)
        .transpose()
        .map_err(|e| Error::invalid_arg("glob", e.to_string()))?;
    let objects = store
        .list_all(prefix)
        .map_err(|e| Error::listing(prefix.to_string(), e))?;
    Ok(objects
        .into_iter()
        .map(|o| o.uri)
        .filter(|uri| !uri.is_container())
        .filter(|uri| pattern.as_ref().is_none_or(|p| p.matches(uri.key())))
        .collect())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed_dangling: usize,
    pub skipped: usize,
}

pub struct StampReconciler {
    store: Arc<dyn ObjectStore>,
    mapper: PathMapper,
}

impl StampReconciler {
    pub fn new(store: Arc<dyn ObjectStore>, mapper: PathMapper) -> StampReconciler {
        StampReconciler { store, mapper }
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    /// See [`list_objects`].
    pub fn list(
        &self,
        prefix: &ObjectUri,
        pattern: Option<&str>,
    ) -> stampsync_common::Result<Vec<ObjectUri>> {
        list_objects(self.store.as_ref(), prefix, pattern)
    }

    pub fn reconcile(
        &self,
        prefix: &ObjectUri,
        options: &ReconcileOptions,
    ) -> stampsync_common::Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        // The whole listing is materialized before the first local write.
        let objects = self
            .store
            .list_all(prefix)
            .map_err(|e| Error::listing(prefix.to_string(), e))?;
        log::info!("listed {} objects under {prefix}", objects.len());

        // Every listed key keeps its stamp from being removed as dangling,
        // including the ones whose freshness could not be determined.
        let mut listed: BTreeSet<StampId> = BTreeSet::new();
        let mut incomplete: BTreeSet<StampId> = BTreeSet::new();
        let mut desired: BTreeMap<StampId, Freshness> = BTreeMap::new();
        for object in objects {
            if object.uri.is_container() || !options.accepts_key(object.uri.key()) {
                continue;
            }
            let Some(id) = options.mode.stamp_id(object.uri.key()) else {
                log::warn!(
                    "skipping {}: not enough key components for the directory level",
                    object.uri
                );
                report.skipped += 1;
                continue;
            };
            listed.insert(id.clone());
            let Some(freshness) = self.freshness_of(&object, options) else {
                report.skipped += 1;
                incomplete.insert(id);
                continue;
            };
            desired
                .entry(id)
                .and_modify(|f| *f = (*f).max(freshness))
                .or_insert(freshness);
        }
        // A group missing a member's mtime has no reliable maximum.
        desired.retain(|id, _| !incomplete.contains(id));

        for (id, freshness) in &desired {
            let path = self.mapper.stamp_path(prefix.bucket(), id, &options.mode)?;
            match Freshness::of_path(&path)? {
                None => {
                    write_stamp(&path, *freshness)?;
                    log::info!("created stamp {} ({freshness})", path.display());
                    report.created += 1;
                }
                Some(current) if current != *freshness => {
                    write_stamp(&path, *freshness)?;
                    log::debug!(
                        "updated stamp {} from {current} to {freshness}",
                        path.display()
                    );
                    report.updated += 1;
                }
                Some(_) => report.unchanged += 1,
            }
        }

        if options.remove_dangling {
            let keep: BTreeSet<&StampId> = listed.iter().collect();
            report.removed_dangling = self.remove_dangling(prefix, options, &keep)?;
        }

        log::info!(
            "reconciled {prefix}: {} created, {} updated, {} unchanged, {} removed, {} skipped",
            report.created,
            report.updated,
            report.unchanged,
            report.removed_dangling,
            report.skipped
        );
        Ok(report)
    }

    fn freshness_of(&self, object: &ObjectInfo, options: &ReconcileOptions) -> Option<Freshness> {
        if let (Some(last_modified), false) = (object.last_modified, options.refresh_metadata) {
            return Some(last_modified.into());
        }
        match self.store.head(&object.uri) {
            Ok(Some(info)) => match info.last_modified {
                Some(last_modified) => Some(last_modified.into()),
                None => {
                    log::warn!("skipping {}: store reports no modification time", object.uri);
                    None
                }
            },
            Ok(None) => {
                log::warn!("skipping {}: object vanished after listing", object.uri);
                None
            }
            Err(e) => {
                log::warn!(
                    "skipping {}: {}",
                    object.uri,
                    Error::transient_store(object.uri.to_string(), e)
                );
                None
            }
        }
    }

    fn remove_dangling(
        &self,
        prefix: &ObjectUri,
        options: &ReconcileOptions,
        keep: &BTreeSet<&StampId>,
    ) -> stampsync_common::Result<usize> {
        let walk_root = self.scan_root(prefix, &options.mode);
        if !walk_root.is_dir() {
            return Ok(0);
        }

        let mut candidates = Vec::new();
        for entry in WalkDir::new(&walk_root).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(walk_root.as_path()).display().to_string();
                Error::io(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(id) = self.dangling_candidate(entry.path(), prefix, options, keep) {
                candidates.push((entry.into_path(), id));
            }
        }

        let mut removed = 0;
        for (path, id) in candidates {
            let metadata =
                std::fs::metadata(&path).map_err(|e| Error::io(path.display().to_string(), e))?;
            // Stamps are empty; anything with content is real data.
            if metadata.len() != 0 {
                continue;
            }
            std::fs::remove_file(&path).map_err(|e| Error::io(path.display().to_string(), e))?;
            log::info!("removed dangling stamp {} ({})", path.display(), id.key());
            removed += 1;
        }
        Ok(removed)
    }

    fn dangling_candidate(
        &self,
        path: &Path,
        prefix: &ObjectUri,
        options: &ReconcileOptions,
        keep: &BTreeSet<&StampId>,
    ) -> Option<StampId> {
        let (uri, id) = self.mapper.stamp_id_for_local(path, &options.mode)?;
        if uri.bucket() != prefix.bucket() || keep.contains(&id) {
            return None;
        }
        match &options.mode {
            StampMode::PerObject { .. } => {
                (prefix.has_in_scope(&uri) && options.accepts_key(uri.key())).then_some(id)
            }
            // A group is only in scope when the listing covered all of it.
            StampMode::PerDirectory { .. } => {
                format!("{}/", uri.key()).starts_with(prefix.key()).then_some(id)
            }
        }
    }

    /// The local directory holding every stamp that may belong to `prefix`.
    fn scan_root(&self, prefix: &ObjectUri, mode: &StampMode) -> PathBuf {
        let mut components: Vec<&str> = prefix
            .container_key()
            .split('/')
            .filter(|c| !c.is_empty())
            .collect();
        // Directory stamps sit next to the directory they stand for.
        if matches!(mode, StampMode::PerDirectory { .. }) {
            components.pop();
        }
        let mut root = self.mapper.bucket_root(prefix.bucket());
        root.extend(components);
        root
    }
}

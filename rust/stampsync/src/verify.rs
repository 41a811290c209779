//! Verification sweep: fully reads and decodes every object under a prefix
//! and reports (optionally deletes) the ones that do not decode.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use regex::Regex;
use serde::Serialize;
use stampsync_common::error::Error;
use stampsync_objectstore::{ObjectStore, ObjectUri};
use stampsync_records::{JsonLinesDecoder, RecordDecoder};

/// Number of keys per bulk-deletion request accepted by S3.
pub const DELETION_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Key suffixes to check (any-of); empty checks every object.
    pub extensions: Vec<String>,
    pub delete_corrupted: bool,
    /// When a corrupted key ends with this suffix, the key without it is
    /// deleted as well (e.g. the data file of a corrupted `.log.gz`).
    pub companion_suffix: Option<String>,
    /// Objects with a line matching this pattern are reported as flagged.
    pub flag_pattern: Option<Regex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptedObject {
    pub uri: ObjectUri,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub checked: usize,
    pub corrupted: Vec<CorruptedObject>,
    pub deleted: Vec<ObjectUri>,
    pub flagged: Vec<ObjectUri>,
}

pub struct VerificationSweep {
    store: Arc<dyn ObjectStore>,
    decoder: Box<dyn RecordDecoder>,
}

impl VerificationSweep {
    pub fn new(store: Arc<dyn ObjectStore>) -> VerificationSweep {
        VerificationSweep {
            store,
            decoder: Box::new(JsonLinesDecoder),
        }
    }

    pub fn with_decoder(mut self, decoder: impl RecordDecoder + 'static) -> VerificationSweep {
        self.decoder = Box::new(decoder);
        self
    }

    pub fn verify(
        &self,
        prefix: &ObjectUri,
        options: &VerifyOptions,
    ) -> stampsync_common::Result<VerifyReport> {
        let objects = self
            .store
            .list_all(prefix)
            .map_err(|e| Error::listing(prefix.to_string(), e))?;

        let mut report = VerifyReport::default();
        for object in objects {
            let uri = object.uri;
            if uri.is_container() || !matches_extension(uri.key(), &options.extensions) {
                continue;
            }
            report.checked += 1;
            match self.check(&uri, options.flag_pattern.as_ref()) {
                Ok(flagged) => {
                    if flagged {
                        log::info!("pattern found in {uri}");
                        report.flagged.push(uri);
                    }
                }
                Err(reason) => {
                    log::warn!("corrupted object {uri}: {reason}");
                    report.corrupted.push(CorruptedObject { uri, reason });
                }
            }
            if report.checked % 100 == 0 {
                log::info!(
                    "progress: {} objects checked, {} corrupted",
                    report.checked,
                    report.corrupted.len()
                );
            }
        }

        if options.delete_corrupted {
            for corrupted in &report.corrupted {
                self.delete(&corrupted.uri, &mut report.deleted);
                if let Some(companion) = options
                    .companion_suffix
                    .as_deref()
                    .and_then(|suffix| corrupted.uri.strip_suffix(suffix))
                {
                    match self.store.exists(&companion) {
                        Ok(true) => self.delete(&companion, &mut report.deleted),
                        Ok(false) => log::debug!("companion does not exist: {companion}"),
                        Err(e) => log::warn!("cannot check companion {companion}: {e}"),
                    }
                }
            }
        }

        log::info!(
            "verified {prefix}: {} checked, {} corrupted, {} deleted, {} flagged",
            report.checked,
            report.corrupted.len(),
            report.deleted.len(),
            report.flagged.len()
        );
        Ok(report)
    }

    /// Decodes one object. `Ok(true)` when a line matched `flag`.
    fn check(&self, uri: &ObjectUri, flag: Option<&Regex>) -> Result<bool, String> {
        let mut reader = self
            .store
            .open(uri)
            .map_err(|e| format!("read failed: {e}"))?;
        let mut matched = false;
        let mut on_record = |line: &str| {
            if !matched && flag.is_some_and(|re| re.is_match(line)) {
                matched = true;
            }
        };
        self.decoder
            .decode(&uri.to_string(), &mut reader, &mut on_record)
            .map_err(|e| match e.into_kind() {
                stampsync_common::error::ErrorKind::CorruptedObject { reason, .. } => reason,
                other => other.to_string(),
            })?;
        Ok(matched)
    }

    fn delete(&self, uri: &ObjectUri, deleted: &mut Vec<ObjectUri>) {
        match self.store.delete(uri) {
            Ok(()) => {
                log::warn!("deleted {uri}");
                deleted.push(uri.clone());
            }
            Err(e) => log::error!("failed to delete {uri}: {e}"),
        }
    }
}

fn matches_extension(key: &str, extensions: &[String]) -> bool {
    extensions.is_empty() || extensions.iter().any(|ext| key.ends_with(ext.as_str()))
}

#[derive(Serialize)]
struct DeletionBatch<'a> {
    #[serde(rename = "Objects")]
    objects: Vec<DeletionKey<'a>>,
}

#[derive(Serialize)]
struct DeletionKey<'a> {
    #[serde(rename = "Key")]
    key: &'a str,
}

/// Writes bulk-deletion request bodies (`{"Objects":[{"Key":...}]}`) with at
/// most [`DELETION_BATCH_SIZE`] keys each. For `path = delete.json` the
/// batches are `delete_00.json`, `delete_01.json`, ...
pub fn write_deletion_manifest(
    keys: &[ObjectUri],
    path: &Path,
) -> stampsync_common::Result<Vec<PathBuf>> {
    if keys.is_empty() {
        log::warn!("no keys to write for deletion");
        return Ok(Vec::new());
    }
    let mut written = Vec::new();
    for (batch_num, batch) in keys.chunks(DELETION_BATCH_SIZE).enumerate() {
        let batch_path = batch_file_name(path, batch_num);
        let body = DeletionBatch {
            objects: batch.iter().map(|uri| DeletionKey { key: uri.key() }).collect(),
        };
        let json = serde_json::to_vec_pretty(&body)
            .map_err(|e| Error::json(batch_path.display().to_string(), e))?;
        std::fs::write(&batch_path, json)
            .map_err(|e| Error::io(batch_path.display().to_string(), e))?;
        log::info!(
            "wrote deletion batch {} with {} keys to {}",
            batch_num + 1,
            batch.len(),
            batch_path.display()
        );
        written.push(batch_path);
    }
    Ok(written)
}

fn batch_file_name(path: &Path, batch_num: usize) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "delete.json".to_string());
    let batch_name = match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}_{batch_num:02}.{ext}"),
        None => format!("{name}_{batch_num:02}"),
    };
    path.with_file_name(batch_name)
}

//! Publishing of locally produced outputs: validate, upload under a
//! never-overwrite policy, then shrink the local copy to a timestamp-only stamp.

use std::{
    fs::{File, OpenOptions},
    io::Read,
    path::Path,
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use filetime::FileTime;
use stampsync_common::error::Error;
use stampsync_objectstore::{ObjectStore, ObjectUri, PutMode};
use stampsync_records::Validator;
use xxhash_rust::xxh3::{Xxh3, xxh3_64};

use crate::{
    layout::CorpusLayout,
    stamp::Freshness,
    timestamp::{TimestampOptions, TimestampStamper, timestamp_of_file},
};

pub const DEFAULT_UPLOAD_ATTEMPTS: usize = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// The mtime given to a local output once it has been truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepTimestamp {
    /// The mtime the file had before truncation.
    Preserve,
    Now,
    At(DateTime<Utc>),
}

#[derive(Debug, Clone)]
pub struct FinalizePolicy {
    /// Skip the upload when the target already exists.
    pub quit_if_exists: bool,
    /// Read the uploaded object back and compare digests.
    pub verify_upload: bool,
    /// Truncate the local file after a successful upload.
    pub keep_timestamp_only: Option<KeepTimestamp>,
    pub attempts: usize,
    pub retry_delay: Duration,
    /// Attach the latest record timestamp of the file to the published object.
    pub timestamp_metadata: Option<TimestampOptions>,
    /// Reject targets whose key does not follow the corpus layout.
    pub corpus_layout: Option<CorpusLayout>,
}

impl Default for FinalizePolicy {
    fn default() -> Self {
        FinalizePolicy {
            quit_if_exists: true,
            verify_upload: false,
            keep_timestamp_only: None,
            attempts: DEFAULT_UPLOAD_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            timestamp_metadata: None,
            corpus_layout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Published { bytes: u64 },
    SkippedExists,
    ValidationFailed { reason: String },
}

pub struct UploadFinalizer {
    store: Arc<dyn ObjectStore>,
}

enum UploadResult {
    Uploaded,
    Exists,
}

impl UploadFinalizer {
    pub fn new(store: Arc<dyn ObjectStore>) -> UploadFinalizer {
        UploadFinalizer { store }
    }

    pub fn finalize(
        &self,
        local_path: &Path,
        target: &ObjectUri,
        policy: &FinalizePolicy,
        validator: &dyn Validator,
    ) -> stampsync_common::Result<FinalizeOutcome> {
        stampsync_common::verify_arg!(attempts, policy.attempts >= 1);
        if let Some(layout) = policy.corpus_layout {
            let key = layout.parse_key(target.key())?;
            log::debug!("publishing run {} unit {}", key.run_id, key.corpus_unit);
        }

        if policy.quit_if_exists && self.target_exists(target)? {
            log::info!(
                "target exists, skipping upload of {}: {target}",
                local_path.display()
            );
            return Ok(FinalizeOutcome::SkippedExists);
        }

        let metadata = std::fs::metadata(local_path)
            .map_err(|e| Error::io(local_path.display().to_string(), e))?;
        let before = FileTime::from_last_modification_time(&metadata);

        if let Err(reason) = validator.validate(local_path) {
            log::warn!("validation failed for {}: {reason}", local_path.display());
            remove_local(local_path);
            return Ok(FinalizeOutcome::ValidationFailed { reason });
        }

        match self.upload(local_path, target, policy) {
            Ok(UploadResult::Exists) => {
                log::info!("target was published concurrently, skipping: {target}");
                return Ok(FinalizeOutcome::SkippedExists);
            }
            Ok(UploadResult::Uploaded) => {}
            Err(e) => {
                // The target may hold an earlier or concurrent publication, so it is left as is.
                log::error!("upload of {} to {target} failed: {e}", local_path.display());
                remove_local(local_path);
                return Err(Error::transient_store(target.to_string(), e));
            }
        }
        log::info!(
            "published {} to {target} ({} bytes)",
            local_path.display(),
            metadata.len()
        );
        if let Some(options) = &policy.timestamp_metadata {
            self.attach_timestamp(local_path, target, options);
        }

        if let Some(keep) = policy.keep_timestamp_only {
            keep_timestamp_only(local_path, keep, before)?;
        }
        Ok(FinalizeOutcome::Published {
            bytes: metadata.len(),
        })
    }

    /// Uploads a companion of a primary output (e.g. its processing log).
    /// The companion is only published together with the primary and always
    /// replaces an existing object. Returns `false` if it was not uploaded.
    pub fn finalize_companion(
        &self,
        local_path: &Path,
        target: &ObjectUri,
        primary: &FinalizeOutcome,
        policy: &FinalizePolicy,
    ) -> stampsync_common::Result<bool> {
        if !matches!(primary, FinalizeOutcome::Published { .. }) {
            log::info!(
                "primary output not published, skipping companion {}",
                local_path.display()
            );
            return Ok(false);
        }
        let before = std::fs::metadata(local_path)
            .map(|m| FileTime::from_last_modification_time(&m))
            .map_err(|e| Error::io(local_path.display().to_string(), e))?;
        let companion_policy = FinalizePolicy {
            quit_if_exists: false,
            ..policy.clone()
        };
        match self.upload(local_path, target, &companion_policy) {
            Ok(_) => {
                log::info!("published companion {} to {target}", local_path.display());
                if let Some(keep) = policy.keep_timestamp_only {
                    keep_timestamp_only(local_path, keep, before)?;
                }
                Ok(true)
            }
            Err(e) => Err(Error::transient_store(target.to_string(), e)),
        }
    }

    /// A missing timestamp does not undo the publication; it is only logged.
    fn attach_timestamp(&self, local_path: &Path, target: &ObjectUri, options: &TimestampOptions) {
        let stamper = TimestampStamper::new(self.store.clone());
        let result = timestamp_of_file(local_path, &options.source)
            .and_then(|ts| stamper.stamp_with(target, &options.metadata_key, ts));
        match result {
            Ok(value) => log::info!("set {}={value} on {target}", options.metadata_key),
            Err(e) => log::error!("failed to set {} on {target}: {e}", options.metadata_key),
        }
    }

    fn target_exists(&self, target: &ObjectUri) -> stampsync_common::Result<bool> {
        self.store
            .exists(target)
            .map_err(|e| Error::transient_store(target.to_string(), e))
    }

    fn upload(
        &self,
        local_path: &Path,
        target: &ObjectUri,
        policy: &FinalizePolicy,
    ) -> std::io::Result<UploadResult> {
        let mode = if policy.quit_if_exists && self.store.supports_conditional_put() {
            PutMode::Create
        } else {
            PutMode::Overwrite
        };
        let digest = if policy.verify_upload {
            Some(file_digest(local_path)?)
        } else {
            None
        };

        let mut last_error = None;
        for attempt in 1..=policy.attempts {
            if attempt > 1 {
                std::thread::sleep(policy.retry_delay);
            }
            match self.store.put_file(target, local_path, mode) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    // A previous attempt may have landed despite reporting a failure.
                    if attempt > 1
                        && digest.is_some()
                        && self.remote_digest(target).ok() == digest
                    {
                        return Ok(UploadResult::Uploaded);
                    }
                    return Ok(UploadResult::Exists);
                }
                Err(e) => {
                    log::warn!(
                        "upload attempt {attempt}/{} to {target} failed: {e}",
                        policy.attempts
                    );
                    last_error = Some(e);
                    continue;
                }
            }

            let Some(expected) = digest else {
                return Ok(UploadResult::Uploaded);
            };
            match self.remote_digest(target) {
                Ok(actual) if actual == expected => return Ok(UploadResult::Uploaded),
                Ok(actual) => {
                    log::warn!(
                        "upload attempt {attempt}/{} to {target}: \
                         digest mismatch ({actual:016x} != {expected:016x})",
                        policy.attempts
                    );
                    // Only a create-only write proves the mismatched object is ours.
                    if mode == PutMode::Create {
                        if let Err(e) = self.store.delete(target) {
                            log::warn!("failed to remove mismatched upload {target}: {e}");
                        }
                    }
                    last_error = Some(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "uploaded content does not match the local file",
                    ));
                }
                Err(e) => {
                    log::warn!(
                        "upload attempt {attempt}/{}: cannot read back {target}: {e}",
                        policy.attempts
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| std::io::Error::other("no upload attempt was made")))
    }

    fn remote_digest(&self, target: &ObjectUri) -> std::io::Result<u64> {
        let data = self.store.get(target)?;
        Ok(xxh3_64(&data))
    }
}

fn file_digest(path: &Path) -> std::io::Result<u64> {
    let mut file = File::open(path)?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.digest())
}

/// Truncates `path` to zero bytes and sets its mtime per `keep`.
/// `before` is the mtime the file had before it was published.
pub fn keep_timestamp_only(
    path: &Path,
    keep: KeepTimestamp,
    before: FileTime,
) -> stampsync_common::Result<()> {
    let context = || path.display().to_string();
    OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_len(0))
        .map_err(|e| Error::io(context(), e))?;
    let time = match keep {
        KeepTimestamp::Preserve => before,
        KeepTimestamp::Now => FileTime::now(),
        KeepTimestamp::At(ts) => Freshness::from(ts).to_file_time(),
    };
    filetime::set_file_times(path, time, time).map_err(|e| Error::io(context(), e))?;
    log::debug!("truncated {} to a timestamp marker", path.display());
    Ok(())
}

fn remove_local(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::info!("removed local output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("failed to remove local output {}: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_keep_timestamp_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.jsonl.bz2");
        std::fs::write(&path, b"content").unwrap();
        let before = FileTime::from_unix_time(1_700_000_000, 0);
        filetime::set_file_mtime(&path, before).unwrap();

        keep_timestamp_only(&path, KeepTimestamp::Preserve, before).unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(metadata.len(), 0);
        assert_eq!(FileTime::from_last_modification_time(&metadata), before);

        let ts = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        keep_timestamp_only(&path, KeepTimestamp::At(ts), before).unwrap();
        assert_eq!(
            Freshness::of_path(&path).unwrap(),
            Some(Freshness::from(ts))
        );
    }

    #[test]
    fn test_file_digest_matches_buffer_digest() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        assert_eq!(file_digest(&path).unwrap(), xxh3_64(&data));
    }
}

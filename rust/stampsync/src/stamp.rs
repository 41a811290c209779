//! Local stamps: zero-byte marker files whose path encodes the identity of a
//! remote object (or group of objects) and whose mtime encodes its freshness.

use std::{fmt, fs::File, path::Path};

use chrono::{DateTime, TimeZone, Utc};
use filetime::FileTime;
use stampsync_common::error::Error;

pub const DEFAULT_DIRECTORY_STAMP_SUFFIX: &str = ".stamp";

/// A whole-second UTC timestamp.
///
/// Conversions from finer-grained times truncate downward, so a stamp is
/// never ahead of the time it was derived from, and reading it back from any
/// filesystem with one-second (or better) mtime precision yields the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Freshness(i64);

impl Freshness {
    pub fn from_unix_seconds(seconds: i64) -> Freshness {
        Freshness(seconds)
    }

    pub fn unix_seconds(&self) -> i64 {
        self.0
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn to_file_time(&self) -> FileTime {
        FileTime::from_unix_time(self.0, 0)
    }

    pub fn from_file_time(time: FileTime) -> Freshness {
        Freshness(time.unix_seconds())
    }

    /// Freshness of the mtime of a local file, `None` if it does not exist.
    pub fn of_path(path: &Path) -> stampsync_common::Result<Option<Freshness>> {
        match std::fs::metadata(path) {
            Ok(metadata) => Ok(Some(Freshness::from_file_time(
                FileTime::from_last_modification_time(&metadata),
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path.display().to_string(), e)),
        }
    }

    /// Sets both the access and the modification time of `path`.
    pub fn apply_to(&self, path: &Path) -> stampsync_common::Result<()> {
        let time = self.to_file_time();
        filetime::set_file_times(path, time, time)
            .map_err(|e| Error::io(path.display().to_string(), e))
    }
}

impl From<DateTime<Utc>> for Freshness {
    fn from(time: DateTime<Utc>) -> Self {
        // `timestamp` is the floor of the instant in whole seconds.
        Freshness(time.timestamp())
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}

/// The remote identity a stamp stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StampId {
    /// A single remote object.
    PerObject { key: String },
    /// Every object under `group/`.
    PerDirectory { group: String },
}

impl StampId {
    pub fn key(&self) -> &str {
        match self {
            StampId::PerObject { key } => key,
            StampId::PerDirectory { group } => group,
        }
    }
}

/// How remote objects map to local stamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StampMode {
    /// One stamp per object at the object's local path, optionally suffixed.
    PerObject { suffix: Option<String> },
    /// One stamp per group of objects: a key with `k` components belongs to
    /// the group formed by its first `k - level` components.
    PerDirectory { level: usize, suffix: String },
}

impl StampMode {
    pub fn per_object() -> StampMode {
        StampMode::PerObject { suffix: None }
    }

    pub fn per_object_with_suffix(suffix: impl Into<String>) -> StampMode {
        let suffix = suffix.into();
        StampMode::PerObject {
            suffix: if suffix.is_empty() { None } else { Some(suffix) },
        }
    }

    /// Directory stamps are always suffixed so a stamp can never collide with
    /// the directory it represents.
    pub fn per_directory(
        level: usize,
        suffix: impl Into<String>,
    ) -> stampsync_common::Result<StampMode> {
        let suffix = suffix.into();
        stampsync_common::verify_config!(
            level >= 1,
            "directory level must be at least 1, got {level}"
        );
        stampsync_common::verify_config!(
            !suffix.is_empty(),
            "per-directory stamps require a non-empty suffix"
        );
        Ok(StampMode::PerDirectory { level, suffix })
    }

    pub fn suffix(&self) -> Option<&str> {
        match self {
            StampMode::PerObject { suffix } => suffix.as_deref(),
            StampMode::PerDirectory { suffix, .. } => Some(suffix),
        }
    }

    /// Maps an object key to the stamp it contributes to, or `None` when the
    /// key has too few components for the directory level.
    pub fn stamp_id(&self, key: &str) -> Option<StampId> {
        match self {
            StampMode::PerObject { .. } => Some(StampId::PerObject {
                key: key.to_string(),
            }),
            StampMode::PerDirectory { level, .. } => {
                let parts: Vec<&str> = key.split('/').collect();
                if parts.len() <= *level {
                    None
                } else {
                    Some(StampId::PerDirectory {
                        group: parts[..parts.len() - level].join("/"),
                    })
                }
            }
        }
    }

    /// Rebuilds the stamp id from the remote key a stamp path maps to.
    pub(crate) fn id_for_key(&self, key: String) -> StampId {
        match self {
            StampMode::PerObject { .. } => StampId::PerObject { key },
            StampMode::PerDirectory { .. } => StampId::PerDirectory { group: key },
        }
    }
}

/// Creates (or reuses) the stamp at `path` and sets its mtime.
/// Returns `true` if the file was created.
///
/// An existing file keeps its content; only its times change.
pub fn write_stamp(path: &Path, freshness: Freshness) -> stampsync_common::Result<bool> {
    let created = if path.exists() {
        false
    } else {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io(parent.display().to_string(), e))?;
        }
        File::create(path).map_err(|e| Error::io(path.display().to_string(), e))?;
        true
    };
    freshness.apply_to(path)?;
    Ok(created)
}

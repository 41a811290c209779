//! Attaches the timestamp of the latest content of an object as user
//! metadata, so consumers can tell how recent a published file is without
//! downloading it.

use std::{io::BufRead, path::Path, sync::Arc};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use stampsync_common::error::Error;
use stampsync_objectstore::{ObjectMetadata, ObjectStore, ObjectUri};
use stampsync_records::{
    Compression,
    jsonl::{JsonLines, Line},
};

use crate::{aggregate::list_matching, stamp::Freshness};

pub const DEFAULT_METADATA_KEY: &str = "impresso-last-ts";
pub const DEFAULT_TIMESTAMP_FIELD: &str = "ts";
/// Selects [`TimestampSource::FileTime`] where a field name is expected.
pub const FILE_TIME_FIELD: &str = "__file__";
pub const DEFAULT_EXTENSIONS: [&str; 3] = [".jsonl", ".jsonl.bz2", ".jsonl.gz"];

/// Fields tried, in order, when the requested one is absent from a record.
const FALLBACK_FIELDS: [&str; 2] = ["cdt", "timestamp"];
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const CDT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampSource {
    /// A record field. With `all_lines` the latest timestamp of the file is
    /// taken, otherwise the first one found.
    Field { name: String, all_lines: bool },
    /// The modification time of the file itself.
    FileTime,
}

impl TimestampSource {
    pub fn from_field(field: &str, all_lines: bool) -> TimestampSource {
        if field == FILE_TIME_FIELD {
            TimestampSource::FileTime
        } else {
            TimestampSource::Field {
                name: field.to_string(),
                all_lines,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampOptions {
    pub metadata_key: String,
    pub source: TimestampSource,
    /// Replace a value that is already set.
    pub force: bool,
}

impl Default for TimestampOptions {
    fn default() -> Self {
        TimestampOptions {
            metadata_key: DEFAULT_METADATA_KEY.to_string(),
            source: TimestampSource::from_field(DEFAULT_TIMESTAMP_FIELD, false),
            force: false,
        }
    }
}

/// `YYYY-MM-DDTHH:MM:SSZ`, the form every stored value takes.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(ISO_FORMAT).to_string()
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    [ISO_FORMAT, CDT_FORMAT]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

/// The timestamp of one record: `field`, else the first fallback field
/// present. A present but unparseable value yields `None`.
pub fn record_timestamp(record: &Value, field: &str) -> Option<DateTime<Utc>> {
    let name = std::iter::once(field)
        .chain(FALLBACK_FIELDS)
        .find(|name| record.get(*name).is_some_and(|v| !v.is_null()))?;
    let parsed = record.get(name).and_then(Value::as_str).and_then(parse_timestamp);
    if parsed.is_none() {
        log::warn!("invalid timestamp in field '{name}': {}", record[name]);
    }
    parsed
}

/// Scans the JSON lines of `reader` for record timestamps. Malformed lines
/// and records without a usable timestamp are skipped.
pub fn extract_timestamp<R: BufRead>(
    reader: R,
    name: &str,
    field: &str,
    all_lines: bool,
) -> stampsync_common::Result<Option<DateTime<Utc>>> {
    let mut latest: Option<DateTime<Utc>> = None;
    for line in JsonLines::new(reader) {
        let line = line.map_err(|e| Error::corrupted(name, e.to_string()))?;
        let value = match line {
            Line::Record { value, .. } => value,
            Line::Malformed(malformed) => {
                log::warn!("{name}: skipping malformed line {}", malformed.line);
                continue;
            }
        };
        let Some(ts) = record_timestamp(&value, field) else {
            continue;
        };
        if !all_lines {
            return Ok(Some(ts));
        }
        latest = latest.max(Some(ts));
    }
    Ok(latest)
}

/// The timestamp of a local file per `source`; the file's mtime when no
/// record carries one.
pub fn timestamp_of_file(
    path: &Path,
    source: &TimestampSource,
) -> stampsync_common::Result<DateTime<Utc>> {
    let context = || path.display().to_string();
    let mtime = || -> stampsync_common::Result<DateTime<Utc>> {
        Freshness::of_path(path)?
            .map(|f| f.to_datetime())
            .ok_or_else(|| Error::io(context(), std::io::ErrorKind::NotFound.into()))
    };
    let TimestampSource::Field { name, all_lines } = source else {
        return mtime();
    };
    let file = std::fs::File::open(path).map_err(|e| Error::io(context(), e))?;
    let reader = Compression::from_name(&context())
        .reader(file)
        .map_err(|e| Error::corrupted(context(), e.to_string()))?;
    match extract_timestamp(std::io::BufReader::new(reader), &context(), name, *all_lines)? {
        Some(ts) => Ok(ts),
        None => {
            log::info!("no record timestamp in {}, using its mtime", context());
            mtime()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampOutcome {
    /// The key was set before and `force` was not given.
    AlreadySet { value: String },
    Updated { value: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct TimestampStamper {
    store: Arc<dyn ObjectStore>,
}

impl TimestampStamper {
    pub fn new(store: Arc<dyn ObjectStore>) -> TimestampStamper {
        TimestampStamper { store }
    }

    /// Sets the metadata key of one remote object from its own content.
    pub fn stamp_object(
        &self,
        uri: &ObjectUri,
        options: &TimestampOptions,
    ) -> stampsync_common::Result<TimestampOutcome> {
        let metadata = self
            .store
            .metadata(uri)
            .map_err(|e| Error::transient_store(uri.to_string(), e))?;
        if let (Some(value), false) = (metadata.get(&options.metadata_key), options.force) {
            log::debug!("{uri} already has {}={value}", options.metadata_key);
            return Ok(TimestampOutcome::AlreadySet {
                value: value.clone(),
            });
        }

        let from_records = match &options.source {
            TimestampSource::Field { name, all_lines } => {
                let reader = crate::Location::Remote(uri.clone()).open(self.store.as_ref())?;
                extract_timestamp(reader, &uri.to_string(), name, *all_lines)?
            }
            TimestampSource::FileTime => None,
        };
        let ts = match from_records {
            Some(ts) => ts,
            None => self.last_modified(uri)?,
        };
        let value = self.apply(uri, metadata, &options.metadata_key, ts)?;
        Ok(TimestampOutcome::Updated { value })
    }

    /// Sets the metadata key of `target` to a timestamp computed elsewhere
    /// (e.g. from the local file it was uploaded from).
    pub fn stamp_with(
        &self,
        target: &ObjectUri,
        metadata_key: &str,
        ts: DateTime<Utc>,
    ) -> stampsync_common::Result<String> {
        let metadata = self
            .store
            .metadata(target)
            .map_err(|e| Error::transient_store(target.to_string(), e))?;
        self.apply(target, metadata, metadata_key, ts)
    }

    /// Stamps every object under `prefix` ending with one of `extensions`.
    /// Objects that cannot be read or decoded are counted as failed and the
    /// sweep goes on.
    pub fn stamp_prefix(
        &self,
        prefix: &ObjectUri,
        extensions: &[String],
        options: &TimestampOptions,
    ) -> stampsync_common::Result<TimestampReport> {
        let keys = list_matching(self.store.as_ref(), prefix, extensions)?;
        let mut report = TimestampReport::default();
        for uri in &keys {
            match self.stamp_object(uri, options) {
                Ok(TimestampOutcome::Updated { value }) => {
                    log::info!("set {}={value} on {uri}", options.metadata_key);
                    report.processed += 1;
                }
                Ok(TimestampOutcome::AlreadySet { .. }) => report.skipped += 1,
                Err(e) if e.is_object_scoped() => {
                    log::warn!("skipping {uri}: {e}");
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        log::info!(
            "timestamps under {prefix}: {} processed, {} skipped, {} failed",
            report.processed,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    fn last_modified(&self, uri: &ObjectUri) -> stampsync_common::Result<DateTime<Utc>> {
        let info = self
            .store
            .head(uri)
            .map_err(|e| Error::transient_store(uri.to_string(), e))?;
        info.and_then(|info| info.last_modified).ok_or_else(|| {
            Error::transient_store(
                uri.to_string(),
                std::io::Error::other("store reports no modification time"),
            )
        })
    }

    fn apply(
        &self,
        uri: &ObjectUri,
        mut metadata: ObjectMetadata,
        key: &str,
        ts: DateTime<Utc>,
    ) -> stampsync_common::Result<String> {
        let value = format_timestamp(ts);
        metadata.insert(key.to_string(), value.clone());
        self.store
            .replace_metadata(uri, &metadata)
            .map_err(|e| Error::transient_store(uri.to_string(), e))?;
        let stored = self
            .store
            .metadata(uri)
            .map_err(|e| Error::transient_store(uri.to_string(), e))?;
        if stored.get(key) != Some(&value) {
            return Err(Error::transient_store(
                uri.to_string(),
                std::io::Error::other(format!("metadata '{key}' did not persist")),
            ));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_record_timestamp_fallbacks() {
        let ts = Utc.with_ymd_and_hms(1900, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(record_timestamp(&json!({"ts": "1900-01-02T03:04:05Z"}), "ts"), Some(ts));
        assert_eq!(record_timestamp(&json!({"cdt": "1900-01-02 03:04:05"}), "ts"), Some(ts));
        assert_eq!(
            record_timestamp(&json!({"timestamp": "1900-01-02T03:04:05Z"}), "ts"),
            Some(ts)
        );
        assert_eq!(record_timestamp(&json!({"ts": "yesterday"}), "ts"), None);
        assert_eq!(record_timestamp(&json!({"id": "x"}), "ts"), None);
        assert_eq!(format_timestamp(ts), "1900-01-02T03:04:05Z");
    }

    #[test]
    fn test_first_or_latest_timestamp() {
        let input = concat!(
            "{\"id\":1,\"ts\":\"2020-05-01T00:00:00Z\"}\n",
            "not json\n",
            "{\"id\":2}\n",
            "{\"id\":3,\"ts\":\"2021-01-01T12:00:00Z\"}\n",
            "{\"id\":4,\"ts\":\"2020-12-31T00:00:00Z\"}\n",
        );
        let first = extract_timestamp(input.as_bytes(), "input", "ts", false).unwrap();
        assert_eq!(first, Some(Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap()));
        let latest = extract_timestamp(input.as_bytes(), "input", "ts", true).unwrap();
        assert_eq!(latest, Some(Utc.with_ymd_and_hms(2021, 1, 1, 12, 0, 0).unwrap()));
        assert_eq!(extract_timestamp("{}\n".as_bytes(), "input", "ts", true).unwrap(), None);
    }

    #[test]
    fn test_source_from_field() {
        assert_eq!(TimestampSource::from_field(FILE_TIME_FIELD, true), TimestampSource::FileTime);
        assert_eq!(
            TimestampSource::from_field("cdt", true),
            TimestampSource::Field {
                name: "cdt".into(),
                all_lines: true
            }
        );
    }
}

//! Streams every record under a prefix through a transform into a single
//! JSON-lines output.

use std::{
    io::{BufRead, BufReader, BufWriter, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use serde_json::Value;
use stampsync_common::error::Error;
use stampsync_objectstore::{ObjectStore, ObjectUri, PutMode};
use stampsync_records::{
    Compression, RecordTransform,
    compression::CompressedWriter,
    jsonl::{JsonLines, JsonLinesWriter, Line},
};
use tempfile::NamedTempFile;

/// A remote object or a local file. As an output, its compression is chosen
/// by its extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Remote(ObjectUri),
    Local(PathBuf),
}

impl Location {
    fn name(&self) -> String {
        match self {
            Location::Remote(uri) => uri.key().to_string(),
            Location::Local(path) => path.display().to_string(),
        }
    }

    /// Opens the location for reading, decompressed per its extension.
    pub fn open(&self, store: &dyn ObjectStore) -> stampsync_common::Result<Box<dyn BufRead>> {
        let reader: Box<dyn Read> = match self {
            Location::Remote(uri) => store
                .open(uri)
                .map_err(|e| Error::transient_store(uri.to_string(), e))?,
            Location::Local(path) => Box::new(
                std::fs::File::open(path).map_err(|e| Error::io(path.display().to_string(), e))?,
            ),
        };
        let decompressed = Compression::from_name(&self.name())
            .reader(reader)
            .map_err(|e| Error::corrupted(self.to_string(), e.to_string()))?;
        Ok(Box::new(BufReader::new(decompressed)))
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Remote(uri) => write!(f, "{uri}"),
            Location::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// An output written to a temporary file first and moved (or uploaded) to
/// its location once complete, so a failed run leaves no partial output.
pub(crate) struct StagedOutput {
    staging: NamedTempFile,
    writer: JsonLinesWriter<CompressedWriter<BufWriter<std::fs::File>>>,
}

impl StagedOutput {
    pub(crate) fn create(output: &Location) -> stampsync_common::Result<StagedOutput> {
        let staging_dir = match output {
            Location::Local(path) => path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            Location::Remote(_) => std::env::temp_dir(),
        };
        let staging = tempfile::Builder::new()
            .prefix(".stampsync-staging")
            .tempfile_in(&staging_dir)
            .map_err(|e| Error::io(staging_dir.display().to_string(), e))?;
        let file = staging
            .reopen()
            .map_err(|e| Error::io(staging.path().display().to_string(), e))?;
        let compressed = Compression::from_name(&output.name())
            .writer(BufWriter::new(file))
            .map_err(|e| Error::io(staging.path().display().to_string(), e))?;
        Ok(StagedOutput {
            staging,
            writer: JsonLinesWriter::new(compressed),
        })
    }

    pub(crate) fn write_value(&mut self, value: &Value) -> stampsync_common::Result<()> {
        self.writer
            .write_value(value)
            .map_err(|e| Error::io(self.staging.path().display().to_string(), e))
    }

    /// Flushes the output and moves it into place. Returns the number of
    /// values written.
    pub(crate) fn commit(
        self,
        store: &dyn ObjectStore,
        output: &Location,
    ) -> stampsync_common::Result<u64> {
        let StagedOutput { staging, writer } = self;
        let written = writer.written();
        let staging_name = || staging.path().display().to_string();
        writer
            .into_inner()
            .finish()
            .and_then(|w| w.into_inner().map_err(|e| e.into_error()))
            .and_then(|f| f.sync_all())
            .map_err(|e| Error::io(staging_name(), e))?;

        match output {
            Location::Remote(target) => {
                store
                    .put_file(target, staging.path(), PutMode::Overwrite)
                    .map_err(|e| Error::transient_store(target.to_string(), e))?;
                log::info!("uploaded {written} lines to {target}");
            }
            Location::Local(path) => {
                staging
                    .persist(path)
                    .map_err(|e| Error::io(path.display().to_string(), e.error))?;
                log::info!("wrote {written} lines to {}", path.display());
            }
        }
        Ok(written)
    }
}

/// Every non-container object under `prefix` whose key ends with one of
/// `extensions` (any key when empty), in key order.
pub(crate) fn list_matching(
    store: &dyn ObjectStore,
    prefix: &ObjectUri,
    extensions: &[String],
) -> stampsync_common::Result<Vec<ObjectUri>> {
    let mut keys: Vec<ObjectUri> = store
        .list_all(prefix)
        .map_err(|e| Error::listing(prefix.to_string(), e))?
        .into_iter()
        .map(|o| o.uri)
        .filter(|uri| !uri.is_container())
        .filter(|uri| {
            extensions.is_empty() || extensions.iter().any(|ext| uri.key().ends_with(ext.as_str()))
        })
        .collect();
    keys.sort();
    Ok(keys)
}

/// Calls `visit` with every well-formed record of `uri`. Malformed lines are
/// logged and counted; read and decompression failures are errors.
pub(crate) fn for_each_record(
    store: &dyn ObjectStore,
    uri: &ObjectUri,
    lines_read: &mut u64,
    malformed_lines: &mut u64,
    mut visit: impl FnMut(Value) -> stampsync_common::Result<()>,
) -> stampsync_common::Result<()> {
    let reader = Location::Remote(uri.clone()).open(store)?;
    for line in JsonLines::new(reader) {
        let line = line.map_err(|e| Error::corrupted(uri.to_string(), e.to_string()))?;
        *lines_read += 1;
        match line {
            Line::Record { value, .. } => visit(value)?,
            Line::Malformed(malformed) => {
                log::warn!(
                    "{uri}: skipping malformed line {}: {}",
                    malformed.line,
                    malformed.error
                );
                *malformed_lines += 1;
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateReport {
    pub objects: usize,
    pub lines_read: u64,
    pub records_written: u64,
    pub malformed_lines: u64,
}

impl AggregateReport {
    pub fn record_count(&self) -> u64 {
        self.records_written
    }
}

pub struct Aggregator {
    store: Arc<dyn ObjectStore>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn ObjectStore>) -> Aggregator {
        Aggregator { store }
    }

    pub fn aggregate(
        &self,
        prefix: &ObjectUri,
        extensions: &[String],
        transform: &mut dyn RecordTransform,
        output: &Location,
    ) -> stampsync_common::Result<AggregateReport> {
        let keys = list_matching(self.store.as_ref(), prefix, extensions)?;
        let mut staged = StagedOutput::create(output)?;

        let mut report = AggregateReport::default();
        for uri in &keys {
            for_each_record(
                self.store.as_ref(),
                uri,
                &mut report.lines_read,
                &mut report.malformed_lines,
                |value| {
                    for out in transform.apply(value) {
                        staged.write_value(&out)?;
                    }
                    Ok(())
                },
            )?;
            log::debug!("aggregated {uri}");
            report.objects += 1;
        }
        report.records_written = staged.commit(self.store.as_ref(), output)?;

        log::info!(
            "aggregated {} objects under {prefix}: {} lines read, {} records written, {} malformed",
            report.objects,
            report.lines_read,
            report.records_written,
            report.malformed_lines
        );
        Ok(report)
    }
}

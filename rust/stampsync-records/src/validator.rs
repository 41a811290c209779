use std::{fs::File, path::Path};

use crate::decoder::{JsonLinesDecoder, RecordDecoder};

/// Checks a locally produced output file before it is published.
///
/// `Err` carries the human-readable reason of the rejection.
pub trait Validator: Send + Sync {
    fn validate(&self, path: &Path) -> Result<(), String>;
}

/// Accepts every file.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, _path: &Path) -> Result<(), String> {
        Ok(())
    }
}

/// Requires the file to decode as (compressed) JSON lines, with at least
/// `min_records` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesValidator {
    pub min_records: u64,
}

impl Validator for JsonLinesValidator {
    fn validate(&self, path: &Path) -> Result<(), String> {
        let mut file =
            File::open(path).map_err(|e| format!("cannot open {}: {e}", path.display()))?;
        let name = path.to_string_lossy();
        let summary = JsonLinesDecoder
            .decode(&name, &mut file, &mut |_| {})
            .map_err(|e| e.to_string())?;
        if summary.records < self.min_records {
            return Err(format!(
                "{} has {} records, expected at least {}",
                path.display(),
                summary.records,
                self.min_records
            ));
        }
        Ok(())
    }
}

/// Any closure over the path can serve as a validator.
impl<F> Validator for F
where
    F: Fn(&Path) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, path: &Path) -> Result<(), String> {
        self(path)
    }
}

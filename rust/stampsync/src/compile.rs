//! Compiles the records named by a list of identifiers out of the corpus
//! files those identifiers point to (`GDL-1900-...` lives in
//! `GDL-1900.jsonl.bz2`). Each file is read once.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

use regex::Regex;
use serde_json::Value;
use stampsync_common::error::Error;
use stampsync_objectstore::{ObjectStore, ObjectUri};
use stampsync_records::{
    FieldPath, RecordTransform,
    jsonl::{JsonLines, Line},
};

use crate::aggregate::{Location, StagedOutput, for_each_record};

/// `<newspaper>-<year>-<rest>`.
pub const DEFAULT_ID_PATTERN: &str = r"^([^-]+)-(\d{4})-(.+)$";
pub const DEFAULT_FILE_PATTERN: &str = "{newspaper}-{year}.jsonl.bz2";

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Identifier field of the input records.
    pub id_field: FieldPath,
    /// Its first two groups are the newspaper and the year; a third group,
    /// when present, is the content id.
    pub id_pattern: Regex,
    /// File name template over `{newspaper}`, `{year}`, `{content_id}` and `{id}`.
    pub file_pattern: String,
    /// Identifier field of the records in the corpus files.
    pub match_field: FieldPath,
}

impl CompileOptions {
    pub fn new(
        id_field: &str,
        id_pattern: &str,
        file_pattern: &str,
        match_field: &str,
    ) -> stampsync_common::Result<CompileOptions> {
        let id_pattern = Regex::new(id_pattern)
            .map_err(|e| Error::invalid_arg("id_pattern", e.to_string()))?;
        // Group 0 is the whole match.
        if id_pattern.captures_len() < 3 {
            return Err(Error::invalid_arg(
                "id_pattern",
                "expected groups for the newspaper and the year",
            ));
        }
        stampsync_common::verify_arg!(file_pattern, !file_pattern.is_empty());
        Ok(CompileOptions {
            id_field: FieldPath::parse(id_field)?,
            id_pattern,
            file_pattern: file_pattern.to_string(),
            match_field: FieldPath::parse(match_field)?,
        })
    }

    /// The name of the file holding `id`, `None` when the id does not match
    /// the pattern.
    pub fn file_name(&self, id: &str) -> Option<String> {
        let captures = self.id_pattern.captures(id)?;
        let group = |i: usize| captures.get(i).map_or("", |m| m.as_str());
        Some(
            self.file_pattern
                .replace("{newspaper}", group(1))
                .replace("{year}", group(2))
                .replace("{content_id}", group(3))
                .replace("{id}", id),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileReport {
    pub input_records: u64,
    pub parsed_ids: u64,
    /// Input records without an id, or with one that does not match the pattern.
    pub unparsed_ids: u64,
    pub files_loaded: usize,
    pub missing_files: usize,
    pub failed_files: usize,
    pub found_records: u64,
    pub missing_records: u64,
    pub records_written: u64,
}

pub struct Compiler {
    store: Arc<dyn ObjectStore>,
}

impl Compiler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Compiler {
        Compiler { store }
    }

    /// Reads the identifiers from `ids` (JSON lines), looks each one up in its
    /// corpus file under `prefix` and writes the found records through
    /// `transform` to `output`. Output records that lack the id field get it
    /// back. Missing and unreadable files are skipped with a warning.
    pub fn compile(
        &self,
        ids: &Location,
        prefix: &ObjectUri,
        options: &CompileOptions,
        transform: &mut dyn RecordTransform,
        output: &Location,
    ) -> stampsync_common::Result<CompileReport> {
        let mut report = CompileReport::default();
        let groups = self.group_ids(ids, options, &mut report)?;
        log::info!(
            "{} ids from {ids} map to {} files under {prefix}",
            report.parsed_ids,
            groups.len()
        );

        let mut staged = StagedOutput::create(output)?;
        for (key, wanted) in &groups {
            let uri = file_uri(prefix, key)?;
            let index = match self.load_index(&uri, &options.match_field) {
                Ok(Some(index)) => index,
                Ok(None) => {
                    log::warn!("skipping {} ids: {uri} does not exist", wanted.len());
                    report.missing_files += 1;
                    continue;
                }
                Err(e) if e.is_object_scoped() => {
                    log::warn!("skipping {} ids: {e}", wanted.len());
                    report.failed_files += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            report.files_loaded += 1;

            for id in wanted {
                let Some(record) = index.get(id) else {
                    log::debug!("{id} not found in {uri}");
                    report.missing_records += 1;
                    continue;
                };
                report.found_records += 1;
                for mut out in transform.apply(record.clone()) {
                    restore_id(&mut out, &options.id_field, id);
                    staged.write_value(&out)?;
                }
            }
        }
        report.records_written = staged.commit(self.store.as_ref(), output)?;

        log::info!(
            "compiled {} of {} ids from {} files ({} missing files, {} missing records)",
            report.found_records,
            report.parsed_ids,
            report.files_loaded,
            report.missing_files,
            report.missing_records
        );
        Ok(report)
    }

    /// Identifiers grouped by file name, both in first-seen order.
    fn group_ids(
        &self,
        ids: &Location,
        options: &CompileOptions,
        report: &mut CompileReport,
    ) -> stampsync_common::Result<Vec<(String, Vec<String>)>> {
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for line in JsonLines::new(ids.open(self.store.as_ref())?) {
            let line = line.map_err(|e| Error::corrupted(ids.to_string(), e.to_string()))?;
            let value = match line {
                Line::Record { value, .. } => value,
                Line::Malformed(malformed) => {
                    log::warn!("{ids}: skipping malformed line {}", malformed.line);
                    continue;
                }
            };
            report.input_records += 1;
            let Some(id) = options.id_field.id_of(&value) else {
                log::warn!("{ids}: record without '{}'", options.id_field);
                report.unparsed_ids += 1;
                continue;
            };
            let Some(file_name) = options.file_name(&id) else {
                log::warn!("{ids}: '{id}' does not match the id pattern");
                report.unparsed_ids += 1;
                continue;
            };
            report.parsed_ids += 1;
            let position = match positions.entry(file_name) {
                Entry::Occupied(entry) => *entry.get(),
                Entry::Vacant(entry) => {
                    groups.push((entry.key().clone(), Vec::new()));
                    *entry.insert(groups.len() - 1)
                }
            };
            groups[position].1.push(id);
        }
        Ok(groups)
    }

    /// The records of `uri` by their match field, `None` if it does not exist.
    fn load_index(
        &self,
        uri: &ObjectUri,
        match_field: &FieldPath,
    ) -> stampsync_common::Result<Option<HashMap<String, Value>>> {
        let exists = self
            .store
            .exists(uri)
            .map_err(|e| Error::transient_store(uri.to_string(), e))?;
        if !exists {
            return Ok(None);
        }
        let mut index = HashMap::new();
        let (mut lines_read, mut malformed_lines) = (0, 0);
        for_each_record(
            self.store.as_ref(),
            uri,
            &mut lines_read,
            &mut malformed_lines,
            |record| {
                if let Some(id) = match_field.id_of(&record) {
                    index.insert(id, record);
                }
                Ok(())
            },
        )?;
        log::debug!("loaded {} records from {uri} ({lines_read} lines)", index.len());
        Ok(Some(index))
    }
}

/// `<prefix>/<file_name>`, whether or not the prefix ends with `/`.
pub fn file_uri(prefix: &ObjectUri, file_name: &str) -> stampsync_common::Result<ObjectUri> {
    let base = prefix.key().trim_end_matches('/');
    if base.is_empty() {
        ObjectUri::new(prefix.bucket(), file_name)
    } else {
        ObjectUri::new(prefix.bucket(), format!("{base}/{file_name}"))
    }
}

fn restore_id(out: &mut Value, id_field: &FieldPath, id: &str) {
    let (Some(name), Value::Object(map)) = (id_field.as_top_level(), out) else {
        return;
    };
    if !map.contains_key(name) {
        map.insert(name.to_string(), Value::String(id.to_string()));
    }
}

//! Intersection of the record identifiers found under two prefixes, e.g. to
//! list the items two processing runs have in common.

use std::{collections::BTreeSet, sync::Arc};

use serde_json::Value;
use stampsync_objectstore::{ObjectStore, ObjectUri};
use stampsync_records::FieldPath;

use crate::aggregate::{Location, StagedOutput, for_each_record, list_matching};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareReport {
    pub left_ids: usize,
    pub right_ids: usize,
    pub common: usize,
    /// Records in either prefix without a usable identifier.
    pub records_without_id: u64,
    pub malformed_lines: u64,
}

pub struct IdComparer {
    store: Arc<dyn ObjectStore>,
}

#[derive(Default)]
struct IdSet {
    ids: BTreeSet<String>,
    without_id: u64,
    lines_read: u64,
    malformed_lines: u64,
}

impl IdComparer {
    pub fn new(store: Arc<dyn ObjectStore>) -> IdComparer {
        IdComparer { store }
    }

    /// The distinct identifiers of every record under `prefix`.
    pub fn collect_ids(
        &self,
        prefix: &ObjectUri,
        extensions: &[String],
        id_field: &FieldPath,
    ) -> stampsync_common::Result<BTreeSet<String>> {
        Ok(self.id_set(prefix, extensions, id_field)?.ids)
    }

    /// Writes the identifiers present under both prefixes to `output`, one per
    /// line in sorted order.
    pub fn compare(
        &self,
        left: &ObjectUri,
        right: &ObjectUri,
        extensions: &[String],
        id_field: &FieldPath,
        output: &Location,
    ) -> stampsync_common::Result<CompareReport> {
        let left_set = self.id_set(left, extensions, id_field)?;
        let right_set = self.id_set(right, extensions, id_field)?;

        let mut staged = StagedOutput::create(output)?;
        for id in left_set.ids.intersection(&right_set.ids) {
            staged.write_value(&Value::String(id.clone()))?;
        }
        let common = staged.commit(self.store.as_ref(), output)?;

        let report = CompareReport {
            left_ids: left_set.ids.len(),
            right_ids: right_set.ids.len(),
            common: common as usize,
            records_without_id: left_set.without_id + right_set.without_id,
            malformed_lines: left_set.malformed_lines + right_set.malformed_lines,
        };
        log::info!(
            "{left}: {} ids, {right}: {} ids, {} in common",
            report.left_ids,
            report.right_ids,
            report.common
        );
        Ok(report)
    }

    fn id_set(
        &self,
        prefix: &ObjectUri,
        extensions: &[String],
        id_field: &FieldPath,
    ) -> stampsync_common::Result<IdSet> {
        let mut set = IdSet::default();
        for uri in list_matching(self.store.as_ref(), prefix, extensions)? {
            for_each_record(
                self.store.as_ref(),
                &uri,
                &mut set.lines_read,
                &mut set.malformed_lines,
                |record| {
                    match id_field.id_of(&record) {
                        Some(id) => {
                            set.ids.insert(id);
                        }
                        None => set.without_id += 1,
                    }
                    Ok(())
                },
            )?;
        }
        if set.without_id > 0 {
            log::warn!("{prefix}: {} records have no '{id_field}'", set.without_id);
        }
        log::debug!("{prefix}: {} lines, {} distinct ids", set.lines_read, set.ids.len());
        Ok(set)
    }
}

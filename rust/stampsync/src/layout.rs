//! The remote key layout of processed corpora:
//! `process-label/run-id/[provider/]corpus-unit/[sub-path/]filename.ext`.

use std::fmt;

use stampsync_common::error::Error;

/// Identifier of one experimental run: `<process-label>_<task>_<model-id>_v<version>`.
///
/// The version is kept verbatim (e.g. `2-0-1` or `1.4.0`). Label, task and
/// model id must not contain `_` or `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId {
    pub process_label: String,
    pub task: String,
    pub model_id: String,
    pub version: String,
}

impl RunId {
    pub fn new(
        process_label: impl Into<String>,
        task: impl Into<String>,
        model_id: impl Into<String>,
        version: impl Into<String>,
    ) -> stampsync_common::Result<RunId> {
        let run_id = RunId {
            process_label: process_label.into(),
            task: task.into(),
            model_id: model_id.into(),
            version: version.into(),
        };
        for (name, part) in [
            ("process_label", &run_id.process_label),
            ("task", &run_id.task),
            ("model_id", &run_id.model_id),
        ] {
            if part.is_empty() || part.contains(['_', '/']) {
                return Err(Error::invalid_arg(name, format!("invalid run id part '{part}'")));
            }
        }
        if run_id.version.is_empty() || run_id.version.contains('/') {
            return Err(Error::invalid_arg(
                "version",
                format!("invalid run id version '{}'", run_id.version),
            ));
        }
        Ok(run_id)
    }

    pub fn parse(s: &str) -> stampsync_common::Result<RunId> {
        let (head, version) = s.rsplit_once("_v").ok_or_else(|| {
            Error::invalid_arg("run_id", format!("'{s}' has no _v<version> part"))
        })?;
        let parts: Vec<&str> = head.split('_').collect();
        match parts.as_slice() {
            [label, task, model] => RunId::new(*label, *task, *model, version),
            _ => Err(Error::invalid_arg(
                "run_id",
                format!("'{s}' is not <label>_<task>_<model>_v<version>"),
            )),
        }
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_v{}",
            self.process_label, self.task, self.model_id, self.version
        )
    }
}

/// Which variant of the corpus layout published keys must follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusLayout {
    Flat,
    /// With a data-provider level above the corpus unit.
    WithProvider,
}

impl CorpusLayout {
    pub fn parse_key(&self, key: &str) -> stampsync_common::Result<CorpusKey> {
        CorpusKey::parse(key, *self == CorpusLayout::WithProvider)
    }
}

/// A key in the corpus layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusKey {
    pub process_label: String,
    pub run_id: RunId,
    pub provider: Option<String>,
    pub corpus_unit: String,
    pub sub_path: Vec<String>,
    pub file_name: String,
}

impl CorpusKey {
    pub fn new(
        run_id: RunId,
        corpus_unit: impl Into<String>,
        file_name: impl Into<String>,
    ) -> CorpusKey {
        CorpusKey {
            process_label: run_id.process_label.clone(),
            run_id,
            provider: None,
            corpus_unit: corpus_unit.into(),
            sub_path: Vec::new(),
            file_name: file_name.into(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> CorpusKey {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_sub_path(mut self, sub_path: Vec<String>) -> CorpusKey {
        self.sub_path = sub_path;
        self
    }

    /// Parses a key; `with_provider` tells whether the layout has a provider level.
    pub fn parse(key: &str, with_provider: bool) -> stampsync_common::Result<CorpusKey> {
        let parts: Vec<&str> = key.split('/').collect();
        let min = if with_provider { 5 } else { 4 };
        if parts.len() < min || parts.iter().any(|p| p.is_empty()) {
            return Err(Error::invalid_arg(
                "key",
                format!("'{key}' does not follow the corpus layout"),
            ));
        }
        let run_id = RunId::parse(parts[1])?;
        let mut rest = &parts[2..];
        let provider = if with_provider {
            let provider = rest[0].to_string();
            rest = &rest[1..];
            Some(provider)
        } else {
            None
        };
        let (file_name, middle) = rest
            .split_last()
            .ok_or_else(|| Error::invalid_arg("key", format!("'{key}' has no file name")))?;
        let (corpus_unit, sub_path) = middle
            .split_first()
            .ok_or_else(|| Error::invalid_arg("key", format!("'{key}' has no corpus unit")))?;
        Ok(CorpusKey {
            process_label: parts[0].to_string(),
            run_id,
            provider,
            corpus_unit: corpus_unit.to_string(),
            sub_path: sub_path.iter().map(|s| s.to_string()).collect(),
            file_name: file_name.to_string(),
        })
    }

    /// The key of the directory holding all outputs of the corpus unit.
    pub fn unit_prefix(&self) -> String {
        let mut parts = vec![self.process_label.clone(), self.run_id.to_string()];
        parts.extend(self.provider.clone());
        parts.push(self.corpus_unit.clone());
        format!("{}/", parts.join("/"))
    }

    pub fn to_key(&self) -> String {
        let mut key = self.unit_prefix();
        for part in &self.sub_path {
            key.push_str(part);
            key.push('/');
        }
        key.push_str(&self.file_name);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id() {
        let run = RunId::parse("langident_lid_ensemble_v2-0-1").unwrap();
        assert_eq!(run.process_label, "langident");
        assert_eq!(run.task, "lid");
        assert_eq!(run.model_id, "ensemble");
        assert_eq!(run.version, "2-0-1");
        assert_eq!(run.to_string(), "langident_lid_ensemble_v2-0-1");

        let dotted = RunId::parse("lingproc_pos_spacy-v3_v1.4.0").unwrap();
        assert_eq!(dotted.model_id, "spacy-v3");
        assert_eq!(dotted.version, "1.4.0");

        assert!(RunId::parse("langident_lid_v2").is_err());
        assert!(RunId::parse("langident_lid_ensemble").is_err());
        assert!(RunId::new("a/b", "t", "m", "1").is_err());
    }

    #[test]
    fn test_corpus_key() {
        let run = RunId::new("langident", "lid", "ensemble", "2-0-1").unwrap();
        let key = CorpusKey::new(run.clone(), "GDL", "GDL-1900.jsonl.bz2")
            .with_provider("SNL")
            .with_sub_path(vec!["1900".into()]);
        assert_eq!(
            key.to_key(),
            "langident/langident_lid_ensemble_v2-0-1/SNL/GDL/1900/GDL-1900.jsonl.bz2"
        );
        assert_eq!(key.unit_prefix(), "langident/langident_lid_ensemble_v2-0-1/SNL/GDL/");
        assert_eq!(CorpusKey::parse(&key.to_key(), true).unwrap(), key);

        let flat = CorpusKey::new(run, "GDL", "GDL-1900.jsonl.bz2");
        assert_eq!(CorpusKey::parse(&flat.to_key(), false).unwrap(), flat);
        assert!(CorpusKey::parse("langident/langident_lid_ensemble_v2-0-1/GDL", false).is_err());
    }
}

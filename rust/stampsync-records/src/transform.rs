//! Record transforms applied by the aggregator: each input record maps to
//! zero or more output values.

use std::collections::HashMap;

use serde_json::{Map, Value};
use stampsync_common::error::Error;

pub trait RecordTransform: Send {
    fn apply(&mut self, record: Value) -> Vec<Value>;
}

/// A dotted path into nested objects, such as `id` or `meta.source`. A
/// leading `.` is accepted so `.id` and `id` name the same field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(path: &str) -> stampsync_common::Result<FieldPath> {
        let trimmed = path.strip_prefix('.').unwrap_or(path);
        let segments: Vec<String> = trimmed.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(Error::invalid_arg("field", format!("invalid field path '{path}'")));
        }
        Ok(FieldPath { segments })
    }

    pub fn get<'a>(&self, record: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(record, |value, segment| value.get(segment.as_str()))
    }

    /// The field as an identifier: strings verbatim, other scalars as JSON.
    /// Missing fields, `null`s and containers have no identifier.
    pub fn id_of(&self, record: &Value) -> Option<String> {
        match self.get(record)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// The top-level field name when the path has a single segment.
    pub fn as_top_level(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [name] => Some(name),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Passes every record through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl RecordTransform for Identity {
    fn apply(&mut self, record: Value) -> Vec<Value> {
        vec![record]
    }
}

/// Keeps records whose top-level string fields equal every given value.
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    conditions: Vec<(String, String)>,
}

impl KeyFilter {
    pub fn new(conditions: Vec<(String, String)>) -> KeyFilter {
        KeyFilter { conditions }
    }

    /// Parses `FEAT=VAL` arguments. Arguments without `=` are rejected.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> stampsync_common::Result<KeyFilter> {
        let mut conditions = Vec::with_capacity(args.len());
        for arg in args {
            let arg = arg.as_ref();
            let (key, value) = arg
                .split_once('=')
                .ok_or_else(|| {
                    Error::invalid_arg("filter", format!("expected KEY=VALUE, got '{arg}'"))
                })?;
            conditions.push((key.to_string(), value.to_string()));
        }
        Ok(KeyFilter { conditions })
    }

    pub fn matches(&self, record: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(key, value)| record.get(key).and_then(Value::as_str) == Some(value.as_str()))
    }
}

impl RecordTransform for KeyFilter {
    fn apply(&mut self, record: Value) -> Vec<Value> {
        if self.matches(&record) {
            vec![record]
        } else {
            Vec::new()
        }
    }
}

/// Projects objects onto the listed keys, in the listed order. Missing keys
/// are omitted; an empty key list keeps the whole record.
#[derive(Debug, Clone, Default)]
pub struct KeyProjection {
    keys: Vec<String>,
}

impl KeyProjection {
    pub fn new(keys: Vec<String>) -> KeyProjection {
        KeyProjection { keys }
    }
}

impl RecordTransform for KeyProjection {
    fn apply(&mut self, record: Value) -> Vec<Value> {
        if self.keys.is_empty() {
            return vec![record];
        }
        let Value::Object(mut source) = record else {
            return Vec::new();
        };
        let mut projected = Map::new();
        for key in &self.keys {
            if let Some(value) = source.remove(key) {
                projected.insert(key.clone(), value);
            }
        }
        vec![Value::Object(projected)]
    }
}

/// Sampling strategy of a [`Sampler`].
#[derive(Debug, Clone)]
pub enum Sampling {
    /// Keep each record with the given probability.
    Rate(f64),
    /// Keep the first `max` records of each group, grouped by the string
    /// value of a top-level key. Records without the key are dropped.
    PerGroup { key: String, max: usize },
}

/// Seeded, reproducible record sampling.
pub struct Sampler {
    sampling: Sampling,
    rng: fastrand::Rng,
    group_counts: HashMap<String, usize>,
}

impl Sampler {
    pub fn new(sampling: Sampling, seed: u64) -> stampsync_common::Result<Sampler> {
        match &sampling {
            Sampling::Rate(rate) => {
                stampsync_common::verify_arg!(rate, (0.0..=1.0).contains(rate));
            }
            Sampling::PerGroup { key, max } => {
                stampsync_common::verify_arg!(max, *max > 0);
                stampsync_common::verify_arg!(key, !key.is_empty());
            }
        }
        Ok(Sampler {
            sampling,
            rng: fastrand::Rng::with_seed(seed),
            group_counts: HashMap::new(),
        })
    }

    pub fn group_counts(&self) -> &HashMap<String, usize> {
        &self.group_counts
    }

    fn should_sample(&mut self, record: &Value) -> bool {
        match &self.sampling {
            Sampling::Rate(rate) => self.rng.f64() < *rate,
            Sampling::PerGroup { key, max } => {
                let group = match record.get(key) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => return false,
                    Some(other) => other.to_string(),
                };
                let count = self.group_counts.entry(group).or_insert(0);
                if *count < *max {
                    *count += 1;
                    true
                } else {
                    false
                }
            }
        }
    }
}

impl RecordTransform for Sampler {
    fn apply(&mut self, record: Value) -> Vec<Value> {
        if self.should_sample(&record) {
            vec![record]
        } else {
            Vec::new()
        }
    }
}

/// Applies transforms in sequence; each output of one stage is fed to the next.
#[derive(Default)]
pub struct Chain {
    stages: Vec<Box<dyn RecordTransform>>,
}

impl Chain {
    pub fn new() -> Chain {
        Chain::default()
    }

    pub fn then(mut self, stage: impl RecordTransform + 'static) -> Chain {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl RecordTransform for Chain {
    fn apply(&mut self, record: Value) -> Vec<Value> {
        let mut values = vec![record];
        for stage in &mut self.stages {
            values = values.into_iter().flat_map(|v| stage.apply(v)).collect();
            if values.is_empty() {
                break;
            }
        }
        values
    }
}

//! Command implementations for stampsync

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use stampsync::{Location, ObjectStore, ObjectUri, StoreConfig, SyncConfig};

use crate::GlobalArgs;

pub mod aggregate;
pub mod claim;
pub mod compare;
pub mod compile;
pub mod finalize;
pub mod list;
pub mod reconcile;
pub mod set_timestamp;
pub mod verify;

/// Process exit status understood by the calling build rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Success, or proceed with the work.
    Success,
    Failure,
    /// Skip: the output already exists remotely.
    OutputExists,
    /// Skip: another worker holds a fresh claim.
    ClaimedElsewhere,
    ValidationFailed,
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Status::Success => 0,
            Status::Failure => 1,
            Status::OutputExists => 3,
            Status::ClaimedElsewhere => 4,
            Status::ValidationFailed => 5,
        }
    }
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> ExitCode {
        ExitCode::from(status.code())
    }
}

/// Builds the effective configuration: file values first, then options.
pub fn load_config(global: &GlobalArgs) -> Result<SyncConfig> {
    let mut config = match &global.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(build_root) = &global.build_root {
        config.build_root = build_root.clone();
    }
    if let Some(bucket) = &global.bucket {
        config.bucket = Some(bucket.clone());
    }
    if let Some(root) = &global.store_root {
        config.store = StoreConfig::Local { root: root.clone() };
    } else if let Some(endpoint) = &global.endpoint {
        config.store = match config.store {
            StoreConfig::S3 {
                region,
                conditional_put,
                ..
            } => StoreConfig::S3 {
                endpoint: Some(endpoint.clone()),
                region,
                conditional_put,
            },
            StoreConfig::Local { .. } => StoreConfig::S3 {
                endpoint: Some(endpoint.clone()),
                region: None,
                conditional_put: false,
            },
        };
    }
    config.access_key = global.access_key.clone();
    config.secret_key = global.secret_key.clone();
    Ok(config)
}

pub fn open_store(config: &SyncConfig) -> Result<Arc<dyn ObjectStore>> {
    config.open_store().context("Failed to open the object store")
}

pub fn parse_uri(uri: &str) -> Result<ObjectUri> {
    ObjectUri::parse(uri).with_context(|| format!("Invalid object URI: {uri}"))
}

/// An `s3://` URI names a remote object, anything else a local path.
pub fn parse_location(location: &str) -> Result<Location> {
    if location.starts_with("s3://") {
        Ok(Location::Remote(parse_uri(location)?))
    } else {
        Ok(Location::Local(PathBuf::from(location)))
    }
}

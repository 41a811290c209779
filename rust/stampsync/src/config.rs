//! Workspace configuration, loaded from a JSON file and overridden by the
//! command line.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use stampsync_common::error::Error;
use stampsync_objectstore::{ObjectStore, local_store::LocalFsObjectStore};

use crate::{
    claim::DEFAULT_CLAIM_SUFFIX,
    finalize::{DEFAULT_RETRY_DELAY, DEFAULT_UPLOAD_ATTEMPTS, FinalizePolicy},
    path_mapper::{Layout, PathMapper},
    stamp::DEFAULT_DIRECTORY_STAMP_SUFFIX,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// A directory whose sub-directories are buckets.
    Local { root: PathBuf },
    S3 {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
        #[serde(default)]
        conditional_put: bool,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::S3 {
            endpoint: None,
            region: None,
            conditional_put: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub build_root: PathBuf,
    /// Fixed bucket: local paths under the build root carry no bucket component.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    pub stamp_suffix: String,
    pub claim_suffix: String,
    pub claim_max_age_hours: u64,
    pub upload_attempts: usize,
    pub retry_delay_secs: u64,
    pub store: StoreConfig,
    /// S3 credentials; taken from the environment, never from the file.
    #[serde(skip)]
    pub access_key: Option<String>,
    #[serde(skip)]
    pub secret_key: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            build_root: PathBuf::new(),
            bucket: None,
            stamp_suffix: DEFAULT_DIRECTORY_STAMP_SUFFIX.to_string(),
            claim_suffix: DEFAULT_CLAIM_SUFFIX.to_string(),
            claim_max_age_hours: 24,
            upload_attempts: DEFAULT_UPLOAD_ATTEMPTS,
            retry_delay_secs: DEFAULT_RETRY_DELAY.as_secs(),
            store: StoreConfig::default(),
            access_key: None,
            secret_key: None,
        }
    }
}

impl SyncConfig {
    pub fn load(path: &Path) -> stampsync_common::Result<SyncConfig> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        serde_json::from_str(&text).map_err(|e| Error::json(path.display().to_string(), e))
    }

    pub fn validate(&self) -> stampsync_common::Result<()> {
        if self.build_root.as_os_str().is_empty() {
            return Err(Error::configuration("build root is not set"));
        }
        stampsync_common::verify_config!(
            !self.stamp_suffix.is_empty(),
            "stamp suffix must not be empty"
        );
        stampsync_common::verify_config!(
            !self.claim_suffix.is_empty(),
            "claim suffix must not be empty"
        );
        stampsync_common::verify_config!(
            self.claim_max_age_hours > 0,
            "claim max age must be at least one hour"
        );
        stampsync_common::verify_config!(
            self.upload_attempts > 0,
            "upload attempts must be at least 1"
        );
        if let StoreConfig::Local { root } = &self.store {
            stampsync_common::verify_config!(
                !root.as_os_str().is_empty(),
                "local store root is not set"
            );
        }
        Ok(())
    }

    pub fn claim_max_age(&self) -> chrono::Duration {
        i64::try_from(self.claim_max_age_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn mapper(&self) -> stampsync_common::Result<PathMapper> {
        let layout = match &self.bucket {
            Some(bucket) => Layout::FixedBucket(bucket.clone()),
            None => Layout::BucketInPath,
        };
        PathMapper::new(self.build_root.clone(), layout)
    }

    pub fn finalize_policy(&self) -> FinalizePolicy {
        FinalizePolicy {
            attempts: self.upload_attempts,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            ..FinalizePolicy::default()
        }
    }

    pub fn open_store(&self) -> stampsync_common::Result<Arc<dyn ObjectStore>> {
        match &self.store {
            StoreConfig::Local { root } => Ok(Arc::new(LocalFsObjectStore::new(root)?)),
            #[cfg(feature = "s3")]
            StoreConfig::S3 {
                endpoint,
                region,
                conditional_put,
            } => {
                let settings = stampsync_objectstore::s3_store::S3Settings {
                    endpoint: endpoint.clone(),
                    region: region.clone(),
                    access_key: self.access_key.clone(),
                    secret_key: self.secret_key.clone(),
                    conditional_put: *conditional_put,
                };
                let store = stampsync_objectstore::s3_store::S3ObjectStore::new(settings)
                    .map_err(|e| Error::io("s3 runtime", e))?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "s3"))]
            StoreConfig::S3 { .. } => Err(Error::configuration(
                "S3 store requested but stampsync was built without the `s3` feature",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: SyncConfig = serde_json::from_str(
            r#"{"build_root": "/data/build", "store": {"kind": "local", "root": "/data/s3"}}"#,
        )
        .unwrap();
        assert_eq!(config.build_root, PathBuf::from("/data/build"));
        assert_eq!(config.stamp_suffix, ".stamp");
        assert_eq!(config.claim_suffix, ".wip");
        assert_eq!(config.claim_max_age(), chrono::Duration::hours(24));
        assert_eq!(config.finalize_policy().attempts, 5);
        assert_eq!(config.finalize_policy().retry_delay, Duration::from_secs(3));
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_build_root_is_rejected() {
        let err = SyncConfig::default().validate().unwrap_err();
        assert!(matches!(
            err.kind(),
            stampsync_common::error::ErrorKind::Configuration { .. }
        ));
    }

    #[test]
    fn test_fixed_bucket_layout() {
        let config = SyncConfig {
            build_root: PathBuf::from("/build"),
            bucket: Some("corpus".into()),
            ..SyncConfig::default()
        };
        assert_eq!(config.mapper().unwrap().layout(), &Layout::FixedBucket("corpus".into()));
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stampsync.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = SyncConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("stampsync.json"));
    }
}

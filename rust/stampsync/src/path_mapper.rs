//! Bidirectional mapping between remote object URIs and local build paths.

use std::path::{Component, Path, PathBuf};

use stampsync_common::error::Error;
use stampsync_objectstore::ObjectUri;

use crate::stamp::{StampId, StampMode};

/// Where the bucket name lives in a local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// `<root>/<bucket>/<key>`
    BucketInPath,
    /// `<root>/<key>`; every local path belongs to the configured bucket.
    FixedBucket(String),
}

#[derive(Debug, Clone)]
pub struct PathMapper {
    build_root: PathBuf,
    layout: Layout,
}

impl PathMapper {
    pub fn new(
        build_root: impl Into<PathBuf>,
        layout: Layout,
    ) -> stampsync_common::Result<PathMapper> {
        let build_root = build_root.into();
        stampsync_common::verify_config!(
            !build_root.as_os_str().is_empty(),
            "build root is not set"
        );
        if let Layout::FixedBucket(bucket) = &layout {
            ObjectUri::new(bucket.as_str(), "")
                .map_err(|e| Error::configuration(format!("invalid bucket '{bucket}': {e}")))?;
        }
        Ok(PathMapper { build_root, layout })
    }

    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The local directory that mirrors the root of `bucket`.
    pub fn bucket_root(&self, bucket: &str) -> PathBuf {
        match &self.layout {
            Layout::BucketInPath => self.build_root.join(bucket),
            Layout::FixedBucket(_) => self.build_root.clone(),
        }
    }

    /// Local path of a remote object (or of the directory of a prefix).
    ///
    /// With a fixed-bucket layout, URIs of any other bucket are rejected.
    pub fn to_local(&self, uri: &ObjectUri) -> stampsync_common::Result<PathBuf> {
        self.local_path(uri.bucket(), uri.key())
    }

    fn local_path(&self, bucket: &str, key: &str) -> stampsync_common::Result<PathBuf> {
        if let Layout::FixedBucket(fixed) = &self.layout {
            if fixed != bucket {
                return Err(Error::invalid_arg(
                    "uri",
                    format!("bucket '{bucket}' does not match the configured bucket '{fixed}'"),
                ));
            }
        }
        let mut path = self.bucket_root(bucket);
        for component in key.split('/').filter(|c| !c.is_empty()) {
            path.push(component);
        }
        Ok(path)
    }

    /// Remote URI of a local path.
    ///
    /// `strip_suffix` is removed from the end of the path first; the build
    /// root is then replaced component-wise.
    pub fn to_remote(
        &self,
        local_path: &Path,
        strip_suffix: Option<&str>,
    ) -> stampsync_common::Result<ObjectUri> {
        let as_str = local_path.to_str().ok_or_else(|| {
            Error::configuration(format!("local path {} is not valid UTF-8", local_path.display()))
        })?;
        let stripped = match strip_suffix {
            Some(suffix) if !suffix.is_empty() => as_str.strip_suffix(suffix).unwrap_or(as_str),
            _ => as_str,
        };
        let relative = Path::new(stripped).strip_prefix(&self.build_root).map_err(|_| {
            Error::configuration(format!(
                "local path {} is not under the build root {}",
                local_path.display(),
                self.build_root.display()
            ))
        })?;

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str().unwrap_or_default()),
                Component::CurDir => {}
                _ => {
                    return Err(Error::configuration(format!(
                        "local path {} escapes the build root",
                        local_path.display()
                    )));
                }
            }
        }

        let (bucket, key_parts) = match &self.layout {
            Layout::BucketInPath => match parts.split_first() {
                Some((bucket, rest)) => (bucket.to_string(), rest),
                None => {
                    return Err(Error::configuration(format!(
                        "local path {} does not name a bucket",
                        local_path.display()
                    )));
                }
            },
            Layout::FixedBucket(bucket) => (bucket.clone(), &parts[..]),
        };
        ObjectUri::new(bucket, key_parts.join("/"))
    }

    /// Local path of the stamp for `id` in `bucket`.
    pub fn stamp_path(
        &self,
        bucket: &str,
        id: &StampId,
        mode: &StampMode,
    ) -> stampsync_common::Result<PathBuf> {
        let mut path = self.local_path(bucket, id.key())?.into_os_string();
        if let Some(suffix) = mode.suffix() {
            path.push(suffix);
        }
        Ok(PathBuf::from(path))
    }

    /// Inverse of [`PathMapper::stamp_path`]: the remote identity of a local
    /// path that looks like a stamp of `mode`, or `None` otherwise.
    pub fn stamp_id_for_local(
        &self,
        path: &Path,
        mode: &StampMode,
    ) -> Option<(ObjectUri, StampId)> {
        let suffix = mode.suffix();
        if let Some(suffix) = suffix {
            let name = path.file_name()?.to_str()?;
            if name.len() <= suffix.len() || !name.ends_with(suffix) {
                return None;
            }
        }
        let uri = self.to_remote(path, suffix).ok()?;
        if uri.key().is_empty() {
            return None;
        }
        let id = mode.id_for_key(uri.key().to_string());
        Some((uri, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> ObjectUri {
        ObjectUri::parse(s).unwrap()
    }

    #[test]
    fn test_round_trip_bucket_in_path() {
        let mapper = PathMapper::new("/build", Layout::BucketInPath).unwrap();
        let remote = uri("s3://22-rep-sandbox/langident/run1/GDL/GDL-1900.jsonl.bz2");
        let local = mapper.to_local(&remote).unwrap();
        assert_eq!(
            local,
            PathBuf::from("/build/22-rep-sandbox/langident/run1/GDL/GDL-1900.jsonl.bz2")
        );
        assert_eq!(mapper.to_remote(&local, None).unwrap(), remote);
    }

    #[test]
    fn test_round_trip_fixed_bucket() {
        let mapper = PathMapper::new("/build", Layout::FixedBucket("bucket".into())).unwrap();
        let remote = uri("s3://bucket/GDL/GDL-1900.jsonl.bz2");
        let local = mapper.to_local(&remote).unwrap();
        assert_eq!(local, PathBuf::from("/build/GDL/GDL-1900.jsonl.bz2"));
        assert_eq!(mapper.to_remote(&local, None).unwrap(), remote);
        assert!(mapper.to_local(&uri("s3://other/x")).is_err());
    }

    #[test]
    fn test_suffix_is_stripped_before_prefix_substitution() {
        let mapper = PathMapper::new("/build", Layout::BucketInPath).unwrap();
        let stamp = Path::new("/build/bucket/run1/GDL.stamp");
        assert_eq!(
            mapper.to_remote(stamp, Some(".stamp")).unwrap(),
            uri("s3://bucket/run1/GDL")
        );
        // The root only matches as a whole-component prefix.
        assert!(mapper.to_remote(Path::new("/buildx/bucket/a"), None).is_err());
        // A root-like substring deeper in the path stays.
        assert_eq!(
            mapper.to_remote(Path::new("/build/bucket/build/a"), None).unwrap(),
            uri("s3://bucket/build/a")
        );
    }

    #[test]
    fn test_configuration_errors() {
        assert!(PathMapper::new("", Layout::BucketInPath).is_err());
        assert!(PathMapper::new("/build", Layout::FixedBucket(String::new())).is_err());
        let mapper = PathMapper::new("/build", Layout::BucketInPath).unwrap();
        let err = mapper.to_remote(Path::new("/elsewhere/x"), None).unwrap_err();
        assert!(err.to_string().contains("/elsewhere/x"));
        assert!(mapper.to_remote(Path::new("/build"), None).is_err());
        assert!(mapper.to_remote(Path::new("/build/bucket/../x"), None).is_err());
    }

    #[test]
    fn test_stamp_paths() {
        let mapper = PathMapper::new("/build", Layout::BucketInPath).unwrap();
        let dir_mode = StampMode::per_directory(1, ".stamp").unwrap();
        let id = dir_mode.stamp_id("run1/GDL/GDL-1900.jsonl.bz2").unwrap();
        let path = mapper.stamp_path("bucket", &id, &dir_mode).unwrap();
        assert_eq!(path, PathBuf::from("/build/bucket/run1/GDL.stamp"));
        assert_eq!(
            mapper.stamp_id_for_local(&path, &dir_mode),
            Some((uri("s3://bucket/run1/GDL"), id))
        );
        assert_eq!(
            mapper.stamp_id_for_local(Path::new("/build/bucket/run1/GDL"), &dir_mode),
            None
        );
        assert_eq!(
            mapper.stamp_id_for_local(Path::new("/build/bucket/.stamp"), &dir_mode),
            None
        );

        let object_mode = StampMode::per_object();
        let id = object_mode.stamp_id("run1/GDL/GDL-1900.jsonl.bz2").unwrap();
        let path = mapper.stamp_path("bucket", &id, &object_mode).unwrap();
        assert_eq!(path, PathBuf::from("/build/bucket/run1/GDL/GDL-1900.jsonl.bz2"));
        assert_eq!(mapper.stamp_id_for_local(&path, &object_mode).unwrap().1, id);
    }
}

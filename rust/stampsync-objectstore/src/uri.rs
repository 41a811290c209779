//! Object URI parsing and manipulation (`s3://bucket/key`).
//!
//! Generally, the functions in this module require all URIs to be valid, clean
//! and canonical. They will return an error if these conditions are not met.
//! Specifically:
//! - The scheme must be `s3://` and the bucket a non-empty DNS-style label
//!   (lowercase letters, digits, `.`, `-`, `_`).
//! - Keys must not start with a slash, and must not contain empty, `.` or `..`
//!   segments (a single trailing slash is allowed and marks a "folder" prefix).
//! - Keys must not contain NUL bytes or backslashes.
//!
//! Object keys are *not* percent-decoded: the key of `s3://b/a%20b` is the
//! literal string `a%20b`, exactly as the store reports it.
//!
//! A common convention is that a key ending in a slash represents a "container"
//! or "folder". Conversely, the last component of a key without a trailing
//! slash represents an artifact within a container.

use std::fmt;

pub const S3_SCHEME: &str = "s3://";

macro_rules! verify {
    ($expr:expr, $uri:expr) => {{
        let result = $expr;
        verify(result, stringify!($expr), &$uri, None)?;
    }};

    ($expr:expr, $uri:expr, $relative:expr) => {{
        let result = $expr;
        verify(result, stringify!($expr), &$uri, Some(&$relative))?;
    }};
}

/// A remote object identity (bucket + key) that has been parsed and verified.
///
/// The same type addresses single objects (`s3://b/dir/file.jsonl.bz2`) and
/// listing prefixes (`s3://b/dir/`, `s3://b/dir/file-19`, `s3://b/`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectUri {
    bucket: String,
    key: String,
}

impl ObjectUri {
    /// Creates a new `ObjectUri` from a bucket and a key after verifying both.
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> stampsync_common::Result<ObjectUri> {
        let uri = ObjectUri {
            bucket: bucket.into(),
            key: key.into(),
        };
        uri.verify_self()?;
        Ok(uri)
    }

    /// Parses an `s3://bucket/key` string.
    ///
    /// `s3://bucket` and `s3://bucket/` both denote the bucket root (empty key).
    pub fn parse(uri_str: &str) -> stampsync_common::Result<ObjectUri> {
        let rest = uri_str
            .strip_prefix(S3_SCHEME)
            .ok_or_else(|| make_err("uri must start with s3://", uri_str, None))?;
        let (bucket, key) = match rest.split_once('/') {
            Some((bucket, key)) => (bucket, key),
            None => (rest, ""),
        };
        Self::new(bucket, key).map_err(|_| make_err("invalid bucket or key", uri_str, None))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Checks if the URI represents a container (i.e. the key is empty or ends with `/`).
    pub fn is_container(&self) -> bool {
        self.key.is_empty() || self.key.ends_with('/')
    }

    /// Returns the last key component, or `None` for containers.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_container() {
            None
        } else {
            self.key.rsplit('/').next()
        }
    }

    /// Returns the key split into its `/`-separated components
    /// (ignoring a trailing slash).
    pub fn components(&self) -> Vec<&str> {
        self.key
            .trim_end_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Resolves a relative key against this URI.
    ///
    /// When `self` is a container the relative key is appended to it, otherwise
    /// it is resolved against the parent container of `self`.
    pub fn join(&self, relative: &str) -> stampsync_common::Result<ObjectUri> {
        verify!(!relative.is_empty(), self.to_string(), relative);
        verify!(is_valid_relative(relative), self.to_string(), relative);
        let container = self.container_key();
        Self::new(self.bucket.clone(), format!("{container}{relative}"))
    }

    /// Returns a URI whose key is this key with `suffix` appended
    /// (e.g. the claim marker of an output object).
    pub fn with_suffix(&self, suffix: &str) -> stampsync_common::Result<ObjectUri> {
        verify!(!self.is_container(), self.to_string(), suffix);
        Self::new(self.bucket.clone(), format!("{}{suffix}", self.key))
    }

    /// Returns a URI with `suffix` removed from the tail of the key, or `None`
    /// when the key does not end with it.
    pub fn strip_suffix(&self, suffix: &str) -> Option<ObjectUri> {
        if suffix.is_empty() {
            return None;
        }
        let key = self.key.strip_suffix(suffix)?;
        Self::new(self.bucket.clone(), key).ok()
    }

    /// Determines if `other` lies under this URI when it is interpreted as a
    /// listing prefix.
    pub fn has_in_scope(&self, other: &ObjectUri) -> bool {
        self.bucket == other.bucket && other.key.starts_with(&self.key)
    }

    /// The key of the container of this URI (the key itself for containers,
    /// everything up to and including the last `/` otherwise).
    pub fn container_key(&self) -> &str {
        if self.is_container() {
            &self.key
        } else {
            match self.key.rfind('/') {
                Some(pos) => &self.key[..=pos],
                None => "",
            }
        }
    }

    fn verify_self(&self) -> stampsync_common::Result<()> {
        let display = format!("{S3_SCHEME}{}/{}", self.bucket, self.key);
        verify!(is_valid_bucket(&self.bucket), display);
        verify!(is_valid_key(&self.key), display);
        Ok(())
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{S3_SCHEME}{}/{}", self.bucket, self.key)
    }
}

impl TryFrom<&str> for ObjectUri {
    type Error = stampsync_common::error::Error;

    fn try_from(uri_str: &str) -> Result<Self, Self::Error> {
        ObjectUri::parse(uri_str)
    }
}

impl std::str::FromStr for ObjectUri {
    type Err = stampsync_common::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectUri::parse(s)
    }
}

fn is_valid_bucket(bucket: &str) -> bool {
    !bucket.is_empty()
        && bucket
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_'))
        && !bucket.starts_with('.')
}

fn is_valid_key(key: &str) -> bool {
    if key.is_empty() {
        return true;
    }
    if key.starts_with('/') || key.contains('\0') || key.contains('\\') {
        return false;
    }
    let trimmed = key.strip_suffix('/').unwrap_or(key);
    trimmed.split('/').all(is_valid_segment)
}

fn is_valid_relative(relative: &str) -> bool {
    is_valid_key(relative) && !relative.starts_with(S3_SCHEME)
}

/// Checks if a key segment is valid (i.e. non-empty and not a path traversal
/// sequence).
fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !matches!(
            segment,
            ".." | "%2e%2e"
                | "%2e%2E"
                | "%2E%2e"
                | "%2E%2E"
                | "%2e."
                | "%2E."
                | ".%2e"
                | ".%2E"
                | "."
                | "%2e"
                | "%2E"
        )
}

/// Verifies a predicate and returns an error if it is false.
fn verify(
    predicate: bool,
    condition: &str,
    uri: &str,
    relative: Option<&str>,
) -> stampsync_common::Result<()> {
    if predicate {
        Ok(())
    } else {
        Err(make_err(condition, uri, relative))
    }
}

fn make_err(reason: &str, uri: &str, relative: Option<&str>) -> stampsync_common::error::Error {
    stampsync_common::error::ErrorKind::ResolveUri {
        uri: uri.to_string(),
        relative: relative.map(String::from),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_and_prefix() {
        let uri =
            ObjectUri::parse("s3://22-rep-sandbox/langident/run1/GDL/GDL-1900.jsonl.bz2").unwrap();
        assert_eq!(uri.bucket(), "22-rep-sandbox");
        assert_eq!(uri.key(), "langident/run1/GDL/GDL-1900.jsonl.bz2");
        assert_eq!(uri.file_name(), Some("GDL-1900.jsonl.bz2"));
        assert!(!uri.is_container());
        assert_eq!(
            uri.to_string(),
            "s3://22-rep-sandbox/langident/run1/GDL/GDL-1900.jsonl.bz2"
        );

        let root = ObjectUri::parse("s3://bucket").unwrap();
        assert_eq!(root.key(), "");
        assert!(root.is_container());
        assert_eq!(root, ObjectUri::parse("s3://bucket/").unwrap());

        let prefix = ObjectUri::parse("s3://bucket/dir/").unwrap();
        assert!(prefix.is_container());
        assert_eq!(prefix.file_name(), None);
        assert_eq!(prefix.components(), vec!["dir"]);
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(ObjectUri::parse("https://bucket/key").is_err());
        assert!(ObjectUri::parse("s3:///key").is_err());
        assert!(ObjectUri::parse("s3://Bucket/key").is_err());
        assert!(ObjectUri::parse("s3://bucket//key").is_err());
        assert!(ObjectUri::parse("s3://bucket/a/../b").is_err());
        assert!(ObjectUri::parse("s3://bucket/a/./b").is_err());
        assert!(ObjectUri::parse("s3://bucket/a/%2e%2e/b").is_err());
        assert!(ObjectUri::parse("s3://bucket/a\\b").is_err());
    }

    #[test]
    fn test_keys_are_not_percent_decoded() {
        let uri = ObjectUri::parse("s3://bucket/a%20b/c d.txt").unwrap();
        assert_eq!(uri.key(), "a%20b/c d.txt");
    }

    #[test]
    fn test_join() {
        let base = ObjectUri::parse("s3://bucket/container/shard").unwrap();
        assert_eq!(
            base.join("index/terms").unwrap().to_string(),
            "s3://bucket/container/index/terms"
        );
        let dir = ObjectUri::parse("s3://bucket/container/").unwrap();
        assert_eq!(
            dir.join("stripe.bin").unwrap().key(),
            "container/stripe.bin"
        );
        assert!(base.join("").is_err());
        assert!(base.join("../x").is_err());
        assert!(base.join("/x").is_err());
        assert!(base.join("s3://other/x").is_err());
    }

    #[test]
    fn test_suffixes() {
        let uri = ObjectUri::parse("s3://bucket/a/b.jsonl.bz2").unwrap();
        let wip = uri.with_suffix(".wip").unwrap();
        assert_eq!(wip.key(), "a/b.jsonl.bz2.wip");
        assert_eq!(wip.strip_suffix(".wip").unwrap(), uri);
        assert!(uri.strip_suffix(".wip").is_none());
        assert!(ObjectUri::parse("s3://bucket/a/").unwrap().with_suffix(".wip").is_err());
    }

    #[test]
    fn test_scope() {
        let prefix = ObjectUri::parse("s3://bucket/run1/GDL-19").unwrap();
        let parse = |s: &str| ObjectUri::parse(s).unwrap();
        assert!(prefix.has_in_scope(&parse("s3://bucket/run1/GDL-1900.jsonl.bz2")));
        assert!(!prefix.has_in_scope(&parse("s3://bucket/run1/IMP-1900.jsonl.bz2")));
        assert!(!prefix.has_in_scope(&parse("s3://other/run1/GDL-1900.jsonl.bz2")));
        assert_eq!(prefix.container_key(), "run1/");
    }
}

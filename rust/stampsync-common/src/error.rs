use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    /// Missing or invalid setup (e.g. an unset build root). Always fatal.
    pub fn configuration(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::Configuration {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        Error(ErrorKind::InvalidOperation { name: name.into() }.into())
    }

    /// Failure to enumerate a remote prefix.
    pub fn listing(prefix: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Listing {
                prefix: prefix.into(),
                source,
            }
            .into(),
        )
    }

    /// Failure of a single store request for one object.
    pub fn transient_store(uri: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::TransientStore {
                uri: uri.into(),
                source,
            }
            .into(),
        )
    }

    pub fn claim_unavailable(uri: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::ClaimUnavailable {
                uri: uri.into(),
                source,
            }
            .into(),
        )
    }

    pub fn corrupted(uri: impl Into<String>, reason: impl Into<String>) -> Error {
        Error(
            ErrorKind::CorruptedObject {
                uri: uri.into(),
                reason: reason.into(),
            }
            .into(),
        )
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Io {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Error {
        Error(
            ErrorKind::Json {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    /// Returns `true` when the error only concerns a single object and the
    /// caller may skip that object and continue.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientStore { .. } | ErrorKind::ClaimUnavailable { .. }
        )
    }

    /// Like [`Error::is_transient`], but also covers objects that were read
    /// and found unusable. Sweeps over many objects skip these.
    pub fn is_object_scoped(&self) -> bool {
        self.is_transient() || matches!(self.kind(), ErrorKind::CorruptedObject { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    #[error(
        "failed to resolve uri '{uri}' (relative: {}), reason: {reason}",
        relative.as_deref().unwrap_or_default())]
    ResolveUri {
        uri: String,
        relative: Option<String>,
        reason: String,
    },

    #[error("failed to list '{prefix}': {source}")]
    Listing {
        prefix: String,
        source: std::io::Error,
    },

    #[error("store request for '{uri}' failed: {source}")]
    TransientStore {
        uri: String,
        source: std::io::Error,
    },

    #[error("claim marker '{uri}' unavailable: {source}")]
    ClaimUnavailable {
        uri: String,
        source: std::io::Error,
    },

    #[error("corrupted object '{uri}': {reason}")]
    CorruptedObject { uri: String, reason: String },

    #[error("IO error for '{context}': {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    #[error("JSON error for '{context}': {source}")]
    Json {
        context: String,
        source: serde_json::Error,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io("", e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::json("", e)
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(_: std::convert::Infallible) -> Self {
        Error::invalid_operation("conversion")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_object() {
        let err = Error::listing(
            "s3://bucket/prefix/",
            std::io::Error::other("connection reset"),
        );
        assert_eq!(
            err.to_string(),
            "failed to list 's3://bucket/prefix/': connection reset"
        );
        assert!(!err.is_transient());

        let err = Error::transient_store(
            "s3://bucket/a.jsonl.bz2",
            std::io::Error::from(std::io::ErrorKind::TimedOut),
        );
        assert!(err.to_string().contains("s3://bucket/a.jsonl.bz2"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_object_scoped_errors() {
        let corrupted = Error::corrupted("s3://bucket/a.jsonl.bz2", "truncated bzip2 stream");
        assert!(!corrupted.is_transient());
        assert!(corrupted.is_object_scoped());
        assert!(!Error::configuration("no build root").is_object_scoped());
        assert!(!Error::listing("s3://bucket/", std::io::Error::other("down")).is_object_scoped());
    }

    #[test]
    fn test_into_kind() {
        let err = Error::configuration("build root is not set");
        match err.into_kind() {
            ErrorKind::Configuration { message } => assert_eq!(message, "build root is not set"),
            other => panic!("unexpected kind {other:?}"),
        }
    }
}

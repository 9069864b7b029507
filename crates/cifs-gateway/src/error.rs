//! Error types for the CIFS gateway

use thiserror::Error;

/// HTTP status: bad request
pub const HTTP_BAD_REQUEST: u16 = 400;
/// HTTP status: not found
pub const HTTP_NOT_FOUND: u16 = 404;
/// HTTP status: internal server error
pub const HTTP_INTERNAL_ERROR: u16 = 500;
/// HTTP status: bad gateway
pub const HTTP_BAD_GATEWAY: u16 = 502;

/// Error types for share access, staging, and transform failures.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Remote host unreachable, port closed, or authentication rejected
    #[error("connection failed: {reason}")]
    Connection {
        /// What went wrong while connecting
        reason: String,
    },
    /// Share name unknown or not accessible with the session's credentials
    #[error("share not found: {share}")]
    ShareNotFound {
        /// The share that was requested
        share: String,
    },
    /// Remote directory does not exist or is not a directory
    #[error("path not found: {path}")]
    PathNotFound {
        /// The remote path that was listed
        path: String,
    },
    /// Remote file does not exist
    #[error("file {path} doesn't exist on remote share")]
    FileNotFound {
        /// The remote file path
        path: String,
    },
    /// Source of a move does not exist
    #[error("source file {path} doesn't exist")]
    SourceNotFound {
        /// The source path of the move
        path: String,
    },
    /// Caller supplied an unusable argument
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Why the argument was rejected
        reason: String,
    },
    /// Transform aborted after part of the JSON array was written
    #[error("transform aborted after {completed} item(s): {source}")]
    PartialFailure {
        /// Number of array elements already emitted
        completed: usize,
        /// The error that stopped the pipeline
        source: Box<GatewayError>,
    },
    /// Staging scope still holds files after cleanup
    #[error("staging directory {path} is not empty after cleanup")]
    CleanupInvariant {
        /// The staging directory that should have been empty
        path: String,
    },
    /// Document is not well-formed XML
    #[error("XML parse error: {reason}")]
    XmlParse {
        /// Parser diagnostics
        reason: String,
    },
    /// Converted document has no property under the configured root key
    #[error("root key {key} not found in converted document")]
    MissingRootKey {
        /// The configured root key
        key: String,
    },
    /// File, tree, session, or connection id unknown to the client
    #[error("invalid handle: {reason}")]
    InvalidHandle {
        /// Which handle was rejected
        reason: String,
    },
    /// Configuration could not be loaded or failed validation
    #[error("configuration error: {reason}")]
    Config {
        /// What is wrong with the configuration
        reason: String,
    },
    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Converts the error to the HTTP status a request layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::ShareNotFound { .. }
            | GatewayError::PathNotFound { .. }
            | GatewayError::FileNotFound { .. }
            | GatewayError::SourceNotFound { .. } => HTTP_NOT_FOUND,
            GatewayError::InvalidArgument { .. } => HTTP_BAD_REQUEST,
            GatewayError::Connection { .. } => HTTP_BAD_GATEWAY,
            GatewayError::PartialFailure { .. }
            | GatewayError::CleanupInvariant { .. }
            | GatewayError::XmlParse { .. }
            | GatewayError::MissingRootKey { .. }
            | GatewayError::InvalidHandle { .. }
            | GatewayError::Config { .. }
            | GatewayError::Json(_)
            | GatewayError::Io(_) => HTTP_INTERNAL_ERROR,
        }
    }

    /// True for the not-found family surfaced to clients as 404.
    pub fn is_not_found(&self) -> bool {
        self.http_status() == HTTP_NOT_FOUND
    }

    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        GatewayError::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Recovers a gateway error that travelled through `std::io` plumbing
    /// (e.g. `io::copy` over a remote file), wrapping anything else as `Io`.
    pub fn from_io(err: std::io::Error) -> Self {
        let is_gateway = err
            .get_ref()
            .map(|inner| inner.is::<GatewayError>())
            .unwrap_or(false);
        if !is_gateway {
            return GatewayError::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<GatewayError>()) {
            Some(Ok(gateway)) => *gateway,
            Some(Err(other)) => GatewayError::Io(std::io::Error::new(std::io::ErrorKind::Other, other)),
            None => GatewayError::Io(std::io::Error::from(std::io::ErrorKind::Other)),
        }
    }

    /// Wraps the error for transport through `std::io` traits.
    pub fn into_io(self) -> std::io::Error {
        match self {
            GatewayError::Io(err) => err,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}

/// Result type alias using GatewayError as the error type.
pub type Result<T> = std::result::Result<T, GatewayError>;

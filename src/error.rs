//! Error types for dcv-sync.

use reqwest::StatusCode;

/// Top-level error type for a pipeline run.
///
/// A "no matching email" result is not an error; see
/// [`crate::pipeline::types::RunOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown job: {0}")]
    UnknownJob(String),
}

/// Failures reported by the mail or storage session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{service} {operation} request failed: {reason}")]
    Request {
        service: &'static str,
        operation: &'static str,
        reason: String,
    },

    #[error("{service} {operation} returned {status}: {body}")]
    Status {
        service: &'static str,
        operation: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("Invalid response from {service} {operation}: {reason}")]
    InvalidResponse {
        service: &'static str,
        operation: &'static str,
        reason: String,
    },
}

impl TransportError {
    /// Expired or rejected credentials.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Status { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS)
    }
}

/// Attachment decoding and archive decryption errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Attachment payload is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Not a readable ZIP archive: {0}")]
    Malformed(String),

    #[error("Wrong password for member {member}")]
    InvalidPassword { member: String },

    #[error("Failed to read member {member}: {reason}")]
    Member { member: String, reason: String },
}

impl ArchiveError {
    /// The member the error occurred on, for member-level failures.
    pub fn member(&self) -> Option<&str> {
        match self {
            Self::InvalidPassword { member } | Self::Member { member, .. } => Some(member),
            Self::Encoding(_) | Self::Malformed(_) => None,
        }
    }
}

/// A member failed after `synced` earlier members were already replaced.
#[derive(Debug, thiserror::Error)]
#[error("Sync of member {member} failed after {synced} member(s) synced: {source}")]
pub struct SyncError {
    pub member: String,
    pub synced: usize,
    #[source]
    pub source: SyncFailure,
}

/// What stopped a partially completed sync.
#[derive(Debug, thiserror::Error)]
pub enum SyncFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The member could not be read out of the archive.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> TransportError {
        TransportError::Status {
            service: "gmail",
            operation: "search",
            status: StatusCode::from_u16(code).unwrap(),
            body: String::new(),
        }
    }

    #[test]
    fn auth_statuses_are_flagged() {
        assert!(status(401).is_auth());
        assert!(status(403).is_auth());
        assert!(!status(500).is_auth());
    }

    #[test]
    fn rate_limit_is_flagged() {
        assert!(status(429).is_rate_limited());
        assert!(!status(401).is_rate_limited());
    }

    #[test]
    fn sync_error_names_member() {
        let err = Error::from(SyncError {
            member: "B.txt".into(),
            synced: 1,
            source: status(500).into(),
        });
        let msg = err.to_string();
        assert!(msg.contains("B.txt"));
        assert!(msg.contains("after 1 member"));
    }

    #[test]
    fn archive_errors_expose_member() {
        let err = ArchiveError::InvalidPassword {
            member: "B.txt".into(),
        };
        assert_eq!(err.member(), Some("B.txt"));
        assert_eq!(ArchiveError::Malformed("eof".into()).member(), None);
    }
}

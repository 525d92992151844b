//! Error taxonomy for gate policy resolution and generation.

use std::path::PathBuf;

/// Coarse classification of a [`GateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Io,
    Parse,
    Cancelled,
}

/// Errors produced by the gate engine.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("named policy not found: {0}")]
    PolicyNotFound(String),

    #[error("festival root not found: {}", .0.display())]
    FestivalNotFound(PathBuf),

    #[error("phase not found: {}", .0.display())]
    PhaseNotFound(PathBuf),

    #[error("sequence not found: {}", .0.display())]
    SequenceNotFound(PathBuf),

    #[error("invalid override document {}: {message}", path.display())]
    InvalidOverride { path: PathBuf, message: String },

    #[error("invalid exclude pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("phase type unresolvable for {}", .0.display())]
    UnresolvedPhaseType(PathBuf),

    #[error("invalid gate task: {0}")]
    InvalidGate(String),

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl GateError {
    /// Create an IO error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a parse error for `path`.
    pub fn parse(path: impl Into<PathBuf>, source: serde_yaml::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PolicyNotFound(_)
            | Self::FestivalNotFound(_)
            | Self::PhaseNotFound(_)
            | Self::SequenceNotFound(_) => ErrorKind::NotFound,
            Self::InvalidOverride { .. }
            | Self::InvalidPattern { .. }
            | Self::UnresolvedPhaseType(_)
            | Self::InvalidGate(_) => ErrorKind::Validation,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Io { .. } => ErrorKind::Io,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Result type for gate engine operations.
pub type Result<T> = std::result::Result<T, GateError>;

/// Return `Err(Cancelled)` when the token has already fired.
pub(crate) fn check_cancelled(cancel: &tokio_util::sync::CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(GateError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            GateError::PolicyNotFound("strict".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            GateError::InvalidPattern {
                pattern: "[".into(),
                message: "unclosed".into()
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(GateError::Cancelled.kind(), ErrorKind::Cancelled);
        let io = GateError::io("/tmp/x", std::io::Error::other("boom"));
        assert_eq!(io.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_error_display_includes_path() {
        let err = GateError::SequenceNotFound(PathBuf::from("/fest/001_IMPL/01_api"));
        assert!(err.to_string().contains("01_api"));

        let err = GateError::PolicyNotFound("paranoid".to_string());
        assert_eq!(err.to_string(), "named policy not found: paranoid");
    }

    #[test]
    fn test_check_cancelled() {
        let token = tokio_util::sync::CancellationToken::new();
        assert!(check_cancelled(&token).is_ok());
        token.cancel();
        assert!(matches!(check_cancelled(&token), Err(GateError::Cancelled)));
    }
}

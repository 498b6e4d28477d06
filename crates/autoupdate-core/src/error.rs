// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Error types for the update decision engine

use std::fmt;
use thiserror::Error;

/// One factory image whose on-disk digest disagrees with the configured one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumMismatch {
    pub image: String,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for ChecksumMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checksum mismatch for {}: expected \"{}\" but file has checksum \"{}\"",
            self.image, self.expected, self.actual
        )
    }
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("malformed version: {0}")]
    MalformedVersion(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("{} checksum mismatch(es) in factory config", .0.len())]
    ConfigChecksumMismatch(Vec<ChecksumMismatch>),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("render error: {0}")]
    Render(String),
}

impl UpdateError {
    /// Collapse any failure into `BuildFailed`, keeping the original message.
    pub(crate) fn into_build_failure(self) -> Self {
        match self {
            Self::BuildFailed(_) => self,
            other => Self::BuildFailed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_display() {
        let mismatch = ChecksumMismatch {
            image: "6-release.gz".to_owned(),
            expected: "abc=".to_owned(),
            actual: "def=".to_owned(),
        };
        assert_eq!(
            mismatch.to_string(),
            "checksum mismatch for 6-release.gz: expected \"abc=\" but file has checksum \"def=\""
        );
    }

    #[test]
    fn test_into_build_failure_keeps_message() {
        let err = UpdateError::ImageNotFound("/static/foo".to_owned()).into_build_failure();
        assert!(matches!(err, UpdateError::BuildFailed(ref msg) if msg.contains("/static/foo")));

        let err = UpdateError::BuildFailed("exit 1".to_owned()).into_build_failure();
        assert_eq!(err.to_string(), "build failed: exit 1");
    }
}

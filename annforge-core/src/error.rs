// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Error types shared by every annforge crate

use std::path::PathBuf;
use thiserror::Error;

/// Result type for index construction operations
pub type AnnResult<T> = Result<T, AnnError>;

/// Errors that can occur while building, tuning, persisting or querying an index
#[derive(Debug, Error)]
pub enum AnnError {
    /// Dimension is zero, or not a multiple of 8 for a binary space
    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),

    /// Vector buffer holds no complete vector
    #[error("Number of vectors cannot be 0")]
    EmptyInput,

    /// Identifier vector and vector batch disagree in length
    #[error("Number of IDs ({ids}) does not match number of vectors ({vectors})")]
    IdCountMismatch { ids: usize, vectors: usize },

    /// A vector or query has the wrong width for the index
    #[error("Dimension mismatch: expected {expected} elements, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Topology description cannot be turned into an index
    #[error("Unsupported topology '{description}': {reason}")]
    UnsupportedTopology { description: String, reason: String },

    /// Freshly constructed topology still requires an offline training pass
    #[error("Index '{description}' is not trained; train it first and build from the template")]
    NotTrained { description: String },

    /// Vectors were added to an index that has not been trained
    #[error("Cannot add vectors to an untrained index")]
    UntrainedIndex,

    /// An ID map can only wrap an index that holds no vectors yet
    #[error("Cannot wrap an index that already holds {ntotal} vectors")]
    NotEmpty { ntotal: usize },

    /// A tuning parameter has the wrong type or an out-of-range value
    #[error("Invalid parameter '{key}': {reason}")]
    InvalidParameter { key: String, reason: String },

    /// Training sample is smaller than the topology requires
    #[error("Insufficient training sample: need at least {required} vectors, got {actual}")]
    InsufficientSample { required: usize, actual: usize },

    /// Template bytes do not hold a usable index
    #[error("Malformed template: {0}")]
    MalformedTemplate(String),

    /// Serialized artifact is corrupt or was written by an incompatible writer
    #[error("Index format mismatch: {0}")]
    FormatMismatch(String),

    /// Index file does not exist
    #[error("Index file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Reading or writing the artifact failed
    #[error("Persistence error at {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No loaded index is registered under this handle
    #[error("Unknown index handle: {0}")]
    UnknownHandle(u64),

    /// Worker pool could not be created
    #[error("Execution error: {0}")]
    Execution(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse error taxonomy used for logging and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Dimension, count and identifier checks
    Validation,
    /// Description, tuning and training state
    Topology,
    /// Artifact I/O and format
    Persistence,
    /// Handles, worker pools and configuration
    Host,
}

impl ErrorCategory {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Topology => "topology",
            ErrorCategory::Persistence => "persistence",
            ErrorCategory::Host => "host",
        }
    }
}

impl AnnError {
    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            AnnError::InvalidDimension(_)
            | AnnError::EmptyInput
            | AnnError::IdCountMismatch { .. }
            | AnnError::DimensionMismatch { .. } => ErrorCategory::Validation,
            AnnError::UnsupportedTopology { .. }
            | AnnError::NotTrained { .. }
            | AnnError::UntrainedIndex
            | AnnError::NotEmpty { .. }
            | AnnError::InvalidParameter { .. }
            | AnnError::InsufficientSample { .. } => ErrorCategory::Topology,
            AnnError::MalformedTemplate(_)
            | AnnError::FormatMismatch(_)
            | AnnError::NotFound(_)
            | AnnError::Persistence { .. } => ErrorCategory::Persistence,
            AnnError::UnknownHandle(_) | AnnError::Execution(_) | AnnError::Config(_) => {
                ErrorCategory::Host
            }
        }
    }

    /// Build a persistence error for `path`
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AnnError::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Build an unsupported topology error
    pub fn unsupported(description: &str, reason: impl Into<String>) -> Self {
        AnnError::UnsupportedTopology {
            description: description.to_string(),
            reason: reason.into(),
        }
    }

    /// Build an invalid parameter error
    pub fn invalid_parameter(key: &str, reason: impl Into<String>) -> Self {
        AnnError::InvalidParameter {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for AnnError {
    fn from(e: toml::de::Error) -> Self {
        AnnError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(AnnError::EmptyInput.category(), ErrorCategory::Validation);
        assert_eq!(
            AnnError::NotTrained {
                description: "IVF4,Flat".into()
            }
            .category(),
            ErrorCategory::Topology
        );
        assert_eq!(
            AnnError::persistence(
                "/nope",
                std::io::Error::new(std::io::ErrorKind::Other, "disk full")
            )
            .category(),
            ErrorCategory::Persistence
        );
        assert_eq!(AnnError::UnknownHandle(7).category(), ErrorCategory::Host);
    }

    #[test]
    fn test_messages_carry_context() {
        let err = AnnError::unsupported("IVFx", "bad partition count");
        assert!(err.to_string().contains("IVFx"));

        let err = AnnError::IdCountMismatch { ids: 3, vectors: 4 };
        assert_eq!(
            err.to_string(),
            "Number of IDs (3) does not match number of vectors (4)"
        );
    }
}

//! Error types for the linkage pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type for library operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that reject a whole input file or configuration.
///
/// Row-level problems (missing identifiers, unscorable items) are never
/// errors; they surface as unmatched rows or null scores instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// File could not be opened or written
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File is not readable as delimited text
    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// A configured column is absent from the file header
    #[error("{path} has no column named '{column}'")]
    MissingColumn { path: PathBuf, column: String },

    /// Configuration could not be parsed
    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration could not be written back out
    #[error("Configuration serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Configuration is structurally invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

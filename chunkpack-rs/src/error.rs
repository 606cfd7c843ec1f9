//! Error types for the bundle pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using BundleError.
pub type BundleResult<T> = Result<T, BundleError>;

/// Errors that abort a bundle operation.
#[derive(Debug, Error)]
pub enum BundleError {
    /// Source loading, transform or export-name resolution failed for a module.
    #[error("Can't compile module '{specifier}': {cause}")]
    Compile {
        specifier: String,
        cause: anyhow::Error,
    },

    /// The native bundling backend failed to produce a chunk.
    #[error("Failed to build chunk '{chunk}': {cause}")]
    Build { chunk: String, cause: anyhow::Error },

    /// A specifier is not part of the module graph.
    #[error("Module '{specifier}' not found in the module graph")]
    Resolution { specifier: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl BundleError {
    pub(crate) fn compile(specifier: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        BundleError::Compile {
            specifier: specifier.into(),
            cause: cause.into(),
        }
    }

    pub(crate) fn build(chunk: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        BundleError::Build {
            chunk: chunk.into(),
            cause: cause.into(),
        }
    }

    pub(crate) fn resolution(specifier: impl Into<String>) -> Self {
        BundleError::Resolution {
            specifier: specifier.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BundleError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors reported by the runtime module loader. These reject a single import,
/// they never abort the page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoaderError {
    #[error("invalid specifier: {0}")]
    InvalidSpecifier(String),

    #[error("failed to load script {src}: {message}")]
    ScriptLoad { src: String, message: String },

    /// The chunk script loaded but did not register the requested specifier.
    #[error("chunk {filename} did not register {specifier}")]
    NotRegistered { specifier: String, filename: String },
}

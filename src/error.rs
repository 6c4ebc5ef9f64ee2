//! Error types for derivative generation.

use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong between a request and a served path.
///
/// Inside the crate these propagate with `?`. The public entry points in
/// [`crate::cache::store`] turn them into a warning plus an empty path so a
/// broken image never takes the page down with it.
#[derive(Debug, Error)]
pub enum ResizeError {
    /// Mode string is not one of `fit`, `exact`, `crop`.
    #[error("invalid mode {0:?}")]
    InvalidMode(String),

    /// Output format string is not one of `jpg`, `jpeg`, `png`.
    #[error("invalid output format {0:?}")]
    InvalidFormat(String),

    /// Gravity string is not a known anchor.
    #[error("invalid crop gravity {0:?}")]
    InvalidGravity(String),

    /// Some other request field cannot be used safely.
    #[error("invalid {field}: {value:?}")]
    InvalidOption {
        field: &'static str,
        value: String,
    },

    /// Attachment ids must be plain alphanumeric tokens.
    #[error("invalid attachment id {0:?}")]
    InvalidAttachmentId(String),

    /// The attachment has no file, or the file is gone.
    #[error("source for attachment {id} is missing{}", .path.as_ref().map(|p| format!(" ({})", p.display())).unwrap_or_default())]
    SourceMissing {
        id: String,
        path: Option<PathBuf>,
    },

    /// The original was asked for but lives outside the document root.
    #[error("source {0} is outside the document root")]
    SourceOutsideRoot(PathBuf),

    /// Dimension probe returned something unusable.
    #[error("could not read dimensions of {path}: {reason}")]
    ProbeFailure { path: PathBuf, reason: String },

    /// The engine ran and reported failure.
    #[error("engine returned code {}: {output} command: {command}", .code.map(|c| c.to_string()).unwrap_or_else(|| "<signal>".into()))]
    TransformFailure {
        code: Option<i32>,
        output: String,
        command: String,
    },

    /// The engine could not be started at all.
    #[error("image engine {program} unavailable: {source}")]
    EngineUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Cache directory or cache file could not be written.
    #[error("cache write failed at {path}: {source}")]
    CacheWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("library error: {0}")]
    Library(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl ResizeError {
    /// Wrap an io error raised while touching the cache.
    pub fn cache_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CacheWriteFailure {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ResizeError>;

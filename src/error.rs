//! Error taxonomy for the karaoke session and its collaborators.
//!
//! Each collaborator has its own error type so callers can tell a refused
//! microphone from a failed download or a transcoder that exited non-zero.
//! `SessionError` wraps all of them for the session controller.

use std::path::PathBuf;

/// Failure reported by the playback/recording engine.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{operation} failed: {message}")]
pub struct EngineError {
    pub operation: &'static str,
    pub message: String,
}

impl EngineError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Failure turning a media reference into a file on disk.
#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    /// The reference is not a kind the resolver knows how to fetch
    #[error("Unsupported media reference: {0}")]
    Unsupported(String),

    /// Copying or writing the cache file failed
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The server answered with a non-success status
    #[error("Failed to download {url}. status={status}")]
    Http { url: String, status: u16 },

    /// The request itself failed (DNS, TLS, connection reset)
    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },
}

impl ResolveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ResolveError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure inside the audio post-processing pipeline. The payload is the
/// engine's diagnostic log.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Transcode failed:\n{0}")]
    Transcode(String),

    #[error("Mix failed:\n{0}")]
    Mix(String),
}

/// Everything that can go wrong in a start/stop cycle.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("No backing track selected")]
    NoSource,

    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("No mic recording found.")]
    NoRecording,

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

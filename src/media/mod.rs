//! Media references and the resolver that turns them into local files.
//!
//! A backing track can be a bundled asset, a remote URL or a path on disk.
//! Playback wants a URI while the transcoder wants a plain filesystem path;
//! the helpers here convert between the two forms.

use std::fmt;

pub mod resolver;

pub use resolver::{Downloader, HttpDownloader, MediaResolver};

const FILE_SCHEME: &str = "file://";
const ASSET_PREFIX: &str = "asset:";

/// Logical location of a piece of audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// A resource shipped with the application, looked up in the assets directory
    Bundled(String),
    /// A URL (`http(s)://`, `file://`) or a bare filesystem path
    Location(String),
}

impl MediaSource {
    /// Parse the command-line form: `asset:<name>` is bundled, anything else is a location.
    pub fn parse(reference: &str) -> Self {
        match reference.strip_prefix(ASSET_PREFIX) {
            Some(name) => MediaSource::Bundled(name.to_string()),
            None => MediaSource::Location(reference.to_string()),
        }
    }

    /// The raw reference string, used for cache naming and provenance.
    pub fn reference(&self) -> String {
        match self {
            MediaSource::Bundled(name) => format!("{ASSET_PREFIX}{name}"),
            MediaSource::Location(location) => location.clone(),
        }
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference())
    }
}

pub fn is_remote_url(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

pub fn is_file_uri(location: &str) -> bool {
    location.starts_with(FILE_SCHEME)
}

/// Prefix a path with `file://` unless it already has it.
pub fn to_file_uri(path: &str) -> String {
    if is_file_uri(path) {
        path.to_string()
    } else {
        format!("{FILE_SCHEME}{path}")
    }
}

/// Drop a leading `file://` so the result can be handed to filesystem APIs.
pub fn strip_file_scheme(location: &str) -> &str {
    location.strip_prefix(FILE_SCHEME).unwrap_or(location)
}

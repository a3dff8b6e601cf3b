//! Guarantees a concrete on-device file for a media reference.
//!
//! The transcoder can only read local files, so bundled assets and remote
//! tracks are copied or downloaded into the cache directory once and reused
//! afterwards. Writes go through a `.part` file that is renamed into place,
//! so an interrupted copy never leaves a half-written file that later calls
//! would mistake for a cached one.

use super::{MediaSource, is_file_uri, is_remote_url, strip_file_scheme, to_file_uri};
use crate::error::ResolveError;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_EXTENSION: &str = "mp3";

/// Fetches a remote resource into a local file.
pub trait Downloader: Send + Sync {
    fn download(&self, url: &str, dest: &Path) -> Result<(), ResolveError>;
}

/// Blocking HTTP downloader. Failures are not retried; the caller decides.
pub struct HttpDownloader {
    timeout: Duration,
    use_system_proxy: bool,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            use_system_proxy: true,
        }
    }

    /// Connect directly, ignoring `HTTP_PROXY` and friends.
    pub fn direct(timeout: Duration) -> Self {
        Self {
            timeout,
            use_system_proxy: false,
        }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<(), ResolveError> {
        let request_error = |e: reqwest::Error| ResolveError::Download {
            url: url.to_string(),
            message: e.to_string(),
        };

        let mut builder = reqwest::blocking::Client::builder().timeout(self.timeout);
        if !self.use_system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build().map_err(request_error)?;

        let mut response = client.get(url).send().map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let part = part_path(dest);
        let mut file = File::create(&part).map_err(|e| ResolveError::io(&part, e))?;
        let bytes = response.copy_to(&mut file).map_err(request_error)?;
        file.flush().map_err(|e| ResolveError::io(&part, e))?;
        drop(file);
        fs::rename(&part, dest).map_err(|e| ResolveError::io(dest, e))?;

        log::info!("Downloaded {bytes} bytes from {url}");
        Ok(())
    }
}

pub struct MediaResolver {
    assets_dir: PathBuf,
    cache_dir: PathBuf,
    downloader: Box<dyn Downloader>,
}

impl MediaResolver {
    pub fn new(
        assets_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        downloader: Box<dyn Downloader>,
    ) -> Self {
        Self {
            assets_dir: assets_dir.into(),
            cache_dir: cache_dir.into(),
            downloader,
        }
    }

    /// Canonical cache location for a reference: `song-<hash>.<ext>`.
    pub fn cache_path_for(&self, source: &MediaSource) -> PathBuf {
        let reference = source.reference();

        let mut context = md5::Context::new();
        context.consume(reference.as_bytes());
        let digest = format!("{:x}", context.finalize());

        let ext = reference_extension(&reference);
        self.cache_dir.join(format!("song-{}.{ext}", &digest[..12]))
    }

    /// Make sure `source` exists at its canonical cache path and return that path.
    pub fn ensure_on_disk(&self, source: &MediaSource) -> Result<PathBuf, ResolveError> {
        let out_path = self.cache_path_for(source);
        self.ensure_on_disk_at(source, &out_path)
    }

    /// Like [`ensure_on_disk`](Self::ensure_on_disk) with an explicit destination.
    ///
    /// Returns immediately if `out_path` already exists; nothing is re-copied or
    /// re-downloaded.
    pub fn ensure_on_disk_at(
        &self,
        source: &MediaSource,
        out_path: &Path,
    ) -> Result<PathBuf, ResolveError> {
        if out_path.exists() {
            return Ok(out_path.to_path_buf());
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ResolveError::io(parent, e))?;
        }

        match source {
            MediaSource::Bundled(name) => {
                if name.is_empty() || Path::new(name).is_absolute() || name.contains("..") {
                    return Err(ResolveError::Unsupported(source.reference()));
                }
                copy_into(&self.assets_dir.join(name), out_path)?;
            }
            MediaSource::Location(location) if is_remote_url(location) => {
                self.downloader.download(location, out_path)?;
            }
            MediaSource::Location(location) => {
                let path = strip_file_scheme(location);
                if path.is_empty() || path.contains("://") {
                    return Err(ResolveError::Unsupported(location.clone()));
                }
                copy_into(Path::new(path), out_path)?;
            }
        }

        log::info!("Cached {} at {}", source, out_path.display());
        Ok(out_path.to_path_buf())
    }

    /// Turn a source into something the player can open.
    ///
    /// Bundled assets are cached and returned as `file://` URIs, URLs and
    /// `file://` strings pass through, bare paths get the scheme prefixed.
    /// An absent source comes back as `None`.
    pub fn resolve_playable_uri(
        &self,
        source: Option<&MediaSource>,
    ) -> Result<Option<String>, ResolveError> {
        let Some(source) = source else {
            return Ok(None);
        };

        let uri = match source {
            MediaSource::Bundled(_) => {
                let path = self.ensure_on_disk(source)?;
                to_file_uri(&path.to_string_lossy())
            }
            MediaSource::Location(location)
                if is_remote_url(location) || is_file_uri(location) =>
            {
                location.clone()
            }
            MediaSource::Location(location) => to_file_uri(location),
        };

        Ok(Some(uri))
    }
}

fn copy_into(from: &Path, to: &Path) -> Result<(), ResolveError> {
    let part = part_path(to);
    fs::copy(from, &part).map_err(|e| ResolveError::io(from, e))?;
    fs::rename(&part, to).map_err(|e| ResolveError::io(to, e))?;
    Ok(())
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// File extension of a reference, ignoring any URL query or fragment.
fn reference_extension(reference: &str) -> String {
    let without_query = reference.split(['?', '#']).next().unwrap_or(reference);
    Path::new(without_query)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_lowercase())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

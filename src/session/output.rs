//! Listening back to a finished take.

use super::Handoff;
use crate::engine::SoundEngine;
use crate::media::to_file_uri;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputTrack {
    Recorded,
    Merged,
}

/// Plays either the normalized voice or the mixdown, one at a time.
/// Playback problems are logged and never propagated.
pub struct OutputPlayer {
    engine: Arc<dyn SoundEngine>,
    recorded: PathBuf,
    merged: PathBuf,
    current: Mutex<Option<OutputTrack>>,
}

impl OutputPlayer {
    pub fn new(engine: Arc<dyn SoundEngine>, handoff: Handoff) -> Self {
        Self {
            engine,
            recorded: handoff.recorded_path,
            merged: handoff.merged_path,
            current: Mutex::new(None),
        }
    }

    pub fn path(&self, track: OutputTrack) -> &Path {
        match track {
            OutputTrack::Recorded => &self.recorded,
            OutputTrack::Merged => &self.merged,
        }
    }

    pub fn now_playing(&self) -> Option<OutputTrack> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start `track`, or stop it if it is already the one playing.
    /// Returns what is playing afterwards.
    pub fn toggle(&self, track: OutputTrack) -> Option<OutputTrack> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let was_playing = *current;

        if let Err(e) = self.engine.stop_player() {
            log::debug!("Ignoring stop_player failure: {e}");
        }
        *current = None;

        if was_playing == Some(track) {
            return None;
        }

        let uri = to_file_uri(&self.path(track).to_string_lossy());
        match self.engine.start_player(&uri) {
            Ok(()) => *current = Some(track),
            Err(e) => log::warn!("Playback error: {e}"),
        }
        *current
    }

    pub fn stop(&self) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = self.engine.stop_player() {
            log::debug!("Ignoring stop_player failure: {e}");
        }
        *current = None;
    }

    /// Copy `track` into `dir` as `kara-<voice|mix>-<timestamp>.<ext>` so it
    /// survives the next session, and return the copy's path.
    pub fn export(&self, track: OutputTrack, dir: &Path) -> io::Result<PathBuf> {
        let source = self.path(track);
        let label = match track {
            OutputTrack::Recorded => "voice",
            OutputTrack::Merged => "mix",
        };
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("wav");
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");

        fs::create_dir_all(dir)?;
        let mut dest = dir.join(format!("kara-{label}-{stamp}.{ext}"));
        let mut n = 1;
        while dest.exists() {
            n += 1;
            dest = dir.join(format!("kara-{label}-{stamp}-{n}.{ext}"));
        }

        fs::copy(source, &dest)?;
        log::info!("Exported {} to {}", source.display(), dest.display());
        Ok(dest)
    }

    /// The engine reported the end of the track.
    pub fn finished(&self) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

//! Playback/recording engine contract.
//!
//! The session controller drives a [`SoundEngine`] and never touches audio
//! devices directly. Engines push events to subscribers over mpsc channels:
//! one subscription per [`ListenerKind`], replaced on re-subscribe and
//! dropped on unsubscribe.

use crate::error::EngineError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::{Mutex, PoisonError};

#[cfg(feature = "desktop")]
pub mod desktop;

#[cfg(feature = "desktop")]
pub use desktop::{DesktopPermissions, RodioEngine};

/// Event streams an engine can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Playback,
    PlaybackEnd,
    RecordProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// Playback position; delivered in non-decreasing order between seeks
    Position { current_ms: u64, duration_ms: u64 },
    /// The backing track played to its natural end
    PlaybackEnded,
    RecordProgress { elapsed_ms: u64 },
}

impl EngineEvent {
    pub fn kind(&self) -> ListenerKind {
        match self {
            EngineEvent::Position { .. } => ListenerKind::Playback,
            EngineEvent::PlaybackEnded => ListenerKind::PlaybackEnd,
            EngineEvent::RecordProgress { .. } => ListenerKind::RecordProgress,
        }
    }
}

/// A process-wide player plus recorder.
///
/// Instances are shared; callers must not assume a fresh state and should
/// stop and rewind defensively before starting a new session.
pub trait SoundEngine: Send + Sync {
    fn start_player(&self, uri: &str) -> Result<(), EngineError>;
    fn pause_player(&self) -> Result<(), EngineError>;
    fn resume_player(&self) -> Result<(), EngineError>;
    fn stop_player(&self) -> Result<(), EngineError>;
    fn seek_to_player(&self, position_ms: u64) -> Result<(), EngineError>;

    /// Begin capturing the microphone; returns the file being written.
    fn start_recorder(&self) -> Result<PathBuf, EngineError>;

    /// Finish capturing. `None` when nothing was being recorded.
    fn stop_recorder(&self) -> Result<Option<PathBuf>, EngineError>;

    fn add_listener(&self, kind: ListenerKind, sink: Sender<EngineEvent>);
    fn remove_listener(&self, kind: ListenerKind);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicPermission {
    Granted,
    Denied,
    /// Denied and the platform will not ask again; the user has to change
    /// it in system settings
    Blocked,
}

impl MicPermission {
    pub fn is_granted(self) -> bool {
        self == MicPermission::Granted
    }
}

/// Decides whether the microphone may be used.
pub trait PermissionGate: Send + Sync {
    fn ensure_microphone(&self) -> MicPermission;
}

/// Grants unconditionally. For file-only engines and tests.
pub struct AlwaysGranted;

impl PermissionGate for AlwaysGranted {
    fn ensure_microphone(&self) -> MicPermission {
        MicPermission::Granted
    }
}

/// Subscriber table shared by engine implementations.
#[derive(Default)]
pub struct ListenerRegistry {
    sinks: Mutex<HashMap<ListenerKind, Sender<EngineEvent>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, kind: ListenerKind, sink: Sender<EngineEvent>) {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, sink);
    }

    pub fn remove(&self, kind: ListenerKind) {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind);
    }

    pub fn is_attached(&self, kind: ListenerKind) -> bool {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&kind)
    }

    /// Deliver to the subscriber for the event's kind. A subscriber whose
    /// receiver is gone is removed.
    pub fn emit(&self, event: EngineEvent) {
        let kind = event.kind();
        let mut sinks = self.sinks.lock().unwrap_or_else(PoisonError::into_inner);
        let closed = match sinks.get(&kind) {
            Some(sink) => sink.send(event).is_err(),
            None => false,
        };
        if closed {
            sinks.remove(&kind);
        }
    }
}

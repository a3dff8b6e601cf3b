//! The record/playback session state machine.
//!
//! ```text
//! Idle --start()--> Starting --both engines up--> Running
//! Running --stop() | near end | playback ended--> Stopping --> Merging --> Idle
//! ```
//!
//! Three triggers can end a session and they may race: a manual `stop()`,
//! a position event inside the near-end window, and the engine's
//! end-of-track event. A one-shot guard lets exactly one of them run the
//! stop sequence; it is re-armed only by the next `start()`.
//!
//! Engine events reach the controller through a pump thread that holds a
//! weak reference. Dropping the controller detaches its listeners from the
//! engine, which closes the channel and ends the pump.

use crate::cues::{Cue, CueCursor, find_cue_at};
use crate::engine::{EngineEvent, ListenerKind, MicPermission, PermissionGate, SoundEngine};
use crate::error::{EngineError, SessionError};
use crate::media::{MediaResolver, MediaSource};
use crate::pipeline::{AudioPipeline, MixOptions, NormalizeOptions};
use crate::take_tag;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;

pub mod output;

pub use output::{OutputPlayer, OutputTrack};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Starting,
    Running,
    Stopping,
    /// Normalizing the take and mixing it with the backing track
    Merging,
}

/// Files produced by a finished session, owned by whoever receives them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub recorded_path: PathBuf,
    pub merged_path: PathBuf,
}

/// State changes published to subscribers, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Phase(SessionPhase),
    Position { position_ms: u64, duration_ms: u64 },
    /// Lyric line to display; `None` clears it
    Cue(Option<String>),
    Merging(bool),
    Finished(Handoff),
    Failed(String),
}

/// Point-in-time copy of the session state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub running: bool,
    pub recording: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub active_cue: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub near_end_threshold_ms: u64,
    pub normalize: NormalizeOptions,
    pub mix: MixOptions,
    /// Normalized take, overwritten every session
    pub voice_path: PathBuf,
    /// Mixdown, overwritten every session
    pub mix_path: PathBuf,
}

impl SessionSettings {
    /// Defaults with both session outputs placed in `cache_dir`.
    pub fn in_dir(cache_dir: &Path) -> Self {
        Self {
            near_end_threshold_ms: crate::constants::DEFAULT_NEAR_END_THRESHOLD_MS,
            normalize: NormalizeOptions::default(),
            mix: MixOptions::default(),
            voice_path: cache_dir.join(crate::constants::VOICE_FILE_NAME),
            mix_path: cache_dir.join(crate::constants::MIX_FILE_NAME),
        }
    }
}

struct SessionState {
    phase: SessionPhase,
    running: bool,
    recording: bool,
    seeking: bool,
    /// `stop()` arrived while the engines were still starting
    stop_pending: bool,
    position_ms: u64,
    duration_ms: u64,
    active_cue: Option<String>,
    cursor: CueCursor,
    cues: Vec<Cue>,
}

impl SessionState {
    fn clear_progress(&mut self) {
        self.position_ms = 0;
        self.duration_ms = 0;
        self.active_cue = None;
        self.cursor.reset();
    }
}

pub struct SessionController {
    engine: Arc<dyn SoundEngine>,
    pipeline: Box<dyn AudioPipeline>,
    resolver: MediaResolver,
    permissions: Box<dyn PermissionGate>,
    source: Option<MediaSource>,
    settings: SessionSettings,
    state: Mutex<SessionState>,
    stop_guard: AtomicBool,
    listeners_attached: AtomicBool,
    event_sink: Mutex<Option<Sender<EngineEvent>>>,
    playable_uri: Mutex<Option<String>>,
    subscribers: Mutex<Vec<Sender<SessionUpdate>>>,
}

impl SessionController {
    pub fn new(
        engine: Arc<dyn SoundEngine>,
        pipeline: Box<dyn AudioPipeline>,
        resolver: MediaResolver,
        permissions: Box<dyn PermissionGate>,
        source: Option<MediaSource>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            engine,
            pipeline,
            resolver,
            permissions,
            source,
            settings,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Idle,
                running: false,
                recording: false,
                seeking: false,
                stop_pending: false,
                position_ms: 0,
                duration_ms: 0,
                active_cue: None,
                cursor: CueCursor::new(),
                cues: Vec::new(),
            }),
            stop_guard: AtomicBool::new(false),
            listeners_attached: AtomicBool::new(false),
            event_sink: Mutex::new(None),
            playable_uri: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        SessionSnapshot {
            phase: state.phase,
            running: state.running,
            recording: state.recording,
            position_ms: state.position_ms,
            duration_ms: state.duration_ms,
            active_cue: state.active_cue.clone(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.state().phase
    }

    /// Receive every update published from now on.
    pub fn subscribe(&self) -> Receiver<SessionUpdate> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn publish(&self, update: SessionUpdate) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(update.clone()).is_ok());
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.state().phase = phase;
        self.publish(SessionUpdate::Phase(phase));
    }

    /// Replace the lyric cues. Resets the cursor and clears the displayed line.
    pub fn set_cues(&self, cues: Vec<Cue>) {
        {
            let mut state = self.state();
            state.cues = cues;
            state.cursor.reset();
            state.active_cue = None;
        }
        self.publish(SessionUpdate::Cue(None));
    }

    /// Subscribe to position and end-of-track events. Only the first call
    /// per controller lifetime (or since the last teardown) does anything.
    pub fn attach_listeners(self: &Arc<Self>) {
        if self.listeners_attached.swap(true, Ordering::AcqRel) {
            return;
        }

        let (tx, rx) = mpsc::channel();
        self.engine.add_listener(ListenerKind::Playback, tx.clone());
        self.engine.add_listener(ListenerKind::PlaybackEnd, tx.clone());
        *self
            .event_sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);

        let session = Arc::downgrade(self);
        let spawned = thread::Builder::new()
            .name("kara-session".into())
            .spawn(move || pump_events(rx, session));
        if let Err(e) = spawned {
            log::warn!("Could not start session event thread: {e}");
        }
    }

    /// Begin a session: play the backing track and record the microphone.
    ///
    /// A no-op while a session is running or its mix is in progress. On
    /// failure the controller is back in `Idle`; a side that did start is
    /// left running and is stopped by the next `start()` or `teardown()`.
    pub fn start(&self) -> Result<(), SessionError> {
        {
            let mut state = self.state();
            if state.running || state.phase != SessionPhase::Idle {
                log::debug!("start ignored in phase {:?}", state.phase);
                return Ok(());
            }
            self.stop_guard.store(false, Ordering::Release);
            state.stop_pending = false;
            state.clear_progress();
            state.phase = SessionPhase::Starting;
        }
        self.publish(SessionUpdate::Phase(SessionPhase::Starting));
        self.publish(SessionUpdate::Cue(None));
        self.publish(SessionUpdate::Position {
            position_ms: 0,
            duration_ms: 0,
        });

        let started = self.start_engines();
        let stop_pending = std::mem::take(&mut self.state().stop_pending);
        match started {
            Ok(()) => {
                log::info!("Session running");
                if stop_pending {
                    log::info!("Stop requested during start");
                    self.trigger_stop();
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("Session start failed: {e}");
                self.set_phase(SessionPhase::Idle);
                Err(e)
            }
        }
    }

    fn start_engines(&self) -> Result<(), SessionError> {
        match self.permissions.ensure_microphone() {
            MicPermission::Granted => {}
            MicPermission::Denied => return Err(SessionError::PermissionDenied),
            MicPermission::Blocked => {
                log::warn!(
                    "Microphone access is blocked. Enable it for this terminal in system settings to record."
                );
                return Err(SessionError::PermissionDenied);
            }
        }

        let uri = self.playable_uri()?;

        // The engine is shared; never trust what a previous user left behind
        if self.state().recording {
            best_effort("stop_recorder", self.engine.stop_recorder().map(|_| ()));
            self.engine.remove_listener(ListenerKind::RecordProgress);
            self.state().recording = false;
        }
        best_effort("stop_player", self.engine.stop_player());
        best_effort("seek_to_player", self.engine.seek_to_player(0));

        let engine = &self.engine;
        let (player, recorder) = thread::scope(|scope| {
            let player = scope.spawn(|| engine.start_player(&uri));
            let recorder = engine.start_recorder();
            let player = player
                .join()
                .unwrap_or_else(|_| Err(EngineError::new("start_player", "player thread panicked")));
            (player, recorder)
        });

        let mut state = self.state();
        if let Ok(path) = &recorder {
            log::info!("Recording take to {}", path.display());
            state.recording = true;
            if let Some(sink) = self
                .event_sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
            {
                self.engine
                    .add_listener(ListenerKind::RecordProgress, sink.clone());
            }
        }

        player?;
        recorder?;

        state.running = true;
        state.phase = SessionPhase::Running;
        drop(state);
        self.publish(SessionUpdate::Phase(SessionPhase::Running));
        Ok(())
    }

    /// Resolve the backing track once and reuse the URI afterwards.
    fn playable_uri(&self) -> Result<String, SessionError> {
        let mut cached = self
            .playable_uri
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(uri) = cached.as_ref() {
            return Ok(uri.clone());
        }

        let uri = self
            .resolver
            .resolve_playable_uri(self.source.as_ref())?
            .ok_or(SessionError::NoSource)?;
        *cached = Some(uri.clone());
        Ok(uri)
    }

    /// React to one engine event.
    pub fn handle_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::Position {
                current_ms,
                duration_ms,
            } => {
                if self.on_position(current_ms, duration_ms) {
                    log::info!("Near end of track at {current_ms} ms");
                    self.trigger_stop();
                }
            }
            EngineEvent::PlaybackEnded => {
                if self.state().running {
                    log::info!("Backing track ended");
                    self.trigger_stop();
                }
            }
            EngineEvent::RecordProgress { elapsed_ms } => {
                log::trace!("Recorded {elapsed_ms} ms");
            }
        }
    }

    /// Returns true when the position falls in the near-end window.
    fn on_position(&self, current_ms: u64, duration_ms: u64) -> bool {
        let mut guard = self.state();
        let state = &mut *guard;
        if !state.running {
            return false;
        }

        if !state.seeking {
            state.position_ms = current_ms;
            state.duration_ms = duration_ms;
            self.publish(SessionUpdate::Position {
                position_ms: current_ms,
                duration_ms,
            });
        }

        let text = find_cue_at(&state.cues, current_ms, &mut state.cursor).map(|c| c.text.clone());
        if text != state.active_cue {
            state.active_cue = text.clone();
            self.publish(SessionUpdate::Cue(text));
        }

        state.recording
            && duration_ms > 0
            && current_ms >= duration_ms.saturating_sub(self.settings.near_end_threshold_ms)
    }

    /// Stop from an event trigger; the outcome goes out as an update.
    fn trigger_stop(&self) {
        if let Err(e) = self.stop() {
            log::debug!("Stop triggered by engine event failed: {e}");
        }
    }

    /// Stop playback and recording, then normalize and mix the take.
    ///
    /// Only the first call per session does the work; later calls return
    /// `Ok(None)`. The controller is `Idle` again on every exit path.
    ///
    /// While the engines are still starting the request is deferred: `start()`
    /// runs the stop sequence once both engines are up, and this call returns
    /// `Ok(None)`.
    pub fn stop(&self) -> Result<Option<Handoff>, SessionError> {
        let had_recording = {
            let mut state = self.state();
            if state.phase == SessionPhase::Starting {
                log::debug!("stop deferred until start completes");
                state.stop_pending = true;
                return Ok(None);
            }
            // Under the state lock so a concurrent start() cannot re-arm it
            if self
                .stop_guard
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                log::debug!("stop already in progress");
                return Ok(None);
            }
            state.running = false;
            state.seeking = false;
            state.clear_progress();
            state.phase = SessionPhase::Stopping;
            state.recording
        };
        self.publish(SessionUpdate::Phase(SessionPhase::Stopping));
        self.publish(SessionUpdate::Position {
            position_ms: 0,
            duration_ms: 0,
        });
        self.publish(SessionUpdate::Cue(None));

        let _merging = MergingScope::enter(self);

        match self.stop_and_mix(had_recording) {
            Ok(handoff) => {
                log::info!(
                    "Session finished: voice={} mix={}",
                    handoff.recorded_path.display(),
                    handoff.merged_path.display()
                );
                self.publish(SessionUpdate::Finished(handoff.clone()));
                Ok(Some(handoff))
            }
            Err(e) => {
                log::warn!("Stop/mix failed: {e}");
                self.publish(SessionUpdate::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    fn stop_and_mix(&self, had_recording: bool) -> Result<Handoff, SessionError> {
        best_effort("stop_player", self.engine.stop_player());
        best_effort("seek_to_player", self.engine.seek_to_player(0));

        let mut recorded = None;
        if had_recording {
            recorded = self.engine.stop_recorder().unwrap_or_else(|e| {
                log::debug!("Ignoring stop_recorder failure: {e}");
                None
            });
            self.engine.remove_listener(ListenerKind::RecordProgress);
            self.state().recording = false;
        }
        let recorded = recorded.ok_or(SessionError::NoRecording)?;

        self.set_phase(SessionPhase::Merging);

        let voice = self.pipeline.normalize(
            &recorded,
            &self.settings.voice_path,
            &self.settings.normalize,
        )?;

        let source = self.source.as_ref().ok_or(SessionError::NoSource)?;
        let music = self.resolver.ensure_on_disk(source)?;

        let options = MixOptions {
            output_path: Some(self.settings.mix_path.clone()),
            ..self.settings.mix.clone()
        };
        let merged = self.pipeline.mix(&music, &voice, &options)?;

        if let Err(e) = take_tag::stamp(&merged, &voice, &source.reference()) {
            log::warn!("Could not tag {}: {e}", merged.display());
        }

        Ok(Handoff {
            recorded_path: voice,
            merged_path: merged,
        })
    }

    /// Mark a manual seek as in progress; position updates stop moving the
    /// displayed position until [`seek_to`](Self::seek_to) completes.
    pub fn begin_seek(&self) {
        self.state().seeking = true;
    }

    pub fn seek_to(&self, position_ms: u64) -> Result<(), SessionError> {
        let result = self.engine.seek_to_player(position_ms);

        let duration_ms = {
            let mut state = self.state();
            state.seeking = false;
            if result.is_ok() {
                state.position_ms = position_ms;
            }
            state.duration_ms
        };

        match result {
            Ok(()) => {
                self.publish(SessionUpdate::Position {
                    position_ms,
                    duration_ms,
                });
                Ok(())
            }
            Err(e) => {
                log::warn!("Seek to {position_ms} ms failed: {e}");
                Err(e.into())
            }
        }
    }

    /// Stop everything and detach from the engine. Never fails.
    pub fn teardown(&self) {
        let recording = self.state().recording;
        if recording {
            best_effort("stop_recorder", self.engine.stop_recorder().map(|_| ()));
        }
        best_effort("stop_player", self.engine.stop_player());
        best_effort("seek_to_player", self.engine.seek_to_player(0));

        {
            let mut state = self.state();
            state.running = false;
            state.recording = false;
            state.seeking = false;
            if state.phase != SessionPhase::Merging && state.phase != SessionPhase::Stopping {
                state.phase = SessionPhase::Idle;
            }
        }

        self.engine.remove_listener(ListenerKind::RecordProgress);
        self.engine.remove_listener(ListenerKind::Playback);
        self.engine.remove_listener(ListenerKind::PlaybackEnd);
        *self
            .event_sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.listeners_attached.store(false, Ordering::Release);

        log::info!("Session torn down");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.listeners_attached.load(Ordering::Acquire) {
            self.engine.remove_listener(ListenerKind::RecordProgress);
            self.engine.remove_listener(ListenerKind::Playback);
            self.engine.remove_listener(ListenerKind::PlaybackEnd);
        }
    }
}

/// Publishes `Merging(true)` on entry; on drop clears it and returns the
/// controller to `Idle`, whichever way the stop sequence exits.
struct MergingScope<'a> {
    session: &'a SessionController,
}

impl<'a> MergingScope<'a> {
    fn enter(session: &'a SessionController) -> Self {
        session.publish(SessionUpdate::Merging(true));
        Self { session }
    }
}

impl Drop for MergingScope<'_> {
    fn drop(&mut self) {
        self.session.publish(SessionUpdate::Merging(false));
        self.session.set_phase(SessionPhase::Idle);
    }
}

fn pump_events(events: Receiver<EngineEvent>, session: Weak<SessionController>) {
    for event in events {
        match session.upgrade() {
            Some(session) => session.handle_event(event),
            None => break,
        }
    }
    log::debug!("Session event thread finished");
}

fn best_effort(operation: &str, result: Result<(), EngineError>) {
    if let Err(e) = result {
        log::debug!("Ignoring {operation} failure: {e}");
    }
}

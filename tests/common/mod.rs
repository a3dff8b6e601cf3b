//! Fakes shared by the integration tests: an in-memory engine that writes a
//! real WAV when "recording", and a pipeline wrapper that counts calls around
//! the native backend.
#![allow(dead_code)]

use kara_studio::engine::{
    EngineEvent, ListenerKind, ListenerRegistry, MicPermission, PermissionGate, SoundEngine,
};
use kara_studio::error::{EngineError, PipelineError, ResolveError};
use kara_studio::media::{Downloader, MediaResolver, MediaSource};
use kara_studio::pipeline::{AudioPipeline, MixOptions, NativePipeline, NormalizeOptions};
use kara_studio::session::{SessionController, SessionSettings, SessionUpdate};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub fn write_tone(path: &Path, sample_rate: u32, secs: f32, amplitude: f32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..(sample_rate as f32 * secs) as usize {
        writer
            .write_sample((amplitude * i16::MAX as f32) as i16)
            .unwrap();
    }
    writer.finalize().unwrap();
}

pub struct FakeEngine {
    calls: Mutex<Vec<String>>,
    pub fail_player: AtomicBool,
    pub fail_recorder: AtomicBool,
    pub fail_everything_else: AtomicBool,
    /// How long `start_player` takes to return
    pub start_delay_ms: AtomicU64,
    recording: AtomicBool,
    recording_path: PathBuf,
    pub listeners: ListenerRegistry,
}

impl FakeEngine {
    pub fn new(recording_path: PathBuf) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_player: AtomicBool::new(false),
            fail_recorder: AtomicBool::new(false),
            fail_everything_else: AtomicBool::new(false),
            start_delay_ms: AtomicU64::new(0),
            recording: AtomicBool::new(false),
            recording_path,
            listeners: ListenerRegistry::new(),
        }
    }

    fn record_call(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self, operation: &'static str) -> Result<(), EngineError> {
        if self.fail_everything_else.load(Ordering::SeqCst) {
            Err(EngineError::new(operation, "engine unavailable"))
        } else {
            Ok(())
        }
    }
}

impl SoundEngine for FakeEngine {
    fn start_player(&self, uri: &str) -> Result<(), EngineError> {
        self.record_call(format!("start_player {uri}"));
        let delay = self.start_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.fail_player.load(Ordering::SeqCst) {
            return Err(EngineError::new("start_player", "no output device"));
        }
        Ok(())
    }

    fn pause_player(&self) -> Result<(), EngineError> {
        self.record_call("pause_player");
        self.maybe_fail("pause_player")
    }

    fn resume_player(&self) -> Result<(), EngineError> {
        self.record_call("resume_player");
        self.maybe_fail("resume_player")
    }

    fn stop_player(&self) -> Result<(), EngineError> {
        self.record_call("stop_player");
        self.maybe_fail("stop_player")
    }

    fn seek_to_player(&self, position_ms: u64) -> Result<(), EngineError> {
        self.record_call(format!("seek_to_player {position_ms}"));
        self.maybe_fail("seek_to_player")
    }

    fn start_recorder(&self) -> Result<PathBuf, EngineError> {
        self.record_call("start_recorder");
        if self.fail_recorder.load(Ordering::SeqCst) {
            return Err(EngineError::new("start_recorder", "no microphone"));
        }
        write_tone(&self.recording_path, 8_000, 0.5, 0.2);
        self.recording.store(true, Ordering::SeqCst);
        Ok(self.recording_path.clone())
    }

    fn stop_recorder(&self) -> Result<Option<PathBuf>, EngineError> {
        self.record_call("stop_recorder");
        self.maybe_fail("stop_recorder")?;
        if self.recording.swap(false, Ordering::SeqCst) {
            Ok(Some(self.recording_path.clone()))
        } else {
            Ok(None)
        }
    }

    fn add_listener(&self, kind: ListenerKind, sink: std::sync::mpsc::Sender<EngineEvent>) {
        self.record_call(format!("add_listener {kind:?}"));
        self.listeners.add(kind, sink);
    }

    fn remove_listener(&self, kind: ListenerKind) {
        self.record_call(format!("remove_listener {kind:?}"));
        self.listeners.remove(kind);
    }
}

pub struct Gate(pub MicPermission);

impl PermissionGate for Gate {
    fn ensure_microphone(&self) -> MicPermission {
        self.0
    }
}

pub struct NoDownloads;

impl Downloader for NoDownloads {
    fn download(&self, url: &str, _dest: &Path) -> Result<(), ResolveError> {
        Err(ResolveError::Download {
            url: url.to_string(),
            message: "offline".to_string(),
        })
    }
}

#[derive(Default)]
pub struct PipelineCounters {
    pub normalize_calls: AtomicUsize,
    pub mix_calls: AtomicUsize,
    pub fail_mix: AtomicBool,
}

/// Native pipeline with call counting and an injectable mix failure.
pub struct CountingPipeline {
    inner: NativePipeline,
    counters: Arc<PipelineCounters>,
}

impl AudioPipeline for CountingPipeline {
    fn normalize(
        &self,
        input: &Path,
        output: &Path,
        options: &NormalizeOptions,
    ) -> Result<PathBuf, PipelineError> {
        self.counters.normalize_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.normalize(input, output, options)
    }

    fn mix(
        &self,
        music: &Path,
        voice: &Path,
        options: &MixOptions,
    ) -> Result<PathBuf, PipelineError> {
        self.counters.mix_calls.fetch_add(1, Ordering::SeqCst);
        if self.counters.fail_mix.load(Ordering::SeqCst) {
            return Err(PipelineError::Mix("Error initializing filter 'amix'".into()));
        }
        self.inner.mix(music, voice, options)
    }
}

pub struct Rig {
    pub dir: TempDir,
    pub engine: Arc<FakeEngine>,
    pub counters: Arc<PipelineCounters>,
    pub session: Arc<SessionController>,
    pub updates: Receiver<SessionUpdate>,
    pub music: PathBuf,
}

impl Rig {
    pub fn new(permission: MicPermission) -> Self {
        Self::build(permission, true)
    }

    pub fn without_source() -> Self {
        Self::build(MicPermission::Granted, false)
    }

    fn build(permission: MicPermission, with_source: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let music = dir.path().join("music").join("song.wav");
        write_tone(&music, 8_000, 1.0, 0.3);

        let engine = Arc::new(FakeEngine::new(dir.path().join("rec").join("take.wav")));
        let counters = Arc::new(PipelineCounters::default());
        let cache = dir.path().join("cache");

        let pipeline = CountingPipeline {
            inner: NativePipeline::new(cache.join("default_mix.wav")),
            counters: counters.clone(),
        };
        let resolver = MediaResolver::new(dir.path().join("assets"), &cache, Box::new(NoDownloads));

        let mut settings = SessionSettings::in_dir(&cache);
        settings.mix.sample_rate = 8_000;
        settings.mix.dropout_transition_secs = 0.1;
        settings.normalize.sample_rate = 8_000;

        let source = with_source.then(|| MediaSource::Location(music.to_string_lossy().to_string()));
        let engine_handle: Arc<dyn SoundEngine> = engine.clone();
        let session = Arc::new(SessionController::new(
            engine_handle,
            Box::new(pipeline),
            resolver,
            Box::new(Gate(permission)),
            source,
            settings,
        ));
        let updates = session.subscribe();

        Self {
            dir,
            engine,
            counters,
            session,
            updates,
            music,
        }
    }

    pub fn drain(&self) -> Vec<SessionUpdate> {
        self.updates.try_iter().collect()
    }

    pub fn mix_calls(&self) -> usize {
        self.counters.mix_calls.load(Ordering::SeqCst)
    }

    pub fn normalize_calls(&self) -> usize {
        self.counters.normalize_calls.load(Ordering::SeqCst)
    }
}

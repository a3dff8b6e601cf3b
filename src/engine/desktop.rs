//! Speaker and microphone engine built on rodio and the cpal it bundles.
//!
//! Audio streams are not `Send`, so each lives on its own thread: the player
//! thread owns the output stream and the sink and takes commands over a
//! channel, and each recording gets a thread that owns the input stream
//! until it is told to stop. Both threads tick every `ENGINE_TICK_MS` to
//! publish position and progress events.

use super::{
    EngineEvent, ListenerKind, ListenerRegistry, MicPermission, PermissionGate, SoundEngine,
};
use crate::constants::{ENGINE_TICK_MS, RECORDING_FILE_NAME};
use crate::error::EngineError;
use crate::media::{is_remote_url, strip_file_scheme};
use rodio::cpal::{
    self,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Reply<T> = mpsc::Sender<Result<T, EngineError>>;
type WavSink = hound::WavWriter<BufWriter<File>>;

enum PlayerCommand {
    Start { path: PathBuf, reply: Reply<()> },
    Pause(Reply<()>),
    Resume(Reply<()>),
    Stop(Reply<()>),
    Seek { position_ms: u64, reply: Reply<()> },
}

pub struct RodioEngine {
    commands: Mutex<mpsc::Sender<PlayerCommand>>,
    listeners: Arc<ListenerRegistry>,
    recording_path: PathBuf,
    recorder: Mutex<Option<RecorderHandle>>,
}

impl RodioEngine {
    /// Spawn the player thread. Recordings are written to
    /// `<recordings_dir>/recording.wav`, overwritten by every take.
    pub fn new(recordings_dir: &Path) -> Result<Self, EngineError> {
        let listeners = Arc::new(ListenerRegistry::new());
        let (tx, rx) = mpsc::channel();

        let thread_listeners = listeners.clone();
        thread::Builder::new()
            .name("kara-player".into())
            .spawn(move || run_player(rx, thread_listeners))
            .map_err(|e| EngineError::new("start engine", e.to_string()))?;

        Ok(Self {
            commands: Mutex::new(tx),
            listeners,
            recording_path: recordings_dir.join(RECORDING_FILE_NAME),
            recorder: Mutex::new(None),
        })
    }

    fn request(
        &self,
        operation: &'static str,
        build: impl FnOnce(Reply<()>) -> PlayerCommand,
    ) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(build(reply_tx))
            .map_err(|_| EngineError::new(operation, "player thread is gone"))?;

        reply_rx
            .recv()
            .map_err(|_| EngineError::new(operation, "player thread is gone"))?
    }
}

impl SoundEngine for RodioEngine {
    fn start_player(&self, uri: &str) -> Result<(), EngineError> {
        if is_remote_url(uri) {
            return Err(EngineError::new(
                "start_player",
                format!("cannot stream {uri}; cache it locally first"),
            ));
        }
        let path = PathBuf::from(strip_file_scheme(uri));
        self.request("start_player", |reply| PlayerCommand::Start { path, reply })
    }

    fn pause_player(&self) -> Result<(), EngineError> {
        self.request("pause_player", PlayerCommand::Pause)
    }

    fn resume_player(&self) -> Result<(), EngineError> {
        self.request("resume_player", PlayerCommand::Resume)
    }

    fn stop_player(&self) -> Result<(), EngineError> {
        self.request("stop_player", PlayerCommand::Stop)
    }

    fn seek_to_player(&self, position_ms: u64) -> Result<(), EngineError> {
        self.request("seek_to_player", |reply| PlayerCommand::Seek { position_ms, reply })
    }

    fn start_recorder(&self) -> Result<PathBuf, EngineError> {
        let mut recorder = self.recorder.lock().unwrap_or_else(PoisonError::into_inner);
        if recorder.is_some() {
            return Err(EngineError::new("start_recorder", "recorder is already running"));
        }

        if let Some(parent) = self.recording_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| EngineError::new("start_recorder", e.to_string()))?;
        }

        let handle = RecorderHandle::spawn(self.recording_path.clone(), self.listeners.clone())?;
        *recorder = Some(handle);
        log::info!("Recording to {}", self.recording_path.display());
        Ok(self.recording_path.clone())
    }

    fn stop_recorder(&self) -> Result<Option<PathBuf>, EngineError> {
        let handle = self
            .recorder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match handle {
            Some(handle) => handle.finish().map(Some),
            None => Ok(None),
        }
    }

    fn add_listener(&self, kind: ListenerKind, sink: mpsc::Sender<EngineEvent>) {
        self.listeners.add(kind, sink);
    }

    fn remove_listener(&self, kind: ListenerKind) {
        self.listeners.remove(kind);
    }
}

impl Drop for RodioEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop_recorder() {
            log::debug!("Ignoring recorder shutdown failure: {e}");
        }
    }
}

fn run_player(commands: mpsc::Receiver<PlayerCommand>, listeners: Arc<ListenerRegistry>) {
    let mut player = Player::default();
    let tick = Duration::from_millis(ENGINE_TICK_MS);

    loop {
        match commands.recv_timeout(tick) {
            Ok(command) => player.handle(command),
            Err(RecvTimeoutError::Timeout) => player.tick(&listeners),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    player.shutdown();
}

#[derive(Default)]
struct Player {
    stream: Option<OutputStream>,
    sink: Option<Sink>,
    duration_ms: u64,
    finished: bool,
}

impl Player {
    fn handle(&mut self, command: PlayerCommand) {
        let (result, reply) = match command {
            PlayerCommand::Start { path, reply } => (self.start(&path), reply),
            PlayerCommand::Pause(reply) => (self.with_sink("pause_player", Sink::pause), reply),
            PlayerCommand::Resume(reply) => (self.with_sink("resume_player", Sink::play), reply),
            PlayerCommand::Stop(reply) => {
                self.shutdown();
                (Ok(()), reply)
            }
            PlayerCommand::Seek { position_ms, reply } => (self.seek(position_ms), reply),
        };
        let _ = reply.send(result);
    }

    fn start(&mut self, path: &Path) -> Result<(), EngineError> {
        let fail = |message: String| EngineError::new("start_player", message);
        self.shutdown();

        if self.stream.is_none() {
            let stream = OutputStreamBuilder::open_default_stream()
                .map_err(|e| fail(format!("no output device: {e}")))?;
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_ref() else {
            return Err(fail("no output device".into()));
        };

        let file = File::open(path).map_err(|e| fail(format!("{}: {e}", path.display())))?;
        let source = Decoder::new(BufReader::new(file))
            .map_err(|e| fail(format!("{}: {e}", path.display())))?;
        self.duration_ms = source
            .total_duration()
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let sink = Sink::connect_new(stream.mixer());
        sink.append(source);
        self.sink = Some(sink);
        self.finished = false;

        log::info!(
            "Playing {} ({} ms)",
            path.display(),
            self.duration_ms
        );
        Ok(())
    }

    fn with_sink(&self, operation: &'static str, action: fn(&Sink)) -> Result<(), EngineError> {
        match &self.sink {
            Some(sink) => {
                action(sink);
                Ok(())
            }
            None => Err(EngineError::new(operation, "nothing is playing")),
        }
    }

    fn seek(&mut self, position_ms: u64) -> Result<(), EngineError> {
        let Some(sink) = &self.sink else {
            return Err(EngineError::new("seek_to_player", "no track loaded"));
        };
        sink.try_seek(Duration::from_millis(position_ms))
            .map_err(|e| EngineError::new("seek_to_player", e.to_string()))
    }

    fn tick(&mut self, listeners: &ListenerRegistry) {
        let Some(sink) = &self.sink else {
            return;
        };
        if self.finished {
            return;
        }

        if sink.empty() {
            self.finished = true;
            listeners.emit(EngineEvent::Position {
                current_ms: self.duration_ms,
                duration_ms: self.duration_ms,
            });
            listeners.emit(EngineEvent::PlaybackEnded);
            return;
        }

        if !sink.is_paused() {
            listeners.emit(EngineEvent::Position {
                current_ms: sink.get_pos().as_millis() as u64,
                duration_ms: self.duration_ms,
            });
        }
    }

    /// Drop the current track; the output stream stays open for reuse.
    fn shutdown(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.finished = true;
    }
}

struct RecorderHandle {
    stop: mpsc::Sender<()>,
    done: mpsc::Receiver<Result<PathBuf, EngineError>>,
    thread: JoinHandle<()>,
}

impl RecorderHandle {
    fn spawn(path: PathBuf, listeners: Arc<ListenerRegistry>) -> Result<Self, EngineError> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("kara-recorder".into())
            .spawn(move || record(path, listeners, ready_tx, stop_rx, done_tx))
            .map_err(|e| EngineError::new("start_recorder", e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| EngineError::new("start_recorder", "recorder thread exited"))??;

        Ok(Self {
            stop: stop_tx,
            done: done_rx,
            thread,
        })
    }

    fn finish(self) -> Result<PathBuf, EngineError> {
        let _ = self.stop.send(());
        let result = self
            .done
            .recv()
            .map_err(|_| EngineError::new("stop_recorder", "recorder thread exited"))?;
        let _ = self.thread.join();
        result
    }
}

fn record(
    path: PathBuf,
    listeners: Arc<ListenerRegistry>,
    ready: Reply<()>,
    stop: mpsc::Receiver<()>,
    done: Reply<PathBuf>,
) {
    let capture = match Capture::open(&path) {
        Ok(capture) => {
            let _ = ready.send(Ok(()));
            capture
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let started = Instant::now();
    let tick = Duration::from_millis(ENGINE_TICK_MS);
    while let Err(RecvTimeoutError::Timeout) = stop.recv_timeout(tick) {
        listeners.emit(EngineEvent::RecordProgress {
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
    }

    let _ = done.send(capture.finish().map(|()| path));
}

/// A live microphone stream feeding a 16-bit WAV writer.
struct Capture {
    stream: cpal::Stream,
    writer: Arc<Mutex<Option<WavSink>>>,
}

impl Capture {
    fn open(path: &Path) -> Result<Self, EngineError> {
        let fail = |message: String| EngineError::new("start_recorder", message);

        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| fail("no microphone found".into()))?;
        let supported = device
            .default_input_config()
            .map_err(|e| fail(e.to_string()))?;

        let spec = hound::WavSpec {
            channels: supported.channels(),
            sample_rate: supported.sample_rate().0,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| fail(format!("{}: {e}", path.display())))?;
        let writer = Arc::new(Mutex::new(Some(writer)));

        let config: cpal::StreamConfig = supported.config();
        let on_error = |e: cpal::StreamError| log::warn!("Microphone stream error: {e}");
        let sink = writer.clone();

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    write_samples(
                        &sink,
                        data.iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                    )
                },
                on_error,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    write_samples(&sink, data.iter().copied())
                },
                on_error,
                None,
            ),
            cpal::SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    write_samples(&sink, data.iter().map(|&s| (s as i32 - 32_768) as i16))
                },
                on_error,
                None,
            ),
            format => return Err(fail(format!("unsupported sample format: {format:?}"))),
        }
        .map_err(|e| fail(e.to_string()))?;

        stream.play().map_err(|e| fail(e.to_string()))?;

        log::info!(
            "Microphone open: {} Hz, {} ch",
            spec.sample_rate,
            spec.channels
        );
        Ok(Self { stream, writer })
    }

    fn finish(self) -> Result<(), EngineError> {
        drop(self.stream);
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match writer {
            Some(writer) => writer
                .finalize()
                .map_err(|e| EngineError::new("stop_recorder", e.to_string())),
            None => Err(EngineError::new("stop_recorder", "recording was lost")),
        }
    }
}

fn write_samples(writer: &Mutex<Option<WavSink>>, samples: impl Iterator<Item = i16>) {
    let mut guard = writer.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(writer) = guard.as_mut() {
        for sample in samples {
            if writer.write_sample(sample).is_err() {
                break;
            }
        }
    }
}

/// Microphone access on desktop: granted when a default input device can be
/// opened, blocked when it exists but the platform refuses its configuration.
pub struct DesktopPermissions;

impl PermissionGate for DesktopPermissions {
    fn ensure_microphone(&self) -> MicPermission {
        match cpal::default_host().default_input_device() {
            None => MicPermission::Denied,
            Some(device) => match device.default_input_config() {
                Ok(_) => MicPermission::Granted,
                Err(e) => {
                    log::warn!("Microphone refused: {e}");
                    MicPermission::Blocked
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_ci() -> bool {
        std::env::var("CI").is_ok() || std::env::var("GITHUB_ACTIONS").is_ok()
    }

    #[test]
    fn test_remote_uri_is_rejected_before_reaching_the_device() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RodioEngine::new(dir.path()).unwrap();
        let err = engine
            .start_player("https://example.com/song.mp3")
            .unwrap_err();
        assert_eq!(err.operation, "start_player");
    }

    #[test]
    fn test_idle_engine_controls() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RodioEngine::new(dir.path()).unwrap();

        // Stopping is idempotent; pausing or seeking with nothing loaded is not
        assert!(engine.stop_player().is_ok());
        assert!(engine.pause_player().is_err());
        assert!(engine.seek_to_player(0).is_err());
        assert_eq!(engine.stop_recorder().unwrap(), None);
    }

    #[test]
    fn test_play_wav_file() {
        if is_ci() {
            eprintln!("Skipping audio device test in CI");
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&wav, spec).unwrap();
        for _ in 0..800 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let engine = RodioEngine::new(dir.path()).unwrap();
        // Machines without an output device fail cleanly instead of panicking
        if engine.start_player(&wav.to_string_lossy()).is_ok() {
            let (tx, rx) = mpsc::channel();
            engine.add_listener(ListenerKind::PlaybackEnd, tx);
            let event = rx.recv_timeout(Duration::from_secs(3));
            assert_eq!(event.ok(), Some(EngineEvent::PlaybackEnded));
        }
    }
}

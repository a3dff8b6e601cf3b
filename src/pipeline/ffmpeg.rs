//! Transcoder-backed pipeline.
//!
//! Each operation is a single command invocation: input paths, a filter or
//! format expression, and one output path. A non-zero exit turns the
//! transcoder's combined output into the error message.

use super::{AudioPipeline, MixOptions, NormalizeOptions};
use crate::error::PipelineError;
use crate::media::strip_file_scheme;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Result of one transcoder invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub success: bool,
    pub log: String,
}

/// Runs the transcoder with an argument list.
pub trait CommandRunner: Send + Sync {
    fn run(&self, args: &[String]) -> io::Result<CommandOutcome>;
}

/// Runs the `ffmpeg` binary as a child process.
pub struct FfmpegCli {
    binary: PathBuf,
}

impl FfmpegCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl CommandRunner for FfmpegCli {
    fn run(&self, args: &[String]) -> io::Result<CommandOutcome> {
        log::debug!("{} {}", self.binary.display(), args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    io::Error::new(
                        e.kind(),
                        format!(
                            "Transcoder '{}' not found. Install ffmpeg or set ffmpeg_path.",
                            self.binary.display()
                        ),
                    )
                } else {
                    e
                }
            })?;

        let mut log = String::from_utf8_lossy(&output.stderr).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stdout));

        Ok(CommandOutcome {
            success: output.status.success(),
            log,
        })
    }
}

pub struct FfmpegPipeline {
    runner: Box<dyn CommandRunner>,
    default_mix_path: PathBuf,
}

impl FfmpegPipeline {
    pub fn new(runner: Box<dyn CommandRunner>, default_mix_path: PathBuf) -> Self {
        Self {
            runner,
            default_mix_path,
        }
    }

    fn execute(
        &self,
        args: Vec<String>,
        to_error: fn(String) -> PipelineError,
    ) -> Result<(), PipelineError> {
        let outcome = self.runner.run(&args).map_err(|e| to_error(e.to_string()))?;
        if outcome.success {
            Ok(())
        } else {
            Err(to_error(outcome.log))
        }
    }
}

impl AudioPipeline for FfmpegPipeline {
    fn normalize(
        &self,
        input: &Path,
        output: &Path,
        options: &NormalizeOptions,
    ) -> Result<PathBuf, PipelineError> {
        let output = fs_path(output);
        ensure_parent(&output).map_err(|e| PipelineError::Transcode(e.to_string()))?;

        self.execute(
            normalize_args(&fs_path(input), &output, options),
            PipelineError::Transcode,
        )?;
        Ok(output)
    }

    fn mix(
        &self,
        music: &Path,
        voice: &Path,
        options: &MixOptions,
    ) -> Result<PathBuf, PipelineError> {
        let output = fs_path(
            options
                .output_path
                .as_deref()
                .unwrap_or(self.default_mix_path.as_path()),
        );
        ensure_parent(&output).map_err(|e| PipelineError::Mix(e.to_string()))?;

        self.execute(
            mix_args(&fs_path(music), &fs_path(voice), &output, options),
            PipelineError::Mix,
        )?;
        Ok(output)
    }
}

/// `-y -i in -vn -ac N -ar R -c:a pcm_s16le out`
pub fn normalize_args(input: &Path, output: &Path, options: &NormalizeOptions) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        input.display().to_string(),
        "-vn".into(),
        "-ac".into(),
        options.channels.to_string(),
        "-ar".into(),
        options.sample_rate.to_string(),
        "-c:a".into(),
        "pcm_s16le".into(),
        output.display().to_string(),
    ]
}

/// Gain each input, bring both to stereo s16 at the target rate, then `amix`
/// with `duration=longest`.
pub fn mix_filter(options: &MixOptions) -> String {
    let format = format!(
        "aformat=sample_fmts=s16:sample_rates={}:channel_layouts=stereo",
        options.sample_rate
    );
    format!(
        "[0:a]volume={music},{format}[m];\
         [1:a]volume={mic},{format}[v];\
         [m][v]amix=inputs=2:duration=longest:dropout_transition={dropout}:weights=1 {weight}[out]",
        music = options.music_gain,
        mic = options.mic_gain,
        dropout = options.dropout_transition_secs,
        weight = options.voice_weight,
    )
}

pub fn mix_args(music: &Path, voice: &Path, output: &Path, options: &MixOptions) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        music.display().to_string(),
        "-i".into(),
        voice.display().to_string(),
        "-filter_complex".into(),
        mix_filter(options),
        "-map".into(),
        "[out]".into(),
        "-c:a".into(),
        "pcm_s16le".into(),
        "-ar".into(),
        options.sample_rate.to_string(),
        "-ac".into(),
        "2".into(),
        output.display().to_string(),
    ]
}

fn fs_path(path: &Path) -> PathBuf {
    PathBuf::from(strip_file_scheme(&path.to_string_lossy()))
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct ScriptedRunner {
        calls: Arc<Mutex<Vec<Vec<String>>>>,
        outcome: CommandOutcome,
    }

    impl ScriptedRunner {
        fn new(success: bool, log: &str) -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                outcome: CommandOutcome {
                    success,
                    log: log.to_string(),
                },
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, args: &[String]) -> io::Result<CommandOutcome> {
            self.calls.lock().unwrap().push(args.to_vec());
            Ok(self.outcome.clone())
        }
    }

    struct MissingBinary;

    impl CommandRunner for MissingBinary {
        fn run(&self, _args: &[String]) -> io::Result<CommandOutcome> {
            Err(io::Error::new(io::ErrorKind::NotFound, "ffmpeg not found"))
        }
    }

    #[test]
    fn test_normalize_args_are_canonical_pcm() {
        let args = normalize_args(
            Path::new("/tmp/rec.m4a"),
            Path::new("/tmp/Voice.wav"),
            &NormalizeOptions::default(),
        );
        assert_eq!(
            args.join(" "),
            "-y -i /tmp/rec.m4a -vn -ac 1 -ar 44100 -c:a pcm_s16le /tmp/Voice.wav"
        );
    }

    #[test]
    fn test_mix_filter_graph() {
        let options = MixOptions::default();
        let filter = mix_filter(&options);

        assert!(filter.starts_with("[0:a]volume=0.9,aformat=sample_fmts=s16:sample_rates=44100:channel_layouts=stereo[m];"));
        assert!(filter.contains("[1:a]volume=1.5,"));
        assert!(filter.ends_with(
            "[m][v]amix=inputs=2:duration=longest:dropout_transition=2:weights=1 2[out]"
        ));
    }

    #[test]
    fn test_mix_args_request_stereo_at_rate() {
        let options = MixOptions {
            sample_rate: 48_000,
            ..MixOptions::default()
        };
        let args = mix_args(
            Path::new("/m.mp3"),
            Path::new("/v.wav"),
            Path::new("/out.wav"),
            &options,
        );

        let tail: Vec<&str> = args[args.len() - 5..].iter().map(String::as_str).collect();
        assert_eq!(tail, vec!["-ar", "48000", "-ac", "2", "/out.wav"]);
        assert_eq!(&args[1..5], &["-i", "/m.mp3", "-i", "/v.wav"]);
    }

    #[test]
    fn test_normalize_strips_file_scheme() {
        let runner = ScriptedRunner::new(true, "");
        let dir = tempfile::tempdir().unwrap();
        let pipeline = FfmpegPipeline::new(Box::new(runner.clone()), dir.path().join("mix.wav"));
        let output = dir.path().join("Voice.wav");

        let result = pipeline
            .normalize(
                Path::new("file:///rec/take.m4a"),
                &output,
                &NormalizeOptions::default(),
            )
            .unwrap();

        assert_eq!(result, output);
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0][2], "/rec/take.m4a");
    }

    #[test]
    fn test_mix_uses_default_output_path() {
        let runner = ScriptedRunner::new(true, "");
        let dir = tempfile::tempdir().unwrap();
        let default_path = dir.path().join("karaoke_mix.wav");
        let pipeline = FfmpegPipeline::new(Box::new(runner.clone()), default_path.clone());

        let out = pipeline
            .mix(Path::new("/m.mp3"), Path::new("/v.wav"), &MixOptions::default())
            .unwrap();
        assert_eq!(out, default_path);

        let custom = dir.path().join("nested/custom.wav");
        let options = MixOptions {
            output_path: Some(custom.clone()),
            ..MixOptions::default()
        };
        let out = pipeline
            .mix(Path::new("/m.mp3"), Path::new("/v.wav"), &options)
            .unwrap();
        assert_eq!(out, custom);
        assert!(custom.parent().unwrap().is_dir());
    }

    #[test]
    fn test_failures_surface_engine_log() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(false, "Invalid data found when processing input");
        let pipeline = FfmpegPipeline::new(Box::new(runner), dir.path().join("mix.wav"));

        let err = pipeline
            .normalize(
                Path::new("/bad.m4a"),
                &dir.path().join("v.wav"),
                &NormalizeOptions::default(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::Transcode("Invalid data found when processing input".into())
        );

        let err = pipeline
            .mix(Path::new("/m"), Path::new("/v"), &MixOptions::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Mix(log) if log.contains("Invalid data")));
    }

    #[test]
    fn test_missing_binary_is_reported_as_transcode_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = FfmpegPipeline::new(Box::new(MissingBinary), dir.path().join("mix.wav"));
        let err = pipeline
            .normalize(
                Path::new("/a.m4a"),
                &dir.path().join("v.wav"),
                &NormalizeOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Transcode(log) if log.contains("not found")));
    }
}

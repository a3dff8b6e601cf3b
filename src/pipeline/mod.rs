//! Audio post-processing: voice normalization and backing-track mixdown.
//!
//! Two backends implement [`AudioPipeline`]:
//!
//! - [`FfmpegPipeline`] drives an external transcoder with a filter graph and
//!   surfaces its log when it exits non-zero. It reads anything the
//!   transcoder can decode.
//! - [`NativePipeline`] decodes WAV and FLAC in-process and mixes with the
//!   same longest-duration, dropout-transition semantics.
//!
//! Outputs are not byte-for-byte reproducible across runs or backends; the
//! guarantees are format, duration and gain.

use crate::constants::{
    DEFAULT_DROPOUT_TRANSITION_SECS, DEFAULT_MIC_GAIN, DEFAULT_MUSIC_GAIN, DEFAULT_SAMPLE_RATE,
    DEFAULT_VOICE_WEIGHT,
};
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod ffmpeg;
pub mod native;

pub use ffmpeg::{CommandOutcome, CommandRunner, FfmpegCli, FfmpegPipeline};
pub use native::NativePipeline;

/// Target format for a normalized voice take.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeOptions {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for NormalizeOptions {
    /// Mono, 44.1kHz; always written as signed 16-bit PCM.
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
        }
    }
}

/// Gain and format settings for a mixdown. Output is always stereo 16-bit PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct MixOptions {
    pub music_gain: f32,
    pub mic_gain: f32,
    pub sample_rate: u32,
    /// Relative weight of the voice input; music has weight 1
    pub voice_weight: f32,
    /// Seconds over which the mix renormalizes after the shorter input ends
    pub dropout_transition_secs: f32,
    /// Where to write the mix; the backend's default path when `None`
    pub output_path: Option<PathBuf>,
}

impl Default for MixOptions {
    fn default() -> Self {
        Self {
            music_gain: DEFAULT_MUSIC_GAIN,
            mic_gain: DEFAULT_MIC_GAIN,
            sample_rate: DEFAULT_SAMPLE_RATE,
            voice_weight: DEFAULT_VOICE_WEIGHT,
            dropout_transition_secs: DEFAULT_DROPOUT_TRANSITION_SECS,
            output_path: None,
        }
    }
}

pub trait AudioPipeline: Send + Sync {
    /// Re-encode `input` to PCM at `output`, dropping any video stream.
    /// Overwrites `output`.
    fn normalize(
        &self,
        input: &Path,
        output: &Path,
        options: &NormalizeOptions,
    ) -> Result<PathBuf, PipelineError>;

    /// Weighted mix of `music` and `voice`, as long as the longer input.
    fn mix(&self, music: &Path, voice: &Path, options: &MixOptions)
    -> Result<PathBuf, PipelineError>;
}

/// Which backend the configuration asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Ffmpeg,
    Native,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ffmpeg" => Ok(Backend::Ffmpeg),
            "native" => Ok(Backend::Native),
            _ => Err(format!("Unknown backend '{s}'. Use 'ffmpeg' or 'native'")),
        }
    }
}

/// Build the configured backend. `default_mix_path` is used when a caller
/// does not pass `MixOptions::output_path`.
pub fn build_pipeline(
    backend: Backend,
    ffmpeg_path: &Path,
    default_mix_path: PathBuf,
) -> Box<dyn AudioPipeline> {
    match backend {
        Backend::Ffmpeg => Box::new(FfmpegPipeline::new(
            Box::new(FfmpegCli::new(ffmpeg_path)),
            default_mix_path,
        )),
        Backend::Native => Box::new(NativePipeline::new(default_mix_path)),
    }
}

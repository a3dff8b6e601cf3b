//! In-process pipeline for WAV and FLAC inputs.
//!
//! Files are decoded fully into interleaved `f32` buffers, remixed to the
//! requested channel count, linearly resampled, then mixed frame by frame.
//! The mixer follows `amix` semantics: each input is scaled by its weight
//! over the sum of weights still playing, and when an input runs out the
//! divisor eases down over the dropout transition instead of jumping.

use super::{AudioPipeline, MixOptions, NormalizeOptions};
use crate::error::PipelineError;
use crate::media::strip_file_scheme;
use std::fs;
use std::path::{Path, PathBuf};

pub struct NativePipeline {
    default_mix_path: PathBuf,
}

impl NativePipeline {
    pub fn new(default_mix_path: PathBuf) -> Self {
        Self { default_mix_path }
    }
}

impl AudioPipeline for NativePipeline {
    fn normalize(
        &self,
        input: &Path,
        output: &Path,
        options: &NormalizeOptions,
    ) -> Result<PathBuf, PipelineError> {
        let output = fs_path(output);
        let pcm = decode_file(&fs_path(input)).map_err(PipelineError::Transcode)?;

        log::info!(
            "Normalizing {} ({} Hz, {} ch) to {} Hz, {} ch",
            input.display(),
            pcm.sample_rate,
            pcm.channels,
            options.sample_rate,
            options.channels
        );

        let pcm = pcm
            .with_channels(options.channels)
            .resampled(options.sample_rate);
        write_wav(&output, &pcm).map_err(PipelineError::Transcode)?;
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

        let prepare = |path: &Path| -> Result<PcmBuffer, PipelineError> {
            Ok(decode_file(&fs_path(path))
                .map_err(PipelineError::Mix)?
                .with_channels(2)
                .resampled(options.sample_rate))
        };

        let inputs = vec![
            MixInput {
                pcm: prepare(music)?,
                gain: options.music_gain,
                weight: 1.0,
            },
            MixInput {
                pcm: prepare(voice)?,
                gain: options.mic_gain,
                weight: options.voice_weight,
            },
        ];

        let transition_frames = options.dropout_transition_secs.max(0.0) * options.sample_rate as f32;
        let mixer = WeightedMixer::new(inputs, 2, transition_frames);
        let total_frames = mixer.total_frames();
        let mixed = PcmBuffer {
            sample_rate: options.sample_rate,
            channels: 2,
            samples: mixer.collect(),
        };

        log::info!(
            "Mixed {} + {} into {} frames at {} Hz",
            music.display(),
            voice.display(),
            total_frames,
            options.sample_rate
        );

        write_wav(&output, &mixed).map_err(PipelineError::Mix)?;
        Ok(output)
    }
}

/// Interleaved PCM normalized to `-1.0..=1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl PcmBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }

    fn sample(&self, frame: usize, channel: u16) -> f32 {
        self.samples[frame * self.channels as usize + channel as usize]
    }

    /// Downmix to mono by averaging, upmix by duplicating; other layouts map
    /// target channel `c` to source channel `c % channels`.
    pub fn with_channels(self, target: u16) -> Self {
        if target == self.channels || self.channels == 0 || target == 0 {
            return self;
        }

        let frames = self.frames();
        let mut samples = Vec::with_capacity(frames * target as usize);

        for frame in 0..frames {
            if target == 1 {
                let sum: f32 = (0..self.channels).map(|c| self.sample(frame, c)).sum();
                samples.push(sum / self.channels as f32);
            } else {
                for c in 0..target {
                    samples.push(self.sample(frame, c % self.channels));
                }
            }
        }

        Self {
            sample_rate: self.sample_rate,
            channels: target,
            samples,
        }
    }

    /// Linear-interpolation resample to `target_rate`.
    pub fn resampled(self, target_rate: u32) -> Self {
        let frames = self.frames();
        if target_rate == self.sample_rate || frames == 0 || self.sample_rate == 0 {
            return Self {
                sample_rate: target_rate.max(1),
                ..self
            };
        }

        let step = self.sample_rate as f64 / target_rate as f64;
        let out_frames = ((frames as f64) / step).round().max(1.0) as usize;
        let mut samples = Vec::with_capacity(out_frames * self.channels as usize);

        for j in 0..out_frames {
            let pos = j as f64 * step;
            let i0 = (pos.floor() as usize).min(frames - 1);
            let i1 = (i0 + 1).min(frames - 1);
            let frac = (pos - i0 as f64) as f32;
            for c in 0..self.channels {
                let a = self.sample(i0, c);
                let b = self.sample(i1, c);
                samples.push(a + (b - a) * frac);
            }
        }

        Self {
            sample_rate: target_rate,
            channels: self.channels,
            samples,
        }
    }
}

/// Decode a WAV or FLAC file by extension.
pub fn decode_file(path: &Path) -> Result<PcmBuffer, String> {
    if !path.exists() {
        return Err(format!("File not found: {}", path.display()));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "wav" => decode_wav(path),
        "flac" => decode_flac(path),
        _ => Err(format!(
            "Unsupported audio format for native backend: {ext} (use backend = \"ffmpeg\")"
        )),
    }
}

fn decode_wav(path: &Path) -> Result<PcmBuffer, String> {
    let mut reader = hound::WavReader::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let spec = reader.spec();

    let samples: Result<Vec<f32>, hound::Error> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => reader.samples::<f32>().collect(),
        (hound::SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|s| s as f32 / 128.0))
            .collect(),
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / 32768.0))
            .collect(),
        (hound::SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|s| s as f32 / 8388608.0))
            .collect(),
        (hound::SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|s| s as f32 / 2147483648.0))
            .collect(),
        (format, bits) => {
            return Err(format!("Unsupported WAV sample format: {format:?} {bits}-bit"));
        }
    };

    Ok(PcmBuffer {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        samples: samples.map_err(|e| format!("{}: {e}", path.display()))?,
    })
}

fn decode_flac(path: &Path) -> Result<PcmBuffer, String> {
    let mut reader = claxon::FlacReader::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let info = reader.streaminfo();
    let scale = (1u64 << (info.bits_per_sample - 1)) as f32;

    let mut samples = Vec::new();
    for sample in reader.samples() {
        let sample = sample.map_err(|e| format!("{}: {e}", path.display()))?;
        samples.push(sample as f32 / scale);
    }

    Ok(PcmBuffer {
        sample_rate: info.sample_rate,
        channels: info.channels as u16,
        samples,
    })
}

/// Write signed 16-bit PCM, clamping out-of-range samples.
pub fn write_wav(path: &Path, pcm: &PcmBuffer) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| format!("{}: {e}", parent.display()))?;
    }

    let spec = hound::WavSpec {
        channels: pcm.channels,
        sample_rate: pcm.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let to_message = |e: hound::Error| format!("{}: {e}", path.display());

    let mut writer = hound::WavWriter::create(path, spec).map_err(to_message)?;
    for &sample in &pcm.samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        writer.write_sample(value).map_err(to_message)?;
    }
    writer.finalize().map_err(to_message)
}

struct MixInput {
    pcm: PcmBuffer,
    gain: f32,
    weight: f32,
}

/// Sums gained, weighted inputs that share a channel layout and rate,
/// yielding interleaved samples until the longest input is exhausted.
struct WeightedMixer {
    inputs: Vec<MixInput>,
    channels: u16,
    transition_frames: f32,
    total_frames: usize,
    frame: usize,
    channel: u16,
    scales: Vec<f32>,
}

impl WeightedMixer {
    fn new(inputs: Vec<MixInput>, channels: u16, transition_frames: f32) -> Self {
        for input in &inputs {
            if input.pcm.channels != channels {
                log::warn!(
                    "Mixer input has {} channels, expected {}",
                    input.pcm.channels,
                    channels
                );
            }
        }

        let total_frames = inputs.iter().map(|i| i.pcm.frames()).max().unwrap_or(0);
        let scales = vec![0.0; inputs.len()];

        Self {
            inputs,
            channels,
            transition_frames,
            total_frames,
            frame: 0,
            channel: 0,
            scales,
        }
    }

    fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// How much an input still counts towards the divisor at `frame`.
    fn presence(&self, input: &MixInput, frame: usize) -> f32 {
        let len = input.pcm.frames();
        if frame < len {
            1.0
        } else if self.transition_frames > 0.0 {
            (1.0 - (frame - len) as f32 / self.transition_frames).max(0.0)
        } else {
            0.0
        }
    }

    fn update_scales(&mut self) {
        let divisor: f32 = self
            .inputs
            .iter()
            .map(|input| input.weight * self.presence(input, self.frame))
            .sum();

        for (i, input) in self.inputs.iter().enumerate() {
            self.scales[i] = if divisor > 0.0 {
                input.gain * input.weight / divisor
            } else {
                0.0
            };
        }
    }
}

impl Iterator for WeightedMixer {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.frame >= self.total_frames {
            return None;
        }

        if self.channel == 0 {
            self.update_scales();
        }

        let mut mixed_sample = 0.0f32;
        for (input, scale) in self.inputs.iter().zip(&self.scales) {
            if self.frame < input.pcm.frames() {
                let channel = self.channel % input.pcm.channels.max(1);
                mixed_sample += input.pcm.sample(self.frame, channel) * scale;
            }
        }

        self.channel += 1;
        if self.channel >= self.channels {
            self.channel = 0;
            self.frame += 1;
        }

        // Clamp to prevent clipping
        Some(mixed_sample.clamp(-1.0, 1.0))
    }
}

fn fs_path(path: &Path) -> PathBuf {
    PathBuf::from(strip_file_scheme(&path.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_tone(path: &Path, sample_rate: u32, channels: u16, secs: f32, amplitude: f32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let frames = (sample_rate as f32 * secs) as usize;
        for _ in 0..frames {
            for _ in 0..channels {
                writer
                    .write_sample((amplitude * i16::MAX as f32) as i16)
                    .unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn read_back(path: &Path) -> PcmBuffer {
        decode_file(path).unwrap()
    }

    #[test]
    fn test_normalize_to_canonical_format() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("take.wav");
        let output = dir.path().join("Voice.wav");
        write_tone(&input, 48_000, 2, 1.0, 0.25);

        let pipeline = NativePipeline::new(dir.path().join("mix.wav"));
        let result = pipeline
            .normalize(&input, &output, &NormalizeOptions::default())
            .unwrap();

        let spec = hound::WavReader::open(&result).unwrap().spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);

        let pcm = read_back(&result);
        assert!((pcm.duration_secs() - 1.0).abs() < 0.01);
        assert!((pcm.samples[1000] - 0.25).abs() < 0.01);
    }

    #[test]
    fn test_normalize_overwrites_previous_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("take.wav");
        let output = dir.path().join("Voice.wav");
        fs::write(&output, b"stale").unwrap();
        write_tone(&input, 44_100, 1, 0.2, 0.1);

        NativePipeline::new(dir.path().join("mix.wav"))
            .normalize(&input, &output, &NormalizeOptions::default())
            .unwrap();
        assert!(hound::WavReader::open(&output).is_ok());
    }

    #[test]
    fn test_normalize_unsupported_format() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("take.m4a");
        fs::write(&input, b"not really aac").unwrap();

        let err = NativePipeline::new(dir.path().join("mix.wav"))
            .normalize(&input, &dir.path().join("v.wav"), &NormalizeOptions::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Transcode(msg) if msg.contains("m4a")));
    }

    #[test]
    fn test_mix_format_and_duration_follow_longest_input() {
        let dir = TempDir::new().unwrap();
        let music = dir.path().join("music.wav");
        let voice = dir.path().join("voice.wav");
        write_tone(&music, 22_050, 1, 1.0, 0.2);
        write_tone(&voice, 48_000, 2, 0.5, 0.2);

        let pipeline = NativePipeline::new(dir.path().join("karaoke_mix.wav"));
        let out = pipeline
            .mix(&music, &voice, &MixOptions::default())
            .unwrap();

        assert_eq!(out, dir.path().join("karaoke_mix.wav"));
        let pcm = read_back(&out);
        assert_eq!(pcm.channels, 2);
        assert_eq!(pcm.sample_rate, 44_100);
        assert!(pcm.duration_secs() >= 1.0 - 0.01);
    }

    #[test]
    fn test_mix_custom_rate_and_path() {
        let dir = TempDir::new().unwrap();
        let music = dir.path().join("music.wav");
        let voice = dir.path().join("voice.wav");
        write_tone(&music, 44_100, 2, 0.3, 0.1);
        write_tone(&voice, 44_100, 1, 0.6, 0.1);

        let options = MixOptions {
            sample_rate: 16_000,
            output_path: Some(dir.path().join("out/custom.wav")),
            ..MixOptions::default()
        };
        let out = NativePipeline::new(dir.path().join("unused.wav"))
            .mix(&music, &voice, &options)
            .unwrap();

        let pcm = read_back(&out);
        assert_eq!(pcm.sample_rate, 16_000);
        assert_eq!(pcm.channels, 2);
        assert!(pcm.duration_secs() >= 0.6 - 0.01);
    }

    #[test]
    fn test_mix_gain_weighting_and_dropout_transition() {
        let dir = TempDir::new().unwrap();
        let music = dir.path().join("music.wav");
        let voice = dir.path().join("voice.wav");
        write_tone(&music, 8_000, 1, 4.0, 0.5);
        write_tone(&voice, 8_000, 1, 0.5, 0.0);

        let options = MixOptions {
            music_gain: 0.9,
            mic_gain: 1.5,
            voice_weight: 2.0,
            sample_rate: 8_000,
            dropout_transition_secs: 1.0,
            output_path: Some(dir.path().join("mix.wav")),
        };
        let out = NativePipeline::new(dir.path().join("unused.wav"))
            .mix(&music, &voice, &options)
            .unwrap();
        let pcm = read_back(&out);
        let at = |secs: f32| pcm.sample((secs * 8_000.0) as usize, 0);

        // Both playing: music scaled by 1 / (1 + 2)
        assert!((at(0.25) - 0.15).abs() < 0.002);
        // Voice gone and transition finished: music alone at full gain
        assert!((at(3.5) - 0.45).abs() < 0.002);
        // Halfway through the transition the level sits in between
        let mid = at(1.0);
        assert!(mid > 0.15 && mid < 0.45);
    }

    #[test]
    fn test_mix_missing_input_is_mix_error() {
        let dir = TempDir::new().unwrap();
        let music = dir.path().join("music.wav");
        write_tone(&music, 8_000, 1, 0.1, 0.1);

        let err = NativePipeline::new(dir.path().join("mix.wav"))
            .mix(&music, &dir.path().join("nope.wav"), &MixOptions::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Mix(msg) if msg.contains("File not found")));
    }

    #[test]
    fn test_channel_remix() {
        let stereo = PcmBuffer {
            sample_rate: 10,
            channels: 2,
            samples: vec![0.2, 0.4, -0.2, 0.0],
        };
        let mono = stereo.with_channels(1);
        assert_eq!(mono.channels, 1);
        assert!((mono.samples[0] - 0.3).abs() < 1e-6);
        assert!((mono.samples[1] + 0.1).abs() < 1e-6);

        let back = mono.with_channels(2);
        assert_eq!(back.samples.len(), 4);
        assert_eq!(back.samples[0], back.samples[1]);
    }

    #[test]
    fn test_resample_keeps_duration() {
        let pcm = PcmBuffer {
            sample_rate: 48_000,
            channels: 1,
            samples: vec![0.5; 48_000],
        };
        let resampled = pcm.resampled(44_100);
        assert_eq!(resampled.frames(), 44_100);
        assert!(resampled.samples.iter().all(|s| (s - 0.5).abs() < 1e-6));
    }
}

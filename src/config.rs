//! Application configuration management.
//!
//! Settings live in `~/.config/kara/config.toml` (or under
//! `$XDG_CONFIG_HOME/kara`). A missing file means defaults. Directory values
//! may use `~` and environment variables; they are expanded when read.

use crate::constants::{
    DEFAULT_DROPOUT_TRANSITION_SECS, DEFAULT_MIC_GAIN, DEFAULT_MUSIC_GAIN,
    DEFAULT_NEAR_END_THRESHOLD_MS, DEFAULT_SAMPLE_RATE, DEFAULT_VOICE_WEIGHT,
};
use crate::pipeline::{Backend, MixOptions, NormalizeOptions};
use crate::session::SessionSettings;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "default_assets_dir")]
    pub assets_dir: String,
    #[serde(default = "default_near_end_threshold_ms")]
    pub near_end_threshold_ms: u64,
    #[serde(default = "default_music_gain")]
    pub music_gain: f32,
    #[serde(default = "default_mic_gain")]
    pub mic_gain: f32,
    #[serde(default = "default_voice_weight")]
    pub voice_weight: f32,
    #[serde(default = "default_dropout_transition_secs")]
    pub dropout_transition_secs: f32,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log file; `<cache_dir>/kara.log` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

fn default_cache_dir() -> String {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("kara")
        .to_string_lossy()
        .to_string()
}

fn default_assets_dir() -> String {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("kara")
        .join("assets")
        .to_string_lossy()
        .to_string()
}

fn default_near_end_threshold_ms() -> u64 {
    DEFAULT_NEAR_END_THRESHOLD_MS
}

fn default_music_gain() -> f32 {
    DEFAULT_MUSIC_GAIN
}

fn default_mic_gain() -> f32 {
    DEFAULT_MIC_GAIN
}

fn default_voice_weight() -> f32 {
    DEFAULT_VOICE_WEIGHT
}

fn default_dropout_transition_secs() -> f32 {
    DEFAULT_DROPOUT_TRANSITION_SECS
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn expand(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}

fn parse_gain(key: &str, value: &str) -> Result<f32, Box<dyn Error>> {
    let gain: f32 = value
        .parse()
        .map_err(|_| format!("{key} must be a number"))?;
    check_gain(key, gain)
}

fn check_gain(key: &str, gain: f32) -> Result<f32, Box<dyn Error>> {
    if !gain.is_finite() || gain < 0.0 {
        return Err(format!("{key} must be zero or positive").into());
    }
    Ok(gain)
}

fn check_sample_rate(rate: u32) -> Result<u32, Box<dyn Error>> {
    if !(8_000..=192_000).contains(&rate) {
        return Err("sample_rate must be between 8000 and 192000".into());
    }
    Ok(rate)
}

fn check_log_level(level: &str) -> Result<(), Box<dyn Error>> {
    level
        .parse::<log::LevelFilter>()
        .map_err(|_| "log_level must be one of off, error, warn, info, debug, trace")?;
    Ok(())
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            assets_dir: default_assets_dir(),
            near_end_threshold_ms: default_near_end_threshold_ms(),
            music_gain: default_music_gain(),
            mic_gain: default_mic_gain(),
            voice_weight: default_voice_weight(),
            dropout_transition_secs: default_dropout_transition_secs(),
            sample_rate: default_sample_rate(),
            backend: Backend::default(),
            ffmpeg_path: default_ffmpeg_path(),
            log_level: default_log_level(),
            log_file: None,
        }
    }

    pub fn config_dir() -> Result<PathBuf, Box<dyn Error>> {
        // XDG_CONFIG_HOME wins so tests can redirect it
        let config_dir = if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(xdg_config).join("kara")
        } else {
            dirs::config_dir()
                .ok_or("Unable to find config directory")?
                .join("kara")
        };
        Ok(config_dir)
    }

    pub fn config_path() -> Result<PathBuf, Box<dyn Error>> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn load() -> Result<Self, Box<dyn Error>> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Ok(Default::default());
        }

        let contents = fs::read_to_string(&config_path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// The same range checks `set_value` applies, for values read from disk.
    pub fn validate(&self) -> Result<(), Box<dyn Error>> {
        check_gain("music_gain", self.music_gain)?;
        check_gain("mic_gain", self.mic_gain)?;
        check_gain("voice_weight", self.voice_weight)?;
        check_gain("dropout_transition_secs", self.dropout_transition_secs)?;
        check_sample_rate(self.sample_rate)?;
        check_log_level(&self.log_level)?;
        Ok(())
    }

    pub fn save(&self) -> Result<(), Box<dyn Error>> {
        let config_dir = Self::config_dir()?;

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
        }

        let config_path = Self::config_path()?;
        let toml_string = toml::to_string_pretty(self)?;
        fs::write(&config_path, toml_string)?;

        Ok(())
    }

    pub fn exists() -> Result<bool, Box<dyn Error>> {
        Ok(Self::config_path()?.exists())
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        match key {
            "cache_dir" => self.cache_dir = value.to_string(),
            "assets_dir" => self.assets_dir = value.to_string(),
            "near_end_threshold_ms" => {
                self.near_end_threshold_ms = value
                    .parse()
                    .map_err(|_| "near_end_threshold_ms must be a whole number of milliseconds")?;
            }
            "music_gain" => self.music_gain = parse_gain(key, value)?,
            "mic_gain" => self.mic_gain = parse_gain(key, value)?,
            "voice_weight" => self.voice_weight = parse_gain(key, value)?,
            "dropout_transition_secs" => self.dropout_transition_secs = parse_gain(key, value)?,
            "sample_rate" => {
                let rate: u32 = value
                    .parse()
                    .map_err(|_| "sample_rate must be a whole number")?;
                self.sample_rate = check_sample_rate(rate)?;
            }
            "backend" => self.backend = value.parse()?,
            "ffmpeg_path" => self.ffmpeg_path = value.to_string(),
            "log_level" => {
                check_log_level(value)?;
                self.log_level = value.to_lowercase();
            }
            "log_file" => {
                self.log_file = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            _ => return Err(format!("Unknown configuration key: {key}").into()),
        }
        Ok(())
    }

    pub fn cache_path(&self) -> PathBuf {
        expand(&self.cache_dir)
    }

    pub fn assets_path(&self) -> PathBuf {
        expand(&self.assets_dir)
    }

    pub fn log_path(&self) -> PathBuf {
        match &self.log_file {
            Some(file) => expand(file),
            None => self.cache_path().join("kara.log"),
        }
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            sample_rate: self.sample_rate,
            ..NormalizeOptions::default()
        }
    }

    pub fn mix_options(&self) -> MixOptions {
        MixOptions {
            music_gain: self.music_gain,
            mic_gain: self.mic_gain,
            sample_rate: self.sample_rate,
            voice_weight: self.voice_weight,
            dropout_transition_secs: self.dropout_transition_secs,
            output_path: None,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            near_end_threshold_ms: self.near_end_threshold_ms,
            normalize: self.normalize_options(),
            mix: self.mix_options(),
            ..SessionSettings::in_dir(&self.cache_path())
        }
    }
}

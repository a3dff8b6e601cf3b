//! Project-wide constants used across multiple modules.
//!
//! Tunable values here are only defaults; the user's config overrides them.

/// Spinner animation characters for progress indicators
pub const SPINNER_CHARS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Sample rate for normalized takes and mixdowns
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Backing track level in the mixdown
pub const DEFAULT_MUSIC_GAIN: f32 = 0.9;

/// Voice level in the mixdown, boosted relative to the music
pub const DEFAULT_MIC_GAIN: f32 = 1.5;

/// Mix weight of the voice input (music weight is 1)
pub const DEFAULT_VOICE_WEIGHT: f32 = 2.0;

/// Seconds to renormalize the mix after the shorter input runs out
pub const DEFAULT_DROPOUT_TRANSITION_SECS: f32 = 2.0;

/// Position within this many milliseconds of the track end counts as the end
pub const DEFAULT_NEAR_END_THRESHOLD_MS: u64 = 250;

/// Interval between engine position and record-progress events
pub const ENGINE_TICK_MS: u64 = 100;

/// Session-scoped output file names inside the cache directory
pub const VOICE_FILE_NAME: &str = "Voice.wav";
pub const MIX_FILE_NAME: &str = "karaoke_mix.wav";
pub const RECORDING_FILE_NAME: &str = "recording.wav";

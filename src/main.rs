//! kara - terminal karaoke recorder.
//!
//! Plays a backing track while recording the microphone, shows lyric lines
//! in time with playback, and on stop turns the take into a normalized voice
//! file plus a mixdown with the backing track.
//!
//! The pipeline commands (`cues`, `normalize`, `mix`) work without audio
//! hardware; `sing` and `play` need the `desktop` feature.

use clap::{CommandFactory, Parser, Subcommand, builder::PossibleValuesParser};
use clap_complete::{Generator, Shell, generate};
use kara_studio::config::Config;
use kara_studio::logging::init_logging;
use std::error::Error;
use std::io;

mod cli;

#[derive(Parser)]
#[command(name = "kara")]
#[command(about = "Terminal karaoke: sing over a backing track, get a mixdown")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize kara configuration and directories
    Init,
    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
    /// List the cues in a subtitle file, or look one up
    Cues {
        /// Path to an .srt file
        file: String,
        /// Show the cue at this playback position (milliseconds)
        #[arg(long)]
        at: Option<u64>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Convert a recording to mono 16-bit PCM
    Normalize {
        input: String,
        /// Output path (defaults to Voice.wav in the cache directory)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Mix a voice take over a backing track
    Mix {
        music: String,
        voice: String,
        /// Output path (defaults to karaoke_mix.wav in the cache directory)
        #[arg(short, long)]
        output: Option<String>,
        #[arg(long)]
        music_gain: Option<f32>,
        #[arg(long)]
        mic_gain: Option<f32>,
    },
    /// Sing along: play a track, record the microphone, mix on stop
    Sing {
        /// Backing track: a path, an http(s) URL or asset:<name>
        song: String,
        /// Lyrics as an .srt file
        #[arg(short, long)]
        lyrics: Option<String>,
    },
    /// Listen to a finished take
    Play {
        /// Normalized voice file
        recorded: String,
        /// Mixdown file
        merged: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// View current configuration
    View,
    /// Set a configuration value
    Set {
        /// Configuration key
        #[arg(value_parser = PossibleValuesParser::new([
            "cache_dir",
            "assets_dir",
            "near_end_threshold_ms",
            "music_gain",
            "mic_gain",
            "voice_weight",
            "dropout_transition_secs",
            "sample_rate",
            "backend",
            "ffmpeg_path",
            "log_level",
            "log_file",
        ]))]
        key: String,
        /// Configuration value
        value: String,
    },
    /// Edit configuration file in your editor
    Edit,
}

fn print_completions<G: Generator>(generator: G, cmd: &mut clap::Command) {
    generate(
        generator,
        cmd,
        cmd.get_name().to_string(),
        &mut io::stdout(),
    );
}

/// Commands that touch audio get a log file.
fn start_logging() {
    let Ok(config) = Config::load() else {
        return;
    };
    if let Err(e) = init_logging(&config.log_path(), config.log_level_filter()) {
        eprintln!("Warning: logging disabled: {e}");
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            cli::init::handle_init()?;
        }
        Commands::Config { action } => match action {
            ConfigAction::View => {
                cli::config::handle_config_view()?;
            }
            ConfigAction::Set { key, value } => {
                cli::config::handle_config_set(&key, &value)?;
            }
            ConfigAction::Edit => {
                cli::config::handle_config_edit()?;
            }
        },
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            print_completions(shell, &mut cmd);
        }
        Commands::Cues { file, at, json } => {
            cli::cues::handle_cues(&file, at, json)?;
        }
        Commands::Normalize { input, output } => {
            start_logging();
            cli::normalize::handle_normalize(&input, output.as_deref())?;
        }
        Commands::Mix {
            music,
            voice,
            output,
            music_gain,
            mic_gain,
        } => {
            start_logging();
            cli::mix::handle_mix(&music, &voice, output.as_deref(), music_gain, mic_gain)?;
        }
        Commands::Sing { song, lyrics } => {
            start_logging();
            cli::sing::handle_sing(&song, lyrics.as_deref())?;
        }
        Commands::Play { recorded, merged } => {
            start_logging();
            cli::play::handle_play(&recorded, &merged)?;
        }
    }

    Ok(())
}

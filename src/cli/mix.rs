use super::configured_pipeline;
use kara_studio::config::Config;
use kara_studio::utils::progress::create_progress_spinner;
use owo_colors::OwoColorize;
use std::error::Error;
use std::path::{Path, PathBuf};

pub fn handle_mix(
    music: &str,
    voice: &str,
    output: Option<&str>,
    music_gain: Option<f32>,
    mic_gain: Option<f32>,
) -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;
    for input in [music, voice] {
        if !Path::new(input).exists() {
            return Err(format!("Input not found: {input}").into());
        }
    }

    let mut options = config.mix_options();
    options.output_path = output.map(PathBuf::from);
    if let Some(gain) = music_gain {
        options.music_gain = gain;
    }
    if let Some(gain) = mic_gain {
        options.mic_gain = gain;
    }

    let spinner = create_progress_spinner();
    spinner.set_message(format!(
        "Mixing (music ×{}, voice ×{})...",
        options.music_gain, options.mic_gain
    ));

    let result = configured_pipeline(&config).mix(Path::new(music), Path::new(voice), &options);
    spinner.finish_and_clear();

    let written = result?;
    println!("{} {}", "✓".green(), written.display());
    Ok(())
}

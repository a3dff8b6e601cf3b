use super::configured_pipeline;
use kara_studio::config::Config;
use kara_studio::constants::VOICE_FILE_NAME;
use kara_studio::utils::progress::create_progress_spinner;
use owo_colors::OwoColorize;
use std::error::Error;
use std::path::{Path, PathBuf};

pub fn handle_normalize(input: &str, output: Option<&str>) -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;
    let input = Path::new(input);
    if !input.exists() {
        return Err(format!("Input not found: {}", input.display()).into());
    }

    let output = output
        .map(PathBuf::from)
        .unwrap_or_else(|| config.cache_path().join(VOICE_FILE_NAME));

    let spinner = create_progress_spinner();
    spinner.set_message(format!("Normalizing {}...", input.display()));

    let result = configured_pipeline(&config).normalize(input, &output, &config.normalize_options());
    spinner.finish_and_clear();

    let written = result?;
    println!("{} {}", "✓".green(), written.display());
    Ok(())
}

use kara_studio::config::Config;
use std::error::Error;
use std::process::Command;

pub fn handle_config_view() -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;

    println!("Current kara configuration:");
    println!("  cache_dir: {}", config.cache_dir);
    println!("  assets_dir: {}", config.assets_dir);
    println!("  near_end_threshold_ms: {}", config.near_end_threshold_ms);
    println!("  music_gain: {}", config.music_gain);
    println!("  mic_gain: {}", config.mic_gain);
    println!("  voice_weight: {}", config.voice_weight);
    println!("  dropout_transition_secs: {}", config.dropout_transition_secs);
    println!("  sample_rate: {}", config.sample_rate);
    println!("  backend: {:?}", config.backend);
    println!("  ffmpeg_path: {}", config.ffmpeg_path);
    println!("  log_level: {}", config.log_level);
    println!("  log_file: {}", config.log_path().display());

    Ok(())
}

pub fn handle_config_set(key: &str, value: &str) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load()?;

    config.set_value(key, value)?;
    config.save()?;

    println!("Configuration updated: {key} = {value}");

    Ok(())
}

pub fn handle_config_edit() -> Result<(), Box<dyn Error>> {
    if !Config::exists()? {
        return Err("kara not initialized. Run 'kara init' first.".into());
    }

    let config_path = Config::config_path()?;
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    println!("Opening {} in {}", config_path.display(), editor);

    let status = Command::new(&editor)
        .arg(&config_path)
        .status()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                format!("Editor '{editor}' not found. Set $EDITOR to a valid editor path.")
            } else {
                format!("Failed to launch editor '{editor}': {e}")
            }
        })?;

    if !status.success() {
        return Err(format!("Editor '{editor}' exited with error").into());
    }

    // Validate the config after editing
    match Config::load() {
        Ok(_) => println!("Configuration saved successfully"),
        Err(e) => {
            return Err(format!("Configuration validation failed: {e}").into());
        }
    }

    Ok(())
}

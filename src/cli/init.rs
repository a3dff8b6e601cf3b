use kara_studio::config::Config;
use owo_colors::OwoColorize;
use std::error::Error;
use std::fs;

pub fn handle_init() -> Result<(), Box<dyn Error>> {
    if Config::exists()? {
        return Err(
            "kara is already initialized. Use 'kara config set <key> <value>' to change settings."
                .into(),
        );
    }

    let config = Config::new();
    for dir in [config.cache_path(), config.assets_path()] {
        if !dir.exists() {
            println!("Creating directory: {}", dir.display());
            fs::create_dir_all(&dir)?;
        } else if !dir.is_dir() {
            return Err(format!("{} exists but is not a directory", dir.display()).into());
        }
    }

    config.save()?;

    println!("{} kara initialized", "✓".green());
    println!("Cache directory:  {}", config.cache_path().display());
    println!("Assets directory: {}", config.assets_path().display());
    println!(
        "Configuration saved to: {}",
        Config::config_path()?.display()
    );

    Ok(())
}

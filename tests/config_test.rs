use kara_studio::config::Config;
use kara_studio::pipeline::Backend;
use tempfile::TempDir;

#[test]
fn test_config_lifecycle() {
    // Create a temporary directory for test config
    let temp_dir = TempDir::new().unwrap();

    // Override the config path for testing
    unsafe {
        std::env::set_var("XDG_CONFIG_HOME", temp_dir.path());
    }

    assert!(!Config::exists().unwrap());
    assert_eq!(
        Config::config_path().unwrap(),
        temp_dir.path().join("kara").join("config.toml")
    );

    let config = Config::new();
    config.save().unwrap();
    assert!(Config::exists().unwrap());

    let loaded = Config::load().unwrap();
    assert_eq!(loaded.near_end_threshold_ms, 250);
    assert_eq!(loaded.backend, Backend::Ffmpeg);
    assert_eq!(loaded.log_file, None);

    let mut config = Config::load().unwrap();
    config.set_value("mic_gain", "1.2").unwrap();
    config.set_value("backend", "native").unwrap();
    config.set_value("log_file", "/tmp/kara-test.log").unwrap();
    config.save().unwrap();

    let reloaded = Config::load().unwrap();
    assert_eq!(reloaded.mic_gain, 1.2);
    assert_eq!(reloaded.backend, Backend::Native);
    assert_eq!(reloaded.log_path(), std::path::PathBuf::from("/tmp/kara-test.log"));

    // Session settings follow the stored values
    let settings = reloaded.session_settings();
    assert_eq!(settings.mix.mic_gain, 1.2);
    assert!(settings.mix_path.starts_with(reloaded.cache_path()));

    let mut config = Config::load().unwrap();
    assert!(config.set_value("invalid_key", "value").is_err());
}

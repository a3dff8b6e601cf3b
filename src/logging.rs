//! File logging for the binary.
//!
//! The terminal is used for lyrics and prompts, so log output goes to a file.

use simplelog::{CombinedLogger, ConfigBuilder, LevelFilter, WriteLogger};
use std::error::Error;
use std::fs::{self, File};
use std::path::Path;

/// Install a file logger. Truncates the previous run's log.
pub fn init_logging(log_file: &Path, level: LevelFilter) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let config = ConfigBuilder::new()
        .add_filter_allow_str("kara")
        .build();

    CombinedLogger::init(vec![WriteLogger::new(
        level,
        config,
        File::create(log_file)?,
    )])?;

    log::info!("kara {} logging to {}", env!("CARGO_PKG_VERSION"), log_file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("logs").join("kara.log");

        // Another test may already own the global logger
        if init_logging(&log_file, LevelFilter::Debug).is_ok() {
            log::logger().flush();
        }
        assert!(log_file.exists());
    }
}

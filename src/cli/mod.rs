pub mod config;
pub mod cues;
pub mod init;
pub mod mix;
pub mod normalize;
pub mod play;
pub mod sing;

use kara_studio::config::Config;
use kara_studio::constants::MIX_FILE_NAME;
use kara_studio::pipeline::{AudioPipeline, build_pipeline};
use std::path::Path;

/// The post-processing backend the configuration selects.
pub(crate) fn configured_pipeline(config: &Config) -> Box<dyn AudioPipeline> {
    build_pipeline(
        config.backend,
        Path::new(&config.ffmpeg_path),
        config.cache_path().join(MIX_FILE_NAME),
    )
}

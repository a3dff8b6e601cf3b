pub mod config;
pub mod constants;
pub mod cues;
pub mod engine;
pub mod error;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod session;
pub mod take_tag;
pub mod utils;

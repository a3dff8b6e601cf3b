//! Spinner shared by the long-running commands (download, normalize, mix,
//! sing), so they all look the same.

use crate::constants::SPINNER_CHARS;
use indicatif::{ProgressBar, ProgressStyle};

/// A cyan spinner with the standard tick sequence. Call
/// `enable_steady_tick` when the work does not report progress itself.
pub fn create_progress_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER_CHARS),
    );
    spinner
}

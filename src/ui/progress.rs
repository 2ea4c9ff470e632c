use crate::config::{PULSES_PER_BOUNDARY, QUARTER_NOTES_PER_BOUNDARY};
use indicatif::{ProgressBar, ProgressStyle};

fn bar_style(template: &str, progress_chars: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars(progress_chars)
}

/// Pulses into the current whole-note boundary
pub fn create_boundary_progress() -> ProgressBar {
    let pb = ProgressBar::new(PULSES_PER_BOUNDARY);
    pb.set_style(bar_style(
        "{prefix:.bold} [{bar:40.cyan}] {pos}/{len} {msg}",
        "⣀⣤⣦⣶⣷⣿ ",
    ));
    pb.set_prefix("Bar ");
    pb
}

/// Quarter note within the boundary
pub fn create_beat_progress() -> ProgressBar {
    let pb = ProgressBar::new(QUARTER_NOTES_PER_BOUNDARY);
    pb.set_style(bar_style(
        "{prefix:.bold} [{bar:20.white/black}] {pos}/{len}",
        "█▊ ",
    ));
    pb.set_prefix("Beat");
    pb
}

pub fn create_transport_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix("Transport");
    pb
}

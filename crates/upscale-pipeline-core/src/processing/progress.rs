use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::time::Instant;

/// Progress bar for a stage that walks `total` images
pub fn stage_progress(total: usize, message: &str) -> ProgressBar {
    let progress_bar = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("[{eta}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    progress_bar.set_style(style);
    progress_bar.set_message(message.to_string());
    progress_bar
}

/// Wall-clock timer for a named action
pub struct Stopwatch {
    action: &'static str,
    start: Instant,
}

impl Stopwatch {
    pub fn start(action: &'static str) -> Self {
        Self {
            action,
            start: Instant::now(),
        }
    }

    /// Log how long the action took and return the seconds elapsed
    pub fn stop(self) -> f64 {
        let seconds = self.start.elapsed().as_secs_f64();
        info!("{} took {:.2} seconds", self.action, seconds);
        seconds
    }
}

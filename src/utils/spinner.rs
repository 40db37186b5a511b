use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Thin wrapper around `indicatif`'s spinner, cleared on drop
pub struct Spinner {
    pb: ProgressBar,
}

impl Spinner {
    const TICK_RATE: Duration = Duration::from_millis(80);
    const TEMPLATE: &'static str = "{spinner:.green} {msg}";

    /// Start a spinner with the provided message.
    pub fn new<S: Into<String>>(message: S) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template(Self::TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.into());
        pb.enable_steady_tick(Self::TICK_RATE);
        Spinner { pb }
    }

    pub fn stop(&self) {
        self.pb.finish_and_clear();
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if !self.pb.is_finished() {
            self.pb.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spinner_stop_then_drop() {
        let spinner = Spinner::new("Fetching");
        spinner.stop();
        assert!(spinner.pb.is_finished());
    }
}

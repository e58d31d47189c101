use indicatif::{ProgressBar, ProgressStyle};
use rpcmap_core::scan::{ScanError, ScanMonitor};

/// Progress bar over the scanned data section; cancellation is delegated to
/// `cancel` when the caller supplies one.
pub struct ProgressMonitor<'a> {
    bar: ProgressBar,
    cancel: Option<&'a dyn ScanMonitor>,
}

impl<'a> ProgressMonitor<'a> {
    pub fn new(total: u64, label: &str, enabled: bool, cancel: Option<&'a dyn ScanMonitor>) -> Self {
        let bar = if enabled { ProgressBar::new(total) } else { ProgressBar::hidden() };
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        ) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(label.to_string());
        Self { bar, cancel }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ScanMonitor for ProgressMonitor<'_> {
    fn report(&self, position: usize, address: u64) {
        self.bar.set_position(position as u64);
        if let Some(cancel) = self.cancel {
            cancel.report(position, address);
        }
    }

    fn check_cancelled(&self) -> Result<(), ScanError> {
        self.cancel.map_or(Ok(()), |cancel| cancel.check_cancelled())
    }
}

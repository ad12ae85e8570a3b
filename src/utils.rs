use std::io::Write;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Byte based progress over a run that may read the input several times.
///
/// `total` is the expected number of bytes over all passes. Passes report
/// the offset within the current read with `update` and call `file_done`
/// when a read is complete.
pub struct ProgressBar {
    total: u64,
    done: AtomicU64,
    current: AtomicU64,
    last_percent: AtomicU64,
    enabled: bool,
    visible: AtomicBool,
}

impl ProgressBar {
    pub fn new(total: u64, enabled: bool) -> Self {
        Self {
            total,
            done: AtomicU64::new(0),
            current: AtomicU64::new(0),
            last_percent: AtomicU64::new(u64::MAX),
            enabled: enabled && total > 0,
            visible: AtomicBool::new(false),
        }
    }

    pub fn hidden() -> Self {
        Self::new(0, false)
    }

    pub fn update(&self, offset: u64) {
        self.current.store(offset, Ordering::SeqCst);
        if !self.enabled {
            return;
        }
        let percent = self.percent();
        // Only redraw when the percentage changes
        if self.last_percent.swap(percent, Ordering::SeqCst) != percent {
            self.print(percent);
        }
    }

    pub fn file_done(&self, size: u64) {
        self.done.fetch_add(size, Ordering::SeqCst);
        self.current.store(0, Ordering::SeqCst);
        if self.enabled {
            self.print(self.percent());
        }
    }

    /// Clears the bar so log lines are not interleaved with it.
    pub fn remove(&self) {
        if self.visible.swap(false, Ordering::SeqCst) {
            eprint!("\r{:<40}\r", "");
            let _ = std::io::stderr().flush();
        }
    }

    pub fn done(&self) {
        if self.enabled {
            self.print(100);
            eprintln!();
            self.visible.store(false, Ordering::SeqCst);
        }
    }

    pub fn percent(&self) -> u64 {
        if self.total == 0 {
            return 0;
        }
        let consumed = self.done.load(Ordering::SeqCst) + self.current.load(Ordering::SeqCst);
        (consumed.min(self.total) * 100) / self.total
    }

    fn print(&self, percent: u64) {
        self.visible.store(true, Ordering::SeqCst);
        let filled = (percent / 5) as usize;
        eprint!(
            "\r[{}{}] {:>3}%",
            "=".repeat(filled),
            " ".repeat(20 - filled),
            percent
        );
        let _ = std::io::stderr().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_accumulates_over_passes() {
        let progress = ProgressBar::new(400, false);
        progress.update(50);
        assert_eq!(progress.percent(), 12);
        progress.file_done(100);
        assert_eq!(progress.percent(), 25);
        progress.update(100);
        assert_eq!(progress.percent(), 50);
    }

    #[test]
    fn unknown_total_reports_zero() {
        let progress = ProgressBar::hidden();
        progress.update(1_000);
        assert_eq!(progress.percent(), 0);
    }

    #[test]
    fn percent_never_exceeds_hundred() {
        let progress = ProgressBar::new(10, false);
        progress.file_done(10);
        progress.update(50);
        assert_eq!(progress.percent(), 100);
    }
}

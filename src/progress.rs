//! Load progress reporting.
//!
//! Reporters are pure observers of pool counters: they never touch pool
//! state, and [`NoProgress`] is a valid choice everywhere. Progress goes to
//! **stderr** so stdout stays parseable for scripts.

use std::io::Write;
use std::time::Duration;

const BAR_WIDTH: usize = 50;

/// One progress sample, taken after a dispatch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressEvent {
    /// Records dispatched so far (1-based).
    pub index: u64,
    pub total: u64,
    pub errors: u64,
    pub ops_per_sec: f64,
}

impl ProgressEvent {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            100.0 * self.index as f64 / self.total as f64
        }
    }

    pub fn is_last(&self) -> bool {
        self.index >= self.total
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Single-line bar redrawn in place:
/// `Progress: |#####-----| 50.0% Complete - Errors: 0 Ops/s: 1.7`.
pub struct HumanProgress;

impl HumanProgress {
    pub fn render(event: &ProgressEvent) -> String {
        let percent = event.percent();
        let filled = ((BAR_WIDTH as f64 * percent / 100.0) as usize).min(BAR_WIDTH);
        let bar = format!("{}{}", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled));
        format!(
            "Progress: |{}| {:.1}% Complete - Errors: {} Ops/s: {:.1}",
            bar, percent, event.errors, event.ops_per_sec
        )
    }
}

impl ProgressReporter for HumanProgress {
    fn report(&self, event: &ProgressEvent) {
        let mut line = format!("\r{}", Self::render(event));
        if event.is_last() {
            line.push('\n');
        }
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &ProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "n": event.index,
            "total": event.total,
            "errors": event.errors,
            "ops_per_sec": (event.ops_per_sec * 100.0).round() / 100.0,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// `"1 hours 2 minutes 3 seconds"`.
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{} hours {} minutes {} seconds",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

/// Records per second over `elapsed`; zero for an instant run.
pub fn throughput(records: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        records as f64 / secs
    } else {
        0.0
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(HumanProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn bar_renders_half() {
        let line = HumanProgress::render(&ProgressEvent {
            index: 5,
            total: 10,
            errors: 2,
            ops_per_sec: 1.7,
        });
        let expected = format!(
            "Progress: |{}{}| 50.0% Complete - Errors: 2 Ops/s: 1.7",
            "#".repeat(25),
            "-".repeat(25)
        );
        assert_eq!(line, expected);
    }

    #[test]
    fn empty_total_is_complete() {
        let ev = ProgressEvent {
            index: 0,
            total: 0,
            errors: 0,
            ops_per_sec: 0.0,
        };
        assert_eq!(ev.percent(), 100.0);
        assert!(ev.is_last());
        assert!(HumanProgress::render(&ev).contains("100.0% Complete"));
    }

    #[test]
    fn duration_and_throughput() {
        assert_eq!(
            format_duration(Duration::from_secs(3723)),
            "1 hours 2 minutes 3 seconds"
        );
        assert_eq!(throughput(10, Duration::from_secs(4)), 2.5);
        assert_eq!(throughput(10, Duration::ZERO), 0.0);
    }
}

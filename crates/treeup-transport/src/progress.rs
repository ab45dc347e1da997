//! Download progress reporting on stderr.

use std::io::{stderr, Write};
use std::time::Instant;

use is_terminal::IsTerminal;

/// Byte-count progress for an in-flight response, updated at most once per
/// second and only when stderr is a terminal.
pub struct TransferProgress {
    enabled: bool,
    started: Instant,
    last_update: Instant,
    last_bytes: u64,
    line_width: usize,
}

impl TransferProgress {
    pub fn new(enabled: bool) -> Self {
        let now = Instant::now();
        Self {
            enabled: enabled && stderr().is_terminal(),
            started: now,
            last_update: now,
            last_bytes: 0,
            line_width: 0,
        }
    }

    /// Record the running byte total, redrawing if a second has passed.
    pub fn account(&mut self, total_bytes: u64) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        let since_last = now.duration_since(self.last_update).as_secs_f64();
        if since_last < 1.0 {
            return;
        }

        let elapsed = now.duration_since(self.started).as_secs();
        let throughput = (total_bytes.saturating_sub(self.last_bytes)) as f64 / since_last;
        let line = format!(
            "  {} in {}m{:02}s, {}/s now",
            humanize(total_bytes as f64),
            elapsed / 60,
            elapsed % 60,
            humanize(throughput),
        );

        let mut err = stderr().lock();
        let _ = write!(err, "{:<width$}\r", line, width = self.line_width);
        let _ = err.flush();

        self.line_width = line.len();
        self.last_bytes = total_bytes;
        self.last_update = now;
    }

    /// Erase the progress line.
    pub fn finish(&mut self) {
        if self.enabled && self.line_width > 0 {
            let mut err = stderr().lock();
            let _ = write!(err, "\r\x1b[0K\r");
            let _ = err.flush();
            self.line_width = 0;
        }
    }
}

/// Format a byte count with decimal prefixes, `humanize_number` style.
fn humanize(value: f64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    let mut value = value;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", value as u64, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanize_scales() {
        assert_eq!(humanize(512.0), "512 B");
        assert_eq!(humanize(1500.0), "1.5 kB");
        assert_eq!(humanize(2_500_000.0), "2.5 MB");
        assert_eq!(humanize(3_200_000_000.0), "3.2 GB");
    }
}

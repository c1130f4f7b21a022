//! Copy summary (§6: output format).
#![allow(clippy::arithmetic_side_effects)]

use std::{fmt, time::Duration};

/// Result of a completed copy, printed as `<bytes> bytes copied, <seconds> s, <MB/s> MB/s`.
#[derive(Debug, Clone, Copy)]
pub struct CopySummary {
    pub bytes_copied: u64,
    pub elapsed: Duration,
}

impl CopySummary {
    pub fn throughput_mib_per_sec(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds <= 0.0 {
            return 0.0;
        }
        (self.bytes_copied as f64 / seconds) / (1024.0 * 1024.0)
    }
}

impl fmt::Display for CopySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes copied, {:.3} s, {:.2} MB/s",
            self.bytes_copied,
            self.elapsed.as_secs_f64(),
            self.throughput_mib_per_sec()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_expected_shape() {
        let summary = CopySummary {
            bytes_copied: 1024 * 1024,
            elapsed: Duration::from_secs(1),
        };
        assert_eq!(summary.to_string(), "1048576 bytes copied, 1.000 s, 1.00 MB/s");
    }

    #[test]
    fn zero_elapsed_reports_zero_throughput() {
        let summary = CopySummary {
            bytes_copied: 0,
            elapsed: Duration::ZERO,
        };
        assert_eq!(summary.throughput_mib_per_sec(), 0.0);
    }
}

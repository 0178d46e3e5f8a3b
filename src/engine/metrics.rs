//! Wall-clock and resident-memory measurement around an execution.

use std::time::Instant;

/// Reads `VmRSS` from `/proc/self/status`, in bytes.
///
/// Returns `None` where procfs is unavailable.
pub fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line
        .trim_start_matches("VmRSS:")
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kib * 1024)
}

/// Memory delta between two readings, clamped at zero.
pub fn memory_delta(before: Option<u64>, after: Option<u64>) -> Option<u64> {
    Some(after?.saturating_sub(before?))
}

/// Milliseconds elapsed since `start`, rounded to the nearest integer.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn elapsed_ms(start: Instant) -> u64 {
    (start.elapsed().as_secs_f64() * 1000.0).round() as u64
}

/// Time and memory reference points taken just before an execution.
#[derive(Debug)]
pub struct Measurement {
    start: Instant,
    rss_before: Option<u64>,
    measure_memory: bool,
}

impl Measurement {
    /// Capture T0 (and M0 when `measure_memory` is set).
    pub fn begin(measure_memory: bool) -> Self {
        let rss_before = if measure_memory {
            resident_memory_bytes()
        } else {
            None
        };
        Self {
            start: Instant::now(),
            rss_before,
            measure_memory,
        }
    }

    /// Capture T1/M1 and return `(execution_time_ms, memory_usage_bytes)`.
    pub fn finish(self) -> (u64, Option<u64>) {
        let rss_after = if self.measure_memory {
            resident_memory_bytes()
        } else {
            None
        };
        (
            elapsed_ms(self.start),
            memory_delta(self.rss_before, rss_after),
        )
    }
}

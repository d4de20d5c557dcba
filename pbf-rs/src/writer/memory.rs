//! Memory budget of the chromatogram builder
//!
//! The builder buffers at most `peaks_per_scan` peaks of every scan at a time.
//! By default the quota is derived from the memory currently available: a
//! reserve is kept for the rest of the system (a quarter of physical memory,
//! halved for every doubling above 16 GiB, never below 1 GiB), half of what is
//! left is shared between the scans. Refills only share what the peaks already
//! buffered leave free, so the total stays under [`MAX_BUFFERED_PEAKS`]; only the
//! per-scan floor can push past it.

use log::{debug, warn};
use std::fs;

/// Smallest quota, also used when available memory is unknown.
pub const MIN_PEAKS_PER_SCAN: usize = 5;

/// Upper bound for the peaks buffered at once under a byte budget.
pub const MAX_BUFFERED_PEAKS: usize = 25_000_000;

const GIB: u64 = 1 << 30;

/// Physical memory above which the reserve starts shrinking.
pub const RESERVE_HALVING_THRESHOLD: u64 = 16 * GIB;

/// Smallest reserve left to the system.
pub const MIN_RESERVE: u64 = GIB;

/// How much memory the chromatogram builder may use
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MemoryBudget {
    /// Derive from the memory available when the build starts
    #[default]
    Auto,
    /// Fixed number of bytes for buffered peaks
    Bytes(u64),
    /// Fixed number of buffered peaks per scan
    PeaksPerScan(usize),
}

/// A resolved budget, able to recompute the per-scan quota as scans finish
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Quota {
    Fixed(usize),
    Bytes(u64),
}

impl MemoryBudget {
    pub(crate) fn resolve(&self) -> Quota {
        match *self {
            MemoryBudget::PeaksPerScan(n) => Quota::Fixed(n.max(1)),
            MemoryBudget::Bytes(bytes) => Quota::Bytes(bytes),
            MemoryBudget::Auto => match probe_system_memory() {
                Some(mem) => {
                    let budget = mem.available.saturating_sub(reserve_for(mem.total));
                    debug!(
                        "memory: {} MiB total, {} MiB available, {} MiB budget",
                        mem.total >> 20,
                        mem.available >> 20,
                        budget >> 20
                    );
                    Quota::Bytes(budget)
                }
                None => {
                    warn!("can't determine available memory, buffering {} peaks per scan", MIN_PEAKS_PER_SCAN);
                    Quota::Fixed(MIN_PEAKS_PER_SCAN)
                }
            },
        }
    }
}

impl Quota {
    /// Peaks to load per scan while `active_scans` scans still have unread
    /// peaks and `buffered` peaks are already in memory.
    ///
    /// Nothing buffered yet: at least [`MIN_PEAKS_PER_SCAN`]. Later rounds: at
    /// least one peak.
    pub(crate) fn per_scan(&self, active_scans: usize, buffered: usize, peak_size: usize) -> usize {
        let active_scans = active_scans.max(1);
        match *self {
            Quota::Fixed(n) => n,
            Quota::Bytes(bytes) => {
                let ceiling = (bytes / 2 / peak_size.max(1) as u64).min(MAX_BUFFERED_PEAKS as u64) as usize;
                let quota = ceiling.saturating_sub(buffered) / active_scans;
                let floor = if buffered == 0 { MIN_PEAKS_PER_SCAN } else { 1 };
                quota.max(floor)
            }
        }
    }
}

/// Memory left to the rest of the system for a machine with `total` bytes.
pub fn reserve_for(total: u64) -> u64 {
    let mut reserve = total / 4;
    let mut threshold = RESERVE_HALVING_THRESHOLD;
    while total >= threshold.saturating_mul(2) && threshold < u64::MAX / 2 {
        reserve /= 2;
        threshold *= 2;
    }
    reserve.max(MIN_RESERVE)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SystemMemory {
    pub total: u64,
    pub available: u64,
}

/// Physical and available memory, `None` where it can't be determined.
pub fn probe_system_memory() -> Option<SystemMemory> {
    let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo(&meminfo)
}

fn parse_meminfo(text: &str) -> Option<SystemMemory> {
    let field = |name: &str| -> Option<u64> {
        let line = text.lines().find(|l| l.starts_with(name))?;
        let kib: u64 = line[name.len()..].trim().trim_end_matches("kB").trim().parse().ok()?;
        Some(kib * 1024)
    };

    Some(SystemMemory { total: field("MemTotal:")?, available: field("MemAvailable:")? })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve() {
        assert_eq!(reserve_for(2 * GIB), GIB);
        assert_eq!(reserve_for(8 * GIB), 2 * GIB);
        assert_eq!(reserve_for(16 * GIB), 4 * GIB);
        assert_eq!(reserve_for(32 * GIB), 4 * GIB);
        assert_eq!(reserve_for(64 * GIB), 4 * GIB);
        assert_eq!(reserve_for(256 * GIB), 4 * GIB);
        assert_eq!(reserve_for(1024 * GIB), 4 * GIB);
    }

    #[test]
    fn test_quota_bounds() {
        // 24-byte buffered peaks, 1 GiB shared by 1000 scans
        assert_eq!(Quota::Bytes(GIB).per_scan(1000, 0, 24), (GIB / 2 / 1000 / 24) as usize);
        assert_eq!(Quota::Bytes(0).per_scan(1000, 0, 24), MIN_PEAKS_PER_SCAN);
        assert_eq!(Quota::Bytes(u64::MAX).per_scan(10, 0, 24), MAX_BUFFERED_PEAKS / 10);
        assert_eq!(Quota::Fixed(7).per_scan(1_000_000, 0, 24), 7);
        assert_eq!(MemoryBudget::PeaksPerScan(0).resolve(), Quota::Fixed(1));
    }

    #[test]
    fn test_refill_quota_counts_buffered_peaks() {
        let unlimited = Quota::Bytes(u64::MAX);

        // 20M of the 25M ceiling already buffered, 1000 scans left to refill
        assert_eq!(unlimited.per_scan(1000, 20_000_000, 24), 5_000);
        assert!(unlimited.per_scan(1000, 20_000_000, 24) * 1000 + 20_000_000 <= MAX_BUFFERED_PEAKS);

        // at the ceiling a refill still loads one peak per scan
        assert_eq!(unlimited.per_scan(1000, MAX_BUFFERED_PEAKS, 24), 1);
        assert_eq!(unlimited.per_scan(1000, MAX_BUFFERED_PEAKS + 10, 24), 1);

        // 1 MiB of 24-byte peaks: 21845 peaks, 10 scans, 21000 buffered
        assert_eq!(Quota::Bytes(1 << 20).per_scan(10, 21_000, 24), 84);
    }

    #[test]
    fn test_parse_meminfo() {
        let text = "MemTotal:       32768000 kB\nMemFree:         1000000 kB\nMemAvailable:   16384000 kB\n";
        assert_eq!(
            parse_meminfo(text),
            Some(SystemMemory { total: 32768000 * 1024, available: 16384000 * 1024 })
        );
        assert_eq!(parse_meminfo("MemTotal: 12 kB\n"), None);
    }
}

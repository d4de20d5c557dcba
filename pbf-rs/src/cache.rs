//! XIC result cache
//!
//! Keeps the peaks gathered by the last precursor XIC walk, including a few
//! extra peaks on each side of the queried window, together with the m/z span
//! the peaks are known to be complete for. A following query whose window lies
//! strictly inside that span is answered from memory; any other query replaces
//! the cache.
//!
//! The cache lives next to the file handle, behind the same lock, so deciding
//! hit or miss and refilling the cache happen in one critical section.

use crate::chromatogram::{ChromatogramPeak, SectionWalk};
use crate::model::MzRange;

#[derive(Debug, Default)]
pub struct XicCache {
    walk: Option<SectionWalk>,
}

impl XicCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every section record within `range` is cached.
    pub fn covers(&self, range: MzRange) -> bool {
        self.walk
            .as_ref()
            .is_some_and(|w| range.min_mz > w.low_excl && range.max_mz < w.high_excl)
    }

    /// Answer `range` from memory, `None` on a miss.
    pub fn lookup(&self, range: MzRange) -> Option<Vec<ChromatogramPeak>> {
        if !self.covers(range) {
            return None;
        }
        self.walk.as_ref().map(|w| w.in_range(range))
    }

    pub fn store(&mut self, walk: SectionWalk) {
        self.walk = Some(walk);
    }

    pub fn clear(&mut self) {
        self.walk = None;
    }

    /// Exclusive m/z bounds of the cached span
    pub fn span(&self) -> Option<(f64, f64)> {
        self.walk.as_ref().map(|w| (w.low_excl, w.high_excl))
    }

    /// Number of cached peaks
    pub fn len(&self) -> usize {
        self.walk.as_ref().map_or(0, |w| w.peaks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn cached(mzs: &[f64], low_excl: f64, high_excl: f64) -> XicCache {
        let peaks: VecDeque<ChromatogramPeak> =
            mzs.iter().enumerate().map(|(i, &mz)| ChromatogramPeak::new(mz, 1.0, i as i32)).collect();
        let mut cache = XicCache::new();
        cache.store(SectionWalk { peaks, low_excl, high_excl });
        cache
    }

    #[test]
    fn test_empty_cache_misses() {
        let cache = XicCache::new();
        assert!(!cache.covers(MzRange::new(1.0, 2.0)));
        assert!(cache.lookup(MzRange::new(1.0, 2.0)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hit_inside_span() {
        let cache = cached(&[100.1, 100.2, 100.3, 100.4], 100.0, 100.5);

        let hit = cache.lookup(MzRange::new(100.15, 100.35)).unwrap();
        let mzs: Vec<f64> = hit.iter().map(|p| p.mz).collect();
        assert_eq!(mzs, vec![100.2, 100.3]);
    }

    #[test]
    fn test_bounds_are_exclusive() {
        let cache = cached(&[100.1, 100.2], 100.0, 100.5);

        assert!(!cache.covers(MzRange::new(100.0, 100.2)));
        assert!(!cache.covers(MzRange::new(100.1, 100.5)));
        assert!(cache.covers(MzRange::new(100.0001, 100.4999)));
    }

    #[test]
    fn test_clear() {
        let mut cache = cached(&[1.0], f64::NEG_INFINITY, f64::INFINITY);
        assert!(cache.covers(MzRange::new(-1e9, 1e9)));
        assert_eq!(cache.span(), Some((f64::NEG_INFINITY, f64::INFINITY)));

        cache.clear();
        assert!(cache.span().is_none());
    }
}

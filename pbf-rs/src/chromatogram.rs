//! Chromatogram peak streams and extracted ion chromatograms
//!
//! A PBF file holds two chromatogram sections: every MS1 peak of the run
//! (precursor chromatogram) and every MSn peak (product chromatogram). Each
//! section is a flat sequence of 16-byte records sorted by `(mz, scan_num)`:
//!
//! ```text
//! mz f64 | intensity f32 | scanNum i32
//! ```
//!
//! An XIC is answered by locating a start offset inside a section, then walking
//! outward (down, then up) until the first record outside the m/z window.
//!
//! # Example
//!
//! ```no_run
//! use pbf::PbfReader;
//!
//! let reader = PbfReader::open("run.pbf").unwrap();
//! let xic = reader.get_xic(445.11, 445.13);
//! if let Some(apex) = xic.max_intensity_peak() {
//!     println!("apex in scan {} ({})", apex.scan_num, apex.intensity);
//! }
//! ```

use anyhow_ext::{Context, Result};
use bytes::{Buf, BufMut, BytesMut};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;

use crate::format::CHROMATOGRAM_PEAK_SIZE;
use crate::model::MzRange;

/// Records fetched per read while walking a section.
pub const WALK_BLOCK_RECORDS: u64 = 1024;

// ============================================================================
// Chromatogram peaks
// ============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChromatogramPeak {
    pub mz: f64,
    pub intensity: f32,
    pub scan_num: i32,
}

impl ChromatogramPeak {
    pub fn new(mz: f64, intensity: f32, scan_num: i32) -> Self {
        Self { mz, intensity, scan_num }
    }

    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_f64_le(self.mz);
        buf.put_f32_le(self.intensity);
        buf.put_i32_le(self.scan_num);
    }

    pub fn get(buf: &mut impl Buf) -> Self {
        let mz = buf.get_f64_le();
        let intensity = buf.get_f32_le();
        let scan_num = buf.get_i32_le();
        Self { mz, intensity, scan_num }
    }
}

// ============================================================================
// Section reads
// ============================================================================

/// Read `count` records starting at byte `offset`.
pub fn read_block<R: Read + Seek>(reader: &mut R, offset: u64, count: u64) -> Result<Vec<ChromatogramPeak>> {
    let mut raw = vec![0u8; (count as usize) * CHROMATOGRAM_PEAK_SIZE];
    reader.seek(SeekFrom::Start(offset)).dot()?;
    reader.read_exact(&mut raw).dot()?;

    let mut buf = raw.as_slice();
    Ok((0..count).map(|_| ChromatogramPeak::get(&mut buf)).collect())
}

/// Read only the m/z of the record at byte `offset`.
pub fn read_mz_at<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<f64> {
    let mut raw = [0u8; 8];
    reader.seek(SeekFrom::Start(offset)).dot()?;
    reader.read_exact(&mut raw).dot()?;
    Ok(f64::from_le_bytes(raw))
}

/// Read a whole section into memory.
pub fn read_section<R: Read + Seek>(reader: &mut R, section: Range<u64>) -> Result<Vec<ChromatogramPeak>> {
    let count = (section.end - section.start) / CHROMATOGRAM_PEAK_SIZE as u64;
    read_block(reader, section.start, count)
}

/// Peaks gathered by an outward walk, with the m/z span they are complete for.
///
/// Every section record with `low_excl < mz < high_excl` is in `peaks`.
/// Bounds are infinite when the walk reached the end of the section.
#[derive(Clone, Debug)]
pub struct SectionWalk {
    pub peaks: VecDeque<ChromatogramPeak>,
    pub low_excl: f64,
    pub high_excl: f64,
}

impl SectionWalk {
    /// The peaks inside `range`, in section order.
    pub fn in_range(&self, range: MzRange) -> Vec<ChromatogramPeak> {
        let begin = self.peaks.partition_point(|p| p.mz < range.min_mz);
        let end = self.peaks.partition_point(|p| p.mz <= range.max_mz);
        self.peaks.range(begin..end.max(begin)).copied().collect()
    }
}

/// Walk outward from `start` collecting every record within `range`.
///
/// Down from `start` first, then up, each direction stopping at the first record
/// outside `range` once `extra_low`/`extra_high` out-of-range records have been
/// kept.
pub fn walk_section<R: Read + Seek>(
    reader: &mut R,
    section: Range<u64>,
    start: u64,
    range: MzRange,
    extra_low: usize,
    extra_high: usize,
) -> Result<SectionWalk> {
    let record = CHROMATOGRAM_PEAK_SIZE as u64;
    let mut peaks = VecDeque::new();

    let mut low_excl = f64::NEG_INFINITY;
    let mut kept = 0;
    let mut pos = start;
    'down: while pos > section.start {
        let begin = pos.saturating_sub(WALK_BLOCK_RECORDS * record).max(section.start);
        let block = read_block(reader, begin, (pos - begin) / record)?;
        for peak in block.into_iter().rev() {
            if peak.mz < range.min_mz {
                if kept == extra_low {
                    low_excl = peak.mz;
                    break 'down;
                }
                kept += 1;
            }
            peaks.push_front(peak);
        }
        pos = begin;
    }

    let mut high_excl = f64::INFINITY;
    let mut kept = 0;
    let mut pos = start;
    'up: while pos < section.end {
        let end = (pos + WALK_BLOCK_RECORDS * record).min(section.end);
        let block = read_block(reader, pos, (end - pos) / record)?;
        for peak in block {
            if peak.mz > range.max_mz {
                if kept == extra_high {
                    high_excl = peak.mz;
                    break 'up;
                }
                kept += 1;
            }
            peaks.push_back(peak);
        }
        pos = end;
    }

    Ok(SectionWalk { peaks, low_excl, high_excl })
}

// ============================================================================
// Extracted ion chromatograms
// ============================================================================

/// Chromatogram peaks of one m/z window, in `(mz, scan_num)` order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Xic {
    peaks: Vec<ChromatogramPeak>,
}

impl Xic {
    pub fn new(peaks: Vec<ChromatogramPeak>) -> Self {
        Self { peaks }
    }

    pub fn peaks(&self) -> &[ChromatogramPeak] {
        &self.peaks
    }

    pub fn into_peaks(self) -> Vec<ChromatogramPeak> {
        self.peaks
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    /// Get the most intense peak
    pub fn max_intensity_peak(&self) -> Option<ChromatogramPeak> {
        self.peaks
            .iter()
            .max_by(|a, b| a.intensity.partial_cmp(&b.intensity).unwrap_or(std::cmp::Ordering::Equal))
            .copied()
    }

    pub fn total_intensity(&self) -> f64 {
        self.peaks.iter().map(|p| p.intensity as f64).sum()
    }

    /// One peak per scan (the most intense), ascending by scan number
    pub fn max_per_scan(&self) -> Xic {
        let mut by_scan = self.peaks.clone();
        by_scan.sort_by_key(|p| p.scan_num);

        let peaks = by_scan
            .into_iter()
            .chunk_by(|p| p.scan_num)
            .into_iter()
            .filter_map(|(_, group)| {
                group.reduce(|best, p| if p.intensity > best.intensity { p } else { best })
            })
            .collect();

        Xic { peaks }
    }

    /// Distinct scan numbers, ascending
    pub fn scan_nums(&self) -> Vec<i32> {
        self.peaks.iter().map(|p| p.scan_num).sorted_unstable().dedup().collect()
    }

    pub fn in_scan_range(&self, min_scan: i32, max_scan: i32) -> Xic {
        let peaks = self
            .peaks
            .iter()
            .filter(|p| p.scan_num >= min_scan && p.scan_num <= max_scan)
            .copied()
            .collect();
        Xic { peaks }
    }

    pub fn retain(&mut self, f: impl FnMut(&ChromatogramPeak) -> bool) {
        self.peaks.retain(f);
    }
}

impl IntoIterator for Xic {
    type Item = ChromatogramPeak;
    type IntoIter = std::vec::IntoIter<ChromatogramPeak>;

    fn into_iter(self) -> Self::IntoIter {
        self.peaks.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const PREFIX: u64 = 32;

    /// A section of the given m/z values (scan = position) after a 32-byte prefix.
    fn section(mzs: &[f64]) -> (Cursor<Vec<u8>>, Range<u64>) {
        let mut buf = BytesMut::new();
        buf.put_bytes(0xAB, PREFIX as usize);
        for (i, &mz) in mzs.iter().enumerate() {
            ChromatogramPeak::new(mz, 1.0 + i as f32, i as i32).put(&mut buf);
        }
        let end = buf.len() as u64;
        (Cursor::new(buf.to_vec()), PREFIX..end)
    }

    fn offset_of(index: u64) -> u64 {
        PREFIX + index * CHROMATOGRAM_PEAK_SIZE as u64
    }

    #[test]
    fn test_read_block_and_mz() {
        let (mut cursor, range) = section(&[100.0, 101.0, 102.0]);

        let all = read_section(&mut cursor, range).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2], ChromatogramPeak::new(102.0, 3.0, 2));
        assert_eq!(read_mz_at(&mut cursor, offset_of(1)).unwrap(), 101.0);
    }

    #[test]
    fn test_walk_collects_window() {
        let mzs: Vec<f64> = (0..3000).map(|i| 100.0 + i as f64 * 0.01).collect();
        let (mut cursor, range) = section(&mzs);
        let window = MzRange::new(105.0 - 1e-9, 110.0 + 1e-9);
        // start somewhere inside the window
        let walk = walk_section(&mut cursor, range, offset_of(800), window, 0, 0).unwrap();

        let expected: Vec<f64> = mzs.iter().copied().filter(|mz| window.contains(*mz)).collect();
        let got: Vec<f64> = walk.in_range(window).iter().map(|p| p.mz).collect();
        assert_eq!(got, expected);
        assert_eq!(walk.peaks.len(), expected.len());
        assert!(walk.low_excl < window.min_mz);
        assert!(walk.high_excl > window.max_mz);
    }

    #[test]
    fn test_walk_keeps_extra_peaks() {
        let (mut cursor, range) = section(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let window = MzRange::new(4.0, 5.0);

        let walk = walk_section(&mut cursor, range.clone(), offset_of(3), window, 2, 1).unwrap();
        let mzs: Vec<f64> = walk.peaks.iter().map(|p| p.mz).collect();
        assert_eq!(mzs, vec![2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(walk.low_excl, 1.0);
        assert_eq!(walk.high_excl, 7.0);

        let walk = walk_section(&mut cursor, range, offset_of(3), window, 10, 10).unwrap();
        assert_eq!(walk.peaks.len(), 8);
        assert_eq!(walk.low_excl, f64::NEG_INFINITY);
        assert_eq!(walk.high_excl, f64::INFINITY);
    }

    #[test]
    fn test_walk_empty_window() {
        let (mut cursor, range) = section(&[1.0, 2.0, 8.0, 9.0]);
        let window = MzRange::new(4.0, 5.0);

        let walk = walk_section(&mut cursor, range, offset_of(2), window, 0, 0).unwrap();
        assert!(walk.in_range(window).is_empty());
        assert_eq!(walk.low_excl, 2.0);
        assert_eq!(walk.high_excl, 8.0);
    }

    #[test]
    fn test_xic_helpers() {
        let xic = Xic::new(vec![
            ChromatogramPeak::new(100.0, 5.0, 3),
            ChromatogramPeak::new(100.001, 9.0, 1),
            ChromatogramPeak::new(100.002, 2.0, 3),
            ChromatogramPeak::new(100.003, 7.0, 2),
            ChromatogramPeak::new(100.004, 8.0, 3),
        ]);

        assert_eq!(xic.max_intensity_peak().unwrap().scan_num, 1);
        assert_eq!(xic.total_intensity(), 31.0);
        assert_eq!(xic.scan_nums(), vec![1, 2, 3]);

        let collapsed = xic.max_per_scan();
        let pairs: Vec<(i32, f32)> = collapsed.peaks().iter().map(|p| (p.scan_num, p.intensity)).collect();
        assert_eq!(pairs, vec![(1, 9.0), (2, 7.0), (3, 8.0)]);

        assert_eq!(xic.in_scan_range(2, 2).len(), 1);
        assert!(Xic::default().max_intensity_peak().is_none());
    }
}

//! Metadata table
//!
//! The only section read linearly on open. It lists every scan of the run with
//! its MS level, elution time, isolation bounds (MS2 only) and the offset of its
//! spectrum record, followed by the m/z bucket offsets of the precursor
//! chromatogram:
//!
//! ```text
//! minScan i32 | maxScan i32 |
//! per scan: scanNum i32, msLevel i32, elutionTime f64, [msLevel == 2: minMz f32, maxMz f32], specOffset i64
//! minBucket i32 | maxBucket i32 | bucket offsets i64 x (maxBucket - minBucket + 1)
//! ```
//!
//! Entries are in strictly ascending scan order and the last one is `maxScan`.
//! Only scans present in the run are written; entries with msLevel 0 or a
//! negative specOffset are read back as absent.

use anyhow_ext::Result;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::FormatError;
use crate::index::MzBucketIndex;
use crate::model::MzRange;

/// Smallest on-disk entry: scanNum, msLevel, elutionTime, specOffset
const MIN_ENTRY_LEN: usize = 4 + 4 + 8 + 8;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanMetadata {
    pub scan_num: i32,
    pub ms_level: u8,
    /// Elution time in minutes
    pub elution_time: f64,
    /// Isolation window bounds, MS2 scans only (f32 precision)
    pub isolation: Option<MzRange>,
    /// Offset of the spectrum record
    pub spec_offset: u64,
}

/// Per-scan metadata of a run, sorted by scan number
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanTable {
    entries: Vec<ScanMetadata>,
}

impl ScanTable {
    /// Build from entries in strictly ascending scan order.
    pub fn from_entries(entries: Vec<ScanMetadata>) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].scan_num < w[1].scan_num));
        Self { entries }
    }

    /// 0 for an empty table
    pub fn min_scan(&self) -> i32 {
        self.entries.first().map_or(0, |m| m.scan_num)
    }

    /// -1 for an empty table
    pub fn max_scan(&self) -> i32 {
        self.entries.last().map_or(-1, |m| m.scan_num)
    }

    /// Position of the first entry not below `scan_num`
    fn lower_bound(&self, scan_num: i32) -> usize {
        self.entries.partition_point(|m| m.scan_num < scan_num)
    }

    pub fn get(&self, scan_num: i32) -> Option<&ScanMetadata> {
        self.entries
            .binary_search_by_key(&scan_num, |m| m.scan_num)
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Number of scans present
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Present scans, ascending
    pub fn iter(&self) -> impl Iterator<Item = &ScanMetadata> {
        self.entries.iter()
    }

    /// Present scans of `ms_level` (all levels for `None`), ascending
    pub fn iter_level(&self, ms_level: Option<u8>) -> impl Iterator<Item = &ScanMetadata> {
        self.iter().filter(move |m| ms_level.is_none_or(|level| m.ms_level == level))
    }

    /// Closest present scan below `scan_num`
    pub fn prev_scan(&self, scan_num: i32, ms_level: Option<u8>) -> Option<i32> {
        self.entries[..self.lower_bound(scan_num)]
            .iter()
            .rev()
            .find(|m| ms_level.is_none_or(|level| m.ms_level == level))
            .map(|m| m.scan_num)
    }

    /// Closest present scan above `scan_num`
    pub fn next_scan(&self, scan_num: i32, ms_level: Option<u8>) -> Option<i32> {
        let lower = self.entries.partition_point(|m| m.scan_num <= scan_num);
        self.entries[lower..]
            .iter()
            .find(|m| ms_level.is_none_or(|level| m.ms_level == level))
            .map(|m| m.scan_num)
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.min_scan());
        buf.put_i32_le(self.max_scan());

        for m in &self.entries {
            buf.put_i32_le(m.scan_num);
            buf.put_i32_le(m.ms_level as i32);
            buf.put_f64_le(m.elution_time);
            if m.ms_level == 2 {
                let window = m.isolation.unwrap_or(MzRange::new(0.0, 0.0));
                buf.put_f32_le(window.min_mz as f32);
                buf.put_f32_le(window.max_mz as f32);
            }
            buf.put_i64_le(m.spec_offset as i64);
        }
    }

    fn decode(buf: &mut impl Buf) -> Result<Self> {
        let truncated = || FormatError::Truncated("metadata table");

        if buf.remaining() < 8 {
            return Err(truncated().into());
        }
        let min_scan = buf.get_i32_le();
        let max_scan = buf.get_i32_le();
        if max_scan < min_scan {
            return Ok(Self::default());
        }

        let mut entries = Vec::new();
        let mut last: Option<i32> = None;
        while last != Some(max_scan) {
            if buf.remaining() < MIN_ENTRY_LEN {
                return Err(truncated().into());
            }
            let scan_num = buf.get_i32_le();
            let in_order = scan_num >= min_scan && scan_num <= max_scan && last.is_none_or(|l| scan_num > l);
            if !in_order {
                return Err(FormatError::UnorderedScanTable { scan_num, min_scan, max_scan }.into());
            }
            last = Some(scan_num);

            let ms_level = buf.get_i32_le();
            let elution_time = buf.get_f64_le();
            let isolation = if ms_level == 2 {
                if buf.remaining() < 8 + 8 {
                    return Err(truncated().into());
                }
                let min_mz = buf.get_f32_le() as f64;
                let max_mz = buf.get_f32_le() as f64;
                Some(MzRange::new(min_mz, max_mz))
            } else {
                None
            };
            let spec_offset = buf.get_i64_le();

            if ms_level > 0 && spec_offset >= 0 {
                entries.push(ScanMetadata {
                    scan_num,
                    ms_level: ms_level.min(u8::MAX as i32) as u8,
                    elution_time,
                    isolation,
                    spec_offset: spec_offset as u64,
                });
            }
        }

        Ok(Self { entries })
    }
}

/// Encode the whole metadata section.
pub fn encode_metadata(scans: &ScanTable, index: &MzBucketIndex) -> BytesMut {
    let mut buf = BytesMut::new();
    scans.encode(&mut buf);

    buf.put_i32_le(index.min_bucket());
    buf.put_i32_le(index.max_bucket());
    // the section end slot is implied by the next section
    for &offset in index.offsets().iter().take(index.len()) {
        buf.put_i64_le(offset as i64);
    }

    buf
}

/// Decode the whole metadata section.
///
/// `precursor_end` restores the index's section end slot.
pub fn decode_metadata(buf: &mut impl Buf, precursor_end: u64) -> Result<(ScanTable, MzBucketIndex)> {
    let scans = ScanTable::decode(buf)?;

    if buf.remaining() < 8 {
        return Err(FormatError::Truncated("metadata table").into());
    }
    let min_bucket = buf.get_i32_le();
    let max_bucket = buf.get_i32_le();
    if max_bucket < min_bucket {
        return Ok((scans, MzBucketIndex::empty()));
    }

    let count = (max_bucket as i64 - min_bucket as i64 + 1) as usize;
    if buf.remaining() < count.saturating_mul(8) {
        return Err(FormatError::Truncated("bucket offsets").into());
    }
    let mut offsets: Vec<u64> = (0..count).map(|_| buf.get_i64_le().max(0) as u64).collect();
    offsets.push(precursor_end);

    Ok((scans, MzBucketIndex::new(min_bucket, max_bucket, offsets)))
}

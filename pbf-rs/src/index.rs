//! m/z bucket index over the precursor chromatogram
//!
//! The index maps every 1.0-wide m/z bucket between the smallest and largest
//! bucket of the section to the byte offset of the first record in that bucket
//! (or, for an empty bucket, of the next non-empty one). The last slot is the
//! section end. Finer positioning is done by binary search directly against the
//! file, reading only the m/z field of the probed records.

use anyhow_ext::Result;
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek};
use std::ops::Range;

use crate::chromatogram::read_mz_at;
use crate::format::{mz_bucket, CHROMATOGRAM_PEAK_SIZE};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MzBucketIndex {
    min_bucket: i32,
    max_bucket: i32,
    /// `max_bucket - min_bucket + 2` offsets, the last one is the section end
    offsets: Vec<u64>,
}

impl MzBucketIndex {
    /// Build an index from the offsets of every bucket plus the section end.
    pub fn new(min_bucket: i32, max_bucket: i32, offsets: Vec<u64>) -> Self {
        if max_bucket < min_bucket {
            return Self::empty();
        }
        debug_assert_eq!(offsets.len() as i64, max_bucket as i64 - min_bucket as i64 + 2);
        Self { min_bucket, max_bucket, offsets }
    }

    /// Index of a section without records.
    pub fn empty() -> Self {
        Self { min_bucket: 0, max_bucket: -1, offsets: Vec::new() }
    }

    pub fn min_bucket(&self) -> i32 {
        self.min_bucket
    }

    pub fn max_bucket(&self) -> i32 {
        self.max_bucket
    }

    pub fn is_empty(&self) -> bool {
        self.max_bucket < self.min_bucket
    }

    /// Number of indexed buckets.
    pub fn len(&self) -> usize {
        if self.is_empty() { 0 } else { (self.max_bucket - self.min_bucket + 1) as usize }
    }

    /// All offsets including the section end.
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// Byte range of the records of `bucket`.
    pub fn bucket_range(&self, bucket: i32) -> Option<Range<u64>> {
        if self.is_empty() || bucket < self.min_bucket || bucket > self.max_bucket {
            return None;
        }
        let i = (bucket - self.min_bucket) as usize;
        Some(self.offsets[i]..self.offsets[i + 1])
    }

    /// Offset to start an outward walk for the window `[min_mz, max_mz]`.
    ///
    /// Returns `None`, without touching `reader`, when the window is inverted or
    /// lies entirely outside the indexed buckets. A window inside one bucket is
    /// refined by binary search and yields `None` when no record of the bucket
    /// falls in it. A window spanning several buckets yields the first record of
    /// the highest relevant bucket.
    pub fn locate_offset<R: Read + Seek>(&self, reader: &mut R, min_mz: f64, max_mz: f64) -> Result<Option<u64>> {
        if self.is_empty() || !(min_mz <= max_mz) {
            return Ok(None);
        }

        let lo_bin = mz_bucket(min_mz);
        let hi_bin = mz_bucket(max_mz);
        if hi_bin < self.min_bucket || lo_bin > self.max_bucket {
            return Ok(None);
        }

        let lo_bin = lo_bin.max(self.min_bucket);
        let hi_bin = hi_bin.min(self.max_bucket);

        if lo_bin != hi_bin {
            return Ok(Some(self.offsets[(hi_bin - self.min_bucket) as usize]));
        }

        let bucket = match self.bucket_range(lo_bin) {
            Some(range) => range,
            None => return Ok(None),
        };
        let offset = lower_bound_offset(reader, bucket.clone(), min_mz)?;
        if offset < bucket.end && read_mz_at(reader, offset)? <= max_mz {
            Ok(Some(offset))
        } else {
            Ok(None)
        }
    }
}

/// Offset of the first record in `range` whose m/z is not below `mz`.
///
/// `range` must cover whole 16-byte records of an `(mz, scan)`-sorted section.
/// Returns `range.end` when every record is below `mz`.
pub fn lower_bound_offset<R: Read + Seek>(reader: &mut R, range: Range<u64>, mz: f64) -> Result<u64> {
    let record = CHROMATOGRAM_PEAK_SIZE as u64;
    let mut lo = 0u64;
    let mut hi = (range.end.saturating_sub(range.start)) / record;

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if read_mz_at(reader, range.start + mid * record)? < mz {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }

    Ok(range.start + lo * record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chromatogram::ChromatogramPeak;
    use bytes::BytesMut;
    use std::io::{Cursor, SeekFrom};

    /// Section starting at offset 0 plus its index, built the naive way.
    fn indexed_section(mzs: &[f64]) -> (Cursor<Vec<u8>>, MzBucketIndex) {
        let mut buf = BytesMut::new();
        for (i, &mz) in mzs.iter().enumerate() {
            ChromatogramPeak::new(mz, 1.0, i as i32).put(&mut buf);
        }

        let min_bucket = mz_bucket(mzs[0]);
        let max_bucket = mz_bucket(*mzs.last().unwrap());
        let mut offsets: Vec<u64> = (min_bucket..=max_bucket)
            .map(|b| {
                let first = mzs.iter().position(|&mz| mz_bucket(mz) >= b).unwrap();
                (first * CHROMATOGRAM_PEAK_SIZE) as u64
            })
            .collect();
        offsets.push(buf.len() as u64);

        (Cursor::new(buf.to_vec()), MzBucketIndex::new(min_bucket, max_bucket, offsets))
    }

    /// A reader that fails on any access.
    struct NoDisk;

    impl Read for NoDisk {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            panic!("unexpected read");
        }
    }

    impl Seek for NoDisk {
        fn seek(&mut self, _: SeekFrom) -> std::io::Result<u64> {
            panic!("unexpected seek");
        }
    }

    #[test]
    fn test_lower_bound() {
        let (mut cursor, _) = indexed_section(&[1.0, 2.0, 2.0, 3.0]);

        assert_eq!(lower_bound_offset(&mut cursor, 0..64, 2.0).unwrap(), 16);
        assert_eq!(lower_bound_offset(&mut cursor, 0..64, 0.5).unwrap(), 0);
        assert_eq!(lower_bound_offset(&mut cursor, 0..64, 9.0).unwrap(), 64);
        assert_eq!(lower_bound_offset(&mut cursor, 32..64, 1.0).unwrap(), 32);
    }

    #[test]
    fn test_empty_buckets_are_backward_filled() {
        let (_, index) = indexed_section(&[100.2, 100.7, 103.5]);

        assert_eq!(index.len(), 4);
        assert_eq!(index.bucket_range(100), Some(0..32));
        assert_eq!(index.bucket_range(101), Some(32..32));
        assert_eq!(index.bucket_range(102), Some(32..32));
        assert_eq!(index.bucket_range(103), Some(32..48));
        assert_eq!(index.bucket_range(104), None);
    }

    #[test]
    fn test_locate_single_bucket() {
        let (mut cursor, index) = indexed_section(&[100.2, 100.5, 100.7, 101.1]);

        assert_eq!(index.locate_offset(&mut cursor, 100.4, 100.6).unwrap(), Some(16));
        assert_eq!(index.locate_offset(&mut cursor, 100.55, 100.65).unwrap(), None);
        assert_eq!(index.locate_offset(&mut cursor, 100.8, 100.9).unwrap(), None);
    }

    #[test]
    fn test_locate_multi_bucket() {
        let (mut cursor, index) = indexed_section(&[100.2, 100.5, 101.1, 102.3]);

        assert_eq!(index.locate_offset(&mut cursor, 100.4, 101.5).unwrap(), Some(32));
        // high end clamped to the last bucket
        assert_eq!(index.locate_offset(&mut cursor, 101.0, 500.0).unwrap(), Some(48));
    }

    #[test]
    fn test_out_of_range_needs_no_disk() {
        let (_, index) = indexed_section(&[100.2, 100.5, 101.1]);

        assert_eq!(index.locate_offset(&mut NoDisk, 10.0, 20.0).unwrap(), None);
        assert_eq!(index.locate_offset(&mut NoDisk, 200.0, 300.0).unwrap(), None);
        assert_eq!(index.locate_offset(&mut NoDisk, 101.0, 100.0).unwrap(), None);
        assert_eq!(MzBucketIndex::empty().locate_offset(&mut NoDisk, 0.0, 1000.0).unwrap(), None);
    }
}

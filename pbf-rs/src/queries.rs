//! Random-access queries over an opened file
//!
//! These functions expect the caller to hold the file lock for their whole
//! duration: they take the cursor guarded by the reader lock (or any
//! `Read + Seek` cursor) and the in-memory [`FileLayout`].

use anyhow::{Context, Result};
use log::trace;
use std::io::{Read, Seek, SeekFrom};

use crate::cache::XicCache;
use crate::chromatogram::{walk_section, Xic};
use crate::codec::read_spectrum;
use crate::index::lower_bound_offset;
use crate::layout::FileLayout;
use crate::model::{IsolationWindow, MzRange, Spectrum};

/// Decode the spectrum of `scan_num`, `None` if the run has no such scan.
pub fn get_spectrum<R: Read + Seek>(
    reader: &mut R,
    layout: &FileLayout,
    scan_num: i32,
    include_peaks: bool,
) -> Result<Option<Spectrum>> {
    let meta = match layout.scans.get(scan_num) {
        Some(meta) => meta,
        None => return Ok(None),
    };

    reader
        .seek(SeekFrom::Start(meta.spec_offset))
        .with_context(|| format!("can't seek to scan {}", scan_num))?;
    let spectrum = read_spectrum(reader, &layout.features, include_peaks)
        .with_context(|| format!("can't decode scan {} at offset {}", scan_num, meta.spec_offset))?;

    Ok(Some(spectrum))
}

/// Isolation window of an MSn scan, read without its peaks.
pub fn get_isolation_window<R: Read + Seek>(
    reader: &mut R,
    layout: &FileLayout,
    scan_num: i32,
) -> Result<Option<IsolationWindow>> {
    match layout.scans.get(scan_num) {
        Some(meta) if meta.ms_level > 1 => {}
        _ => return Ok(None),
    }

    let spectrum = get_spectrum(reader, layout, scan_num, false)?;
    Ok(spectrum.and_then(|s| s.header.isolation_window()))
}

/// XIC over the precursor chromatogram, served from `cache` when possible.
///
/// On a miss the section is walked from the indexed start offset and the walk
/// (with up to `extra_low`/`extra_high` neighbours) replaces the cache.
pub fn get_precursor_xic<R: Read + Seek>(
    reader: &mut R,
    cache: &mut XicCache,
    layout: &FileLayout,
    range: MzRange,
    extra_low: usize,
    extra_high: usize,
) -> Result<Xic> {
    if let Some(peaks) = cache.lookup(range) {
        trace!("xic [{}, {}] served from cache", range.min_mz, range.max_mz);
        return Ok(Xic::new(peaks));
    }

    let start = match layout.precursor_index.locate_offset(reader, range.min_mz, range.max_mz)? {
        Some(start) => start,
        None => {
            cache.clear();
            return Ok(Xic::default());
        }
    };

    let walk = walk_section(reader, layout.sections.precursor.clone(), start, range, extra_low, extra_high)?;
    let xic = Xic::new(walk.in_range(range));
    cache.store(walk);

    Ok(xic)
}

/// XIC over the product chromatogram.
///
/// The product section carries no bucket index; the start offset comes from a
/// binary search over the whole section.
pub fn get_product_xic<R: Read + Seek>(reader: &mut R, layout: &FileLayout, range: MzRange) -> Result<Xic> {
    let section = layout.sections.product.clone();
    if section.is_empty() || !(range.min_mz <= range.max_mz) {
        return Ok(Xic::default());
    }

    let start = lower_bound_offset(reader, section.clone(), range.min_mz)?;
    let walk = walk_section(reader, section, start, range, 0, 0)?;

    Ok(Xic::new(walk.in_range(range)))
}

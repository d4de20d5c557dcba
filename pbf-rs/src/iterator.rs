//! Iterator utilities for streaming through PBF spectra
//!
//! Spectra are decoded one at a time, in ascending scan order, so whole runs
//! can be processed without loading them into memory.
//!
//! # Example
//! ```no_run
//! use pbf::iterator::for_each_spectrum;
//! use pbf::PbfReader;
//!
//! let reader = PbfReader::open("run.pbf").unwrap();
//!
//! for_each_spectrum(&reader, Some(1), true, |spectrum| {
//!     println!("MS1 spectrum {}: {} peaks", spectrum.scan_num(), spectrum.peaks.len());
//!     Ok(())
//! }).unwrap();
//! ```

use anyhow::Result;
use fallible_iterator::FallibleIterator;

use crate::model::Spectrum;
use crate::PbfReader;

/// Streaming spectrum iterator
///
/// Scan numbers are taken from the metadata table when the iterator is
/// created; each call to `next` holds the file lock only while decoding one
/// spectrum.
///
/// # Example
/// ```no_run
/// use pbf::PbfReader;
/// use fallible_iterator::FallibleIterator;
///
/// let reader = PbfReader::open("run.pbf").unwrap();
/// let mut iter = reader.iter_spectra(Some(2), false);
/// while let Some(spectrum) = iter.next().unwrap() {
///     println!("MS2 scan {} at {} min", spectrum.scan_num(), spectrum.header.elution_time);
/// }
/// ```
pub struct SpectrumIterator<'a> {
    reader: &'a PbfReader,
    scan_nums: std::vec::IntoIter<i32>,
    include_peaks: bool,
}

impl<'a> SpectrumIterator<'a> {
    /// Create a new spectrum iterator
    ///
    /// # Arguments
    /// * `reader` - An opened file
    /// * `ms_level` - Optional MS level filter (e.g., Some(1) for MS1 only, None for all levels)
    /// * `include_peaks` - Decode peak lists, or headers only
    pub fn new(reader: &'a PbfReader, ms_level: Option<u8>, include_peaks: bool) -> Self {
        Self { reader, scan_nums: reader.scan_numbers(ms_level).into_iter(), include_peaks }
    }
}

impl<'a> FallibleIterator for SpectrumIterator<'a> {
    type Item = Spectrum;
    type Error = anyhow::Error;

    fn next(&mut self) -> Result<Option<Self::Item>> {
        for scan_num in self.scan_nums.by_ref() {
            if let Some(spectrum) = self.reader.get_spectrum(scan_num, self.include_peaks)? {
                return Ok(Some(spectrum));
            }
        }
        Ok(None)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.scan_nums.len()))
    }
}

/// Call `on_each_spectrum` for every spectrum of `ms_level` (all levels for
/// `None`), in ascending scan order.
pub fn for_each_spectrum<F>(
    reader: &PbfReader,
    ms_level: Option<u8>,
    include_peaks: bool,
    mut on_each_spectrum: F,
) -> Result<()>
where
    F: FnMut(&Spectrum) -> Result<()>,
{
    let mut iter = SpectrumIterator::new(reader, ms_level, include_peaks);
    while let Some(spectrum) = iter.next()? {
        on_each_spectrum(&spectrum)?;
    }

    Ok(())
}

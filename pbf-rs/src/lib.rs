//! pbf-rs: A Rust library for writing and randomly accessing PBF LC-MS run files
//!
//! A PBF file stores one LC-MS run as a single flat binary file: every spectrum
//! keyed by scan number, plus two chromatograms holding all MS1 and all MSn
//! peaks sorted by `(mz, scan_num)`, so extracted ion chromatograms are read
//! with a couple of seeks instead of touching every spectrum.
//!
//! # Features
//!
//! - **Spectrum Access**: Read a spectrum by scan number, with or without peaks
//! - **XIC Extraction**: m/z-indexed precursor chromatogram with a windowed cache
//! - **Product XICs**: MSn chromatogram, optionally restricted by isolation window
//! - **Scan Navigation**: MS level, elution time, previous/next scan of a level
//! - **Bounded-Memory Writing**: chromatograms are built under a memory budget
//! - **Format Versions**: every version id from 150604 to 150608 is readable
//!
//! # Quick Start
//!
//! ```no_run
//! use pbf::{PbfReader, Tolerance};
//!
//! let reader = PbfReader::open("path/to/run.pbf").unwrap();
//!
//! println!("Format version: {}", reader.format_version());
//! println!("Scans {}..={}", reader.min_scan_num(), reader.max_scan_num());
//!
//! if let Some(spectrum) = reader.get_spectrum(reader.min_scan_num(), true).unwrap() {
//!     println!("First scan: {} peaks", spectrum.peaks.len());
//! }
//!
//! let xic = reader.get_precursor_xic(524.26, Tolerance::Ppm(10.0));
//! println!("XIC: {} scans", xic.len());
//! ```
//!
//! # Module Organization
//!
//! - [`model`]: Core data structures (Spectrum, Peak, IsolationWindow, etc.)
//! - [`codec`]: Spectrum record encoding
//! - [`chromatogram`]: Chromatogram records and XICs
//! - [`index`]: m/z bucket index over the precursor chromatogram
//! - [`layout`]: Footer, sections and metadata table of an opened file
//! - [`queries`]: Low-level query functions
//! - [`iterator`]: Streaming iteration over spectra
//! - [`writer`]: File creation
//! - [`source`]: Input interface of the writer

pub mod cache;
pub mod chromatogram;
pub mod codec;
pub mod error;
pub mod footer;
pub mod format;
pub mod index;
pub mod iterator;
pub mod layout;
pub mod metadata;
pub mod model;
pub mod queries;
pub mod source;
pub mod writer;

mod io;

// Re-export main types for convenience
pub use model::{
    Acquisition, ActivationMethod, IsolationWindow, MzRange, NativeFormat, NativeIdFormat, Peak, PrecursorInfo,
    Spectrum, SpectrumHeader, Tolerance,
};

pub use chromatogram::{ChromatogramPeak, Xic};
pub use error::{BuildError, FormatError};
pub use footer::Provenance;
pub use format::{CURRENT_FORMAT_VERSION, EARLIEST_SUPPORTED_FORMAT_VERSION};
pub use iterator::SpectrumIterator;
pub use layout::SectionBounds;
pub use metadata::{ScanMetadata, ScanTable};
pub use writer::{PbfWriter, PbfWriterBuilder, SealedRun};

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::format::FormatFeatures;
use crate::index::MzBucketIndex;
use crate::io::SharedFile;
use crate::layout::FileLayout;

/// Tuning of a [`PbfReader`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Extra chromatogram peaks kept in the XIC cache below a queried window
    pub xic_cache_low: usize,
    /// Extra chromatogram peaks kept in the XIC cache above a queried window
    pub xic_cache_high: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self { xic_cache_low: 1024, xic_cache_high: 1024 }
    }
}

/// Main entry point for reading PBF files
///
/// Opening validates the whole layout and loads the metadata table and the
/// m/z index; afterwards queries only touch the data sections. A reader owns a
/// single file handle guarded by a lock, so it can be shared between threads
/// (`PbfReader` is `Send + Sync`), with every query serialized on the handle.
///
/// # Example
///
/// ```no_run
/// use pbf::PbfReader;
///
/// let reader = PbfReader::open("path/to/run.pbf").unwrap();
///
/// // Basic info
/// println!("Version: {}", reader.format_version());
/// println!("Spectra: {}", reader.spectrum_count());
///
/// // MS2 scans that fragmented m/z 652.33
/// for scan in reader.fragmentation_scans(652.33) {
///     println!("{:?}", reader.get_isolation_window(scan).unwrap());
/// }
/// ```
#[derive(Debug)]
pub struct PbfReader {
    file: SharedFile,
    layout: FileLayout,
    config: ReaderConfig,
}

impl PbfReader {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Open a PBF file for reading
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, ReaderConfig::default())
    }

    /// Open a PBF file with custom reader settings
    pub fn open_with_config(path: impl AsRef<Path>, config: ReaderConfig) -> Result<Self> {
        let file = SharedFile::open(path.as_ref())?;
        let file_len = file.len();
        let layout = file.with_lock(|state| FileLayout::load(&mut state.reader, file_len))?;

        info!(
            "opened {} (version {}, {} spectra, {} bytes)",
            file.path().display(),
            layout.footer.version,
            layout.scans.len(),
            file_len
        );

        Ok(Self { file, layout, config })
    }

    // ========================================================================
    // File-level metadata
    // ========================================================================

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Get the format version id of the file
    pub fn format_version(&self) -> i32 {
        self.layout.footer.version
    }

    /// Optional fields carried by this file's version
    pub fn features(&self) -> FormatFeatures {
        self.layout.features
    }

    /// Origin of the run, `None` for versions without provenance fields
    pub fn provenance(&self) -> Option<&Provenance> {
        self.layout.footer.provenance.as_ref()
    }

    pub fn config(&self) -> ReaderConfig {
        self.config
    }

    /// Byte ranges of the file sections
    pub fn section_bounds(&self) -> &SectionBounds {
        &self.layout.sections
    }

    /// The m/z bucket index of the precursor chromatogram
    pub fn precursor_index(&self) -> &MzBucketIndex {
        &self.layout.precursor_index
    }

    // ========================================================================
    // Scan table
    // ========================================================================

    /// Lowest scan number of the run
    pub fn min_scan_num(&self) -> i32 {
        self.layout.scans.min_scan()
    }

    /// Highest scan number of the run
    pub fn max_scan_num(&self) -> i32 {
        self.layout.scans.max_scan()
    }

    /// Get the total number of spectra
    pub fn spectrum_count(&self) -> usize {
        self.layout.scans.len()
    }

    pub fn scan_table(&self) -> &ScanTable {
        &self.layout.scans
    }

    pub fn scan_metadata(&self, scan_num: i32) -> Option<&ScanMetadata> {
        self.layout.scans.get(scan_num)
    }

    /// Scan numbers of `ms_level` (all levels for `None`), ascending
    pub fn scan_numbers(&self, ms_level: Option<u8>) -> Vec<i32> {
        self.layout.scans.iter_level(ms_level).map(|m| m.scan_num).collect()
    }

    pub fn ms_level(&self, scan_num: i32) -> Option<u8> {
        self.scan_metadata(scan_num).map(|m| m.ms_level)
    }

    pub fn elution_time(&self, scan_num: i32) -> Option<f64> {
        self.scan_metadata(scan_num).map(|m| m.elution_time)
    }

    /// Closest scan before `scan_num`, restricted to `ms_level` if given
    pub fn prev_scan_num(&self, scan_num: i32, ms_level: Option<u8>) -> Option<i32> {
        self.layout.scans.prev_scan(scan_num, ms_level)
    }

    /// Closest scan after `scan_num`, restricted to `ms_level` if given
    pub fn next_scan_num(&self, scan_num: i32, ms_level: Option<u8>) -> Option<i32> {
        self.layout.scans.next_scan(scan_num, ms_level)
    }

    /// MS2 scans whose isolation window contains `precursor_mz`
    pub fn fragmentation_scans(&self, precursor_mz: f64) -> Vec<i32> {
        self.layout
            .scans
            .iter_level(Some(2))
            .filter(|m| m.isolation.is_some_and(|window| window.contains(precursor_mz)))
            .map(|m| m.scan_num)
            .collect()
    }

    // ========================================================================
    // Spectrum access
    // ========================================================================

    /// Get a spectrum by scan number, `None` if the run has no such scan
    pub fn get_spectrum(&self, scan_num: i32, include_peaks: bool) -> Result<Option<Spectrum>> {
        self.file
            .with_lock(|state| queries::get_spectrum(&mut state.reader, &self.layout, scan_num, include_peaks))
    }

    /// Isolation window of an MSn scan, `None` for MS1 or unknown scans
    pub fn get_isolation_window(&self, scan_num: i32) -> Result<Option<IsolationWindow>> {
        self.file.with_lock(|state| queries::get_isolation_window(&mut state.reader, &self.layout, scan_num))
    }

    /// Iterate over spectra, optionally filtering by MS level
    pub fn iter_spectra(&self, ms_level: Option<u8>, include_peaks: bool) -> SpectrumIterator<'_> {
        SpectrumIterator::new(self, ms_level, include_peaks)
    }

    /// Call `on_each_spectrum` for every spectrum, optionally filtering by MS level
    pub fn for_each_spectrum<F>(&self, ms_level: Option<u8>, include_peaks: bool, on_each_spectrum: F) -> Result<()>
    where
        F: FnMut(&Spectrum) -> Result<()>,
    {
        iterator::for_each_spectrum(self, ms_level, include_peaks, on_each_spectrum)
    }

    // ========================================================================
    // XIC extraction
    // ========================================================================

    /// Precursor chromatogram peaks with `min_mz <= mz <= max_mz`, in
    /// `(mz, scan_num)` order
    pub fn try_get_xic(&self, min_mz: f64, max_mz: f64) -> Result<Xic> {
        let range = MzRange::new(min_mz, max_mz);
        self.file.with_lock(|state| {
            queries::get_precursor_xic(
                &mut state.reader,
                &mut state.xic_cache,
                &self.layout,
                range,
                self.config.xic_cache_low,
                self.config.xic_cache_high,
            )
        })
    }

    /// Like [`try_get_xic`](Self::try_get_xic), logging failures and returning
    /// an empty XIC instead
    pub fn get_xic(&self, min_mz: f64, max_mz: f64) -> Xic {
        self.try_get_xic(min_mz, max_mz).unwrap_or_else(|e| {
            warn!("xic [{}, {}] failed: {:#}", min_mz, max_mz, e);
            Xic::default()
        })
    }

    /// XIC around `mz`, keeping the most intense peak of every scan
    pub fn try_get_precursor_xic(&self, mz: f64, tolerance: Tolerance) -> Result<Xic> {
        let window = tolerance.window(mz);
        Ok(self.try_get_xic(window.min_mz, window.max_mz)?.max_per_scan())
    }

    pub fn get_precursor_xic(&self, mz: f64, tolerance: Tolerance) -> Xic {
        self.try_get_precursor_xic(mz, tolerance).unwrap_or_else(|e| {
            warn!("precursor xic at {} failed: {:#}", mz, e);
            Xic::default()
        })
    }

    /// Product chromatogram peaks with `min_mz <= mz <= max_mz`.
    ///
    /// With `precursor_mz`, only peaks of MS2 scans whose isolation window
    /// contains it are kept.
    pub fn try_get_product_xic(&self, min_mz: f64, max_mz: f64, precursor_mz: Option<f64>) -> Result<Xic> {
        let range = MzRange::new(min_mz, max_mz);
        let mut xic = self.file.with_lock(|state| queries::get_product_xic(&mut state.reader, &self.layout, range))?;

        if let Some(precursor_mz) = precursor_mz {
            let scans = &self.layout.scans;
            xic.retain(|p| {
                scans
                    .get(p.scan_num)
                    .and_then(|m| m.isolation)
                    .is_some_and(|window| window.contains(precursor_mz))
            });
        }

        Ok(xic)
    }

    pub fn get_product_xic(&self, min_mz: f64, max_mz: f64, precursor_mz: Option<f64>) -> Xic {
        self.try_get_product_xic(min_mz, max_mz, precursor_mz).unwrap_or_else(|e| {
            warn!("product xic [{}, {}] failed: {:#}", min_mz, max_mz, e);
            Xic::default()
        })
    }

    /// Drop the cached chromatogram window
    pub fn clear_xic_cache(&self) -> Result<()> {
        self.file.with_lock(|state| {
            state.xic_cache.clear();
            Ok(())
        })
    }
}

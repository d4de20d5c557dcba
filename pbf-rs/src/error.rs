//! Typed errors for PBF files
//!
//! Most functions of this crate return `anyhow::Result`. The types below are the
//! failures callers may want to match on: wrap-free downcasting works through any
//! context added along the way.
//!
//! ```no_run
//! use pbf::{FormatError, PbfReader};
//!
//! match PbfReader::open("run.pbf") {
//!     Ok(reader) => println!("{} spectra", reader.spectrum_count()),
//!     Err(e) if e.downcast_ref::<FormatError>().is_some() => eprintln!("not a PBF file: {e}"),
//!     Err(e) => eprintln!("I/O failure: {e}"),
//! }
//! ```

use thiserror::Error;

/// The file cannot be interpreted as a PBF file. Always fatal to opening.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The file is shorter than the fixed-size structures it must contain.
    #[error("file too small: {len} bytes, at least {required} required")]
    FileTooSmall {
        /// Actual file length.
        len: u64,
        /// Minimum length for the structure being read.
        required: u64,
    },

    /// The trailing format version id could not be read.
    #[error("unreadable format version id: {0}")]
    UnreadableVersion(String),

    /// The format version id lies outside the supported range.
    #[error("unsupported format version {found} (supported: {earliest}..={current})")]
    UnsupportedVersion {
        /// Version found in the file.
        found: i32,
        /// Oldest version this reader understands.
        earliest: i32,
        /// Version written by this crate.
        current: i32,
    },

    /// Section offsets are out of order or point outside the file.
    #[error("section {section} [{begin}, {end}) lies outside file bounds (data end {limit})")]
    SectionOutOfBounds {
        /// Section name.
        section: &'static str,
        /// Declared begin offset.
        begin: i64,
        /// Declared end offset.
        end: i64,
        /// Offset the section must not exceed.
        limit: u64,
    },

    /// A chromatogram section length is not a whole number of records.
    #[error("section {section} has length {len}, not a multiple of {record_size}")]
    MisalignedSection {
        /// Section name.
        section: &'static str,
        /// Section length in bytes.
        len: u64,
        /// Expected record size.
        record_size: usize,
    },

    /// A table ended before all declared entries were read.
    #[error("truncated {0}")]
    Truncated(&'static str),

    /// A metadata entry is outside the declared scan range or out of order.
    #[error("metadata entry for scan {scan_num} out of order (scan range {min_scan}..={max_scan})")]
    UnorderedScanTable {
        /// Scan number of the offending entry.
        scan_num: i32,
        /// Declared first scan.
        min_scan: i32,
        /// Declared last scan.
        max_scan: i32,
    },
}

/// Failures specific to building a PBF file.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    /// The build was cancelled through its progress handle.
    #[error("build cancelled")]
    Cancelled,

    /// Spectra must be written in strictly ascending scan order.
    #[error("scan {found} written after scan {previous}")]
    ScanOrder {
        /// Last scan written.
        previous: i32,
        /// Offending scan.
        found: i32,
    },

    /// A product scan must have MS level 2 or above.
    #[error("scan {scan_num} is a product scan with MS level {ms_level}")]
    ProductMsLevel {
        /// Offending scan.
        scan_num: i32,
        /// Its MS level.
        ms_level: u8,
    },

    /// The chromatogram drain could not make progress.
    #[error("chromatogram builder stalled with {pending} peaks pending")]
    Stalled {
        /// Peaks still on disk when the drain stopped.
        pending: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_downcast_through_context() {
        let err: anyhow::Error = FormatError::Truncated("metadata table").into();
        let err = err.context("opening run.pbf");

        assert_eq!(
            err.downcast_ref::<FormatError>(),
            Some(&FormatError::Truncated("metadata table"))
        );
    }

    #[test]
    fn test_messages() {
        let e = FormatError::UnsupportedVersion { found: 1, earliest: 2, current: 3 };
        assert_eq!(e.to_string(), "unsupported format version 1 (supported: 2..=3)");

        let e = BuildError::ScanOrder { previous: 4, found: 2 };
        assert_eq!(e.to_string(), "scan 2 written after scan 4");
    }
}

//! PBF format constants and version history
//!
//! Every PBF file ends with a 4-byte format version id. Which optional fields a
//! file carries is decided once per file by looking the version up in
//! [`FORMAT_HISTORY`], never by scattered version comparisons.

use crate::error::FormatError;

/// Version id written by this crate.
pub const CURRENT_FORMAT_VERSION: i32 = 150608;

/// Oldest version id this crate can read.
pub const EARLIEST_SUPPORTED_FORMAT_VERSION: i32 = 150604;

/// Width of one m/z index bucket.
pub const MZ_BUCKET_WIDTH: f64 = 1.0;

/// Size of the native id field of a spectrum record.
pub const NATIVE_ID_LEN: usize = 50;

/// Size of the checksum field of the footer.
pub const CHECKSUM_LEN: usize = 40;

/// Size of the raw source path field of the footer.
pub const RAW_PATH_LEN: usize = 200;

/// On-disk size of one spectrum peak (mz f64, intensity f32).
pub const SPECTRUM_PEAK_SIZE: usize = 12;

/// On-disk size of one chromatogram peak (mz f64, intensity f32, scan i32).
pub const CHROMATOGRAM_PEAK_SIZE: usize = 16;

/// Size of the trailing version id.
pub const VERSION_ID_SIZE: usize = 4;

/// Optional fields carried by a given format version.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FormatFeatures {
    /// Spectrum records carry a 50-byte native id.
    pub native_id: bool,
    /// Spectrum records carry the total ion current.
    pub total_ion_current: bool,
    /// The footer carries checksum, raw path and native format tags.
    pub provenance: bool,
}

/// `(first version, features)` pairs, ascending by version.
pub const FORMAT_HISTORY: &[(i32, FormatFeatures)] = &[
    (
        150604,
        FormatFeatures { native_id: false, total_ion_current: false, provenance: false },
    ),
    (
        150605,
        FormatFeatures { native_id: true, total_ion_current: false, provenance: false },
    ),
    (
        150608,
        FormatFeatures { native_id: true, total_ion_current: true, provenance: true },
    ),
];

impl FormatFeatures {
    /// Features of the version written by this crate.
    pub fn current() -> Self {
        FORMAT_HISTORY[FORMAT_HISTORY.len() - 1].1
    }

    /// Look up the features of `version`, rejecting versions outside the supported range.
    pub fn for_version(version: i32) -> Result<Self, FormatError> {
        if !(EARLIEST_SUPPORTED_FORMAT_VERSION..=CURRENT_FORMAT_VERSION).contains(&version) {
            return Err(FormatError::UnsupportedVersion {
                found: version,
                earliest: EARLIEST_SUPPORTED_FORMAT_VERSION,
                current: CURRENT_FORMAT_VERSION,
            });
        }

        let features = FORMAT_HISTORY
            .iter()
            .rev()
            .find(|(first, _)| *first <= version)
            .map(|(_, features)| *features)
            .unwrap_or(FORMAT_HISTORY[0].1);

        Ok(features)
    }
}

/// Index bucket holding `mz`.
#[inline]
pub fn mz_bucket(mz: f64) -> i32 {
    (mz / MZ_BUCKET_WIDTH).floor() as i32
}

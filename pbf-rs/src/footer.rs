//! File footer
//!
//! The footer sits at the very end of the file and is read first. Its last four
//! bytes are the format version id, which decides the size of the rest:
//!
//! ```text
//! checksum [u8; 40] | rawPath [u8; 200] | nativeFormat i32 | nativeIdFormat i32   (provenance versions only)
//! precursorBegin i64 | productBegin i64 | metadataBegin i64 | version i32
//! ```

use anyhow_ext::{Context, Result};
use bytes::{Buf, BufMut, BytesMut};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek, SeekFrom};

use crate::codec::{get_padded, put_padded};
use crate::error::FormatError;
use crate::format::*;
use crate::model::{NativeFormat, NativeIdFormat};

const PROVENANCE_LEN: usize = CHECKSUM_LEN + RAW_PATH_LEN + 4 + 4;
const OFFSETS_LEN: usize = 3 * 8;

/// Where a run came from
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Hex checksum of the source file (40 chars)
    pub checksum: String,
    /// Path of the source file at conversion time
    pub raw_path: String,
    pub native_format: NativeFormat,
    pub native_id_format: NativeIdFormat,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileFooter {
    /// Absent for versions that predate the provenance fields
    pub provenance: Option<Provenance>,
    pub precursor_begin: i64,
    pub product_begin: i64,
    pub metadata_begin: i64,
    pub version: i32,
}

/// Size of the footer for a file with `features`.
pub fn footer_len(features: &FormatFeatures) -> usize {
    let base = OFFSETS_LEN + VERSION_ID_SIZE;
    if features.provenance { PROVENANCE_LEN + base } else { base }
}

impl FileFooter {
    pub fn encode(&self, features: &FormatFeatures) -> BytesMut {
        let mut buf = BytesMut::with_capacity(footer_len(features));

        if features.provenance {
            let provenance = self.provenance.clone().unwrap_or_default();
            put_padded(&mut buf, &provenance.checksum, CHECKSUM_LEN, "checksum");
            put_padded(&mut buf, &provenance.raw_path, RAW_PATH_LEN, "raw path");
            buf.put_i32_le(provenance.native_format as i32);
            buf.put_i32_le(provenance.native_id_format as i32);
        }

        buf.put_i64_le(self.precursor_begin);
        buf.put_i64_le(self.product_begin);
        buf.put_i64_le(self.metadata_begin);
        buf.put_i32_le(self.version);

        buf
    }

    /// Parse a footer of `features` layout (version id included).
    pub fn decode(buf: &mut impl Buf, features: &FormatFeatures) -> Result<Self> {
        if buf.remaining() < footer_len(features) {
            return Err(FormatError::Truncated("footer").into());
        }

        let provenance = if features.provenance {
            let checksum = get_padded(buf, CHECKSUM_LEN);
            let raw_path = get_padded(buf, RAW_PATH_LEN);
            let native_format = buf.get_i32_le();
            let native_id_format = buf.get_i32_le();

            Some(Provenance {
                checksum,
                raw_path,
                native_format: NativeFormat::from_repr(native_format).unwrap_or_else(|| {
                    warn!("unknown native format {}", native_format);
                    NativeFormat::Unknown
                }),
                native_id_format: NativeIdFormat::from_repr(native_id_format).unwrap_or_else(|| {
                    warn!("unknown native id format {}", native_id_format);
                    NativeIdFormat::Unknown
                }),
            })
        } else {
            None
        };

        Ok(Self {
            provenance,
            precursor_begin: buf.get_i64_le(),
            product_begin: buf.get_i64_le(),
            metadata_begin: buf.get_i64_le(),
            version: buf.get_i32_le(),
        })
    }

    /// Check that the sections are ordered and end before `footer_start`.
    pub fn validate(&self, footer_start: u64) -> Result<(), FormatError> {
        let sections = [
            ("spectra", 0, self.precursor_begin),
            ("precursor chromatogram", self.precursor_begin, self.product_begin),
            ("product chromatogram", self.product_begin, self.metadata_begin),
            ("metadata", self.metadata_begin, footer_start as i64),
        ];

        for (section, begin, end) in sections {
            if begin < 0 || begin > end || end as u64 > footer_start {
                return Err(FormatError::SectionOutOfBounds { section, begin, end, limit: footer_start });
            }
        }

        let chromatograms = [
            ("precursor chromatogram", self.precursor_begin, self.product_begin),
            ("product chromatogram", self.product_begin, self.metadata_begin),
        ];
        for (section, begin, end) in chromatograms {
            let len = (end - begin) as u64;
            if len % CHROMATOGRAM_PEAK_SIZE as u64 != 0 {
                return Err(FormatError::MisalignedSection { section, len, record_size: CHROMATOGRAM_PEAK_SIZE });
            }
        }

        Ok(())
    }
}

/// Read and validate the footer of a file of `file_len` bytes.
///
/// The version id is read and checked before anything else; its features
/// decide the footer size.
pub fn read_footer<R: Read + Seek>(reader: &mut R, file_len: u64) -> Result<(FileFooter, FormatFeatures)> {
    let version_len = VERSION_ID_SIZE as u64;
    if file_len < version_len {
        return Err(FormatError::FileTooSmall { len: file_len, required: version_len }.into());
    }

    let mut raw = [0u8; VERSION_ID_SIZE];
    reader
        .seek(SeekFrom::Start(file_len - version_len))
        .and_then(|_| reader.read_exact(&mut raw))
        .map_err(|e| FormatError::UnreadableVersion(e.to_string()))?;
    let version = i32::from_le_bytes(raw);
    let features = FormatFeatures::for_version(version)?;

    let len = footer_len(&features) as u64;
    if file_len < len {
        return Err(FormatError::FileTooSmall { len: file_len, required: len }.into());
    }

    let footer_start = file_len - len;
    let mut raw = vec![0u8; len as usize];
    reader.seek(SeekFrom::Start(footer_start)).dot()?;
    reader.read_exact(&mut raw).dot()?;

    let footer = FileFooter::decode(&mut raw.as_slice(), &features)?;
    footer.validate(footer_start)?;

    debug!(
        "footer v{}: precursor @{}, product @{}, metadata @{}, footer @{}",
        version, footer.precursor_begin, footer.product_begin, footer.metadata_begin, footer_start
    );

    Ok((footer, features))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn footer(version: i32) -> FileFooter {
        FileFooter {
            provenance: Some(Provenance {
                checksum: "da39a3ee5e6b4b0d3255bfef95601890afd80709".to_string(),
                raw_path: "/data/raw/run01.raw".to_string(),
                native_format: NativeFormat::ThermoRaw,
                native_id_format: NativeIdFormat::Thermo,
            }),
            precursor_begin: 100,
            product_begin: 132,
            metadata_begin: 148,
            version,
        }
    }

    fn file_with(footer: &FileFooter, features: &FormatFeatures, body_len: usize) -> Vec<u8> {
        let mut raw = vec![0u8; body_len];
        raw.extend_from_slice(&footer.encode(features));
        raw
    }

    #[test]
    fn test_footer_sizes() {
        assert_eq!(footer_len(&FormatFeatures::current()), 276);
        assert_eq!(footer_len(&FormatFeatures::for_version(150605).unwrap()), 28);
    }

    #[test]
    fn test_read_current_footer() {
        let features = FormatFeatures::current();
        let expected = footer(CURRENT_FORMAT_VERSION);
        let raw = file_with(&expected, &features, 160);

        let (read, read_features) = read_footer(&mut Cursor::new(&raw), raw.len() as u64).unwrap();
        assert_eq!(read, expected);
        assert_eq!(read_features, features);
    }

    #[test]
    fn test_read_old_footer_has_no_provenance() {
        let features = FormatFeatures::for_version(150604).unwrap();
        let raw = file_with(&footer(150604), &features, 160);

        let (read, _) = read_footer(&mut Cursor::new(&raw), raw.len() as u64).unwrap();
        assert_eq!(read.provenance, None);
        assert_eq!(read.metadata_begin, 148);
    }

    #[test]
    fn test_too_small() {
        let err = read_footer(&mut Cursor::new(vec![1u8, 2]), 2).unwrap_err();
        assert_eq!(err.downcast_ref::<FormatError>(), Some(&FormatError::FileTooSmall { len: 2, required: 4 }));

        let raw = CURRENT_FORMAT_VERSION.to_le_bytes().to_vec();
        let err = read_footer(&mut Cursor::new(&raw), 4).unwrap_err();
        assert!(matches!(err.downcast_ref::<FormatError>(), Some(FormatError::FileTooSmall { required: 276, .. })));
    }

    #[test]
    fn test_sections_out_of_order() {
        let features = FormatFeatures::current();
        let mut bad = footer(CURRENT_FORMAT_VERSION);
        bad.product_begin = 90;
        let raw = file_with(&bad, &features, 160);

        let err = read_footer(&mut Cursor::new(&raw), raw.len() as u64).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FormatError>(),
            Some(FormatError::SectionOutOfBounds { section: "precursor chromatogram", .. })
        ));
    }

    #[test]
    fn test_section_past_footer() {
        let mut bad = footer(CURRENT_FORMAT_VERSION);
        bad.metadata_begin = 1000;
        assert!(matches!(bad.validate(160), Err(FormatError::SectionOutOfBounds { .. })));
    }

    #[test]
    fn test_misaligned_chromatogram() {
        let mut bad = footer(CURRENT_FORMAT_VERSION);
        bad.product_begin = 130;
        assert_eq!(
            bad.validate(160),
            Err(FormatError::MisalignedSection { section: "precursor chromatogram", len: 30, record_size: 16 })
        );
    }
}

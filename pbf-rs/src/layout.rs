//! File layout
//!
//! ```text
//! [spectrum records]                  spectra
//! [MS1 chromatogram peaks, sorted]    precursor chromatogram
//! [MSn chromatogram peaks, sorted]    product chromatogram
//! [metadata table]                    metadata
//! [footer]                            footer, version id in the last 4 bytes
//! ```
//!
//! [`FileLayout::load`] performs the whole open-time validation: version first,
//! then footer size, section bounds, chromatogram alignment and finally a full
//! read of the metadata table. Everything needed afterwards stays in memory;
//! queries only seek into the data sections.

use anyhow_ext::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;

use crate::error::FormatError;
use crate::footer::{read_footer, FileFooter};
use crate::format::FormatFeatures;
use crate::index::MzBucketIndex;
use crate::metadata::{decode_metadata, ScanTable};

/// Byte ranges of the sections of a file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionBounds {
    pub spectra: Range<u64>,
    pub precursor: Range<u64>,
    pub product: Range<u64>,
    pub metadata: Range<u64>,
    pub footer: Range<u64>,
}

impl SectionBounds {
    fn from_footer(footer: &FileFooter, file_len: u64, footer_len: u64) -> Self {
        let precursor_begin = footer.precursor_begin as u64;
        let product_begin = footer.product_begin as u64;
        let metadata_begin = footer.metadata_begin as u64;
        let footer_begin = file_len - footer_len;

        Self {
            spectra: 0..precursor_begin,
            precursor: precursor_begin..product_begin,
            product: product_begin..metadata_begin,
            metadata: metadata_begin..footer_begin,
            footer: footer_begin..file_len,
        }
    }
}

/// Everything learnt about a file while opening it
#[derive(Clone, Debug)]
pub struct FileLayout {
    pub footer: FileFooter,
    pub features: FormatFeatures,
    pub sections: SectionBounds,
    pub scans: ScanTable,
    pub precursor_index: MzBucketIndex,
}

impl FileLayout {
    pub fn load<R: Read + Seek>(reader: &mut R, file_len: u64) -> Result<Self> {
        let (footer, features) = read_footer(reader, file_len)?;
        let footer_len = crate::footer::footer_len(&features) as u64;
        let sections = SectionBounds::from_footer(&footer, file_len, footer_len);

        let metadata_len = (sections.metadata.end - sections.metadata.start) as usize;
        let mut raw = vec![0u8; metadata_len];
        reader.seek(SeekFrom::Start(sections.metadata.start)).dot()?;
        reader.read_exact(&mut raw).dot()?;

        let (scans, precursor_index) = decode_metadata(&mut raw.as_slice(), sections.precursor.end)?;

        if let Some(bad) = scans.iter().find(|m| m.spec_offset >= sections.spectra.end) {
            return Err(FormatError::SectionOutOfBounds {
                section: "spectrum record",
                begin: bad.spec_offset as i64,
                end: bad.spec_offset as i64,
                limit: sections.spectra.end,
            }
            .into());
        }
        if let Some(&bad) = precursor_index
            .offsets()
            .iter()
            .find(|&&offset| !sections.precursor.contains(&offset) && offset != sections.precursor.end)
        {
            return Err(FormatError::SectionOutOfBounds {
                section: "precursor index",
                begin: bad as i64,
                end: bad as i64,
                limit: sections.precursor.end,
            }
            .into());
        }

        debug!(
            "layout: scans {}..={} ({} present), {} index buckets, {} precursor / {} product bytes",
            scans.min_scan(),
            scans.max_scan(),
            scans.len(),
            precursor_index.len(),
            sections.precursor.end - sections.precursor.start,
            sections.product.end - sections.product.start,
        );

        Ok(Self { footer, features, sections, scans, precursor_index })
    }
}

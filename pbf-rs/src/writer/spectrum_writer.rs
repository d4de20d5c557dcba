//! Sequential spectrum record writer
//!
//! Appends encoded spectra to the spectra section and keeps what the later
//! build stages need: the metadata entry of every scan, the records holding
//! MS1 and MSn peaks, and the peak totals of both chromatogram sections.

use anyhow::{Context, Result};
use std::io::Write;

use crate::codec::encode_spectrum;
use crate::error::BuildError;
use crate::format::FormatFeatures;
use crate::metadata::ScanMetadata;
use crate::model::{Acquisition, Spectrum};
use crate::writer::chromatogram_builder::{ScanRun, SectionStats};

#[derive(Debug, Default)]
pub(crate) struct SpectrumWriter {
    /// Bytes written so far, i.e. the offset of the next record
    offset: u64,
    last_scan: Option<i32>,
    pub scans: Vec<ScanMetadata>,
    pub ms1_runs: Vec<ScanRun>,
    pub msn_runs: Vec<ScanRun>,
    pub ms1_stats: SectionStats,
    pub msn_stats: SectionStats,
}

impl SpectrumWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn spectrum_count(&self) -> usize {
        self.scans.len()
    }

    /// Encode `spectrum` after the previous one.
    ///
    /// Peaks are stable-sorted by m/z first. Scans must arrive in strictly
    /// ascending order.
    pub fn write<W: Write>(&mut self, out: &mut W, mut spectrum: Spectrum, features: &FormatFeatures) -> Result<()> {
        let scan_num = spectrum.scan_num();
        if let Some(previous) = self.last_scan {
            if scan_num <= previous {
                return Err(BuildError::ScanOrder { previous, found: scan_num }.into());
            }
        }
        if !spectrum.is_sorted() {
            spectrum.sort_peaks();
        }

        let record = encode_spectrum(&spectrum, features)?;
        out.write_all(&record)
            .with_context(|| format!("can't write spectrum {}", scan_num))?;

        let ms_level = spectrum.ms_level();
        let spec_offset = self.offset;
        self.offset += record.len() as u64;
        self.last_scan = Some(scan_num);

        self.scans.push(ScanMetadata {
            scan_num,
            ms_level,
            elution_time: spectrum.header.elution_time,
            isolation: match &spectrum.header.acquisition {
                Acquisition::Product { ms_level: 2, precursor } => Some(precursor.isolation.mz_range()),
                _ => None,
            },
            spec_offset,
        });

        if spectrum.peaks.is_empty() {
            return Ok(());
        }

        let run = ScanRun { scan_num, ms_level, spec_offset };
        let (runs, stats) = if ms_level == 1 {
            (&mut self.ms1_runs, &mut self.ms1_stats)
        } else {
            (&mut self.msn_runs, &mut self.msn_stats)
        };
        runs.push(run);
        spectrum.peaks.iter().for_each(|p| stats.add(p.mz));

        Ok(())
    }
}

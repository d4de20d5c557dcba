//! PBF Writer Module
//!
//! Creates PBF files from a stream of spectra. Writing happens in two phases:
//!
//! - **Spectra**: every inserted spectrum is encoded and appended to the file
//!   right away; only its metadata entry stays in memory
//! - **Sealing**: on [`PbfWriter::close`] the precursor (MS1) and product (MSn)
//!   chromatograms are built from the spectra already on disk under a memory
//!   budget, followed by the metadata table and the footer
//!
//! A failed or cancelled close removes the partial file.
//!
//! # Example
//!
//! ```no_run
//! use pbf::writer::{MemoryBudget, PbfWriterBuilder};
//! use pbf::{Peak, Spectrum};
//!
//! let mut writer = PbfWriterBuilder::new("output.pbf")
//!     .memory_budget(MemoryBudget::Bytes(512 << 20))
//!     .build()?;
//!
//! writer.insert_spectrum(Spectrum::survey(1, 0.05, vec![Peak::new(445.12, 1.5e5)]))?;
//! writer.insert_spectrum(Spectrum::survey(2, 0.10, vec![Peak::new(445.12, 1.7e5)]))?;
//!
//! let run = writer.close()?;
//! let reader = run.open()?;
//! println!("{} spectra", reader.spectrum_count());
//! # Ok::<(), anyhow::Error>(())
//! ```

mod chromatogram_builder;
mod memory;
mod progress;
mod spectrum_writer;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};

use crate::footer::{FileFooter, Provenance};
use crate::format::{FormatFeatures, CHROMATOGRAM_PEAK_SIZE, CURRENT_FORMAT_VERSION};
use crate::metadata::{encode_metadata, ScanTable};
use crate::model::Spectrum;
use crate::source::SpectrumSource;
use crate::PbfReader;

use chromatogram_builder::{BuiltSection, ChromatogramBuilder};
use progress::check_cancelled;
use spectrum_writer::SpectrumWriter;

pub use memory::{
    probe_system_memory, reserve_for, MemoryBudget, SystemMemory, MAX_BUFFERED_PEAKS, MIN_PEAKS_PER_SCAN,
};
pub use progress::{BuildProgress, BuildStage, CancellationToken, NoProgress};

/// A finished, readable PBF file
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SealedRun {
    pub path: PathBuf,
    pub format_version: i32,
    pub spectrum_count: usize,
    pub precursor_peaks: u64,
    pub product_peaks: u64,
    pub file_len: u64,
}

impl SealedRun {
    pub fn open(&self) -> Result<PbfReader> {
        PbfReader::open(&self.path)
    }
}

/// Writer of one PBF file
///
/// Spectra must be inserted in strictly ascending scan order.
pub struct PbfWriter {
    path: PathBuf,
    out: BufWriter<File>,
    version: i32,
    features: FormatFeatures,
    provenance: Provenance,
    memory_budget: MemoryBudget,
    spectra: SpectrumWriter,
}

impl PbfWriter {
    fn create(path: PathBuf, version: i32, provenance: Provenance, memory_budget: MemoryBudget) -> Result<Self> {
        let features = FormatFeatures::for_version(version)?;
        let file = File::create(&path).with_context(|| format!("can't create {}", path.display()))?;
        debug!("writing {} as version {}", path.display(), version);

        Ok(Self {
            path,
            out: BufWriter::new(file),
            version,
            features,
            provenance,
            memory_budget,
            spectra: SpectrumWriter::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of spectra inserted so far
    pub fn spectrum_count(&self) -> usize {
        self.spectra.spectrum_count()
    }

    /// Append a spectrum to the file.
    ///
    /// Its peaks are sorted by m/z (stable) before encoding. A spectrum whose
    /// scan number doesn't exceed the previous one is rejected with
    /// [`BuildError::ScanOrder`](crate::error::BuildError) and nothing is
    /// written.
    pub fn insert_spectrum(&mut self, spectrum: Spectrum) -> Result<()> {
        self.spectra.write(&mut self.out, spectrum, &self.features)
    }

    /// Build the chromatograms, write the metadata table and the footer.
    pub fn close(self) -> Result<SealedRun> {
        self.close_with_progress(&mut NoProgress)
    }

    /// Like [`close`](Self::close), reporting to and honouring cancellation
    /// of `progress`.
    pub fn close_with_progress(self, progress: &mut dyn BuildProgress) -> Result<SealedRun> {
        let path = self.path.clone();
        self.seal(progress).inspect_err(|_| remove_partial(&path))
    }

    fn seal(mut self, progress: &mut dyn BuildProgress) -> Result<SealedRun> {
        self.out.flush().with_context(|| format!("can't flush {}", self.path.display()))?;
        check_cancelled(&*progress)?;

        let mut reader = BufReader::new(
            File::open(&self.path).with_context(|| format!("can't reopen {}", self.path.display()))?,
        );
        let quota = self.memory_budget.resolve();
        debug!("chromatogram quota: {:?}", quota);

        let precursor_begin = self.spectra.offset();
        let precursor = ChromatogramBuilder::new(
            &mut reader,
            &mut self.out,
            precursor_begin,
            self.features,
            quota,
            true,
            BuildStage::PrecursorChromatogram,
            progress,
        )
        .build(mem::take(&mut self.spectra.ms1_runs), self.spectra.ms1_stats)?;
        check_cancelled(&*progress)?;

        let product_begin = section_end(precursor_begin, &precursor);
        let product = ChromatogramBuilder::new(
            &mut reader,
            &mut self.out,
            product_begin,
            self.features,
            quota,
            false,
            BuildStage::ProductChromatogram,
            progress,
        )
        .build(mem::take(&mut self.spectra.msn_runs), self.spectra.msn_stats)?;
        check_cancelled(&*progress)?;

        let metadata_begin = section_end(product_begin, &product);
        let spectrum_count = self.spectra.spectrum_count();
        let scans = ScanTable::from_entries(mem::take(&mut self.spectra.scans));
        let metadata = encode_metadata(&scans, &precursor.index);
        self.out.write_all(&metadata).context("can't write metadata table")?;
        progress.report(BuildStage::Metadata, 1, 1);

        let footer = FileFooter {
            provenance: self.features.provenance.then(|| self.provenance.clone()),
            precursor_begin: precursor_begin as i64,
            product_begin: product_begin as i64,
            metadata_begin: metadata_begin as i64,
            version: self.version,
        };
        let footer = footer.encode(&self.features);
        self.out.write_all(&footer).context("can't write footer")?;
        self.out.flush().with_context(|| format!("can't flush {}", self.path.display()))?;

        let run = SealedRun {
            path: self.path,
            format_version: self.version,
            spectrum_count,
            precursor_peaks: precursor.peak_count,
            product_peaks: product.peak_count,
            file_len: metadata_begin + (metadata.len() + footer.len()) as u64,
        };
        info!(
            "sealed {}: {} spectra, {} MS1 / {} MSn chromatogram peaks, {} bytes",
            run.path.display(),
            run.spectrum_count,
            run.precursor_peaks,
            run.product_peaks,
            run.file_len
        );

        Ok(run)
    }
}

fn section_end(begin: u64, section: &BuiltSection) -> u64 {
    begin + section.peak_count * CHROMATOGRAM_PEAK_SIZE as u64
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("removed partial file {}", path.display()),
        Err(e) => warn!("can't remove partial file {}: {}", path.display(), e),
    }
}

/// Builder pattern for PbfWriter
#[derive(Clone, Debug)]
pub struct PbfWriterBuilder {
    path: PathBuf,
    provenance: Option<Provenance>,
    memory_budget: MemoryBudget,
    format_version: i32,
}

impl PbfWriterBuilder {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            provenance: None,
            memory_budget: MemoryBudget::default(),
            format_version: CURRENT_FORMAT_VERSION,
        }
    }

    /// Origin of the run, stored in the footer of provenance-carrying versions
    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    pub fn memory_budget(mut self, memory_budget: MemoryBudget) -> Self {
        self.memory_budget = memory_budget;
        self
    }

    /// Write an older layout, any version id of the supported range
    pub fn format_version(mut self, version: i32) -> Self {
        self.format_version = version;
        self
    }

    /// Create the file and return a writer for it
    pub fn build(self) -> Result<PbfWriter> {
        PbfWriter::create(self.path, self.format_version, self.provenance.unwrap_or_default(), self.memory_budget)
    }

    /// Write every spectrum of `source` and seal the file.
    ///
    /// The source's provenance is used unless one was set on the builder.
    pub fn write_source(mut self, source: &mut impl SpectrumSource, progress: &mut dyn BuildProgress) -> Result<SealedRun> {
        if self.provenance.is_none() {
            self.provenance = Some(source.provenance());
        }
        let total = source.spectrum_count() as u64;
        info!("converting {} spectra into {}", total, self.path.display());

        let mut writer = self.build()?;
        let inserted = fill(&mut writer, source, total, progress);
        if let Err(e) = inserted {
            let path = writer.path.clone();
            drop(writer);
            remove_partial(&path);
            return Err(e);
        }

        writer.close_with_progress(progress)
    }
}

fn fill(
    writer: &mut PbfWriter,
    source: &mut impl SpectrumSource,
    total: u64,
    progress: &mut dyn BuildProgress,
) -> Result<()> {
    let mut done = 0;
    while let Some(spectrum) = source.next_spectrum()? {
        check_cancelled(&*progress)?;
        writer.insert_spectrum(spectrum)?;
        done += 1;
        progress.report(BuildStage::Spectra, done, total.max(done));
    }
    Ok(())
}

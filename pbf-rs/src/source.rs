//! Spectrum sources
//!
//! A [`SpectrumSource`] hands spectra to the writer one at a time, in
//! ascending scan order. Vendor readers live outside this crate and plug in
//! through this trait; [`VecSource`] serves an in-memory list.
//!
//! # Example
//!
//! ```no_run
//! use pbf::source::VecSource;
//! use pbf::writer::{NoProgress, PbfWriterBuilder};
//! use pbf::{Peak, Spectrum};
//!
//! let mut source = VecSource::new(vec![
//!     Spectrum::survey(1, 0.1, vec![Peak::new(400.0, 1e4)]),
//!     Spectrum::survey(2, 0.2, vec![Peak::new(400.01, 2e4)]),
//! ]);
//! let run = PbfWriterBuilder::new("run.pbf").write_source(&mut source, &mut NoProgress)?;
//! println!("{} spectra written", run.spectrum_count);
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::Result;

use crate::footer::Provenance;
use crate::model::Spectrum;

pub trait SpectrumSource {
    /// Origin of the spectra, stored in the footer
    fn provenance(&self) -> Provenance {
        Provenance::default()
    }

    /// Number of spectra the source expects to produce.
    ///
    /// Only used for progress reporting.
    fn spectrum_count(&self) -> usize;

    /// Next spectrum, `None` once the source is exhausted.
    fn next_spectrum(&mut self) -> Result<Option<Spectrum>>;
}

/// Source over spectra held in memory
#[derive(Clone, Debug)]
pub struct VecSource {
    provenance: Provenance,
    count: usize,
    spectra: std::vec::IntoIter<Spectrum>,
}

impl VecSource {
    pub fn new(spectra: Vec<Spectrum>) -> Self {
        Self { provenance: Provenance::default(), count: spectra.len(), spectra: spectra.into_iter() }
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }
}

impl SpectrumSource for VecSource {
    fn provenance(&self) -> Provenance {
        self.provenance.clone()
    }

    fn spectrum_count(&self) -> usize {
        self.count
    }

    fn next_spectrum(&mut self) -> Result<Option<Spectrum>> {
        Ok(self.spectra.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Peak;

    #[test]
    fn test_vec_source() {
        let provenance = Provenance { raw_path: "a.raw".to_string(), ..Default::default() };
        let mut source = VecSource::new(vec![
            Spectrum::survey(1, 0.0, vec![Peak::new(100.0, 1.0)]),
            Spectrum::survey(2, 0.1, vec![]),
        ])
        .with_provenance(provenance.clone());

        assert_eq!(source.spectrum_count(), 2);
        assert_eq!(source.provenance(), provenance);
        assert_eq!(source.next_spectrum().unwrap().map(|s| s.scan_num()), Some(1));
        assert_eq!(source.next_spectrum().unwrap().map(|s| s.scan_num()), Some(2));
        assert!(source.next_spectrum().unwrap().is_none());
        // declared count doesn't shrink
        assert_eq!(source.spectrum_count(), 2);
    }
}

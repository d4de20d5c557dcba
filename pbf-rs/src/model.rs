use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ============================================================================
// Enumerations stored as tags
// ============================================================================

/// Fragmentation method of a product spectrum (stored as one byte)
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
    strum_macros::Display, strum_macros::FromRepr,
)]
#[repr(u8)]
pub enum ActivationMethod {
    CID = 0,
    MPD = 1,
    ECD = 2,
    PQD = 3,
    ETD = 4,
    HCD = 5,
    Any = 6,
    #[default]
    Unknown = 7,
    ETciD = 8,
    EThcD = 9,
    UVPD = 10,
}

/// Instrument file format the run was converted from (stored as i32)
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
    strum_macros::Display, strum_macros::FromRepr,
)]
#[repr(i32)]
pub enum NativeFormat {
    #[default]
    Unknown = 0,
    ThermoRaw = 1,
    WatersRaw = 2,
    SciexWiff = 3,
    BrukerTdf = 4,
    AgilentD = 5,
    MzML = 6,
    MzXML = 7,
    Mgf = 8,
}

/// Shape of the native spectrum identifiers of the source (stored as i32)
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
    strum_macros::Display, strum_macros::FromRepr,
)]
#[repr(i32)]
pub enum NativeIdFormat {
    #[default]
    Unknown = 0,
    /// controllerType=0 controllerNumber=1 scan=N
    Thermo = 1,
    /// function=F process=P scan=N
    Waters = 2,
    /// sample=S period=P cycle=C experiment=E
    Wiff = 3,
    /// frame=F scan=N
    Bruker = 4,
    /// scan=N
    ScanNumber = 5,
    /// index=N
    SpectrumIndex = 6,
    /// spectrum=N
    SpectrumIdentifier = 7,
}

// ============================================================================
// Peaks and m/z windows
// ============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub mz: f64,
    pub intensity: f32,
}

impl Peak {
    pub fn new(mz: f64, intensity: f32) -> Self {
        Self { mz, intensity }
    }
}

/// A closed m/z interval
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MzRange {
    pub min_mz: f64,
    pub max_mz: f64,
}

impl MzRange {
    pub fn new(min_mz: f64, max_mz: f64) -> Self {
        Self { min_mz, max_mz }
    }

    pub fn contains(&self, mz: f64) -> bool {
        mz >= self.min_mz && mz <= self.max_mz
    }
}

/// m/z tolerance used to turn a target m/z into a window
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Tolerance {
    Ppm(f64),
    Mz(f64),
}

impl Tolerance {
    /// Half-width of the window around `mz`
    pub fn to_mz(&self, mz: f64) -> f64 {
        match *self {
            Tolerance::Ppm(ppm) => mz * ppm / 1_000_000.0,
            Tolerance::Mz(delta) => delta,
        }
    }

    pub fn window(&self, mz: f64) -> MzRange {
        let delta = self.to_mz(mz);
        MzRange::new(mz - delta, mz + delta)
    }
}

// ============================================================================
// Precursor information
// ============================================================================

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IsolationWindow {
    pub target_mz: f64,
    pub lower_offset: f64,
    pub upper_offset: f64,
}

impl IsolationWindow {
    pub fn new(target_mz: f64, lower_offset: f64, upper_offset: f64) -> Self {
        Self { target_mz, lower_offset, upper_offset }
    }

    pub fn min_mz(&self) -> f64 {
        self.target_mz - self.lower_offset
    }

    pub fn max_mz(&self) -> f64 {
        self.target_mz + self.upper_offset
    }

    pub fn contains(&self, mz: f64) -> bool {
        mz >= self.min_mz() && mz <= self.max_mz()
    }

    pub fn mz_range(&self) -> MzRange {
        MzRange::new(self.min_mz(), self.max_mz())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PrecursorInfo {
    /// Selected ion m/z (stored as 0 when unknown)
    pub precursor_mz: Option<f64>,
    /// Selected ion charge (stored as 0 when unknown)
    pub charge: Option<i32>,
    pub activation: ActivationMethod,
    pub isolation: IsolationWindow,
}

/// What kind of scan produced a spectrum.
///
/// The MS level is carried by the variant so a survey scan can never hold
/// precursor fields and a product scan can never lack them. Product scans need
/// MS level 2 or above; the codec refuses to encode lower levels.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Acquisition {
    /// MS1 scan
    Survey,
    /// MSn scan, n > 1
    Product { ms_level: u8, precursor: PrecursorInfo },
}

impl Acquisition {
    pub fn ms_level(&self) -> u8 {
        match self {
            Acquisition::Survey => 1,
            Acquisition::Product { ms_level, .. } => *ms_level,
        }
    }

    pub fn precursor(&self) -> Option<&PrecursorInfo> {
        match self {
            Acquisition::Survey => None,
            Acquisition::Product { precursor, .. } => Some(precursor),
        }
    }
}

// ============================================================================
// Spectra
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectrumHeader {
    pub scan_num: i32,
    pub native_id: String,
    /// Elution time in minutes
    pub elution_time: f64,
    pub total_ion_current: f32,
    pub acquisition: Acquisition,
}

impl SpectrumHeader {
    pub fn ms_level(&self) -> u8 {
        self.acquisition.ms_level()
    }

    pub fn isolation_window(&self) -> Option<IsolationWindow> {
        self.acquisition.precursor().map(|p| p.isolation)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Spectrum {
    pub header: SpectrumHeader,
    pub peaks: Vec<Peak>,
}

impl Spectrum {
    /// MS1 spectrum; the total ion current is computed from the peaks
    pub fn survey(scan_num: i32, elution_time: f64, peaks: Vec<Peak>) -> Self {
        Self::new(scan_num, elution_time, Acquisition::Survey, peaks)
    }

    /// MSn spectrum; the total ion current is computed from the peaks
    pub fn product(
        scan_num: i32,
        ms_level: u8,
        elution_time: f64,
        precursor: PrecursorInfo,
        peaks: Vec<Peak>,
    ) -> Self {
        Self::new(scan_num, elution_time, Acquisition::Product { ms_level, precursor }, peaks)
    }

    fn new(scan_num: i32, elution_time: f64, acquisition: Acquisition, peaks: Vec<Peak>) -> Self {
        let mut spectrum = Spectrum {
            header: SpectrumHeader {
                scan_num,
                native_id: format!("scan={}", scan_num),
                elution_time,
                total_ion_current: 0.0,
                acquisition,
            },
            peaks,
        };
        spectrum.header.total_ion_current = spectrum.summed_intensity();
        spectrum
    }

    pub fn with_native_id(mut self, native_id: impl Into<String>) -> Self {
        self.header.native_id = native_id.into();
        self
    }

    pub fn scan_num(&self) -> i32 {
        self.header.scan_num
    }

    pub fn ms_level(&self) -> u8 {
        self.header.ms_level()
    }

    /// Stable sort by m/z, equal m/z keep their original order
    pub fn sort_peaks(&mut self) {
        self.peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));
    }

    pub fn is_sorted(&self) -> bool {
        self.peaks.windows(2).all(|w| w[0].mz <= w[1].mz)
    }

    pub fn summed_intensity(&self) -> f32 {
        self.peaks.iter().map(|p| p.intensity as f64).sum::<f64>() as f32
    }

    /// Most intense peak
    pub fn base_peak(&self) -> Option<Peak> {
        self.peaks
            .iter()
            .copied()
            .max_by(|a, b| a.intensity.partial_cmp(&b.intensity).unwrap_or(Ordering::Equal))
    }

    /// Peak nearest to `mz` within `tolerance`; peaks must be sorted
    pub fn find_peak(&self, mz: f64, tolerance: Tolerance) -> Option<Peak> {
        if self.peaks.is_empty() {
            return None;
        }

        let mz_da = tolerance.to_mz(mz);
        let idx = self.peaks.partition_point(|p| p.mz < mz);

        let candidates = [idx.checked_sub(1), Some(idx)];
        candidates
            .into_iter()
            .flatten()
            .filter_map(|i| self.peaks.get(i))
            .filter(|p| (p.mz - mz).abs() <= mz_da)
            .min_by(|a, b| (a.mz - mz).abs().total_cmp(&(b.mz - mz).abs()))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peaks(values: &[(f64, f32)]) -> Vec<Peak> {
        values.iter().map(|&(mz, i)| Peak::new(mz, i)).collect()
    }

    #[test]
    fn test_sort_peaks_is_stable() {
        let mut s = Spectrum::survey(1, 0.5, peaks(&[(200.0, 1.0), (100.0, 2.0), (200.0, 3.0), (150.0, 4.0)]));
        s.sort_peaks();

        assert!(s.is_sorted());
        assert_eq!(s.peaks, peaks(&[(100.0, 2.0), (150.0, 4.0), (200.0, 1.0), (200.0, 3.0)]));
    }

    #[test]
    fn test_find_peak() {
        let s = Spectrum::survey(1, 0.5, peaks(&[(100.0, 1.0), (100.5, 2.0), (101.0, 3.0)]));

        assert_eq!(s.find_peak(100.4, Tolerance::Mz(0.2)), Some(Peak::new(100.5, 2.0)));
        assert_eq!(s.find_peak(100.2, Tolerance::Mz(0.1)), None);
        assert_eq!(s.find_peak(99.0, Tolerance::Mz(0.5)), None);
        assert_eq!(s.find_peak(101.0005, Tolerance::Ppm(10.0)), Some(Peak::new(101.0, 3.0)));
    }

    #[test]
    fn test_constructors() {
        let precursor = PrecursorInfo {
            precursor_mz: Some(500.0),
            charge: Some(2),
            activation: ActivationMethod::HCD,
            isolation: IsolationWindow::new(500.0, 1.0, 1.5),
        };
        let s = Spectrum::product(7, 2, 1.0, precursor, peaks(&[(100.0, 1.5), (200.0, 2.5)]));

        assert_eq!(s.ms_level(), 2);
        assert_eq!(s.header.native_id, "scan=7");
        assert_eq!(s.header.total_ion_current, 4.0);
        assert_eq!(s.header.isolation_window().unwrap().mz_range(), MzRange::new(499.0, 501.5));
        assert_eq!(s.base_peak(), Some(Peak::new(200.0, 2.5)));
        assert_eq!(Spectrum::survey(1, 0.0, vec![]).ms_level(), 1);
    }

    #[test]
    fn test_enum_tags() {
        assert_eq!(ActivationMethod::from_repr(5), Some(ActivationMethod::HCD));
        assert_eq!(ActivationMethod::from_repr(200), None);
        assert_eq!(NativeIdFormat::from_repr(1), Some(NativeIdFormat::Thermo));
        assert_eq!(NativeFormat::ThermoRaw.to_string(), "ThermoRaw");
    }

    #[test]
    fn test_tolerance_window() {
        let w = Tolerance::Ppm(10.0).window(1000.0);
        assert!((w.min_mz - 999.99).abs() < 1e-9);
        assert!((w.max_mz - 1000.01).abs() < 1e-9);
        assert!(Tolerance::Mz(0.5).window(100.0).contains(100.5));
    }
}

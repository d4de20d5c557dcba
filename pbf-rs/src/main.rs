use anyhow::Result;
use log::info;
use serde_json::json;
use std::path::{Path, PathBuf};

use pbf::model::{IsolationWindow, Peak, PrecursorInfo, Spectrum, Tolerance};
use pbf::writer::PbfWriterBuilder;
use pbf::PbfReader;

/// Small synthetic run: one MS1 scan followed by two MS2 scans, 30 cycles
fn write_demo_run(path: &Path) -> Result<()> {
    let mut writer = PbfWriterBuilder::new(path).build()?;

    for cycle in 0..30 {
        let scan = cycle * 3 + 1;
        let rt = cycle as f64 * 0.05;
        let apex = (-(cycle as f64 - 15.0).powi(2) / 20.0).exp() as f32;
        let ms1 = vec![Peak::new(445.1200, 1e6 * apex), Peak::new(524.2648, 5e5), Peak::new(652.3330, 2e5 * apex)];
        writer.insert_spectrum(Spectrum::survey(scan, rt, ms1))?;

        for (i, target) in [524.26, 652.33].into_iter().enumerate() {
            let precursor = PrecursorInfo {
                precursor_mz: Some(target),
                charge: Some(2),
                isolation: IsolationWindow::new(target, 1.0, 1.0),
                ..Default::default()
            };
            let fragments = vec![Peak::new(175.119, 1e4), Peak::new(target - 100.0, 3e4 * apex)];
            writer.insert_spectrum(Spectrum::product(scan + 1 + i as i32, 2, rt + 0.01, precursor, fragments))?;
        }
    }

    let run = writer.close()?;
    info!("demo run written: {}", serde_json::to_string(&run)?);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let path = std::env::temp_dir().join("pbf_sandbox_demo.pbf");
            write_demo_run(&path)?;
            path
        }
    };

    let reader = PbfReader::open(&path)?;

    let mut ms_levels = [0usize; 3];
    reader.for_each_spectrum(None, false, |s| {
        ms_levels[(s.ms_level() as usize).min(2)] += 1;
        Ok(())
    })?;

    let base_peak = reader
        .get_spectrum(reader.min_scan_num(), true)?
        .and_then(|s| s.base_peak());
    let xic = match base_peak {
        Some(peak) => reader.get_precursor_xic(peak.mz, Tolerance::Ppm(10.0)),
        None => Default::default(),
    };

    let summary = json!({
        "path": reader.path(),
        "format_version": reader.format_version(),
        "provenance": reader.provenance(),
        "scans": [reader.min_scan_num(), reader.max_scan_num()],
        "spectra": reader.spectrum_count(),
        "ms1_spectra": ms_levels[1],
        "msn_spectra": ms_levels[2],
        "sections": reader.section_bounds(),
        "index_buckets": reader.precursor_index().len(),
        "base_peak": base_peak.map(|p| json!({ "mz": p.mz, "intensity": p.intensity })),
        "base_peak_xic_scans": xic.len(),
        "base_peak_xic_apex": xic.max_intensity_peak(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

//! Benchmarks for pbf-rs
//!
//! Run with: cargo bench -p pbf-rs

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fallible_iterator::FallibleIterator;
use pbf::codec::{decode_spectrum, encode_spectrum};
use pbf::format::FormatFeatures;
use pbf::model::{Peak, Spectrum, Tolerance};
use pbf::writer::{MemoryBudget, PbfWriterBuilder};
use pbf::PbfReader;
use std::path::Path;
use tempfile::TempDir;

const SCANS: i32 = 500;
const PEAKS_PER_SCAN: usize = 2_000;

fn synthetic_spectrum(scan: i32) -> Spectrum {
    let peaks = (0..PEAKS_PER_SCAN)
        .map(|i| {
            let mz = 300.0 + i as f64 * 0.7 + ((scan as u64 * 2654435761 + i as u64) % 1000) as f64 * 1e-4;
            Peak::new(mz, ((scan as usize * 31 + i * 17) % 10_000) as f32)
        })
        .collect();
    Spectrum::survey(scan, scan as f64 * 0.01, peaks)
}

fn write_synthetic_run(path: &Path, budget: MemoryBudget) {
    let mut writer = PbfWriterBuilder::new(path).memory_budget(budget).build().unwrap();
    for scan in 1..=SCANS {
        writer.insert_spectrum(synthetic_spectrum(scan)).unwrap();
    }
    writer.close().unwrap();
}

/// Temporary file holding the synthetic run
fn test_file() -> (TempDir, PbfReader) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.pbf");
    write_synthetic_run(&path, MemoryBudget::Auto);
    let reader = PbfReader::open(&path).unwrap();
    (dir, reader)
}

fn bench_codec(c: &mut Criterion) {
    let features = FormatFeatures::current();
    let spectrum = synthetic_spectrum(1);
    let encoded = encode_spectrum(&spectrum, &features).unwrap();

    c.bench_function("encode_spectrum", |b| {
        b.iter(|| encode_spectrum(black_box(&spectrum), &features).unwrap());
    });

    c.bench_function("decode_spectrum", |b| {
        b.iter(|| decode_spectrum(&mut black_box(&encoded[..]), &features, true).unwrap());
    });
}

fn bench_get_spectrum(c: &mut Criterion) {
    let (_dir, reader) = test_file();

    let mut group = c.benchmark_group("get_spectrum");
    for include_peaks in [false, true] {
        group.bench_with_input(BenchmarkId::from_parameter(include_peaks), &include_peaks, |b, &include_peaks| {
            let mut scan = 0;
            b.iter(|| {
                scan = scan % SCANS + 1;
                reader.get_spectrum(black_box(scan), include_peaks).unwrap()
            });
        });
    }
    group.finish();
}

fn bench_xic(c: &mut Criterion) {
    let (_dir, reader) = test_file();

    let mut group = c.benchmark_group("get_xic");
    for width in [0.01, 0.1, 5.0] {
        group.bench_with_input(BenchmarkId::new("moving_window", width), &width, |b, &width| {
            let mut i = 0;
            b.iter(|| {
                // jump around so most queries miss the cache
                i = (i + 7919) % 1000;
                let min_mz = 300.0 + i as f64 * 1.3;
                reader.get_xic(black_box(min_mz), min_mz + width)
            });
        });
    }
    group.bench_function("cached_window", |b| {
        reader.get_xic(650.0, 651.0);
        b.iter(|| reader.get_xic(black_box(650.2), 650.3));
    });
    group.bench_function("precursor_xic_10ppm", |b| {
        b.iter(|| reader.get_precursor_xic(black_box(580.0), Tolerance::Ppm(10.0)));
    });
    group.finish();
}

fn bench_iterate_all_spectra(c: &mut Criterion) {
    let (_dir, reader) = test_file();

    c.bench_function("iterate_all_spectra", |b| {
        b.iter(|| {
            let count = reader.iter_spectra(None, true).count().unwrap();
            assert_eq!(count, SCANS as usize);
        });
    });
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    group.sample_size(10);
    for (name, budget) in [("unbounded", MemoryBudget::PeaksPerScan(usize::MAX)), ("quota_5", MemoryBudget::PeaksPerScan(5))] {
        group.bench_function(name, |b| {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("build.pbf");
            b.iter(|| write_synthetic_run(&path, budget));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_codec,
    bench_get_spectrum,
    bench_xic,
    bench_iterate_all_spectra,
    bench_build,
);
criterion_main!(benches);

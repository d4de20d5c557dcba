//! Bounded-memory chromatogram builder
//!
//! Turns the per-scan peak lists already written to the spectra section into
//! one chromatogram section sorted by `(mz, scan_num)`, without ever holding
//! more than a per-scan quota of every scan's peaks in memory.
//!
//! The m/z range of the section is split into `ceil(total / 1M) + 2` equal
//! partitions. Peaks are loaded scan by scan into their partition, a min-heap
//! ordered by `(mz, scan_num, position in scan)`, and partitions are emitted in
//! m/z order. Every scan that still has peaks on disk
//! sits in a min-heap (the frontier) keyed by the `(mz, scan_num)` of the last
//! peak loaded from it: since a scan's peaks are sorted, nothing it has yet to
//! load can sort below that key, so any buffered peak not above the frontier
//! minimum is safe to write. When a scan's buffered peaks are all written it is
//! refilled from disk. The output is identical whatever the quota.
//!
//! While emitting, the offset of the first record of every 1.0-m/z index bucket
//! is recorded to produce the [`MzBucketIndex`].

use anyhow::{Context, Result};
use bytes::BytesMut;
use log::{debug, trace};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::mem::size_of;

use crate::chromatogram::ChromatogramPeak;
use crate::codec::{read_peak_count, read_peaks};
use crate::error::BuildError;
use crate::format::{mz_bucket, FormatFeatures, CHROMATOGRAM_PEAK_SIZE, SPECTRUM_PEAK_SIZE};
use crate::index::MzBucketIndex;
use crate::writer::memory::Quota;
use crate::writer::progress::{check_cancelled, BuildProgress, BuildStage};

/// Peaks per partition the partition count is derived from.
const PEAKS_PER_PARTITION: u64 = 1_000_000;

/// Bytes gathered before writing to the output.
const OUTPUT_CHUNK: usize = 1 << 16;

/// A spectrum record whose peaks go into the section
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ScanRun {
    pub scan_num: i32,
    pub ms_level: u8,
    pub spec_offset: u64,
}

/// Totals of the peaks going into one section
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct SectionStats {
    pub total_peaks: u64,
    pub min_mz: f64,
    pub max_mz: f64,
}

impl Default for SectionStats {
    fn default() -> Self {
        Self { total_peaks: 0, min_mz: f64::INFINITY, max_mz: f64::NEG_INFINITY }
    }
}

impl SectionStats {
    pub fn add(&mut self, mz: f64) {
        self.total_peaks += 1;
        self.min_mz = self.min_mz.min(mz);
        self.max_mz = self.max_mz.max(mz);
    }
}

#[derive(Copy, Clone, Debug)]
struct BufferedPeak {
    mz: f64,
    intensity: f32,
    scan_num: i32,
    /// Position of the scan in the run list
    slot: u32,
    /// Position of the peak in its scan, keeps equal `(mz, scan_num)` in file order
    seq: u32,
}

impl PartialEq for BufferedPeak {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BufferedPeak {}

impl PartialOrd for BufferedPeak {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BufferedPeak {
    fn cmp(&self, other: &Self) -> Ordering {
        self.mz
            .total_cmp(&other.mz)
            .then(self.scan_num.cmp(&other.scan_num))
            .then(self.seq.cmp(&other.seq))
    }
}

#[derive(Clone, Debug)]
struct ScanState {
    /// Peaks still on disk
    remaining: usize,
    /// Offset of the first peak still on disk
    next_offset: u64,
    /// Peaks loaded so far
    loaded: u32,
    /// Peaks loaded and not yet written
    in_memory: usize,
    /// Bumped on every load, invalidates older frontier entries
    generation: u32,
}

/// Frontier entry: `(mz, scan_num)` of the last peak loaded from a scan
#[derive(Copy, Clone, Debug)]
struct FrontierKey {
    mz: f64,
    scan_num: i32,
    slot: u32,
    generation: u32,
}

impl FrontierKey {
    fn cmp_peak(&self, peak: &BufferedPeak) -> Ordering {
        peak.mz.total_cmp(&self.mz).then(peak.scan_num.cmp(&self.scan_num))
    }
}

impl PartialEq for FrontierKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontierKey {}

impl PartialOrd for FrontierKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.mz
            .total_cmp(&other.mz)
            .then(self.scan_num.cmp(&other.scan_num))
            .then(self.generation.cmp(&other.generation))
    }
}

type Partition = BinaryHeap<Reverse<BufferedPeak>>;

/// Result of building one section
#[derive(Clone, Debug)]
pub(crate) struct BuiltSection {
    pub peak_count: u64,
    pub index: MzBucketIndex,
    /// Most peaks held in memory at once
    pub max_buffered: usize,
}

pub(crate) struct ChromatogramBuilder<'a, R, W> {
    reader: &'a mut R,
    out: &'a mut W,
    out_begin: u64,
    features: FormatFeatures,
    quota: Quota,
    with_index: bool,
    stage: BuildStage,
    progress: &'a mut dyn BuildProgress,

    runs: Vec<ScanRun>,
    scans: Vec<ScanState>,
    partitions: Vec<Partition>,
    min_mz: f64,
    partition_width: f64,
    frontier: BinaryHeap<Reverse<FrontierKey>>,
    starved: Vec<u32>,
    /// Scans with peaks still on disk
    active: usize,
    /// Peaks loaded and not yet written, all scans
    buffered: usize,
    max_buffered: usize,

    total_peaks: u64,
    emitted: u64,
    out_buf: BytesMut,
    min_bucket: i32,
    bucket_offsets: Vec<Option<u64>>,
}

impl<'a, R: Read + Seek, W: Write> ChromatogramBuilder<'a, R, W> {
    /// `reader` reads the spectra section, `out` receives the chromatogram
    /// records starting at file offset `out_begin`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader: &'a mut R,
        out: &'a mut W,
        out_begin: u64,
        features: FormatFeatures,
        quota: Quota,
        with_index: bool,
        stage: BuildStage,
        progress: &'a mut dyn BuildProgress,
    ) -> Self {
        Self {
            reader,
            out,
            out_begin,
            features,
            quota,
            with_index,
            stage,
            progress,
            runs: Vec::new(),
            scans: Vec::new(),
            partitions: Vec::new(),
            min_mz: 0.0,
            partition_width: 0.0,
            frontier: BinaryHeap::new(),
            starved: Vec::new(),
            active: 0,
            buffered: 0,
            max_buffered: 0,
            total_peaks: 0,
            emitted: 0,
            out_buf: BytesMut::with_capacity(OUTPUT_CHUNK + CHROMATOGRAM_PEAK_SIZE),
            min_bucket: 0,
            bucket_offsets: Vec::new(),
        }
    }

    /// Write the section for `runs` (ascending scan order).
    pub fn build(mut self, runs: Vec<ScanRun>, stats: SectionStats) -> Result<BuiltSection> {
        if stats.total_peaks == 0 || runs.is_empty() {
            return Ok(BuiltSection { peak_count: 0, index: MzBucketIndex::empty(), max_buffered: 0 });
        }

        self.setup(runs, stats);
        self.first_pass()?;
        self.drain()?;
        self.flush_output()?;
        self.progress.report(self.stage, self.emitted, self.total_peaks);

        if self.emitted != self.total_peaks {
            debug!("{}: {} peaks declared, {} written", self.stage, self.total_peaks, self.emitted);
        }

        let index = if self.with_index { self.finish_index() } else { MzBucketIndex::empty() };
        Ok(BuiltSection { peak_count: self.emitted, index, max_buffered: self.max_buffered })
    }

    fn setup(&mut self, runs: Vec<ScanRun>, stats: SectionStats) {
        let partition_count = (stats.total_peaks.div_ceil(PEAKS_PER_PARTITION) + 2) as usize;
        self.min_mz = stats.min_mz;
        self.partition_width = (stats.max_mz - stats.min_mz) / partition_count as f64;
        self.partitions = (0..partition_count).map(|_| Partition::new()).collect();
        self.total_peaks = stats.total_peaks;

        if self.with_index {
            self.min_bucket = mz_bucket(stats.min_mz);
            let max_bucket = mz_bucket(stats.max_mz);
            self.bucket_offsets = vec![None; (max_bucket - self.min_bucket + 1) as usize];
        }

        self.scans = runs
            .iter()
            .map(|_| ScanState { remaining: 0, next_offset: 0, loaded: 0, in_memory: 0, generation: 0 })
            .collect();
        self.runs = runs;

        debug!(
            "{}: {} peaks from {} scans, {} partitions over [{}, {}]",
            self.stage,
            stats.total_peaks,
            self.runs.len(),
            partition_count,
            stats.min_mz,
            stats.max_mz
        );
    }

    fn partition_of(&self, mz: f64) -> usize {
        if !(self.partition_width > 0.0) {
            return 0;
        }
        let idx = ((mz - self.min_mz) / self.partition_width).floor();
        (idx.max(0.0) as usize).min(self.partitions.len() - 1)
    }

    fn buffered_peak_size() -> usize {
        size_of::<BufferedPeak>()
    }

    // ========================================================================
    // Loading
    // ========================================================================

    fn first_pass(&mut self) -> Result<()> {
        let quota = self.quota.per_scan(self.runs.len(), 0, Self::buffered_peak_size());
        debug!("{}: first pass buffering up to {} peaks per scan", self.stage, quota);

        for slot in 0..self.runs.len() {
            check_cancelled(&*self.progress)?;

            let run = self.runs[slot];
            let count = read_peak_count(self.reader, run.spec_offset, run.ms_level, &self.features)
                .with_context(|| format!("can't read peak count of scan {}", run.scan_num))?;
            let state = &mut self.scans[slot];
            state.remaining = count;
            state.next_offset = self.reader.stream_position()?;
            if count > 0 {
                self.active += 1;
            }

            self.load(slot as u32, quota)?;
        }

        Ok(())
    }

    /// Load up to `quota` peaks of a scan from disk.
    ///
    /// Returns the lowest partition that received a peak.
    fn load(&mut self, slot: u32, quota: usize) -> Result<Option<usize>> {
        let state = &self.scans[slot as usize];
        let count = state.remaining.min(quota);
        if count == 0 {
            return Ok(None);
        }

        let scan_num = self.runs[slot as usize].scan_num;
        self.reader.seek(SeekFrom::Start(state.next_offset))?;
        let peaks = read_peaks(self.reader, count)
            .with_context(|| format!("can't read peaks of scan {}", scan_num))?;

        let first_seq = state.loaded;
        let mut last_mz = f64::NEG_INFINITY;
        let mut lowest = None;
        for (i, peak) in peaks.into_iter().enumerate() {
            let idx = self.partition_of(peak.mz);
            if lowest.is_none() {
                lowest = Some(idx);
            }
            let seq = first_seq + i as u32;
            self.partitions[idx].push(Reverse(BufferedPeak { mz: peak.mz, intensity: peak.intensity, scan_num, slot, seq }));
            last_mz = peak.mz;
        }

        let state = &mut self.scans[slot as usize];
        state.remaining -= count;
        state.next_offset += (count * SPECTRUM_PEAK_SIZE) as u64;
        state.loaded += count as u32;
        state.in_memory += count;
        state.generation += 1;
        self.buffered += count;
        self.max_buffered = self.max_buffered.max(self.buffered);

        if state.remaining > 0 {
            self.frontier.push(Reverse(FrontierKey { mz: last_mz, scan_num, slot, generation: state.generation }));
        } else {
            self.active -= 1;
        }

        Ok(lowest)
    }

    /// Smallest valid frontier entry, dropping stale ones
    fn frontier_min(&mut self) -> Option<FrontierKey> {
        while let Some(Reverse(top)) = self.frontier.peek() {
            let state = &self.scans[top.slot as usize];
            if state.generation == top.generation && state.remaining > 0 {
                return Some(*top);
            }
            self.frontier.pop();
        }
        None
    }

    // ========================================================================
    // Draining
    // ========================================================================

    fn drain(&mut self) -> Result<()> {
        let mut cur = 0;
        let mut rounds = 0u64;

        loop {
            cur = self.emit_from(cur)?;

            if self.starved.is_empty() {
                if self.frontier_min().is_some() || cur < self.partitions.len() {
                    return Err(BuildError::Stalled { pending: self.total_peaks.saturating_sub(self.emitted) }.into());
                }
                break;
            }

            check_cancelled(&*self.progress)?;
            rounds += 1;

            let quota = self.quota.per_scan(self.active, self.buffered, Self::buffered_peak_size());
            let starved = std::mem::take(&mut self.starved);
            trace!(
                "{}: refill round {}, {} scans, quota {}, {} peaks buffered",
                self.stage,
                rounds,
                starved.len(),
                quota,
                self.buffered
            );

            for slot in starved {
                // a refill may land below the current partition
                if let Some(idx) = self.load(slot, quota)? {
                    cur = cur.min(idx);
                }
            }
        }

        debug!(
            "{}: {} peaks written in {} refill rounds, at most {} buffered",
            self.stage, self.emitted, rounds, self.max_buffered
        );
        Ok(())
    }

    /// Emit partitions from `cur` on until a peak above the frontier blocks.
    ///
    /// Returns the first partition still holding peaks.
    fn emit_from(&mut self, mut cur: usize) -> Result<usize> {
        while cur < self.partitions.len() {
            check_cancelled(&*self.progress)?;

            // loads only happen between calls, the frontier is fixed meanwhile
            let limit = self.frontier_min();
            while let Some(peak) = self.pop_ready(cur, limit) {
                self.emit(peak)?;
            }

            let partition = &mut self.partitions[cur];
            if !partition.is_empty() {
                break;
            }
            *partition = Partition::new();
            cur += 1;
        }
        Ok(cur)
    }

    /// Smallest peak of partition `idx` if it doesn't sort above `limit`
    fn pop_ready(&mut self, idx: usize, limit: Option<FrontierKey>) -> Option<BufferedPeak> {
        let partition = &mut self.partitions[idx];
        let Reverse(top) = partition.peek()?;
        if limit.is_some_and(|key| key.cmp_peak(top) == Ordering::Greater) {
            return None;
        }
        partition.pop().map(|Reverse(peak)| peak)
    }

    fn emit(&mut self, peak: BufferedPeak) -> Result<()> {
        let offset = self.out_begin + self.emitted * CHROMATOGRAM_PEAK_SIZE as u64;

        if self.with_index {
            let b = (mz_bucket(peak.mz) - self.min_bucket) as usize;
            if let Some(slot) = self.bucket_offsets.get_mut(b) {
                if slot.is_none() {
                    *slot = Some(offset);
                }
            }
        }

        ChromatogramPeak::new(peak.mz, peak.intensity, peak.scan_num).put(&mut self.out_buf);
        self.emitted += 1;

        self.buffered -= 1;
        let state = &mut self.scans[peak.slot as usize];
        state.in_memory -= 1;
        if state.in_memory == 0 && state.remaining > 0 {
            self.starved.push(peak.slot);
        }

        if self.out_buf.len() >= OUTPUT_CHUNK {
            self.flush_output()?;
            self.progress.report(self.stage, self.emitted, self.total_peaks);
        }
        Ok(())
    }

    fn flush_output(&mut self) -> Result<()> {
        self.out.write_all(&self.out_buf).context("can't write chromatogram records")?;
        self.out_buf.clear();
        Ok(())
    }

    /// Backward-fill empty buckets and append the section end.
    fn finish_index(&self) -> MzBucketIndex {
        let section_end = self.out_begin + self.emitted * CHROMATOGRAM_PEAK_SIZE as u64;
        let mut offsets = vec![0u64; self.bucket_offsets.len() + 1];
        offsets[self.bucket_offsets.len()] = section_end;

        let mut next = section_end;
        for (i, offset) in self.bucket_offsets.iter().enumerate().rev() {
            next = offset.unwrap_or(next);
            offsets[i] = next;
        }

        let max_bucket = self.min_bucket + self.bucket_offsets.len() as i32 - 1;
        MzBucketIndex::new(self.min_bucket, max_bucket, offsets)
    }
}

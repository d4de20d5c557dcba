//! Spectrum record codec
//!
//! One spectrum is stored as a fixed-size header followed by its peaks:
//!
//! ```text
//! scanNum i32 | nativeId [u8; 50]* | msLevel u8 | elutionTime f64 | tic f32* |
//! [msLevel > 1: precursorMz f64, charge i32, activation u8,
//!               isolationTarget f64, isolationLower f64, isolationUpper f64] |
//! peakCount i32 | (mz f64, intensity f32) x peakCount
//! ```
//!
//! Fields marked `*` only exist from the format version that introduced them,
//! see [`FormatFeatures`]. All values are little endian.

use anyhow_ext::{Context, Result};
use bytes::{Buf, BufMut, BytesMut};
use log::warn;
use std::io::{Read, Seek, SeekFrom};

use crate::error::{BuildError, FormatError};
use crate::format::{FormatFeatures, NATIVE_ID_LEN, SPECTRUM_PEAK_SIZE};
use crate::model::*;

/// precursorMz + charge + activation + isolation target/lower/upper
const PRECURSOR_FIELDS_LEN: usize = 8 + 4 + 1 + 8 + 8 + 8;

/// Byte distance from the start of a record to its peakCount field.
pub fn header_len(ms_level: u8, features: &FormatFeatures) -> usize {
    let mut len = lead_len(features) + 8;
    if features.total_ion_current {
        len += 4;
    }
    if ms_level > 1 {
        len += PRECURSOR_FIELDS_LEN;
    }
    len
}

/// Total size of an encoded record.
pub fn record_len(ms_level: u8, peak_count: usize, features: &FormatFeatures) -> usize {
    header_len(ms_level, features) + 4 + peak_count * SPECTRUM_PEAK_SIZE
}

/// scanNum, nativeId and msLevel: the bytes needed to learn the header size
fn lead_len(features: &FormatFeatures) -> usize {
    4 + if features.native_id { NATIVE_ID_LEN } else { 0 } + 1
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode a spectrum using the record layout of `features`.
///
/// Peaks are written in the order given; callers sort them first. Fails with
/// [`BuildError::ProductMsLevel`] for a product scan below MS level 2, whose
/// precursor fields the layout has no room for.
pub fn encode_spectrum(spectrum: &Spectrum, features: &FormatFeatures) -> Result<BytesMut> {
    let header = &spectrum.header;
    let ms_level = header.ms_level();
    if let Acquisition::Product { ms_level, .. } = header.acquisition {
        if ms_level < 2 {
            return Err(BuildError::ProductMsLevel { scan_num: header.scan_num, ms_level }.into());
        }
    }
    let mut buf = BytesMut::with_capacity(record_len(ms_level, spectrum.peaks.len(), features));

    buf.put_i32_le(header.scan_num);
    if features.native_id {
        put_native_id(&mut buf, &header.native_id);
    }
    buf.put_u8(ms_level);
    buf.put_f64_le(header.elution_time);
    if features.total_ion_current {
        buf.put_f32_le(header.total_ion_current);
    }

    if let Acquisition::Product { precursor, .. } = &header.acquisition {
        buf.put_f64_le(precursor.precursor_mz.unwrap_or(0.0));
        buf.put_i32_le(precursor.charge.unwrap_or(0));
        buf.put_u8(precursor.activation as u8);
        buf.put_f64_le(precursor.isolation.target_mz);
        buf.put_f64_le(precursor.isolation.lower_offset);
        buf.put_f64_le(precursor.isolation.upper_offset);
    }

    buf.put_i32_le(spectrum.peaks.len() as i32);
    for peak in &spectrum.peaks {
        buf.put_f64_le(peak.mz);
        buf.put_f32_le(peak.intensity);
    }

    Ok(buf)
}

fn put_native_id(buf: &mut BytesMut, native_id: &str) {
    put_padded(buf, native_id, NATIVE_ID_LEN, "native id");
}

/// Write `value` into a fixed `len`-byte field, space padded.
///
/// Longer values are cut at the last char boundary that fits.
pub(crate) fn put_padded(buf: &mut BytesMut, value: &str, len: usize, field: &str) {
    let mut end = value.len().min(len);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    if end < value.len() {
        warn!("{} '{}' truncated to {} bytes", field, value, end);
    }

    buf.put_slice(&value.as_bytes()[..end]);
    buf.put_bytes(b' ', len - end);
}

/// Read a fixed `len`-byte padded field.
pub(crate) fn get_padded(buf: &mut impl Buf, len: usize) -> String {
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8_lossy(&raw)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

// ============================================================================
// Decoding
// ============================================================================

fn ensure_remaining(buf: &impl Buf, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(FormatError::Truncated("spectrum record").into());
    }
    Ok(())
}

/// Parse everything up to and including peakCount.
fn decode_header(buf: &mut impl Buf, features: &FormatFeatures) -> Result<(SpectrumHeader, usize)> {
    ensure_remaining(buf, lead_len(features))?;
    let scan_num = buf.get_i32_le();

    let native_id = if features.native_id {
        get_padded(buf, NATIVE_ID_LEN)
    } else {
        format!("scan={}", scan_num)
    };

    let ms_level = buf.get_u8();
    ensure_remaining(buf, header_len(ms_level, features) - lead_len(features) + 4)?;

    let elution_time = buf.get_f64_le();
    let total_ion_current = if features.total_ion_current { buf.get_f32_le() } else { 0.0 };

    let acquisition = if ms_level > 1 {
        let precursor_mz = buf.get_f64_le();
        let charge = buf.get_i32_le();
        let activation_tag = buf.get_u8();
        let activation = ActivationMethod::from_repr(activation_tag).unwrap_or_else(|| {
            warn!("unknown activation method {} in scan {}", activation_tag, scan_num);
            ActivationMethod::Unknown
        });
        let isolation = IsolationWindow::new(buf.get_f64_le(), buf.get_f64_le(), buf.get_f64_le());

        Acquisition::Product {
            ms_level,
            precursor: PrecursorInfo {
                precursor_mz: (precursor_mz != 0.0).then_some(precursor_mz),
                charge: (charge != 0).then_some(charge),
                activation,
                isolation,
            },
        }
    } else {
        Acquisition::Survey
    };

    let peak_count = buf.get_i32_le().max(0) as usize;

    let header = SpectrumHeader { scan_num, native_id, elution_time, total_ion_current, acquisition };
    Ok((header, peak_count))
}

/// Parse `count` consecutive peaks.
pub fn decode_peaks(buf: &mut impl Buf, count: usize) -> Result<Vec<Peak>> {
    ensure_remaining(buf, count * SPECTRUM_PEAK_SIZE)?;
    let peaks = (0..count)
        .map(|_| {
            let mz = buf.get_f64_le();
            let intensity = buf.get_f32_le();
            Peak { mz, intensity }
        })
        .collect();
    Ok(peaks)
}

fn finish(header: SpectrumHeader, peaks: Vec<Peak>, features: &FormatFeatures) -> Spectrum {
    let mut spectrum = Spectrum { header, peaks };
    if !features.total_ion_current {
        spectrum.header.total_ion_current = spectrum.summed_intensity();
    }
    spectrum
}

/// Decode one record from an in-memory buffer.
///
/// With `include_peaks = false` the buffer still advances past the peaks.
pub fn decode_spectrum(buf: &mut impl Buf, features: &FormatFeatures, include_peaks: bool) -> Result<Spectrum> {
    let (header, peak_count) = decode_header(buf, features)?;

    let peaks = if include_peaks {
        decode_peaks(buf, peak_count)?
    } else {
        ensure_remaining(buf, peak_count * SPECTRUM_PEAK_SIZE)?;
        buf.advance(peak_count * SPECTRUM_PEAK_SIZE);
        Vec::new()
    };

    Ok(finish(header, peaks, features))
}

// ============================================================================
// Reading from a file
// ============================================================================

/// Decode the record at the current position of `reader`.
///
/// Leaves `reader` positioned right after the record, whether or not the
/// peaks were loaded.
pub fn read_spectrum<R: Read + Seek>(
    reader: &mut R,
    features: &FormatFeatures,
    include_peaks: bool,
) -> Result<Spectrum> {
    let lead = lead_len(features);
    let mut raw = vec![0u8; lead];
    reader.read_exact(&mut raw).dot()?;

    let ms_level = raw[lead - 1];
    raw.resize(header_len(ms_level, features) + 4, 0);
    reader.read_exact(&mut raw[lead..]).dot()?;

    let (header, peak_count) = decode_header(&mut raw.as_slice(), features)?;
    let peaks = if include_peaks {
        read_peaks(reader, peak_count)?
    } else {
        reader
            .seek(SeekFrom::Current((peak_count * SPECTRUM_PEAK_SIZE) as i64))
            .dot()?;
        Vec::new()
    };

    Ok(finish(header, peaks, features))
}

/// Read `count` peaks at the current position of `reader`.
pub fn read_peaks<R: Read>(reader: &mut R, count: usize) -> Result<Vec<Peak>> {
    let mut raw = vec![0u8; count * SPECTRUM_PEAK_SIZE];
    reader.read_exact(&mut raw).dot()?;
    decode_peaks(&mut raw.as_slice(), count)
}

/// Read the peakCount field of the record starting at `offset`.
///
/// Leaves `reader` positioned on the first peak.
pub fn read_peak_count<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    ms_level: u8,
    features: &FormatFeatures,
) -> Result<usize> {
    reader
        .seek(SeekFrom::Start(offset + header_len(ms_level, features) as u64))
        .dot()?;
    let mut raw = [0u8; 4];
    reader.read_exact(&mut raw).dot()?;
    Ok(i32::from_le_bytes(raw).max(0) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatFeatures;
    use std::io::Cursor;

    fn product_spectrum() -> Spectrum {
        let precursor = PrecursorInfo {
            precursor_mz: Some(445.12),
            charge: Some(2),
            activation: ActivationMethod::HCD,
            isolation: IsolationWindow::new(445.12, 0.8, 0.8),
        };
        Spectrum::product(
            42,
            2,
            12.5,
            precursor,
            vec![Peak::new(120.0, 10.0), Peak::new(300.25, 4.5), Peak::new(446.0, 1.0)],
        )
        .with_native_id("controllerType=0 controllerNumber=1 scan=42")
    }

    #[test]
    fn test_round_trip_with_and_without_peaks() {
        let features = FormatFeatures::current();
        for spectrum in [product_spectrum(), Spectrum::survey(7, 3.25, vec![Peak::new(100.0, 1.0)])] {
            let encoded = encode_spectrum(&spectrum, &features).unwrap();
            assert_eq!(encoded.len(), record_len(spectrum.ms_level(), spectrum.peaks.len(), &features));

            let decoded = decode_spectrum(&mut encoded.clone().freeze(), &features, true).unwrap();
            assert_eq!(decoded, spectrum);

            let mut buf = encoded.freeze();
            let header_only = decode_spectrum(&mut buf, &features, false).unwrap();
            assert_eq!(header_only.header, spectrum.header);
            assert!(header_only.peaks.is_empty());
            assert_eq!(buf.remaining(), 0);
        }
    }

    #[test]
    fn test_product_below_level_two_rejected() {
        let features = FormatFeatures::current();
        for ms_level in [0, 1] {
            let spectrum = Spectrum::product(5, ms_level, 1.0, PrecursorInfo::default(), vec![Peak::new(100.0, 1.0)]);
            let err = encode_spectrum(&spectrum, &features).unwrap_err();
            assert_eq!(err.downcast_ref::<BuildError>(), Some(&BuildError::ProductMsLevel { scan_num: 5, ms_level }));
        }

        let ms3 = Spectrum::product(6, 3, 1.0, PrecursorInfo::default(), vec![Peak::new(100.0, 1.0)]);
        let encoded = encode_spectrum(&ms3, &features).unwrap();
        assert_eq!(decode_spectrum(&mut encoded.freeze(), &features, true).unwrap(), ms3);
    }

    #[test]
    fn test_read_spectrum_skips_peaks() {
        let features = FormatFeatures::current();
        let first = product_spectrum();
        let second = Spectrum::survey(43, 12.6, vec![Peak::new(500.0, 2.0)]);

        let mut bytes = encode_spectrum(&first, &features).unwrap();
        bytes.extend_from_slice(&encode_spectrum(&second, &features).unwrap());
        let mut cursor = Cursor::new(bytes.to_vec());

        let header_only = read_spectrum(&mut cursor, &features, false).unwrap();
        assert_eq!(header_only.header, first.header);
        assert_eq!(cursor.position() as usize, record_len(2, 3, &features));

        assert_eq!(read_spectrum(&mut cursor, &features, true).unwrap(), second);
    }

    #[test]
    fn test_unknown_precursor_fields_stored_as_zero() {
        let features = FormatFeatures::current();
        let precursor = PrecursorInfo { activation: ActivationMethod::CID, ..Default::default() };
        let spectrum = Spectrum::product(3, 2, 1.0, precursor, vec![]);

        let decoded = decode_spectrum(&mut encode_spectrum(&spectrum, &features).unwrap().freeze(), &features, true).unwrap();
        let p = decoded.header.acquisition.precursor().unwrap();
        assert_eq!(p.precursor_mz, None);
        assert_eq!(p.charge, None);
    }

    #[test]
    fn test_oldest_version_defaults() {
        let features = FormatFeatures::for_version(150604).unwrap();
        let spectrum = product_spectrum();
        let encoded = encode_spectrum(&spectrum, &features).unwrap();
        assert_eq!(encoded.len(), record_len(2, 3, &features));

        let decoded = decode_spectrum(&mut encoded.clone().freeze(), &features, true).unwrap();
        assert_eq!(decoded.header.native_id, "scan=42");
        assert_eq!(decoded.header.total_ion_current, 15.5);
        assert_eq!(decoded.peaks, spectrum.peaks);

        let header_only = decode_spectrum(&mut encoded.freeze(), &features, false).unwrap();
        assert_eq!(header_only.header.total_ion_current, 0.0);
    }

    #[test]
    fn test_native_id_truncated_on_char_boundary() {
        let features = FormatFeatures::current();
        let long_id = format!("{}é", "x".repeat(NATIVE_ID_LEN - 1));
        let spectrum = Spectrum::survey(1, 0.0, vec![]).with_native_id(long_id);

        let decoded = decode_spectrum(&mut encode_spectrum(&spectrum, &features).unwrap().freeze(), &features, false).unwrap();
        assert_eq!(decoded.header.native_id, "x".repeat(NATIVE_ID_LEN - 1));
    }

    #[test]
    fn test_unknown_activation_tag() {
        let features = FormatFeatures::current();
        let mut raw = encode_spectrum(&product_spectrum(), &features).unwrap().to_vec();
        let activation_at = header_len(2, &features) - 8 * 3 - 1;
        raw[activation_at] = 99;

        let decoded = decode_spectrum(&mut raw.as_slice(), &features, true).unwrap();
        assert_eq!(decoded.header.acquisition.precursor().unwrap().activation, ActivationMethod::Unknown);
    }

    #[test]
    fn test_truncated_record() {
        let features = FormatFeatures::current();
        let raw = encode_spectrum(&product_spectrum(), &features).unwrap();
        let cut = &raw[..raw.len() - 5];

        let err = decode_spectrum(&mut &cut[..], &features, true).unwrap_err();
        assert_eq!(err.downcast_ref::<FormatError>(), Some(&FormatError::Truncated("spectrum record")));
    }

    #[test]
    fn test_read_peak_count() {
        let features = FormatFeatures::current();
        let mut cursor = Cursor::new(encode_spectrum(&product_spectrum(), &features).unwrap().to_vec());

        assert_eq!(read_peak_count(&mut cursor, 0, 2, &features).unwrap(), 3);
        let peaks = read_peaks(&mut cursor, 2).unwrap();
        assert_eq!(peaks, vec![Peak::new(120.0, 10.0), Peak::new(300.25, 4.5)]);
    }
}

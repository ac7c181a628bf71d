//! Sample-level PCM codec shared by the converter and device lines.
//!
//! Samples travel between formats as interleaved `f32` in `[-1.0, 1.0]`.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use sonance_core::{Encoding, Error, FormatDescriptor, Result};

/// Whether the sample codec can read this format.
pub fn can_decode(format: &FormatDescriptor) -> bool {
    match format.encoding() {
        Encoding::PcmSigned | Encoding::PcmUnsigned => {
            matches!(format.bit_depth(), 8 | 16 | 24 | 32)
        }
        Encoding::PcmFloat => matches!(format.bit_depth(), 32 | 64),
        Encoding::ULaw | Encoding::ALaw => format.bit_depth() == 8,
    }
}

/// Whether the sample codec can write this format.
pub fn can_encode(format: &FormatDescriptor) -> bool {
    format.is_pcm() && can_decode(format)
}

/// Decode every whole frame in `bytes`, appending interleaved samples to `out`.
///
/// Returns the number of bytes consumed; a trailing partial frame is left for the caller.
pub fn decode(bytes: &[u8], format: &FormatDescriptor, out: &mut Vec<f32>) -> Result<usize> {
    let frame = frame_len(format)?;
    let width = sample_width(format)?;
    let usable = bytes.len() / frame * frame;
    let big_endian = format.is_big_endian();

    out.reserve(usable / width);
    for chunk in bytes[..usable].chunks_exact(width) {
        let sample = match format.encoding() {
            Encoding::PcmSigned => {
                let value = read_int(chunk, big_endian, true);
                value as f32 / full_scale(width)
            }
            Encoding::PcmUnsigned => {
                let value = read_int(chunk, big_endian, false) - offset(width);
                value as f32 / full_scale(width)
            }
            Encoding::PcmFloat if width == 4 => {
                let raw = read_int(chunk, big_endian, false) as u32;
                f32::from_bits(raw)
            }
            Encoding::PcmFloat => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                let value = if big_endian {
                    f64::from_be_bytes(raw)
                } else {
                    f64::from_le_bytes(raw)
                };
                value as f32
            }
            Encoding::ULaw => f32::from(ulaw_to_linear(chunk[0])) / 32_768.0,
            Encoding::ALaw => f32::from(alaw_to_linear(chunk[0])) / 32_768.0,
        };
        out.push(sample);
    }
    Ok(usable)
}

/// Encode interleaved samples into `format`, appending bytes to `out`.
pub fn encode(samples: &[f32], format: &FormatDescriptor, out: &mut Vec<u8>) -> Result<()> {
    if !can_encode(format) {
        return Err(Error::UnsupportedFormat(format.to_string()));
    }
    let width = sample_width(format)?;
    let big_endian = format.is_big_endian();
    out.reserve(samples.len() * width);

    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        match format.encoding() {
            Encoding::PcmSigned => {
                let value = scale(clamped, width);
                write_int(value, width, big_endian, out);
            }
            Encoding::PcmUnsigned => {
                let value = scale(clamped, width) + offset(width);
                write_int(value, width, big_endian, out);
            }
            Encoding::PcmFloat if width == 4 => {
                let bytes = if big_endian {
                    sample.to_be_bytes()
                } else {
                    sample.to_le_bytes()
                };
                out.extend_from_slice(&bytes);
            }
            Encoding::PcmFloat => {
                let wide = f64::from(sample);
                let bytes = if big_endian {
                    wide.to_be_bytes()
                } else {
                    wide.to_le_bytes()
                };
                out.extend_from_slice(&bytes);
            }
            Encoding::ULaw | Encoding::ALaw => {
                return Err(Error::UnsupportedFormat(format.to_string()));
            }
        }
    }
    Ok(())
}

/// Remap interleaved samples between channel counts.
///
/// Mono duplicates into stereo, stereo averages into mono; equal counts pass through.
pub fn remap_channels(samples: &[f32], from: usize, to: usize) -> Result<Vec<f32>> {
    match (from, to) {
        (a, b) if a == b => Ok(samples.to_vec()),
        (1, 2) => Ok(samples.iter().flat_map(|&s| [s, s]).collect()),
        (2, 1) => Ok(samples
            .chunks_exact(2)
            .map(|pair| 0.5 * (pair[0] + pair[1]))
            .collect()),
        _ => Err(Error::UnsupportedFormat(format!(
            "cannot map {from} channels to {to}"
        ))),
    }
}

fn frame_len(format: &FormatDescriptor) -> Result<usize> {
    if !can_decode(format) {
        return Err(Error::UnsupportedFormat(format.to_string()));
    }
    format
        .frame_bytes()
        .ok_or_else(|| Error::UnsupportedFormat(format!("unknown frame size: {format}")))
}

fn sample_width(format: &FormatDescriptor) -> Result<usize> {
    format
        .sample_bytes()
        .ok_or_else(|| Error::UnsupportedFormat(format!("unknown bit depth: {format}")))
}

const fn full_scale(width: usize) -> f32 {
    match width {
        1 => 128.0,
        2 => 32_768.0,
        3 => 8_388_608.0,
        _ => 2_147_483_648.0,
    }
}

const fn offset(width: usize) -> i64 {
    1i64 << (width * 8 - 1)
}

fn scale(sample: f32, width: usize) -> i64 {
    let max = (1i64 << (width * 8 - 1)) - 1;
    let value = (f64::from(sample) * (max as f64 + 1.0)).round() as i64;
    value.clamp(-max - 1, max)
}

fn read_int(chunk: &[u8], big_endian: bool, signed: bool) -> i64 {
    let mut value: u64 = 0;
    if big_endian {
        for &b in chunk {
            value = (value << 8) | u64::from(b);
        }
    } else {
        for &b in chunk.iter().rev() {
            value = (value << 8) | u64::from(b);
        }
    }
    let bits = chunk.len() * 8;
    if signed && bits < 64 && value & (1 << (bits - 1)) != 0 {
        (value as i64) - (1i64 << bits)
    } else {
        value as i64
    }
}

fn write_int(value: i64, width: usize, big_endian: bool, out: &mut Vec<u8>) {
    let bytes = value.to_le_bytes();
    if big_endian {
        out.extend(bytes[..width].iter().rev());
    } else {
        out.extend_from_slice(&bytes[..width]);
    }
}

fn ulaw_to_linear(byte: u8) -> i16 {
    let u = !byte;
    let sign = u & 0x80;
    let exponent = (u >> 4) & 0x07;
    let mantissa = u & 0x0F;
    let magnitude = ((i32::from(mantissa) << 3) + 0x84) << exponent;
    let value = magnitude - 0x84;
    if sign != 0 {
        (-value) as i16
    } else {
        value as i16
    }
}

fn alaw_to_linear(byte: u8) -> i16 {
    let a = byte ^ 0x55;
    let sign = a & 0x80;
    let exponent = (a >> 4) & 0x07;
    let mantissa = i32::from(a & 0x0F);
    let magnitude = match exponent {
        0 => (mantissa << 4) + 8,
        e => ((mantissa << 4) + 0x108) << (e - 1),
    };
    if sign != 0 {
        magnitude as i16
    } else {
        (-magnitude) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_signed_16_le() {
        let format = FormatDescriptor::canonical();
        let bytes = [0x00, 0x40, 0x00, 0xC0];
        let mut samples = Vec::new();
        let used = decode(&bytes, &format, &mut samples).unwrap();
        assert_eq!(used, 4);
        assert!(close(samples[0], 0.5));
        assert!(close(samples[1], -0.5));

        let mut back = Vec::new();
        encode(&samples, &format, &mut back).unwrap();
        assert_eq!(back, bytes);
    }

    #[test]
    fn test_partial_frame_left_over() {
        let format = FormatDescriptor::canonical();
        let mut samples = Vec::new();
        let used = decode(&[1, 2, 3, 4, 5, 6], &format, &mut samples).unwrap();
        assert_eq!(used, 4);
        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn test_unsigned_8_midpoint_is_silence() {
        let format = FormatDescriptor::pcm(8000.0, 8, 1, false, false);
        let mut samples = Vec::new();
        decode(&[128], &format, &mut samples).unwrap();
        assert!(close(samples[0], 0.0));
    }

    #[test]
    fn test_signed_24_big_endian() {
        let format = FormatDescriptor::pcm(48_000.0, 24, 1, true, true);
        let mut bytes = Vec::new();
        encode(&[-0.25], &format, &mut bytes).unwrap();
        assert_eq!(bytes.len(), 3);
        let mut samples = Vec::new();
        decode(&bytes, &format, &mut samples).unwrap();
        assert!(close(samples[0], -0.25));
    }

    #[test]
    fn test_float_passthrough() {
        let format = FormatDescriptor::float(48_000.0, 1);
        let mut bytes = Vec::new();
        encode(&[0.125], &format, &mut bytes).unwrap();
        let mut samples = Vec::new();
        decode(&bytes, &format, &mut samples).unwrap();
        assert!(close(samples[0], 0.125));
    }

    #[test]
    fn test_ulaw_silence() {
        assert_eq!(ulaw_to_linear(0xFF), 0);
        assert!(ulaw_to_linear(0x00) < -30_000);
    }

    #[test]
    fn test_remap_channels() {
        assert_eq!(remap_channels(&[0.5], 1, 2).unwrap(), vec![0.5, 0.5]);
        assert_eq!(remap_channels(&[0.2, 0.4], 2, 1).unwrap().len(), 1);
        assert!(remap_channels(&[0.0; 6], 6, 2).is_err());
    }

    #[test]
    fn test_clamps_out_of_range() {
        let format = FormatDescriptor::canonical();
        let mut bytes = Vec::new();
        encode(&[2.0, -2.0], &format, &mut bytes).unwrap();
        assert_eq!(bytes, [0xFF, 0x7F, 0x00, 0x80]);
    }
}

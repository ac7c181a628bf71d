//! Lazy PCM re-encoding between linear formats.
//!
//! Bytes are decoded to `f32`, remapped between mono and stereo, resampled when
//! the rates differ, and re-encoded in the target format as the stream is read.

use sonance_core::{FormatDescriptor, Result};
use tracing::{debug, trace};

use crate::pcm;
use crate::resample::Resampler;
use crate::source::{PcmSource, StreamHandle};

/// Bytes pulled from the wrapped stream per refill.
const READ_CHUNK: usize = 16 * 1024;

/// Whether the sample codec can turn `from` into `to`.
pub fn can_convert(from: &FormatDescriptor, to: &FormatDescriptor) -> bool {
    let channels_ok = match (from.channels(), to.channels()) {
        (a, b) if a == b => a > 0,
        (1, 2) | (2, 1) => true,
        _ => false,
    };
    pcm::can_decode(from)
        && pcm::can_encode(to)
        && from.is_frame_consistent()
        && to.is_frame_consistent()
        && channels_ok
        && from.sample_rate() > 0.0
        && to.sample_rate() > 0.0
}

/// Converted length in bytes for a source of `bytes` bytes.
pub fn converted_length(bytes: u64, from: &FormatDescriptor, to: &FormatDescriptor) -> Option<u64> {
    let frames = from.bytes_to_frames(bytes)?;
    let frames = if rates_differ(from, to) {
        (frames as f64 * f64::from(to.sample_rate()) / f64::from(from.sample_rate())).round()
            as u64
    } else {
        frames
    };
    to.frames_to_bytes(frames)
}

fn rates_differ(from: &FormatDescriptor, to: &FormatDescriptor) -> bool {
    from.sample_rate().round() as u32 != to.sample_rate().round() as u32
}

/// Wraps a stream and re-encodes it on the fly.
pub struct ConvertingSource {
    inner: StreamHandle,
    from: FormatDescriptor,
    to: FormatDescriptor,
    resampler: Option<Resampler>,
    chunk: Vec<u8>,
    /// Undecoded bytes, less than one source frame.
    carry: Vec<u8>,
    samples: Vec<f32>,
    out: Vec<u8>,
    out_offset: usize,
    eof: bool,
}

impl ConvertingSource {
    /// The caller must have checked [`can_convert`].
    pub fn new(inner: StreamHandle, to: FormatDescriptor) -> Result<Self> {
        let from = *inner.format();
        let resampler = if rates_differ(&from, &to) {
            Some(Resampler::new(
                from.sample_rate().round() as u32,
                to.sample_rate().round() as u32,
                to.channels() as usize,
            )?)
        } else {
            None
        };
        debug!("Converting {from} -> {to}");
        Ok(Self {
            inner,
            from,
            to,
            resampler,
            chunk: vec![0; READ_CHUNK],
            carry: Vec::new(),
            samples: Vec::new(),
            out: Vec::new(),
            out_offset: 0,
            eof: false,
        })
    }

    fn buffered(&self) -> usize {
        self.out.len() - self.out_offset
    }

    /// Produce more converted bytes. Returns false once everything is flushed.
    fn refill(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        self.out.clear();
        self.out_offset = 0;

        match self.inner.read(&mut self.chunk)? {
            Some(n) => {
                self.carry.extend_from_slice(&self.chunk[..n]);
                self.samples.clear();
                let used = pcm::decode(&self.carry, &self.from, &mut self.samples)?;
                self.carry.drain(..used);

                let mapped = pcm::remap_channels(
                    &self.samples,
                    self.from.channels() as usize,
                    self.to.channels() as usize,
                )?;
                let rendered = match &mut self.resampler {
                    Some(resampler) => resampler.push(&mapped)?,
                    None => mapped,
                };
                pcm::encode(&rendered, &self.to, &mut self.out)?;
            }
            None => {
                self.eof = true;
                if !self.carry.is_empty() {
                    trace!("Dropping {} bytes of partial frame", self.carry.len());
                    self.carry.clear();
                }
                if let Some(resampler) = &mut self.resampler {
                    let tail = resampler.finish()?;
                    pcm::encode(&tail, &self.to, &mut self.out)?;
                }
            }
        }
        Ok(true)
    }
}

impl PcmSource for ConvertingSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        while self.buffered() == 0 {
            if !self.refill()? {
                return Ok(None);
            }
        }
        let n = buf.len().min(self.buffered());
        buf[..n].copy_from_slice(&self.out[self.out_offset..self.out_offset + n]);
        self.out_offset += n;
        Ok(Some(n))
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn name(&self) -> String {
        format!("converted {}", self.inner.name())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use crate::source::{to_stream, Source, SourceOptions};

    fn drain(source: &mut ConvertingSource) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 777];
        while let Some(n) = source.read(&mut buf).unwrap() {
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_capability() {
        let canonical = FormatDescriptor::canonical();
        let mono_u8 = FormatDescriptor::pcm(8000.0, 8, 1, false, false);
        assert!(can_convert(&mono_u8, &canonical));
        let six = FormatDescriptor::pcm(44_100.0, 16, 6, true, false);
        assert!(!can_convert(&six, &canonical));
        let unknown = FormatDescriptor::pcm(-1.0, 16, 2, true, false);
        assert!(!can_convert(&unknown, &canonical));
    }

    #[test]
    fn test_unsigned_mono_to_signed_stereo() {
        let from = FormatDescriptor::pcm(44_100.0, 8, 1, false, false);
        let options = SourceOptions::default().with_format(from);
        let stream = to_stream(Source::bytes(vec![128u8, 192, 64]), &options).unwrap();

        let to = FormatDescriptor::canonical();
        let mut source = ConvertingSource::new(stream, to).unwrap();
        let out = drain(&mut source);
        assert_eq!(out.len(), 12);
        let samples: Vec<i16> = out
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![0, 0, 16_384, 16_384, -16_384, -16_384]);
    }

    #[test]
    fn test_big_endian_to_little() {
        let from = FormatDescriptor::pcm(44_100.0, 16, 2, true, true);
        let options = SourceOptions::default().with_format(from);
        let stream = to_stream(Source::bytes(vec![0x12u8, 0x34, 0x56, 0x78]), &options).unwrap();
        let mut source = ConvertingSource::new(stream, FormatDescriptor::canonical()).unwrap();
        assert_eq!(drain(&mut source), vec![0x34, 0x12, 0x78, 0x56]);
    }

    #[test]
    fn test_converted_length() {
        let from = FormatDescriptor::pcm(22_050.0, 8, 1, true, false);
        let to = FormatDescriptor::canonical();
        assert_eq!(converted_length(100, &from, &to), Some(800));
        assert_eq!(converted_length(100, &to, &to), Some(100));
    }

    #[test]
    fn test_resampled_length_matches_estimate() {
        let from = FormatDescriptor::pcm(22_050.0, 16, 2, true, false);
        let to = FormatDescriptor::canonical();
        let bytes = 4 * 5000;
        let options = SourceOptions::default().with_format(from);
        let stream = to_stream(Source::bytes(vec![0u8; bytes]), &options).unwrap();
        let mut source = ConvertingSource::new(stream, to).unwrap();
        let out = drain(&mut source);
        let estimate = converted_length(bytes as u64, &from, &to).unwrap();
        assert!(out.len() as u64 <= estimate);
        assert!(out.len() as u64 >= estimate - 4 * 1024);
    }
}

//! Container decoding using symphonia.
//!
//! Decoded audio is delivered as interleaved signed 16-bit little-endian PCM at the
//! track's native rate and channel count.

use std::fs::File;
use std::io::{self, Cursor};

use bytes::Bytes;
use sonance_core::{Error, FormatDescriptor, Result};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, warn};

use crate::source::PcmSource;

/// Bytes per decoded sample.
const SAMPLE_BYTES: usize = 2;

/// Build a probe hint from a MIME type and/or file extension.
pub fn hint_for(mime_hint: Option<&str>, extension: Option<&str>) -> Hint {
    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }
    if let Some(mime) = mime_hint {
        hint.mime_type(mime);
        if mime.contains("webm") || mime.contains("opus") {
            hint.with_extension("webm");
        } else if mime.contains("mp4") || mime.contains("m4a") || mime.contains("aac") {
            hint.with_extension("m4a");
        } else if mime.contains("mp3") || mime.contains("mpeg") {
            hint.with_extension("mp3");
        } else if mime.contains("ogg") || mime.contains("vorbis") {
            hint.with_extension("ogg");
        } else if mime.contains("flac") {
            hint.with_extension("flac");
        } else if mime.contains("wav") || mime.contains("wave") {
            hint.with_extension("wav");
        } else if mime.contains("aiff") {
            hint.with_extension("aiff");
        }
    }
    hint
}

/// A decoded container read as a PCM source.
pub struct DecodedSource {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    /// Total frames, when the container declares them.
    frames: Option<u64>,
    samples: Option<SampleBuffer<i16>>,
    /// Decoded bytes not yet handed out.
    pending: Vec<u8>,
    offset: usize,
    finished: bool,
    name: String,
}

impl DecodedSource {
    /// Probe and open a media source.
    pub fn open(source: Box<dyn MediaSource>, hint: &Hint, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let mss = MediaSourceStream::new(source, MediaSourceStreamOptions::default());

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| container_error(&name, &e))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::UnsupportedContainer(format!("{name}: no audio tracks")))?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.ok_or_else(|| {
            Error::UnsupportedContainer(format!("{name}: sample rate not declared"))
        })?;
        let channels = track.codec_params.channels.map_or(2, |c| c.count());
        let frames = track.codec_params.n_frames;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| container_error(&name, &e))?;

        debug!(
            "Opened {name}: track={}, {}Hz, {} channels, {:?} frames",
            track_id, sample_rate, channels, frames
        );

        Ok(Self {
            reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            frames,
            samples: None,
            pending: Vec::new(),
            offset: 0,
            finished: false,
            name,
        })
    }

    /// Decode an in-memory container.
    #[allow(clippy::needless_pass_by_value)] // Bytes is cheaply cloneable
    pub fn from_bytes(data: Bytes, mime_hint: Option<&str>) -> Result<Self> {
        let name = format!("memory ({} bytes)", data.len());
        let cursor = Cursor::new(data);
        Self::open(Box::new(cursor), &hint_for(mime_hint, None), name)
    }

    /// Decode an open file.
    pub fn from_file(file: File, extension: Option<&str>, mime_hint: Option<&str>) -> Result<Self> {
        let name = extension.map_or_else(|| "file".to_string(), |ext| format!("{ext} file"));
        Self::open(Box::new(file), &hint_for(mime_hint, extension), name)
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Format of the bytes produced by `read`.
    pub fn output_format(&self) -> FormatDescriptor {
        FormatDescriptor::pcm(
            self.sample_rate as f32,
            16,
            self.channels as i32,
            true,
            false,
        )
    }

    /// Decoded length in bytes, when the container declares a frame count.
    pub fn byte_length(&self) -> Option<u64> {
        self.frames
            .map(|frames| frames * (self.channels * SAMPLE_BYTES) as u64)
    }

    fn buffered(&self) -> usize {
        self.pending.len() - self.offset
    }

    /// Decode the next packet into `pending`. Returns false at end of stream.
    fn decode_next(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.finished = true;
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    debug!("{}: stream reset, ending", self.name);
                    self.finished = true;
                    return Ok(false);
                }
                Err(SymphoniaError::IoError(e)) => return Err(Error::StreamIo(e)),
                Err(e) => {
                    return Err(Error::UnsupportedContainer(format!(
                        "{}: failed to read packet: {e}",
                        self.name
                    )));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let needed = decoded.capacity() * spec.channels.count();
                    let mut buffer = match self.samples.take() {
                        Some(buffer) if buffer.capacity() >= needed => buffer,
                        _ => SampleBuffer::new(decoded.capacity() as u64, spec),
                    };
                    buffer.copy_interleaved_ref(decoded);

                    self.pending.clear();
                    self.offset = 0;
                    for sample in buffer.samples() {
                        self.pending.extend_from_slice(&sample.to_le_bytes());
                    }
                    self.samples = Some(buffer);
                    return Ok(true);
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("{}: decode error (skipping packet): {e}", self.name);
                }
                Err(e) => {
                    return Err(Error::UnsupportedContainer(format!(
                        "{}: decode failed: {e}",
                        self.name
                    )));
                }
            }
        }
    }
}

fn container_error(name: &str, e: &SymphoniaError) -> Error {
    match e {
        SymphoniaError::IoError(io) if io.kind() == io::ErrorKind::NotFound => {
            Error::SourceNotFound(name.to_string())
        }
        _ => Error::UnsupportedContainer(format!("{name}: {e}")),
    }
}

impl PcmSource for DecodedSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        while self.buffered() == 0 {
            if !self.decode_next()? {
                return Ok(None);
            }
        }
        let n = buf.len().min(self.buffered());
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        Ok(Some(n))
    }

    /// Discards what is already decoded, or else at most one packet.
    fn skip(&mut self, n: u64) -> Result<u64> {
        if self.buffered() == 0 && !self.decode_next()? {
            return Ok(0);
        }
        let skipped = (n as usize).min(self.buffered());
        self.offset += skipped;
        Ok(skipped as u64)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;

    /// A minimal 16-bit PCM RIFF/WAVE file.
    pub(crate) fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let block_align = channels * 2;
        let mut out = Vec::with_capacity(44 + data_len as usize);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_decodes_wav() {
        let samples: Vec<i16> = (0..2000).map(|i| (i * 7) as i16).collect();
        let data = Bytes::from(wav_bytes(22_050, 2, &samples));
        let mut source = DecodedSource::from_bytes(data, Some("audio/wav")).unwrap();

        let format = source.output_format();
        assert_eq!(format.sample_rate(), 22_050.0);
        assert_eq!(format.channels(), 2);
        assert_eq!(format.frame_size(), 4);
        assert_eq!(source.byte_length(), Some(4000));

        let mut decoded = Vec::new();
        let mut buf = [0u8; 333];
        while let Some(n) = source.read(&mut buf).unwrap() {
            decoded.extend_from_slice(&buf[..n]);
        }
        let expected: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_native_skip_may_fall_short() {
        let samples = vec![0i16; 20_000];
        let data = Bytes::from(wav_bytes(8000, 1, &samples));
        let mut source = DecodedSource::from_bytes(data, None).unwrap();
        let skipped = source.skip(40_000).unwrap();
        assert!(skipped > 0);
        assert!(skipped <= 40_000);
    }

    #[test]
    fn test_garbage_is_unsupported_container() {
        let data = Bytes::from_static(b"definitely not audio, just some text bytes");
        let err = DecodedSource::from_bytes(data, None).err().unwrap();
        assert!(matches!(err, Error::UnsupportedContainer(_)));
    }
}

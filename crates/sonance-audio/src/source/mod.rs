//! Uniform pull-based PCM streams over heterogeneous sources.

pub mod capture;
pub mod generator;
pub mod memory;
pub mod network;
pub mod raw;

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use sonance_core::{Error, FormatDescriptor, Result};
use tracing::{debug, warn};
use url::Url;

use crate::decode::DecodedSource;
use crate::device::InputLine;

pub use capture::CaptureSource;
pub use generator::GeneratorSource;
pub use memory::MemorySource;
pub use raw::RawSource;

/// Largest single read used when a source emulates skipping by discarding.
const DISCARD_CHUNK: usize = 8192;

/// Backend of a [`StreamHandle`].
pub trait PcmSource {
    /// Fill `buf` from the current position. `None` means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>>;

    /// Advance by up to `n` bytes without returning them. May skip fewer bytes
    /// than asked for; returns 0 at end of stream.
    fn skip(&mut self, n: u64) -> Result<u64> {
        let mut scratch = [0u8; DISCARD_CHUNK];
        let want = (n as usize).min(DISCARD_CHUNK);
        Ok(self.read(&mut scratch[..want])?.unwrap_or(0) as u64)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Short description for logs.
    fn name(&self) -> String;
}

/// A readable PCM byte stream with a known format and optionally known length.
///
/// Closing is idempotent and also happens on drop.
pub struct StreamHandle {
    source: Box<dyn PcmSource>,
    format: FormatDescriptor,
    length: Option<u64>,
    position: u64,
    closed: bool,
}

impl StreamHandle {
    pub fn new(source: Box<dyn PcmSource>, format: FormatDescriptor, length: Option<u64>) -> Self {
        debug!(
            "Stream over {}: {format}, {:?} bytes",
            source.name(),
            length
        );
        Self {
            source,
            format,
            length,
            position: 0,
            closed: false,
        }
    }

    pub const fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    /// Total length in bytes, if known. Converted streams report an estimate until
    /// they reach end of stream, after which the length is exact.
    pub const fn length(&self) -> Option<u64> {
        self.length
    }

    /// Bytes consumed so far by reads and skips.
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Bytes remaining before end of stream, if known.
    pub fn available_length(&self) -> Option<u64> {
        self.length.map(|len| len.saturating_sub(self.position))
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn name(&self) -> String {
        self.source.name()
    }

    /// Read up to `buf.len()` bytes. `None` means end of stream.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(Some(0));
        }
        let limit = self.remaining_limit(buf.len());
        if limit == 0 {
            return Ok(None);
        }
        match self.source.read(&mut buf[..limit])? {
            Some(n) if n > 0 => {
                self.position += n as u64;
                Ok(Some(n))
            }
            _ => {
                self.settle_length();
                Ok(None)
            }
        }
    }

    /// A source that ends before its announced length fixes the length at the
    /// position reached.
    fn settle_length(&mut self) {
        if let Some(len) = self.length.filter(|&len| len > self.position) {
            debug!(
                "{} ended {} bytes short of its announced length",
                self.source.name(),
                len - self.position
            );
            self.length = Some(self.position);
        }
    }

    /// One call to the source's own skip primitive; may fall short.
    pub fn skip_native(&mut self, n: u64) -> Result<u64> {
        self.ensure_open()?;
        let n = self.available_length().map_or(n, |rest| rest.min(n));
        if n == 0 {
            return Ok(0);
        }
        let skipped = self.source.skip(n)?.min(n);
        self.position += skipped;
        Ok(skipped)
    }

    /// Release the underlying source. Later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("Closing stream over {}", self.source.name());
        self.source.close()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::StreamIo(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream is closed",
            )));
        }
        Ok(())
    }

    fn remaining_limit(&self, want: usize) -> usize {
        self.available_length()
            .map_or(want, |rest| want.min(usize::try_from(rest).unwrap_or(usize::MAX)))
    }
}

impl Read for StreamHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match Self::read(self, buf) {
            Ok(n) => Ok(n.unwrap_or(0)),
            Err(Error::StreamIo(e)) => Err(e),
            Err(e) => Err(io::Error::other(e.to_string())),
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close stream: {e}");
        }
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("source", &self.source.name())
            .field("format", &self.format)
            .field("length", &self.length)
            .field("position", &self.position)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Produces the value of the byte at a given index.
pub type SampleFn = Box<dyn FnMut(u64) -> i64>;

/// Everything that can be turned into a [`StreamHandle`].
pub enum Source {
    /// Audio file on disk, decoded by its container header.
    Path(PathBuf),
    /// Already-open audio file.
    File(File),
    /// Audio file fetched over HTTP(S).
    Url(Url),
    /// Encoded container held in memory.
    Encoded(Bytes),
    /// Raw PCM held in memory.
    Bytes(Bytes),
    /// Live capture; opened and started when the stream is created.
    Capture(Box<dyn InputLine>),
    /// Raw PCM from any reader.
    Raw(Box<dyn Read>),
    /// `count` bytes computed lazily by `func`.
    Generator { count: u64, func: SampleFn },
}

impl Source {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn url(url: &str) -> Result<Self> {
        Url::parse(url)
            .map(Self::Url)
            .map_err(|e| Error::InvalidArgument(format!("invalid URL {url:?}: {e}")))
    }

    pub fn encoded(data: impl Into<Bytes>) -> Self {
        Self::Encoded(data.into())
    }

    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self::Bytes(data.into())
    }

    pub fn capture(line: Box<dyn InputLine>) -> Self {
        Self::Capture(line)
    }

    pub fn raw(reader: impl Read + 'static) -> Self {
        Self::Raw(Box::new(reader))
    }

    pub fn generator(count: u64, func: impl FnMut(u64) -> i64 + 'static) -> Self {
        Self::Generator {
            count,
            func: Box::new(func),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Path(_) => "path",
            Self::File(_) => "file",
            Self::Url(_) => "url",
            Self::Encoded(_) => "encoded",
            Self::Bytes(_) => "bytes",
            Self::Capture(_) => "capture",
            Self::Raw(_) => "raw",
            Self::Generator { .. } => "generator",
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Url(url) => f.debug_tuple("Url").field(&url.as_str()).finish(),
            Self::Generator { count, .. } => {
                f.debug_struct("Generator").field("count", count).finish()
            }
            other => f.write_str(other.kind()),
        }
    }
}

/// Format, length, and decoder hints applied while resolving a source.
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    /// Format of raw PCM sources; canonical when absent.
    pub format: Option<FormatDescriptor>,
    /// Length of raw reader sources in bytes; unknown when absent.
    pub length: Option<u64>,
    /// MIME type forwarded to the container probe.
    pub mime_hint: Option<String>,
}

impl SourceOptions {
    #[must_use]
    pub const fn with_format(mut self, format: FormatDescriptor) -> Self {
        self.format = Some(format);
        self
    }

    #[must_use]
    pub const fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    #[must_use]
    pub fn with_mime_hint(mut self, mime: impl Into<String>) -> Self {
        self.mime_hint = Some(mime.into());
        self
    }

    fn raw_format(&self) -> FormatDescriptor {
        self.format.unwrap_or_else(FormatDescriptor::canonical)
    }
}

/// Resolve any [`Source`] into a readable stream.
pub fn to_stream(source: Source, options: &SourceOptions) -> Result<StreamHandle> {
    debug!("Resolving {} source", source.kind());
    let mime = options.mime_hint.as_deref();
    match source {
        Source::Path(path) => open_path(&path, mime),
        Source::File(file) => decoded(DecodedSource::from_file(file, None, mime)?),
        Source::Url(url) => {
            let fetched = network::fetch(&url)?;
            let mime = mime.or(fetched.mime.as_deref());
            decoded(DecodedSource::from_bytes(fetched.body, mime)?)
        }
        Source::Encoded(data) => decoded(DecodedSource::from_bytes(data, mime)?),
        Source::Bytes(data) => {
            let length = data.len() as u64;
            Ok(StreamHandle::new(
                Box::new(MemorySource::new(data)),
                options.raw_format(),
                Some(length),
            ))
        }
        Source::Capture(line) => {
            let capture = CaptureSource::start(line)?;
            let format = capture.format();
            Ok(StreamHandle::new(Box::new(capture), format, None))
        }
        Source::Raw(reader) => Ok(StreamHandle::new(
            Box::new(RawSource::new(reader)),
            options.raw_format(),
            options.length,
        )),
        Source::Generator { count, func } => Ok(StreamHandle::new(
            Box::new(GeneratorSource::new(count, func)),
            FormatDescriptor::canonical(),
            Some(count),
        )),
    }
}

fn open_path(path: &Path, mime: Option<&str>) -> Result<StreamHandle> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::SourceNotFound(path.display().to_string()),
        _ => Error::StreamIo(e),
    })?;
    let extension = path.extension().and_then(|ext| ext.to_str());
    decoded(DecodedSource::from_file(file, extension, mime)?)
}

fn decoded(source: DecodedSource) -> Result<StreamHandle> {
    let format = source.output_format();
    let length = source.byte_length();
    Ok(StreamHandle::new(Box::new(source), format, length))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use crate::decode::tests::wav_bytes;

    #[test]
    fn test_missing_path_is_not_found() {
        let err = to_stream(
            Source::path("/definitely/not/here.wav"),
            &SourceOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::SourceNotFound(_)));
    }

    #[test]
    fn test_encoded_bytes_report_header_format() {
        let data = wav_bytes(48_000, 1, &[1, 2, 3, 4]);
        let options = SourceOptions::default().with_mime_hint("audio/wav");
        let stream = to_stream(Source::encoded(data), &options).unwrap();
        assert_eq!(stream.format().sample_rate(), 48_000.0);
        assert_eq!(stream.format().channels(), 1);
        assert_eq!(stream.length(), Some(8));
    }

    #[test]
    fn test_read_respects_known_length() {
        let options = SourceOptions::default().with_length(5);
        let mut stream = to_stream(Source::raw(io::Cursor::new(vec![7u8; 64])), &options).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), Some(5));
        assert_eq!(stream.read(&mut buf).unwrap(), None);
        assert_eq!(stream.available_length(), Some(0));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut stream = to_stream(Source::bytes(vec![1u8, 2, 3]), &SourceOptions::default()).unwrap();
        stream.close().unwrap();
        stream.close().unwrap();
        assert!(stream.is_closed());
        let mut buf = [0u8; 4];
        assert!(matches!(stream.read(&mut buf), Err(Error::StreamIo(_))));
    }

    #[test]
    fn test_io_read_adapter() {
        let mut stream =
            to_stream(Source::bytes(vec![9u8; 10]), &SourceOptions::default()).unwrap();
        let mut out = Vec::new();
        Read::read_to_end(&mut stream, &mut out).unwrap();
        assert_eq!(out, vec![9u8; 10]);
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            Source::url("not a url"),
            Err(Error::InvalidArgument(_))
        ));
    }
}

//! Playback format negotiation.

use sonance_core::{ByteOrder, Encoding, Error, FormatDescriptor, Result};
use tracing::debug;

use crate::convert::{can_convert, converted_length, ConvertingSource};
use crate::source::StreamHandle;

/// Derives canonical playback formats and converts streams into them.
#[derive(Debug, Clone, Copy)]
pub struct Negotiator {
    default_bit_depth: i32,
}

impl Negotiator {
    pub const fn new(default_bit_depth: i32) -> Self {
        Self { default_bit_depth }
    }

    /// Signed little-endian PCM at the source's rate and channel count.
    ///
    /// Unknown bit depths fall back to the configured default; depths that are not a
    /// whole number of bytes are rounded up to the next byte.
    pub fn derive_canonical(&self, src: &FormatDescriptor) -> Result<FormatDescriptor> {
        if src.channels() <= 0 {
            return Err(Error::UnsupportedFormat(format!(
                "cannot derive a playback format without channels: {src}"
            )));
        }
        let bit_depth = if src.bit_depth() > 0 {
            src.bit_depth()
        } else {
            self.default_bit_depth
        };
        let bit_depth = (bit_depth + 7) / 8 * 8;
        Ok(FormatDescriptor::new(
            Encoding::PcmSigned,
            src.sample_rate(),
            bit_depth,
            src.channels(),
            bit_depth / 8 * src.channels(),
            src.sample_rate(),
            ByteOrder::Little,
        ))
    }

    /// Hand back `stream` in its canonical playback format, converting only when needed.
    pub fn negotiate(&self, stream: StreamHandle) -> Result<StreamHandle> {
        let target = self.derive_canonical(stream.format())?;
        if *stream.format() == target {
            debug!("Stream already in playback format {target}");
            return Ok(stream);
        }
        convert(stream, target)
    }
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new(FormatDescriptor::CANONICAL_BIT_DEPTH)
    }
}

/// [`Negotiator::derive_canonical`] with the default bit depth.
pub fn derive_canonical(src: &FormatDescriptor) -> Result<FormatDescriptor> {
    Negotiator::default().derive_canonical(src)
}

/// Whether `src` can be converted into `dst`. Identical formats need no conversion
/// and report false.
pub fn conversion_supported(src: &FormatDescriptor, dst: &FormatDescriptor) -> bool {
    src != dst && can_convert(src, dst)
}

/// Re-encode `stream` into `dst` lazily.
///
/// A known source length is rescaled to the target format. Resampling can yield
/// slightly fewer bytes than the rescaled length; the stream's length is corrected
/// once it ends.
pub fn convert(stream: StreamHandle, dst: FormatDescriptor) -> Result<StreamHandle> {
    let src = *stream.format();
    if !conversion_supported(&src, &dst) {
        return Err(Error::ConversionUnsupported { from: src, to: dst });
    }
    let length = stream
        .available_length()
        .and_then(|len| converted_length(len, &src, &dst));
    let source = ConvertingSource::new(stream, dst)?;
    Ok(StreamHandle::new(Box::new(source), dst, length))
}

/// [`Negotiator::negotiate`] with the default bit depth.
pub fn negotiate(stream: StreamHandle) -> Result<StreamHandle> {
    Negotiator::default().negotiate(stream)
}

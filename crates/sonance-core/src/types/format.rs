//! PCM format descriptors.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::fmt;

use serde::{Deserialize, Serialize};

/// Marker for an integer format field the source could not report.
pub const NOT_SPECIFIED: i32 = -1;

/// Marker for a rate field the source could not report.
pub const NOT_SPECIFIED_RATE: f32 = -1.0;

/// Sample encoding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Signed linear PCM.
    #[default]
    PcmSigned,
    /// Unsigned linear PCM (offset binary).
    PcmUnsigned,
    /// IEEE float PCM.
    PcmFloat,
    /// G.711 μ-law.
    ULaw,
    /// G.711 A-law.
    ALaw,
}

impl Encoding {
    /// Whether samples are stored linearly.
    pub const fn is_linear(&self) -> bool {
        matches!(self, Self::PcmSigned | Self::PcmUnsigned | Self::PcmFloat)
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::PcmSigned => "PCM_SIGNED",
            Self::PcmUnsigned => "PCM_UNSIGNED",
            Self::PcmFloat => "PCM_FLOAT",
            Self::ULaw => "ULAW",
            Self::ALaw => "ALAW",
        }
    }
}

/// Byte order of multi-byte samples.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    pub const fn from_big_endian(big_endian: bool) -> Self {
        if big_endian {
            Self::Big
        } else {
            Self::Little
        }
    }

    pub const fn is_big_endian(&self) -> bool {
        matches!(self, Self::Big)
    }
}

/// Immutable description of a sample stream's layout.
///
/// Integer fields use [`NOT_SPECIFIED`] and rates use [`NOT_SPECIFIED_RATE`] when
/// the source cannot report them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FormatDescriptor {
    encoding: Encoding,
    sample_rate: f32,
    bit_depth: i32,
    channels: i32,
    frame_size: i32,
    frame_rate: f32,
    byte_order: ByteOrder,
}

impl FormatDescriptor {
    /// Sample rate of the default playback format.
    pub const CANONICAL_SAMPLE_RATE: f32 = 44_100.0;
    /// Bit depth of the default playback format.
    pub const CANONICAL_BIT_DEPTH: i32 = 16;
    /// Channel count of the default playback format.
    pub const CANONICAL_CHANNELS: i32 = 2;

    /// Full seven-field constructor.
    pub const fn new(
        encoding: Encoding,
        sample_rate: f32,
        bit_depth: i32,
        channels: i32,
        frame_size: i32,
        frame_rate: f32,
        byte_order: ByteOrder,
    ) -> Self {
        Self {
            encoding,
            sample_rate,
            bit_depth,
            channels,
            frame_size,
            frame_rate,
            byte_order,
        }
    }

    /// Linear PCM shorthand. Frame size is derived from bit depth and channel count,
    /// frame rate equals the sample rate.
    pub const fn pcm(
        sample_rate: f32,
        bit_depth: i32,
        channels: i32,
        signed: bool,
        big_endian: bool,
    ) -> Self {
        let frame_size = if bit_depth > 0 && channels > 0 {
            channels * bit_depth / 8
        } else {
            NOT_SPECIFIED
        };
        let encoding = if signed {
            Encoding::PcmSigned
        } else {
            Encoding::PcmUnsigned
        };
        Self::new(
            encoding,
            sample_rate,
            bit_depth,
            channels,
            frame_size,
            sample_rate,
            ByteOrder::from_big_endian(big_endian),
        )
    }

    /// 32-bit IEEE float PCM, native little-endian.
    pub const fn float(sample_rate: f32, channels: i32) -> Self {
        let frame_size = if channels > 0 { 4 * channels } else { NOT_SPECIFIED };
        Self::new(
            Encoding::PcmFloat,
            sample_rate,
            32,
            channels,
            frame_size,
            sample_rate,
            ByteOrder::Little,
        )
    }

    /// The default playback format: 44.1 kHz, 16-bit, stereo, signed, little-endian.
    pub const fn canonical() -> Self {
        Self::pcm(
            Self::CANONICAL_SAMPLE_RATE,
            Self::CANONICAL_BIT_DEPTH,
            Self::CANONICAL_CHANNELS,
            true,
            false,
        )
    }

    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub const fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub const fn bit_depth(&self) -> i32 {
        self.bit_depth
    }

    pub const fn channels(&self) -> i32 {
        self.channels
    }

    pub const fn frame_size(&self) -> i32 {
        self.frame_size
    }

    pub const fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    pub const fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub const fn is_big_endian(&self) -> bool {
        self.byte_order.is_big_endian()
    }

    /// Whether samples are linear PCM.
    pub const fn is_pcm(&self) -> bool {
        self.encoding.is_linear()
    }

    /// Bytes per frame, if known.
    pub const fn frame_bytes(&self) -> Option<usize> {
        if self.frame_size > 0 {
            Some(self.frame_size as usize)
        } else {
            None
        }
    }

    /// Bytes per single-channel sample, if known.
    pub const fn sample_bytes(&self) -> Option<usize> {
        if self.bit_depth > 0 {
            Some(((self.bit_depth + 7) / 8) as usize)
        } else {
            None
        }
    }

    /// Whether the frame size agrees with bit depth and channel count.
    ///
    /// Formats with unspecified fields or non-linear encodings are considered consistent.
    pub const fn is_frame_consistent(&self) -> bool {
        if !self.is_pcm() || self.bit_depth <= 0 || self.channels <= 0 {
            return true;
        }
        self.frame_size == self.channels * self.bit_depth / 8
    }

    /// Convert a byte count into whole frames.
    pub const fn bytes_to_frames(&self, bytes: u64) -> Option<u64> {
        match self.frame_bytes() {
            Some(size) => Some(bytes / size as u64),
            None => None,
        }
    }

    /// Convert a frame count into bytes.
    pub const fn frames_to_bytes(&self, frames: u64) -> Option<u64> {
        match self.frame_bytes() {
            Some(size) => Some(frames * size as u64),
            None => None,
        }
    }

    /// Whether `other` is compatible with this format, treating unspecified fields
    /// on `self` as wildcards.
    pub fn matches(&self, other: &Self) -> bool {
        let rate_ok = |a: f32, b: f32| a < 0.0 || (a - b).abs() < f32::EPSILON;
        let int_ok = |a: i32, b: i32| a == NOT_SPECIFIED || a == b;
        let order_ok = self.bit_depth <= 8 || self.byte_order == other.byte_order;

        self.encoding == other.encoding
            && rate_ok(self.sample_rate, other.sample_rate)
            && int_ok(self.bit_depth, other.bit_depth)
            && int_ok(self.channels, other.channels)
            && int_ok(self.frame_size, other.frame_size)
            && rate_ok(self.frame_rate, other.frame_rate)
            && order_ok
    }
}

impl Default for FormatDescriptor {
    fn default() -> Self {
        Self::canonical()
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.encoding.name())?;
        if self.sample_rate > 0.0 {
            write!(f, "{} Hz, ", self.sample_rate)?;
        } else {
            write!(f, "unknown sample rate, ")?;
        }
        if self.bit_depth > 0 {
            write!(f, "{} bit, ", self.bit_depth)?;
        } else {
            write!(f, "unknown bits per sample, ")?;
        }
        match self.channels {
            1 => write!(f, "mono, ")?,
            2 => write!(f, "stereo, ")?,
            n if n > 0 => write!(f, "{n} channels, ")?,
            _ => write!(f, "unknown channels, ")?,
        }
        if self.frame_size > 0 {
            write!(f, "{} bytes/frame", self.frame_size)?;
        } else {
            write!(f, "unknown frame size")?;
        }
        if self.bit_depth > 8 {
            let order = if self.is_big_endian() {
                "big-endian"
            } else {
                "little-endian"
            };
            write!(f, ", {order}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_canonical_format() {
        let f = FormatDescriptor::canonical();
        assert_eq!(f.encoding(), Encoding::PcmSigned);
        assert_eq!(f.bit_depth(), 16);
        assert_eq!(f.channels(), 2);
        assert_eq!(f.frame_size(), 4);
        assert_eq!(f.byte_order(), ByteOrder::Little);
        assert_eq!(f, FormatDescriptor::default());
    }

    #[test]
    fn test_pcm_shorthand_unknown_depth() {
        let f = FormatDescriptor::pcm(8000.0, NOT_SPECIFIED, 1, true, true);
        assert_eq!(f.frame_size(), NOT_SPECIFIED);
        assert_eq!(f.frame_bytes(), None);
        assert!(f.is_big_endian());
    }

    #[test]
    fn test_pcm_shorthand_packed_depth() {
        let f = FormatDescriptor::pcm(44_100.0, 12, 2, true, false);
        assert_eq!(f.frame_size(), 3);
        assert!(f.is_frame_consistent());
    }

    #[test]
    fn test_frame_conversions() {
        let f = FormatDescriptor::pcm(48_000.0, 24, 2, true, false);
        assert_eq!(f.frame_size(), 6);
        assert_eq!(f.bytes_to_frames(600), Some(100));
        assert_eq!(f.frames_to_bytes(100), Some(600));
    }

    #[test]
    fn test_matches_with_wildcards() {
        let wildcard = FormatDescriptor::new(
            Encoding::PcmSigned,
            NOT_SPECIFIED_RATE,
            16,
            NOT_SPECIFIED,
            NOT_SPECIFIED,
            NOT_SPECIFIED_RATE,
            ByteOrder::Little,
        );
        assert!(wildcard.matches(&FormatDescriptor::canonical()));
        assert!(!FormatDescriptor::canonical().matches(&wildcard));
    }

    #[test]
    fn test_display() {
        let text = FormatDescriptor::canonical().to_string();
        assert_eq!(
            text,
            "PCM_SIGNED 44100 Hz, 16 bit, stereo, 4 bytes/frame, little-endian"
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let f = FormatDescriptor::float(22_050.0, 1);
        let json = serde_json::to_string(&f).unwrap();
        let back: FormatDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(f, back);
    }

    proptest! {
        #[test]
        fn pcm_shorthand_is_frame_consistent(
            depth in 1..=64i32,
            channels in 1..16i32,
            signed in any::<bool>(),
            big_endian in any::<bool>(),
        ) {
            let f = FormatDescriptor::pcm(44_100.0, depth, channels, signed, big_endian);
            prop_assert!(f.is_frame_consistent());
            prop_assert_eq!(f.frame_size(), channels * depth / 8);
        }
    }
}

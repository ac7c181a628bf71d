//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::Result;

/// Default size of a device line buffer in bytes.
pub const DEFAULT_LINE_BUFFER_BYTES: usize = 64 * 1024;

/// Default chunk size of the playback pump in bytes.
pub const DEFAULT_PUMP_BUFFER_BYTES: usize = 64 * 1024;

/// Default deficit accepted by an approximate skip.
pub const DEFAULT_SKIP_TOLERANCE_BYTES: u64 = 1200;

/// Tunables shared by the device manager, pump, and skip controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Line buffer size requested when opening output lines.
    pub line_buffer_bytes: usize,
    /// Bytes moved per pump iteration.
    pub pump_buffer_bytes: usize,
    /// Under-skip accepted once the native skip stops making progress.
    pub skip_tolerance_bytes: u64,
    /// Bit depth used when a source does not report one.
    pub default_bit_depth: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            line_buffer_bytes: DEFAULT_LINE_BUFFER_BYTES,
            pump_buffer_bytes: DEFAULT_PUMP_BUFFER_BYTES,
            skip_tolerance_bytes: DEFAULT_SKIP_TOLERANCE_BYTES,
            default_bit_depth: 16,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.line_buffer_bytes, 65536);
        assert_eq!(config.skip_tolerance_bytes, 1200);
        assert_eq!(config.default_bit_depth, 16);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{ "pump_buffer_bytes": 4096 }"#);
        assert!(matches!(config, Ok(ref c) if c.pump_buffer_bytes == 4096));
        assert!(matches!(config, Ok(ref c) if c.line_buffer_bytes == DEFAULT_LINE_BUFFER_BYTES));
    }

    #[test]
    fn test_invalid_json() {
        assert!(EngineConfig::from_json("{ nope").is_err());
    }
}

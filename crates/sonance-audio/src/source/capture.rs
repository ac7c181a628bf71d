//! Live capture from an input line.

use sonance_core::{FormatDescriptor, Result};
use tracing::{debug, info};

use super::PcmSource;
use crate::device::InputLine;

/// Reads from a started input line; closing the source closes the line.
pub struct CaptureSource {
    line: Box<dyn InputLine>,
}

impl CaptureSource {
    /// Open and start `line`. The line is closed again if either step fails.
    pub fn start(mut line: Box<dyn InputLine>) -> Result<Self> {
        let started = line.open(None).and_then(|()| line.start());
        if let Err(e) = started {
            line.close();
            return Err(e);
        }
        info!(
            "Capturing from {} line {}",
            line.info().mixer,
            line.info().id
        );
        Ok(Self { line })
    }

    pub fn format(&self) -> FormatDescriptor {
        self.line.format().unwrap_or_else(FormatDescriptor::canonical)
    }
}

impl PcmSource for CaptureSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.line.read(buf)? {
            0 if !buf.is_empty() => Ok(None),
            n => Ok(Some(n)),
        }
    }

    fn close(&mut self) -> Result<()> {
        debug!("Closing capture line {}", self.line.info().id);
        self.line.close();
        Ok(())
    }

    fn name(&self) -> String {
        format!("capture ({})", self.line.info().mixer)
    }
}

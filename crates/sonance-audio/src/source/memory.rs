//! Raw PCM held in memory.

use bytes::{Buf, Bytes};
use sonance_core::Result;

use super::PcmSource;

pub struct MemorySource {
    data: Bytes,
    total: usize,
}

impl MemorySource {
    pub fn new(data: Bytes) -> Self {
        let total = data.len();
        Self { data, total }
    }
}

impl PcmSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        if !self.data.has_remaining() {
            return Ok(None);
        }
        let n = buf.len().min(self.data.remaining());
        self.data.copy_to_slice(&mut buf[..n]);
        Ok(Some(n))
    }

    fn skip(&mut self, n: u64) -> Result<u64> {
        let n = (n as usize).min(self.data.remaining());
        self.data.advance(n);
        Ok(n as u64)
    }

    fn name(&self) -> String {
        format!("memory ({} bytes)", self.total)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;

    #[test]
    fn test_skip_is_exact() {
        let mut source = MemorySource::new(Bytes::from_static(&[0, 1, 2, 3, 4, 5]));
        assert_eq!(source.skip(4).unwrap(), 4);
        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf).unwrap(), Some(2));
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(source.skip(4).unwrap(), 0);
        assert_eq!(source.read(&mut buf).unwrap(), None);
    }
}

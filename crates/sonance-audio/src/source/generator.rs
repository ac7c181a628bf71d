//! Bytes computed on demand from an index function.

use sonance_core::Result;

use super::{PcmSource, SampleFn};

/// Yields `func(0) .. func(count - 1)`, each truncated to its low byte.
///
/// Values are produced lazily, once, in order; the sequence cannot be restarted.
pub struct GeneratorSource {
    count: u64,
    next: u64,
    func: SampleFn,
}

impl GeneratorSource {
    pub fn new(count: u64, func: SampleFn) -> Self {
        Self {
            count,
            next: 0,
            func,
        }
    }
}

impl PcmSource for GeneratorSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        let remaining = self.count - self.next;
        if remaining == 0 {
            return Ok(None);
        }
        let n = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        for byte in &mut buf[..n] {
            *byte = (self.func)(self.next) as u8;
            self.next += 1;
        }
        Ok(Some(n))
    }

    /// Skipped indices are never passed to the function.
    fn skip(&mut self, n: u64) -> Result<u64> {
        let n = n.min(self.count - self.next);
        self.next += n;
        Ok(n)
    }

    fn name(&self) -> String {
        format!("generator ({} bytes)", self.count)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn test_truncates_to_low_byte() {
        let mut source = GeneratorSource::new(4, Box::new(|i| 254 + i as i64));
        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf).unwrap(), Some(4));
        assert_eq!(&buf[..4], &[254, 255, 0, 1]);
        assert_eq!(source.read(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_negative_values_wrap() {
        let mut source = GeneratorSource::new(1, Box::new(|_| -1));
        let mut buf = [0u8; 1];
        source.read(&mut buf).unwrap();
        assert_eq!(buf[0], 0xFF);
    }

    #[test]
    fn test_lazy_and_in_order() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let log = calls.clone();
        let mut source = GeneratorSource::new(
            10,
            Box::new(move |i| {
                log.borrow_mut().push(i);
                0
            }),
        );
        assert!(calls.borrow().is_empty());

        let mut buf = [0u8; 3];
        source.read(&mut buf).unwrap();
        source.skip(4).unwrap();
        source.read(&mut buf).unwrap();
        assert_eq!(*calls.borrow(), vec![0, 1, 2, 7, 8, 9]);
    }
}

//! Raw PCM from an arbitrary reader.

use std::io::{self, Read};

use sonance_core::Result;

use super::PcmSource;

pub struct RawSource {
    reader: Box<dyn Read>,
    eof: bool,
}

impl RawSource {
    pub fn new(reader: Box<dyn Read>) -> Self {
        Self { reader, eof: false }
    }
}

impl PcmSource for RawSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        if self.eof {
            return Ok(None);
        }
        loop {
            match self.reader.read(buf) {
                Ok(0) if !buf.is_empty() => {
                    self.eof = true;
                    return Ok(None);
                }
                Ok(n) => return Ok(Some(n)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn name(&self) -> String {
        "reader".to_string()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;

    struct Failing;

    impl Read for Failing {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "gone"))
        }
    }

    #[test]
    fn test_reader_errors_are_stream_io() {
        let mut source = RawSource::new(Box::new(Failing));
        let mut buf = [0u8; 4];
        assert!(matches!(
            source.read(&mut buf),
            Err(sonance_core::Error::StreamIo(_))
        ));
    }

    #[test]
    fn test_default_skip_discards() {
        let mut source = RawSource::new(Box::new(io::Cursor::new(vec![1u8, 2, 3, 4, 5])));
        assert_eq!(source.skip(3).unwrap(), 3);
        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf).unwrap(), Some(2));
        assert_eq!(&buf[..2], &[4, 5]);
    }
}

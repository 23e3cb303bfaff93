//! Body tees: forward writes to the real sink and keep a copy.

use std::{fmt, io};

/// Byte tee over a response's binary stream.
///
/// The captured buffer is owned by the capture, so dropping the tee and
/// asking for a new one continues where the previous one stopped.
pub struct TeeOutputStream<'a> {
    sink: Box<dyn io::Write + Send + 'a>,
    captured: &'a mut Vec<u8>,
}

impl<'a> TeeOutputStream<'a> {
    pub fn new(sink: Box<dyn io::Write + Send + 'a>, captured: &'a mut Vec<u8>) -> Self {
        Self { sink, captured }
    }

    /// Snapshot of everything captured so far.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.captured.clone()
    }
}

impl io::Write for TeeOutputStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Only keep what the sink accepted so both sides stay identical.
        let written = self.sink.write(buf)?;
        self.captured.extend_from_slice(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// Character tee over a response's text writer.
pub struct TeeWriter<'a> {
    sink: Box<dyn fmt::Write + Send + 'a>,
    captured: &'a mut String,
}

impl<'a> TeeWriter<'a> {
    pub fn new(sink: Box<dyn fmt::Write + Send + 'a>, captured: &'a mut String) -> Self {
        Self { sink, captured }
    }

    pub fn captured_string(&self) -> &str {
        self.captured
    }
}

impl fmt::Write for TeeWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.sink.write_str(s)?;
        self.captured.push_str(s);
        Ok(())
    }
}

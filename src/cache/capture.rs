//! Operation log and body capture for one response.

use std::{fmt, io};

use serde::{Deserialize, Serialize};

use super::operation::Operation;
use super::tee::{TeeOutputStream, TeeWriter};
use crate::response::ResponseError;

/// Headers that are forwarded but never recorded, compared case-insensitively.
const NON_CACHEABLE_HEADERS: [&str; 5] = [
    "set-cookie",
    "set-cookies",
    "age",
    "connection",
    "www-authenticate",
];

/// Whether a header may be stored in an operation log.
pub fn is_cacheable_header(name: &str) -> bool {
    !NON_CACHEABLE_HEADERS
        .iter()
        .any(|denied| denied.eq_ignore_ascii_case(name))
}

/// Body captured through exactly one of the two channels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CapturedBody {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    Text(String),
}

impl CapturedBody {
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Records cacheable mutations of a single response.
///
/// Starts cacheable. A non-200 status, an error, a redirect, or a buffer reset
/// invalidates it for good: the log is emptied and later calls are ignored.
#[derive(Debug)]
pub struct ResponseCapture {
    operations: Vec<Operation>,
    cacheable: bool,
    body: CapturedBody,
}

impl Default for ResponseCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCapture {
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
            cacheable: true,
            body: CapturedBody::Empty,
        }
    }

    pub fn record(&mut self, operation: Operation) {
        if !self.cacheable {
            return;
        }
        if let Some(status) = operation.status() {
            if status != 200 {
                self.invalidate();
                return;
            }
        }
        if let Some(name) = operation.header_name() {
            if !is_cacheable_header(name) {
                return;
            }
        }
        self.operations.push(operation);
    }

    pub fn invalidate(&mut self) {
        self.cacheable = false;
        self.operations.clear();
    }

    /// Clears the log and the captured body. Cacheability is left as it was.
    pub fn reset(&mut self) {
        self.operations.clear();
        self.body = CapturedBody::Empty;
    }

    /// Byte tee over `sink`. Fails once a text writer has been handed out.
    pub fn output_stream<'a>(
        &'a mut self,
        sink: Box<dyn io::Write + Send + 'a>,
    ) -> Result<TeeOutputStream<'a>, ResponseError> {
        self.claim_stream()?;
        match &mut self.body {
            CapturedBody::Bytes(captured) => Ok(TeeOutputStream::new(sink, captured)),
            _ => Err(ResponseError::IllegalState(
                "byte capture buffer is not active",
            )),
        }
    }

    /// Text tee over `sink`. Fails once a byte stream has been handed out.
    pub fn writer<'a>(
        &'a mut self,
        sink: Box<dyn fmt::Write + Send + 'a>,
    ) -> Result<TeeWriter<'a>, ResponseError> {
        self.claim_writer()?;
        match &mut self.body {
            CapturedBody::Text(captured) => Ok(TeeWriter::new(sink, captured)),
            _ => Err(ResponseError::IllegalState(
                "text capture buffer is not active",
            )),
        }
    }

    /// Reserve the byte channel without building a tee yet.
    pub fn claim_stream(&mut self) -> Result<(), ResponseError> {
        match self.body {
            CapturedBody::Text(_) => Err(ResponseError::IllegalState(
                "writer already obtained for this capture",
            )),
            CapturedBody::Bytes(_) => Ok(()),
            CapturedBody::Empty => {
                self.body = CapturedBody::Bytes(Vec::new());
                Ok(())
            }
        }
    }

    /// Reserve the text channel without building a tee yet.
    pub fn claim_writer(&mut self) -> Result<(), ResponseError> {
        match self.body {
            CapturedBody::Bytes(_) => Err(ResponseError::IllegalState(
                "output stream already obtained for this capture",
            )),
            CapturedBody::Text(_) => Ok(()),
            CapturedBody::Empty => {
                self.body = CapturedBody::Text(String::new());
                Ok(())
            }
        }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn byte_body(&self) -> Option<&[u8]> {
        self.body.bytes()
    }

    pub fn string_body(&self) -> Option<&str> {
        self.body.text()
    }

    pub fn can_cache(&self) -> bool {
        self.cacheable
    }

    pub fn into_outcome(self) -> CaptureOutcome {
        CaptureOutcome {
            operations: self.operations,
            body: self.body,
            cacheable: self.cacheable,
        }
    }
}

/// Final state of a capture, handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    operations: Vec<Operation>,
    body: CapturedBody,
    cacheable: bool,
}

impl CaptureOutcome {
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn byte_body(&self) -> Option<&[u8]> {
        self.body.bytes()
    }

    pub fn string_body(&self) -> Option<&str> {
        self.body.text()
    }

    pub fn can_cache(&self) -> bool {
        self.cacheable
    }

    pub fn into_parts(self) -> (Vec<Operation>, CapturedBody) {
        (self.operations, self.body)
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Write as _;
    use std::io::Write as _;

    use super::*;

    fn header(name: &str, value: &str) -> Operation {
        Operation::SetHeader {
            name: name.into(),
            value: value.into(),
        }
    }

    #[test]
    fn deny_list_is_case_insensitive() {
        for name in ["Set-Cookie", "AGE", "connection", "WWW-Authenticate", "set-cookies"] {
            assert!(!is_cacheable_header(name), "{name} must not be cached");
        }
        assert!(is_cacheable_header("Set-Cookie2"));
        assert!(is_cacheable_header("X-Page-Age"));
        assert!(is_cacheable_header("Vary"));
    }

    #[test]
    fn denied_headers_are_not_recorded() {
        let mut capture = ResponseCapture::new();
        capture.record(header("Vary", "Accept"));
        capture.record(header("Set-Cookie", "a=b"));
        capture.record(Operation::AddIntHeader {
            name: "Age".into(),
            value: 10,
        });
        assert_eq!(capture.operations(), &[header("Vary", "Accept")]);
        assert!(capture.can_cache());
    }

    #[test]
    fn non_ok_status_invalidates_permanently() {
        let mut capture = ResponseCapture::new();
        capture.record(header("Vary", "Accept"));
        capture.record(Operation::SetStatus { status: 404 });
        capture.record(Operation::SetStatus { status: 200 });
        capture.record(header("X-After", "1"));
        assert!(!capture.can_cache());
        assert!(capture.operations().is_empty());
    }

    #[test]
    fn ok_status_is_recorded() {
        let mut capture = ResponseCapture::new();
        capture.record(Operation::SetStatusWithMessage {
            status: 200,
            message: "OK".into(),
        });
        assert_eq!(capture.operations().len(), 1);
        assert!(capture.can_cache());
    }

    #[test]
    fn reset_clears_log_and_body_but_keeps_cacheability() {
        let mut capture = ResponseCapture::new();
        capture.record(header("Vary", "Accept"));
        capture
            .writer(Box::new(String::new()))
            .expect("writer")
            .write_str("draft")
            .expect("write");
        capture.reset();
        assert!(capture.operations().is_empty());
        assert!(capture.string_body().is_none());
        assert!(capture.can_cache());

        capture
            .output_stream(Box::new(Vec::new()))
            .expect("stream after reset")
            .write_all(b"final")
            .expect("write");
        assert_eq!(capture.byte_body(), Some(&b"final"[..]));

        capture.invalidate();
        capture.reset();
        assert!(!capture.can_cache());
    }

    #[test]
    fn stream_then_writer_is_illegal() {
        let mut capture = ResponseCapture::new();
        let mut sink = Vec::new();
        capture
            .output_stream(Box::new(&mut sink))
            .expect("stream")
            .write_all(b"abc")
            .expect("write");

        let err = capture
            .writer(Box::new(String::new()))
            .err()
            .expect("writer must fail");
        assert!(err.is_illegal_state());
        assert_eq!(capture.byte_body(), Some(&b"abc"[..]));
        assert_eq!(capture.string_body(), None);
    }

    #[test]
    fn repeated_writer_continues_same_buffer() {
        let mut capture = ResponseCapture::new();
        let mut sink = String::new();
        capture
            .writer(Box::new(&mut sink))
            .expect("writer")
            .write_str("hel")
            .expect("write");
        let mut second_sink = String::new();
        capture
            .writer(Box::new(&mut second_sink))
            .expect("same channel again")
            .write_str("lo")
            .expect("write");

        assert_eq!(capture.string_body(), Some("hello"));
        let err = capture
            .output_stream(Box::new(Vec::new()))
            .err()
            .expect("stream must fail");
        assert!(err.is_illegal_state());
    }

    #[test]
    fn outcome_exposes_final_state() {
        let mut capture = ResponseCapture::new();
        capture.record(header("Vary", "Accept"));
        capture.claim_writer().expect("writer");
        let outcome = capture.into_outcome();
        assert!(outcome.can_cache());
        assert_eq!(outcome.operations().len(), 1);
        assert_eq!(outcome.string_body(), Some(""));
        assert_eq!(outcome.byte_body(), None);
    }
}

//! Response wrapper that forwards every call and records it.

use std::{fmt, io};

use axum::http::header;
use time::OffsetDateTime;

use super::capture::ResponseCapture;
use super::operation::Operation;
use crate::response::{HttpResponse, Locale, ResponseError};

/// What a [`FilteringResponse`] lets through and whether it records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    pub with_last_modified: bool,
    pub with_cookies: bool,
    pub capture: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            with_last_modified: true,
            with_cookies: true,
            capture: false,
        }
    }
}

/// Decorates a response for the duration of one downstream call.
///
/// Suppressed `Last-Modified` values and cookies never reach the inner
/// response. With capture enabled, every forwarded mutation is also handed to a
/// [`ResponseCapture`], and the body channels are teed.
pub struct FilteringResponse<'a> {
    inner: &'a mut dyn HttpResponse,
    options: CaptureOptions,
    capture: Option<ResponseCapture>,
}

impl<'a> FilteringResponse<'a> {
    pub fn new(inner: &'a mut dyn HttpResponse, options: CaptureOptions) -> Self {
        let capture = options.capture.then(ResponseCapture::new);
        Self {
            inner,
            options,
            capture,
        }
    }

    pub fn options(&self) -> CaptureOptions {
        self.options
    }

    pub fn capture(&self) -> Option<&ResponseCapture> {
        self.capture.as_ref()
    }

    /// Release the inner response and keep the recorded state.
    pub fn into_capture(self) -> Option<ResponseCapture> {
        self.capture
    }

    fn record(&mut self, operation: Operation) {
        if let Some(capture) = self.capture.as_mut() {
            capture.record(operation);
        }
    }

    fn invalidate(&mut self) {
        if let Some(capture) = self.capture.as_mut() {
            capture.invalidate();
        }
    }

    fn suppresses(&self, name: &str) -> bool {
        (!self.options.with_last_modified
            && name.eq_ignore_ascii_case(header::LAST_MODIFIED.as_str()))
            || (!self.options.with_cookies
                && name.eq_ignore_ascii_case(header::SET_COOKIE.as_str()))
    }
}

impl HttpResponse for FilteringResponse<'_> {
    fn status(&self) -> u16 {
        self.inner.status()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.inner.header(name)
    }

    fn set_status(&mut self, status: u16) {
        self.inner.set_status(status);
        self.record(Operation::SetStatus { status });
    }

    fn set_status_with_message(&mut self, status: u16, message: &str) {
        self.inner.set_status_with_message(status, message);
        self.record(Operation::SetStatusWithMessage {
            status,
            message: message.to_string(),
        });
    }

    fn set_header(&mut self, name: &str, value: &str) {
        if self.suppresses(name) {
            return;
        }
        self.inner.set_header(name, value);
        self.record(Operation::SetHeader {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    fn add_header(&mut self, name: &str, value: &str) {
        if self.suppresses(name) {
            return;
        }
        self.inner.add_header(name, value);
        self.record(Operation::AddHeader {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    fn set_int_header(&mut self, name: &str, value: i64) {
        if self.suppresses(name) {
            return;
        }
        self.inner.set_int_header(name, value);
        self.record(Operation::SetIntHeader {
            name: name.to_string(),
            value,
        });
    }

    fn add_int_header(&mut self, name: &str, value: i64) {
        if self.suppresses(name) {
            return;
        }
        self.inner.add_int_header(name, value);
        self.record(Operation::AddIntHeader {
            name: name.to_string(),
            value,
        });
    }

    fn set_date_header(&mut self, name: &str, value: OffsetDateTime) {
        if self.suppresses(name) {
            return;
        }
        self.inner.set_date_header(name, value);
        self.record(Operation::SetDateHeader {
            name: name.to_string(),
            value,
        });
    }

    fn add_date_header(&mut self, name: &str, value: OffsetDateTime) {
        if self.suppresses(name) {
            return;
        }
        self.inner.add_date_header(name, value);
        self.record(Operation::AddDateHeader {
            name: name.to_string(),
            value,
        });
    }

    fn set_content_type(&mut self, content_type: &str) {
        self.inner.set_content_type(content_type);
        self.record(Operation::SetContentType {
            content_type: content_type.to_string(),
        });
    }

    fn set_character_encoding(&mut self, charset: &str) {
        self.inner.set_character_encoding(charset);
        self.record(Operation::SetCharacterEncoding {
            charset: charset.to_string(),
        });
    }

    fn set_content_length(&mut self, length: u64) {
        self.inner.set_content_length(length);
        self.record(Operation::SetContentLength { length });
    }

    fn set_locale(&mut self, locale: &Locale) {
        self.inner.set_locale(locale);
        self.record(Operation::SetLocale {
            locale: locale.clone(),
        });
    }

    fn add_cookie(&mut self, cookie: &str) {
        if self.options.with_cookies {
            self.inner.add_cookie(cookie);
        }
    }

    fn send_error(&mut self, status: u16, message: Option<&str>) -> Result<(), ResponseError> {
        self.invalidate();
        self.inner.send_error(status, message)
    }

    fn send_redirect(&mut self, location: &str) -> Result<(), ResponseError> {
        self.invalidate();
        self.inner.send_redirect(location)
    }

    fn reset(&mut self) {
        if let Some(capture) = self.capture.as_mut() {
            capture.reset();
        }
        self.inner.reset();
    }

    fn reset_buffer(&mut self) {
        self.invalidate();
        self.inner.reset_buffer();
    }

    fn flush_buffer(&mut self) -> Result<(), ResponseError> {
        self.inner.flush_buffer()
    }

    fn output_stream(&mut self) -> Result<Box<dyn io::Write + Send + '_>, ResponseError> {
        match self.capture.as_mut() {
            Some(capture) => {
                capture.claim_stream()?;
                let sink = self.inner.output_stream()?;
                Ok(Box::new(capture.output_stream(sink)?))
            }
            None => self.inner.output_stream(),
        }
    }

    fn writer(&mut self) -> Result<Box<dyn fmt::Write + Send + '_>, ResponseError> {
        match self.capture.as_mut() {
            Some(capture) => {
                capture.claim_writer()?;
                let sink = self.inner.writer()?;
                Ok(Box::new(capture.writer(sink)?))
            }
            None => self.inner.writer(),
        }
    }
}

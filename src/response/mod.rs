//! Imperative HTTP response surface.
//!
//! Handlers behind the cache filter mutate a response through [`HttpResponse`]
//! instead of returning a finished value. Every mutation is a method call, which
//! lets a wrapper observe the calls, record them, and replay them later against
//! a fresh response.

mod buffered;
pub mod date;

use std::{fmt, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

pub use buffered::BufferedResponse;

/// Errors raised by response mutators and body accessors.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// The caller broke the response protocol, e.g. asked for a byte stream
    /// after a text writer was handed out.
    #[error("illegal response state: {0}")]
    IllegalState(&'static str),
    #[error("failed to write response text")]
    Format(#[from] fmt::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ResponseError {
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalState(_))
    }
}

/// Language and optional country of a response, e.g. `en` / `GB`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locale {
    language: String,
    country: String,
}

impl Locale {
    pub fn new(language: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            country: country.into(),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    /// BCP 47 style tag used for `Content-Language`.
    pub fn to_language_tag(&self) -> String {
        if self.country.is_empty() {
            self.language.clone()
        } else {
            format!("{}-{}", self.language, self.country)
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_language_tag())
    }
}

/// Mutable view of an outgoing HTTP response.
///
/// The mutator set mirrors what a handler can do to a response before it is
/// sent: status, headers (plain, integer, date), content metadata, cookies,
/// error/redirect shortcuts, resets, and exactly one body channel (either a
/// byte stream or a text writer, never both).
pub trait HttpResponse: Send {
    /// Current status code.
    fn status(&self) -> u16;

    /// First value of the named header, compared case-insensitively.
    fn header(&self, name: &str) -> Option<String>;

    fn contains_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    fn set_status(&mut self, status: u16);

    fn set_status_with_message(&mut self, status: u16, message: &str);

    /// Replace every value of `name` with `value`.
    fn set_header(&mut self, name: &str, value: &str);

    /// Append a value for `name`, keeping existing values.
    fn add_header(&mut self, name: &str, value: &str);

    fn set_int_header(&mut self, name: &str, value: i64);

    fn add_int_header(&mut self, name: &str, value: i64);

    fn set_date_header(&mut self, name: &str, value: OffsetDateTime);

    fn add_date_header(&mut self, name: &str, value: OffsetDateTime);

    fn set_content_type(&mut self, content_type: &str);

    fn set_character_encoding(&mut self, charset: &str);

    fn set_content_length(&mut self, length: u64);

    fn set_locale(&mut self, locale: &Locale);

    /// Append a `Set-Cookie` value.
    fn add_cookie(&mut self, cookie: &str);

    /// Replace the response with an error page for `status`.
    fn send_error(&mut self, status: u16, message: Option<&str>) -> Result<(), ResponseError>;

    /// Replace the response with a temporary redirect to `location`.
    fn send_redirect(&mut self, location: &str) -> Result<(), ResponseError>;

    /// Clear status, headers, cookies, and any buffered body.
    fn reset(&mut self);

    /// Clear the buffered body, keeping status and headers.
    fn reset_buffer(&mut self);

    /// Commit whatever has been written so far.
    fn flush_buffer(&mut self) -> Result<(), ResponseError>;

    /// Binary body channel. Fails with [`ResponseError::IllegalState`] once
    /// [`HttpResponse::writer`] has been used.
    fn output_stream(&mut self) -> Result<Box<dyn io::Write + Send + '_>, ResponseError>;

    /// Text body channel. Fails with [`ResponseError::IllegalState`] once
    /// [`HttpResponse::output_stream`] has been used.
    fn writer(&mut self) -> Result<Box<dyn fmt::Write + Send + '_>, ResponseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locale_tag_includes_country_when_present() {
        assert_eq!(Locale::new("en", "GB").to_language_tag(), "en-GB");
        assert_eq!(Locale::new("fr", "").to_language_tag(), "fr");
    }

    #[test]
    fn illegal_state_is_detectable() {
        let err = ResponseError::IllegalState("writer already in use");
        assert!(err.is_illegal_state());
        assert!(!ResponseError::Format(fmt::Error).is_illegal_state());
    }
}

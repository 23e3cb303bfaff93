//! In-memory [`HttpResponse`] that converts into an axum response.

use std::{fmt, io};

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::{HttpResponse, Locale, ResponseError, date::format_http_date};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyChannel {
    Unused,
    Stream,
    Writer,
}

/// Response buffered in memory until [`BufferedResponse::into_response`].
///
/// Header names keep their insertion order and are compared
/// case-insensitively. `Content-Type`, `Content-Length`, and
/// `Content-Language` are tracked as dedicated fields so the content-type and
/// character-encoding mutators can be combined into one header.
#[derive(Debug)]
pub struct BufferedResponse {
    status: u16,
    status_message: Option<String>,
    headers: Vec<(String, String)>,
    content_type: Option<String>,
    charset: Option<String>,
    content_length: Option<u64>,
    locale: Option<Locale>,
    cookies: Vec<String>,
    channel: BodyChannel,
    bytes: Vec<u8>,
    text: String,
    committed: bool,
}

impl Default for BufferedResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self {
            status: 200,
            status_message: None,
            headers: Vec::new(),
            content_type: None,
            charset: None,
            content_length: None,
            locale: None,
            cookies: Vec::new(),
            channel: BodyChannel::Unused,
            bytes: Vec::new(),
            text: String::new(),
            committed: false,
        }
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    /// Every value recorded for `name`, in insertion order.
    pub fn header_values(&self, name: &str) -> Vec<String> {
        if let Some(value) = self.content_header(name) {
            return vec![value];
        }
        self.headers
            .iter()
            .filter(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
            .collect()
    }

    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    pub fn content_type(&self) -> Option<String> {
        let content_type = self.content_type.as_ref()?;
        match self.charset.as_ref() {
            Some(charset) if !content_type.to_ascii_lowercase().contains("charset=") => {
                Some(format!("{content_type}; charset={charset}"))
            }
            _ => Some(content_type.clone()),
        }
    }

    pub fn character_encoding(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    pub fn locale(&self) -> Option<&Locale> {
        self.locale.as_ref()
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Body bytes regardless of which channel wrote them.
    pub fn body_bytes(&self) -> &[u8] {
        match self.channel {
            BodyChannel::Writer => self.text.as_bytes(),
            BodyChannel::Stream | BodyChannel::Unused => &self.bytes,
        }
    }

    /// Body as text; lossy when a binary body is not valid UTF-8.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(self.body_bytes()).into_owned()
    }

    fn content_header(&self, name: &str) -> Option<String> {
        if name.eq_ignore_ascii_case(header::CONTENT_TYPE.as_str()) {
            self.content_type()
        } else if name.eq_ignore_ascii_case(header::CONTENT_LENGTH.as_str()) {
            self.content_length.map(|length| length.to_string())
        } else if name.eq_ignore_ascii_case(header::CONTENT_LANGUAGE.as_str()) {
            self.locale.as_ref().map(Locale::to_language_tag)
        } else {
            None
        }
    }

    /// Routes content metadata headers to their dedicated fields. Returns
    /// `true` when the header was consumed.
    fn route_content_header(&mut self, name: &str, value: &str) -> bool {
        if name.eq_ignore_ascii_case(header::CONTENT_TYPE.as_str()) {
            self.set_content_type(value);
            true
        } else if name.eq_ignore_ascii_case(header::CONTENT_LENGTH.as_str()) {
            match value.trim().parse::<u64>() {
                Ok(length) => self.content_length = Some(length),
                Err(_) => debug!(value, "ignoring non-numeric content length"),
            }
            true
        } else {
            false
        }
    }

    fn format_date(name: &str, value: OffsetDateTime) -> Option<String> {
        match format_http_date(value) {
            Ok(formatted) => Some(formatted),
            Err(err) => {
                debug!(header = name, error = %err, "dropping unformattable date header");
                None
            }
        }
    }

    fn clear_body(&mut self) {
        self.bytes.clear();
        self.text.clear();
    }

    /// Convert into an axum response. Headers that are not valid HTTP are
    /// dropped with a warning.
    pub fn into_response(self) -> Response {
        let status = match StatusCode::from_u16(self.status) {
            Ok(status) => status,
            Err(_) => {
                warn!(status = self.status, "invalid status code, answering 500");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let content_type = self.content_type();
        let body_len = self.body_bytes().len() as u64;
        let content_length = match self.content_length {
            Some(length) if length != body_len => {
                debug!(
                    declared = length,
                    actual = body_len,
                    "dropping content length that disagrees with the body"
                );
                None
            }
            other => other,
        };
        let content_language = self.locale.as_ref().map(Locale::to_language_tag);

        let body = match self.channel {
            BodyChannel::Writer => Body::from(self.text),
            BodyChannel::Stream | BodyChannel::Unused => Body::from(self.bytes),
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        let headers = response.headers_mut();

        for (name, value) in self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(header = %name, "dropping invalid header"),
            }
        }

        for cookie in self.cookies {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    headers.append(header::SET_COOKIE, value);
                }
                Err(_) => warn!("dropping invalid cookie"),
            }
        }

        if let Some(value) = content_type.and_then(|value| HeaderValue::from_str(&value).ok()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        if let Some(length) = content_length {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        }
        if let Some(value) = content_language.and_then(|value| HeaderValue::from_str(&value).ok())
        {
            headers.insert(header::CONTENT_LANGUAGE, value);
        }

        response
    }
}

impl IntoResponse for BufferedResponse {
    fn into_response(self) -> Response {
        BufferedResponse::into_response(self)
    }
}

impl HttpResponse for BufferedResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn header(&self, name: &str) -> Option<String> {
        if let Some(value) = self.content_header(name) {
            return Some(value);
        }
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    fn set_status(&mut self, status: u16) {
        self.status = status;
        self.status_message = None;
    }

    fn set_status_with_message(&mut self, status: u16, message: &str) {
        self.status = status;
        self.status_message = Some(message.to_string());
    }

    fn set_header(&mut self, name: &str, value: &str) {
        if self.route_content_header(name, value) {
            return;
        }
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn add_header(&mut self, name: &str, value: &str) {
        if self.route_content_header(name, value) {
            return;
        }
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn set_int_header(&mut self, name: &str, value: i64) {
        self.set_header(name, &value.to_string());
    }

    fn add_int_header(&mut self, name: &str, value: i64) {
        self.add_header(name, &value.to_string());
    }

    fn set_date_header(&mut self, name: &str, value: OffsetDateTime) {
        if let Some(formatted) = Self::format_date(name, value) {
            self.set_header(name, &formatted);
        }
    }

    fn add_date_header(&mut self, name: &str, value: OffsetDateTime) {
        if let Some(formatted) = Self::format_date(name, value) {
            self.add_header(name, &formatted);
        }
    }

    fn set_content_type(&mut self, content_type: &str) {
        let mut parts = content_type.split(';');
        let media_type = parts.next().unwrap_or_default().trim();
        for parameter in parts {
            let parameter = parameter.trim();
            if let Some((key, value)) = parameter.split_once('=') {
                if key.trim().eq_ignore_ascii_case("charset") {
                    self.charset = Some(value.trim().trim_matches('"').to_string());
                }
            }
        }
        self.content_type = Some(media_type.to_string());
    }

    fn set_character_encoding(&mut self, charset: &str) {
        self.charset = Some(charset.to_string());
    }

    fn set_content_length(&mut self, length: u64) {
        self.content_length = Some(length);
    }

    fn set_locale(&mut self, locale: &Locale) {
        self.locale = Some(locale.clone());
    }

    fn add_cookie(&mut self, cookie: &str) {
        self.cookies.push(cookie.to_string());
    }

    fn send_error(&mut self, status: u16, message: Option<&str>) -> Result<(), ResponseError> {
        let reason = match message {
            Some(message) => message.to_string(),
            None => StatusCode::from_u16(status)
                .ok()
                .and_then(|code| code.canonical_reason())
                .unwrap_or("Error")
                .to_string(),
        };
        self.status = status;
        self.status_message = None;
        self.content_length = None;
        self.clear_body();
        self.content_type = Some("text/plain".to_string());
        self.charset = Some("utf-8".to_string());
        match self.channel {
            BodyChannel::Writer => self.text.push_str(&reason),
            BodyChannel::Stream | BodyChannel::Unused => {
                self.bytes.extend_from_slice(reason.as_bytes())
            }
        }
        self.committed = true;
        Ok(())
    }

    fn send_redirect(&mut self, location: &str) -> Result<(), ResponseError> {
        self.status = StatusCode::FOUND.as_u16();
        self.status_message = None;
        self.clear_body();
        self.content_length = None;
        self.set_header(header::LOCATION.as_str(), location);
        self.committed = true;
        Ok(())
    }

    fn reset(&mut self) {
        let committed = self.committed;
        *self = Self::new();
        self.committed = committed;
    }

    fn reset_buffer(&mut self) {
        self.clear_body();
    }

    fn flush_buffer(&mut self) -> Result<(), ResponseError> {
        self.committed = true;
        Ok(())
    }

    fn output_stream(&mut self) -> Result<Box<dyn io::Write + Send + '_>, ResponseError> {
        if self.channel == BodyChannel::Writer {
            return Err(ResponseError::IllegalState(
                "writer already obtained for this response",
            ));
        }
        self.channel = BodyChannel::Stream;
        Ok(Box::new(&mut self.bytes))
    }

    fn writer(&mut self) -> Result<Box<dyn fmt::Write + Send + '_>, ResponseError> {
        if self.channel == BodyChannel::Stream {
            return Err(ResponseError::IllegalState(
                "output stream already obtained for this response",
            ));
        }
        self.channel = BodyChannel::Writer;
        Ok(Box::new(&mut self.text))
    }
}

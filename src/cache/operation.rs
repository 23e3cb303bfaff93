//! Typed record of one response mutation.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::response::{HttpResponse, Locale};

/// One cacheable call made against an [`HttpResponse`].
///
/// Capture builds these, replay dispatches them back through [`Operation::apply`],
/// so both directions share this single match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    SetStatus {
        status: u16,
    },
    SetStatusWithMessage {
        status: u16,
        message: String,
    },
    SetHeader {
        name: String,
        value: String,
    },
    AddHeader {
        name: String,
        value: String,
    },
    SetIntHeader {
        name: String,
        value: i64,
    },
    AddIntHeader {
        name: String,
        value: i64,
    },
    SetDateHeader {
        name: String,
        #[serde(with = "time::serde::rfc3339")]
        value: OffsetDateTime,
    },
    AddDateHeader {
        name: String,
        #[serde(with = "time::serde::rfc3339")]
        value: OffsetDateTime,
    },
    SetContentType {
        content_type: String,
    },
    SetCharacterEncoding {
        charset: String,
    },
    SetContentLength {
        length: u64,
    },
    SetLocale {
        locale: Locale,
    },
}

impl Operation {
    /// Header name touched by this operation, if it is a header mutator.
    pub fn header_name(&self) -> Option<&str> {
        match self {
            Self::SetHeader { name, .. }
            | Self::AddHeader { name, .. }
            | Self::SetIntHeader { name, .. }
            | Self::AddIntHeader { name, .. }
            | Self::SetDateHeader { name, .. }
            | Self::AddDateHeader { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Status code carried by a status operation.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::SetStatus { status } | Self::SetStatusWithMessage { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Issue the recorded call against `response`.
    pub fn apply(&self, response: &mut dyn HttpResponse) {
        match self {
            Self::SetStatus { status } => response.set_status(*status),
            Self::SetStatusWithMessage { status, message } => {
                response.set_status_with_message(*status, message)
            }
            Self::SetHeader { name, value } => response.set_header(name, value),
            Self::AddHeader { name, value } => response.add_header(name, value),
            Self::SetIntHeader { name, value } => response.set_int_header(name, *value),
            Self::AddIntHeader { name, value } => response.add_int_header(name, *value),
            Self::SetDateHeader { name, value } => response.set_date_header(name, *value),
            Self::AddDateHeader { name, value } => response.add_date_header(name, *value),
            Self::SetContentType { content_type } => response.set_content_type(content_type),
            Self::SetCharacterEncoding { charset } => response.set_character_encoding(charset),
            Self::SetContentLength { length } => response.set_content_length(*length),
            Self::SetLocale { locale } => response.set_locale(locale),
        }
    }
}

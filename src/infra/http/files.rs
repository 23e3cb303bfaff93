//! Content served from the filesystem root.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use mime_guess::Mime;

use super::HttpState;
use crate::application::error::{AppError, ErrorReport};
use crate::cache::ContentError;
use crate::infra::error::InfraError;

const SOURCE: &str = "infra::http::files::serve_content";

/// Serve the file behind the request path.
pub async fn serve_content(State(state): State<HttpState>, uri: Uri) -> Response {
    let path = uri.path();
    match state.content.read(path).await {
        Ok(Some(bytes)) => {
            let mime = mime_guess::from_path(content_name(path)).first_or_octet_stream();
            build_response(bytes, mime)
        }
        Ok(None) => not_found_response(),
        Err(ContentError::InvalidPath(detail)) => {
            let mut response = StatusCode::BAD_REQUEST.into_response();
            ErrorReport::from_message(SOURCE, StatusCode::BAD_REQUEST, detail)
                .attach(&mut response);
            response
        }
        Err(err) => AppError::from(InfraError::from(err)).into_response(),
    }
}

/// Name used for the mime lookup; directory requests serve their index page.
fn content_name(path: &str) -> &str {
    if path.ends_with('/') {
        "index.html"
    } else {
        path
    }
}

fn not_found_response() -> Response {
    let mut response = StatusCode::NOT_FOUND.into_response();
    ErrorReport::from_message(SOURCE, StatusCode::NOT_FOUND, "Content not found")
        .attach(&mut response);
    response
}

fn build_response(bytes: Bytes, mime: Mime) -> Response {
    let len = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }

    response
}

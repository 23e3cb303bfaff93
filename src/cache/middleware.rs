//! axum adapter for [`CacheControlFilter`].
//!
//! The filter drives an imperative [`HttpResponse`]; this layer runs the inner
//! axum service, buffers its response, and re-issues it as mutator calls so
//! the filter can record and later replay it.

use std::io::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::{debug, instrument, warn};

use super::config::CacheConfig;
use super::filter::{CacheControlFilter, CacheRequest, FilterChain, FilterError};
use crate::application::error::HttpError;
use crate::response::{BufferedResponse, HttpResponse};

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub config: CacheConfig,
    pub filter: Arc<CacheControlFilter>,
}

/// Middleware applying path rules and the response cache to GET requests.
///
/// Requests without a matching rule go straight to the inner service.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.config.enabled {
        return next.run(request).await;
    }

    let cache_request = CacheRequest::from_request(&request);
    if cache.filter.rule_for(&cache_request).is_none() {
        return next.run(request).await;
    }

    let mut response = BufferedResponse::new();
    let chain = AxumChain::new(request, next, cache.config.max_body_bytes);
    match cache
        .filter
        .handle(&cache_request, &mut response, chain)
        .await
    {
        Ok(disposition) => {
            debug!(cache = "response", ?disposition, "request filtered");
            response.into_response()
        }
        Err(err) => HttpError::from(err).into_response(),
    }
}

/// Downstream chain that runs the rest of the axum stack.
pub struct AxumChain {
    request: Request<Body>,
    next: Next,
    body_limit: usize,
}

impl AxumChain {
    pub fn new(request: Request<Body>, next: Next, body_limit: usize) -> Self {
        Self {
            request,
            next,
            body_limit,
        }
    }
}

#[async_trait]
impl FilterChain for AxumChain {
    async fn proceed(
        self,
        _request: &CacheRequest,
        response: &mut dyn HttpResponse,
    ) -> Result<(), FilterError> {
        let downstream = self.next.run(self.request).await;
        let (parts, body) = downstream.into_parts();

        let bytes = match Limited::new(body, self.body_limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) if err.is::<LengthLimitError>() => {
                return Err(FilterError::BodyTooLarge {
                    limit: self.body_limit,
                });
            }
            Err(err) => return Err(FilterError::downstream(err)),
        };

        emit(parts.status, &parts.headers, &bytes, response)
    }
}

fn emit(
    status: StatusCode,
    headers: &axum::http::HeaderMap,
    body: &[u8],
    response: &mut dyn HttpResponse,
) -> Result<(), FilterError> {
    response.set_status(status.as_u16());

    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            warn!(header = %name, "dropping non-text header from downstream response");
            continue;
        };
        if name == header::CONTENT_TYPE {
            response.set_content_type(value);
        } else if name == header::CONTENT_LENGTH {
            match value.trim().parse::<u64>() {
                Ok(length) => response.set_content_length(length),
                Err(_) => debug!(value, "ignoring malformed content length"),
            }
        } else if name == header::SET_COOKIE {
            response.add_cookie(value);
        } else {
            response.add_header(name.as_str(), value);
        }
    }

    if !body.is_empty() {
        response.output_stream()?.write_all(body)?;
    }
    Ok(())
}

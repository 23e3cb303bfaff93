//! Per-request cache control.

use std::error::Error as StdError;
use std::sync::Arc;
use std::{fmt, io};

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, Request, header};
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::clock::Clock;
use super::keys::CacheKey;
use super::rules::{Rule, RuleResolver};
use super::source::LastModifiedSource;
use super::store::CachedResponseStore;
use super::wrapper::{CaptureOptions, FilteringResponse};
use crate::response::date::{parse_http_date, truncate_to_seconds};
use crate::response::{HttpResponse, ResponseError};

/// Marker header on short-circuited conditional GETs.
pub const X_CACHE_CONTROL_FILTER_CODE: &str = "X-CacheControlFilterCode";

pub const METRIC_NOT_MODIFIED_TOTAL: &str = "rewind_not_modified_total";

const DATE: &str = "Date";
const EXPIRES: &str = "Expires";
const LAST_MODIFIED: &str = "Last-Modified";

#[derive(Debug, Error)]
pub enum FilterError {
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
    #[error("downstream handler failed")]
    Downstream {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl From<fmt::Error> for FilterError {
    fn from(err: fmt::Error) -> Self {
        Self::Response(err.into())
    }
}

impl From<io::Error> for FilterError {
    fn from(err: io::Error) -> Self {
        Self::Response(err.into())
    }
}

impl FilterError {
    pub fn downstream(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Downstream {
            source: source.into(),
        }
    }
}

/// The parts of a request the filter looks at.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
}

impl CacheRequest {
    pub fn new(method: Method, path: impl Into<String>, query: Option<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path, None)
    }

    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            query: request.uri().query().map(str::to_string),
            headers: request.headers().clone(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Add a header; invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            header::HeaderName::from_bytes(name.as_bytes()),
            header::HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Parsed `If-Modified-Since`, when present and after the epoch.
    pub fn if_modified_since(&self) -> Option<OffsetDateTime> {
        self.header(header::IF_MODIFIED_SINCE.as_str())
            .and_then(parse_http_date)
            .filter(|since| *since > OffsetDateTime::UNIX_EPOCH)
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_parts(&self.path, self.query.as_deref())
    }
}

/// The rest of the request pipeline, run at most once.
#[async_trait]
pub trait FilterChain: Send {
    async fn proceed(
        self,
        request: &CacheRequest,
        response: &mut dyn HttpResponse,
    ) -> Result<(), FilterError>;
}

/// [`FilterChain`] backed by a synchronous closure.
pub struct FnChain<F>(F);

pub fn from_fn<F>(handler: F) -> FnChain<F>
where
    F: FnOnce(&CacheRequest, &mut dyn HttpResponse) -> Result<(), FilterError> + Send,
{
    FnChain(handler)
}

#[async_trait]
impl<F> FilterChain for FnChain<F>
where
    F: FnOnce(&CacheRequest, &mut dyn HttpResponse) -> Result<(), FilterError> + Send,
{
    async fn proceed(
        self,
        request: &CacheRequest,
        response: &mut dyn HttpResponse,
    ) -> Result<(), FilterError> {
        (self.0)(request, response)
    }
}

/// What [`CacheControlFilter::handle`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Not a GET, or no rule: forwarded untouched.
    Bypassed,
    /// Answered 304 without running the chain.
    NotModified,
    /// Served from a stored entry without running the chain.
    Replayed,
    /// Rule applied, chain ran, nothing captured.
    Forwarded,
    /// Chain ran under capture; `stored` tells whether an entry was written.
    Captured { stored: bool },
}

/// Applies path rules, conditional GETs, and the response cache around a
/// downstream chain.
pub struct CacheControlFilter {
    rules: Arc<RuleResolver>,
    store: CachedResponseStore,
    content: Arc<dyn LastModifiedSource>,
    clock: Arc<dyn Clock>,
}

impl CacheControlFilter {
    pub fn new(
        rules: Arc<RuleResolver>,
        store: CachedResponseStore,
        content: Arc<dyn LastModifiedSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rules,
            store,
            content,
            clock,
        }
    }

    pub fn rules(&self) -> &Arc<RuleResolver> {
        &self.rules
    }

    /// Rule that applies to `request`; only GET requests are eligible.
    pub fn rule_for(&self, request: &CacheRequest) -> Option<Rule> {
        if request.method() != Method::GET {
            return None;
        }
        self.rules.resolve(request.path())
    }

    pub async fn handle<C>(
        &self,
        request: &CacheRequest,
        response: &mut dyn HttpResponse,
        next: C,
    ) -> Result<Disposition, FilterError>
    where
        C: FilterChain,
    {
        let Some(rule) = self.rule_for(request) else {
            next.proceed(request, response).await?;
            return Ok(Disposition::Bypassed);
        };

        let now = self.clock.now();
        response.set_date_header(DATE, now);

        let mut not_modified = false;
        if let Some(last_modified) = self.last_modified(request.path()).await {
            if rule.with_last_modified() {
                response.set_date_header(LAST_MODIFIED, last_modified);
            }
            if let Some(since) = request.if_modified_since() {
                not_modified = truncate_to_seconds(last_modified) <= since;
            }
        }

        if let Some(offset) = rule.expires_offset() {
            match now.checked_add(offset) {
                Some(expires) => response.set_date_header(EXPIRES, expires),
                None => warn!(path = request.path(), %rule, "expires offset out of range, header skipped"),
            }
        }
        for (name, value) in &rule.extra_headers {
            response.set_header(name, value);
        }

        if not_modified {
            counter!(METRIC_NOT_MODIFIED_TOTAL).increment(1);
            debug!(path = request.path(), "resource not modified");
            response.set_header(X_CACHE_CONTROL_FILTER_CODE, "304");
            response.set_status(304);
            response.flush_buffer()?;
            return Ok(Disposition::NotModified);
        }

        let ttl = rule.max_age();
        let key = request.cache_key();
        if ttl.is_some() {
            if let Some(entry) = self.store.load(&key) {
                entry.replay(response)?;
                return Ok(Disposition::Replayed);
            }
        }

        let options = CaptureOptions {
            with_last_modified: rule.with_last_modified(),
            with_cookies: rule.with_cookies(),
            capture: ttl.is_some(),
        };
        if options.with_last_modified && options.with_cookies && !options.capture {
            next.proceed(request, response).await?;
            return Ok(Disposition::Forwarded);
        }

        let mut wrapped = FilteringResponse::new(response, options);
        next.proceed(request, &mut wrapped).await?;

        match (ttl, wrapped.into_capture()) {
            (Some(ttl), Some(capture)) => {
                let stored = self.store.save(key, capture.into_outcome(), ttl);
                Ok(Disposition::Captured { stored })
            }
            _ => Ok(Disposition::Forwarded),
        }
    }

    async fn last_modified(&self, resource: &str) -> Option<OffsetDateTime> {
        match self.content.last_modified(resource).await {
            Ok(Some(timestamp)) if timestamp > OffsetDateTime::UNIX_EPOCH => Some(timestamp),
            Ok(_) => None,
            Err(err) => {
                debug!(resource, error = %err, "last-modified lookup failed");
                None
            }
        }
    }
}

//! Rewind response cache.
//!
//! A filter in front of request handlers that:
//!
//! - **Applies path rules**: response headers, `Expires`, and suppression of
//!   `Last-Modified` and cookies, selected per path (see [`rules`]).
//! - **Answers conditional GETs**: `304` when the content store reports the
//!   resource unchanged since `If-Modified-Since`.
//! - **Records and replays responses**: every mutation a handler makes is
//!   captured as an [`Operation`] log plus body, stored with a TTL, and replayed
//!   on later requests for the same target.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! store_limit = 1024
//! paths = ["p;.requestCache:3600;Cache-Control:no-cache"]
//! patterns = ["root;.*html$;.requestCache:60"]
//! ```

mod capture;
mod clock;
mod config;
mod filter;
mod keys;
mod lock;
mod middleware;
mod operation;
mod replay;
pub mod rules;
mod source;
mod store;
mod tee;
mod wrapper;

pub use capture::{CaptureOutcome, CapturedBody, ResponseCapture, is_cacheable_header};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use filter::{
    CacheControlFilter, CacheRequest, Disposition, FilterChain, FilterError, FnChain,
    METRIC_NOT_MODIFIED_TOTAL, X_CACHE_CONTROL_FILTER_CODE, from_fn,
};
pub use keys::CacheKey;
pub use middleware::{AxumChain, CacheState, response_cache_layer};
pub use operation::Operation;
pub use replay::replay;
pub use rules::{Rule, RuleConfigError, RuleResolver, RuleTable};
pub use source::{ContentError, LastModifiedSource};
pub use store::{
    CacheEntry, CacheManager, CacheScope, CacheStoreError, CachedResponseStore, KeyValueCache,
    METRIC_CACHE_EXPIRED_TOTAL, METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL,
    METRIC_CACHE_STORE_ERROR_TOTAL, METRIC_CACHE_STORE_TOTAL, MemoryCache, MemoryCacheManager,
};
pub use tee::{TeeOutputStream, TeeWriter};
pub use wrapper::{CaptureOptions, FilteringResponse};

mod files;
mod middleware;

use std::sync::Arc;

use axum::{Router, http::StatusCode, middleware as axum_middleware, routing::get};

pub use files::serve_content;
pub use middleware::{RequestContext, log_responses, set_request_context};

use crate::cache::{
    CacheConfig, CacheControlFilter, CacheManager, CacheState, CachedResponseStore, Clock,
    MemoryCacheManager, RuleConfigError, RuleResolver, SystemClock, response_cache_layer,
};
use crate::config::Settings;
use crate::infra::content::FsContentStore;

#[derive(Clone)]
pub struct HttpState {
    pub content: Arc<FsContentStore>,
    pub cache: Option<CacheState>,
}

impl HttpState {
    /// Wire the content store and, when enabled, the response cache filter.
    pub fn from_settings(settings: &Settings) -> Result<Self, RuleConfigError> {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: &Settings, clock: Arc<dyn Clock>) -> Result<Self, RuleConfigError> {
        let content = Arc::new(FsContentStore::new(settings.content.root.clone()));
        let config = CacheConfig::from(&settings.cache);

        let cache = if config.enabled {
            let rules = Arc::new(RuleResolver::from_config(&config.paths, &config.patterns)?);
            let manager = MemoryCacheManager::new(config.store_limit_non_zero());
            let store = CachedResponseStore::new(
                manager.cache(&config.cache_name, config.scope),
                Arc::clone(&clock),
            );
            let filter = CacheControlFilter::new(rules, store, content.clone(), clock);
            Some(CacheState {
                config,
                filter: Arc::new(filter),
            })
        } else {
            None
        };

        Ok(Self { content, cache })
    }
}

/// Router serving the content root, with the response cache in front of it.
pub fn build_router(state: HttpState) -> Router {
    let cached_routes = Router::new().fallback(get(serve_content));

    let cached_routes = if let Some(cache_state) = state.cache.clone() {
        cached_routes.layer(axum_middleware::from_fn_with_state(
            cache_state,
            response_cache_layer,
        ))
    } else {
        cached_routes
    };

    let health_routes = Router::new().route("/_health", get(|| async { StatusCode::NO_CONTENT }));

    health_routes
        .merge(cached_routes)
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

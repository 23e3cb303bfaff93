//! Cache key for stored responses.

use std::fmt;

use axum::http::Uri;
use serde::{Deserialize, Serialize};

/// Literal request target: `path?query`.
///
/// No normalization is applied, so `/a?x=1&y=2` and `/a?y=2&x=1` are distinct
/// entries. A request without a query renders as `path?`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_parts(path: &str, query: Option<&str>) -> Self {
        Self(format!("{path}?{}", query.unwrap_or_default()))
    }

    pub fn from_uri(uri: &Uri) -> Self {
        Self::from_parts(uri.path(), uri.query())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_path_and_query() {
        let key = CacheKey::from_parts("/p/a.html", Some("v=2"));
        assert_eq!(key.as_str(), "/p/a.html?v=2");
    }

    #[test]
    fn missing_query_is_empty() {
        assert_eq!(CacheKey::from_parts("/p/a.html", None).as_str(), "/p/a.html?");
    }

    #[test]
    fn no_normalization() {
        let a = CacheKey::from_parts("/a", Some("x=1&y=2"));
        let b = CacheKey::from_parts("/a", Some("y=2&x=1"));
        assert_ne!(a, b);
    }

    #[test]
    fn from_uri_uses_raw_target() {
        let uri: Uri = "/dev/app.js?cb=%20x".parse().expect("uri");
        assert_eq!(CacheKey::from_uri(&uri).to_string(), "/dev/app.js?cb=%20x");
    }
}

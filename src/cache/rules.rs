//! Path policy: which requests get cached and which headers they receive.
//!
//! Rules come from two ordered string lists:
//!
//! - subtree rules, `segment;key:value;...`, apply to every path under
//!   `/segment/`;
//! - pattern rules, `segment;regex;key:value;...`, are tried in order against
//!   the full path. Patterns for top-level resources (`/index.html`) are
//!   registered under the `root` segment.
//!
//! Recognized keys are `.lastmodified` and `.cookies` (value `unset` disables
//! them), `.requestCache` (cache TTL in seconds), and `.expires` (`Expires`
//! offset in seconds). Keys without a leading dot are response headers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use regex::Regex;
use thiserror::Error;
use time::Duration;
use tracing::{info, warn};

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::rules";

/// Segment under which top-level resource patterns are registered.
pub const ROOT_SEGMENT: &str = "root";

const KEY_LAST_MODIFIED: &str = ".lastmodified";
const KEY_COOKIES: &str = ".cookies";
const KEY_REQUEST_CACHE: &str = ".requestCache";
const KEY_EXPIRES: &str = ".expires";
const UNSET: &str = "unset";
/// Upper bound for `.requestCache` and `.expires`: one hundred years.
const MAX_RULE_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

pub const DEFAULT_CACHE_PATHS: [&str; 3] = [
    "dev;.lastmodified:unset;.cookies:unset;.requestCache:3600;.expires:3456000;Vary: Accept-Encoding",
    "devwidgets;.lastmodified:unset;.cookies:unset;.requestCache:3600;.expires:3456000;Vary: Accept-Encoding",
    "p;Cache-Control:no-cache",
];

pub const DEFAULT_CACHE_PATTERNS: [&str; 2] = [
    "root;.*(js|css)$;.lastmodified:unset;.cookies:unset;.requestCache:3600;.expires:3456000;Vary: Accept-Encoding",
    "root;.*html$;.lastmodified:unset;.cookies:unset;.requestCache:3600;.expires:3456000;Vary: Accept-Encoding",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleConfigError {
    #[error("rule `{entry}` has no path segment")]
    MissingSegment { entry: String },
    #[error("pattern rule `{entry}` has no regular expression")]
    MissingPattern { entry: String },
    #[error("rule `{entry}`: `{field}` is not a `key:value` pair")]
    MissingSeparator { entry: String, field: String },
    #[error("rule `{entry}`: invalid regular expression `{pattern}`: {reason}")]
    InvalidPattern {
        entry: String,
        pattern: String,
        reason: String,
    },
    #[error("rule `{entry}`: `{key}` expects whole seconds up to 100 years, got `{value}`")]
    InvalidSeconds {
        entry: String,
        key: String,
        value: String,
    },
}

/// Policy applied to a matching request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rule {
    /// Response cache TTL; zero disables caching.
    pub max_age_seconds: u64,
    pub suppress_last_modified: bool,
    pub suppress_cookies: bool,
    pub expires_offset_seconds: Option<u64>,
    /// Literal headers in configuration order.
    pub extra_headers: Vec<(String, String)>,
}

impl Rule {
    /// Cache TTL, if caching is enabled.
    pub fn max_age(&self) -> Option<Duration> {
        (self.max_age_seconds > 0).then(|| Duration::seconds(saturating_i64(self.max_age_seconds)))
    }

    pub fn expires_offset(&self) -> Option<Duration> {
        self.expires_offset_seconds
            .map(|seconds| Duration::seconds(saturating_i64(seconds)))
    }

    pub fn with_last_modified(&self) -> bool {
        !self.suppress_last_modified
    }

    pub fn with_cookies(&self) -> bool {
        !self.suppress_cookies
    }

    fn parse(entry: &str, fields: &[&str]) -> Result<Self, RuleConfigError> {
        let mut rule = Rule::default();
        for field in fields {
            let Some((key, value)) = field.split_once(':') else {
                return Err(RuleConfigError::MissingSeparator {
                    entry: entry.to_string(),
                    field: field.to_string(),
                });
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                KEY_LAST_MODIFIED => rule.suppress_last_modified = value == UNSET,
                KEY_COOKIES => rule.suppress_cookies = value == UNSET,
                KEY_REQUEST_CACHE => rule.max_age_seconds = parse_seconds(entry, key, value)?,
                KEY_EXPIRES => rule.expires_offset_seconds = Some(parse_seconds(entry, key, value)?),
                _ if key.starts_with('.') => {
                    warn!(rule = entry, key, "ignoring unknown rule directive");
                }
                _ => rule.set_header(key, value),
            }
        }
        Ok(rule)
    }

    fn set_header(&mut self, name: &str, value: &str) {
        match self
            .extra_headers
            .iter_mut()
            .find(|(existing, _)| existing == name)
        {
            Some((_, existing)) => *existing = value.to_string(),
            None => self
                .extra_headers
                .push((name.to_string(), value.to_string())),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache={}s", self.max_age_seconds)?;
        if let Some(expires) = self.expires_offset_seconds {
            write!(f, " expires=+{expires}s")?;
        }
        if self.suppress_last_modified {
            f.write_str(" last-modified=unset")?;
        }
        if self.suppress_cookies {
            f.write_str(" cookies=unset")?;
        }
        for (name, value) in &self.extra_headers {
            write!(f, " [{name}: {value}]")?;
        }
        Ok(())
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn parse_seconds(entry: &str, key: &str, value: &str) -> Result<u64, RuleConfigError> {
    value
        .parse::<u64>()
        .ok()
        .filter(|seconds| *seconds <= MAX_RULE_SECONDS)
        .ok_or_else(|| RuleConfigError::InvalidSeconds {
            entry: entry.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        })
}

fn split_fields(entry: &str) -> Vec<&str> {
    entry
        .split(';')
        .filter(|field| !field.trim().is_empty())
        .collect()
}

#[derive(Debug, Clone)]
struct PatternRule {
    source: String,
    regex: Regex,
    rule: Rule,
}

/// Immutable rule set built from configuration.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    subtrees: HashMap<String, Rule>,
    patterns: HashMap<String, Vec<PatternRule>>,
}

impl RuleTable {
    /// Build a table; any malformed entry rejects the whole configuration.
    pub fn parse<P, Q>(paths: P, patterns: Q) -> Result<Self, RuleConfigError>
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        Q: IntoIterator,
        Q::Item: AsRef<str>,
    {
        let mut table = RuleTable::default();

        for entry in paths {
            let entry = entry.as_ref();
            let fields = split_fields(entry);
            let Some((segment, rest)) = fields.split_first() else {
                return Err(RuleConfigError::MissingSegment {
                    entry: entry.to_string(),
                });
            };
            let rule = Rule::parse(entry, rest)?;
            table.subtrees.insert(segment.trim().to_string(), rule);
        }

        for entry in patterns {
            let entry = entry.as_ref();
            let fields = split_fields(entry);
            let Some((segment, rest)) = fields.split_first() else {
                return Err(RuleConfigError::MissingSegment {
                    entry: entry.to_string(),
                });
            };
            let Some((pattern, rest)) = rest.split_first() else {
                return Err(RuleConfigError::MissingPattern {
                    entry: entry.to_string(),
                });
            };
            let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|err| {
                RuleConfigError::InvalidPattern {
                    entry: entry.to_string(),
                    pattern: pattern.to_string(),
                    reason: err.to_string(),
                }
            })?;
            let rule = Rule::parse(entry, rest)?;
            table
                .patterns
                .entry(segment.trim().to_string())
                .or_default()
                .push(PatternRule {
                    source: pattern.to_string(),
                    regex,
                    rule,
                });
        }

        Ok(table)
    }

    pub fn defaults() -> Result<Self, RuleConfigError> {
        Self::parse(DEFAULT_CACHE_PATHS, DEFAULT_CACHE_PATTERNS)
    }

    /// Rule for `path`, if any.
    ///
    /// Top-level resources only consult `root` patterns. Deeper paths use the
    /// subtree rule of their first segment, falling back to that segment's
    /// patterns. Within a pattern list the first match wins.
    pub fn resolve(&self, path: &str) -> Option<&Rule> {
        let trimmed = path.trim_start_matches('/');
        if trimmed.is_empty() {
            return None;
        }

        let nested = trimmed
            .split_once('/')
            .filter(|(_, rest)| !rest.trim_start_matches('/').is_empty());

        match nested {
            None => self.match_patterns(ROOT_SEGMENT, path),
            Some((segment, _)) => self
                .subtrees
                .get(segment)
                .or_else(|| self.match_patterns(segment, path)),
        }
    }

    fn match_patterns(&self, segment: &str, path: &str) -> Option<&Rule> {
        self.patterns
            .get(segment)?
            .iter()
            .find(|pattern| pattern.regex.is_match(path))
            .map(|pattern| &pattern.rule)
    }

    pub fn subtree_count(&self) -> usize {
        self.subtrees.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.values().map(Vec::len).sum()
    }

    /// Human readable listing, one rule per line, sorted by segment.
    pub fn describe(&self) -> String {
        let subtrees: BTreeMap<_, _> = self.subtrees.iter().collect();
        let patterns: BTreeMap<_, _> = self.patterns.iter().collect();

        let mut out = String::new();
        for (segment, rule) in subtrees {
            out.push_str(&format!("/{segment}/** {rule}\n"));
        }
        for (segment, list) in patterns {
            for pattern in list {
                out.push_str(&format!(
                    "{segment} ~ {} {}\n",
                    pattern.source, pattern.rule
                ));
            }
        }
        out
    }
}

/// Shared, swappable [`RuleTable`].
///
/// Readers take an `Arc` snapshot; reconfiguration replaces the snapshot only
/// when the new configuration parses completely.
#[derive(Debug)]
pub struct RuleResolver {
    table: RwLock<Arc<RuleTable>>,
}

impl RuleResolver {
    pub fn new(table: RuleTable) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    pub fn from_config<P, Q>(paths: P, patterns: Q) -> Result<Self, RuleConfigError>
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        Q: IntoIterator,
        Q::Item: AsRef<str>,
    {
        RuleTable::parse(paths, patterns).map(Self::new)
    }

    pub fn snapshot(&self) -> Arc<RuleTable> {
        Arc::clone(&rw_read(&self.table, SOURCE, "snapshot"))
    }

    pub fn resolve(&self, path: &str) -> Option<Rule> {
        self.snapshot().resolve(path).cloned()
    }

    pub fn reconfigure<P, Q>(&self, paths: P, patterns: Q) -> Result<(), RuleConfigError>
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        Q: IntoIterator,
        Q::Item: AsRef<str>,
    {
        let table = RuleTable::parse(paths, patterns)?;
        info!(
            subtrees = table.subtree_count(),
            patterns = table.pattern_count(),
            "cache rules reconfigured"
        );
        *rw_write(&self.table, SOURCE, "reconfigure") = Arc::new(table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_PATTERNS: [&str; 0] = [];

    fn table(paths: &[&str], patterns: &[&str]) -> RuleTable {
        RuleTable::parse(paths, patterns).expect("valid rules")
    }

    #[test]
    fn parses_default_rules() {
        let table = RuleTable::defaults().expect("defaults parse");
        let dev = table.resolve("/dev/lib/app.js").expect("dev rule");
        assert_eq!(dev.max_age_seconds, 3600);
        assert!(dev.suppress_last_modified);
        assert!(dev.suppress_cookies);
        assert_eq!(dev.expires_offset_seconds, Some(3_456_000));
        assert_eq!(
            dev.extra_headers,
            vec![("Vary".to_string(), "Accept-Encoding".to_string())]
        );

        let p = table.resolve("/p/a.html").expect("p rule");
        assert_eq!(p.max_age_seconds, 0);
        assert_eq!(
            p.extra_headers,
            vec![("Cache-Control".to_string(), "no-cache".to_string())]
        );
    }

    #[test]
    fn subtree_beats_root_pattern() {
        let table = table(
            &["dev;.requestCache:60"],
            &["root;.*js$;.requestCache:5", "dev;.*js$;.requestCache:7"],
        );
        let rule = table.resolve("/dev/widgets/x.js").expect("rule");
        assert_eq!(rule.max_age_seconds, 60);
    }

    #[test]
    fn top_level_uses_root_patterns_only() {
        let table = table(&["index.html;.requestCache:9"], &["root;.*html$;.requestCache:5"]);
        assert_eq!(table.resolve("/index.html").expect("rule").max_age_seconds, 5);
        assert!(table.resolve("/readme.txt").is_none());
    }

    #[test]
    fn empty_path_has_no_rule() {
        let table = table(&["dev;.requestCache:1"], &["root;.*;.requestCache:1"]);
        assert!(table.resolve("/").is_none());
        assert!(table.resolve("").is_none());
    }

    #[test]
    fn segment_patterns_match_full_path_in_order() {
        let table = table(
            &[],
            &[
                "lib;/lib/.*\\.min\\.js;.requestCache:100",
                "lib;/lib/.*\\.js;.requestCache:10",
            ],
        );
        assert_eq!(table.resolve("/lib/a.min.js").expect("rule").max_age_seconds, 100);
        assert_eq!(table.resolve("/lib/a.js").expect("rule").max_age_seconds, 10);
        assert!(table.resolve("/lib/a.css").is_none());
    }

    #[test]
    fn patterns_are_anchored() {
        let table = table(&[], &["root;html;.requestCache:1"]);
        assert!(table.resolve("/index.html").is_none());
    }

    #[test]
    fn empty_fields_are_skipped_and_headers_trimmed() {
        let table = table(&["p;;Cache-Control:  no-store ;;X-A:1;X-A:2"], &[]);
        let rule = table.resolve("/p/x").expect("rule");
        assert_eq!(
            rule.extra_headers,
            vec![
                ("Cache-Control".to_string(), "no-store".to_string()),
                ("X-A".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn out_of_range_seconds_are_rejected() {
        for entry in ["p;.expires:100000000000000", "p;.requestCache:100000000000000"] {
            let err = RuleTable::parse([entry], NO_PATTERNS).expect_err("too large");
            assert!(matches!(err, RuleConfigError::InvalidSeconds { .. }), "{entry}");
        }

        let table = table(&["p;.requestCache:3153600000;.expires:3153600000"], &[]);
        let rule = table.resolve("/p/x").expect("rule");
        assert_eq!(rule.max_age_seconds, MAX_RULE_SECONDS);
        assert_eq!(rule.expires_offset_seconds, Some(MAX_RULE_SECONDS));
    }

    #[test]
    fn header_value_may_contain_colons() {
        let table = table(&["p;X-Origin:https://cdn.example:8443"], &[]);
        let rule = table.resolve("/p/x").expect("rule");
        assert_eq!(rule.extra_headers[0].1, "https://cdn.example:8443");
    }

    #[test]
    fn malformed_entries_are_rejected() {
        assert!(matches!(
            RuleTable::parse([";;"], Vec::<&str>::new()),
            Err(RuleConfigError::MissingSegment { .. })
        ));
        assert!(matches!(
            RuleTable::parse(Vec::<&str>::new(), ["root"]),
            Err(RuleConfigError::MissingPattern { .. })
        ));
        assert!(matches!(
            RuleTable::parse(["p;no-separator"], Vec::<&str>::new()),
            Err(RuleConfigError::MissingSeparator { .. })
        ));
        assert!(matches!(
            RuleTable::parse(Vec::<&str>::new(), ["root;(unclosed;.requestCache:1"]),
            Err(RuleConfigError::InvalidPattern { .. })
        ));
        assert!(matches!(
            RuleTable::parse(["p;.requestCache:soon"], Vec::<&str>::new()),
            Err(RuleConfigError::InvalidSeconds { .. })
        ));
    }

    #[test]
    fn reconfigure_keeps_previous_table_on_error() {
        let resolver =
            RuleResolver::from_config(["p;.requestCache:10"], Vec::<&str>::new()).expect("valid");
        let before = resolver.snapshot();

        let err = resolver
            .reconfigure(["p;.requestCache:20", "dev;oops"], Vec::<&str>::new())
            .expect_err("second entry is malformed");
        assert!(matches!(err, RuleConfigError::MissingSeparator { .. }));
        assert!(Arc::ptr_eq(&before, &resolver.snapshot()));
        assert_eq!(resolver.resolve("/p/x").expect("rule").max_age_seconds, 10);

        resolver
            .reconfigure(["p;.requestCache:20"], Vec::<&str>::new())
            .expect("valid");
        assert_eq!(resolver.resolve("/p/x").expect("rule").max_age_seconds, 20);
        assert_eq!(before.resolve("/p/x").expect("old snapshot").max_age_seconds, 10);
    }

    #[test]
    fn describe_lists_every_rule() {
        let table = RuleTable::defaults().expect("defaults parse");
        let listing = table.describe();
        assert_eq!(listing.lines().count(), 5);
        assert!(listing.contains("/p/** cache=0s [Cache-Control: no-cache]"));
        assert!(listing.contains("root ~ .*html$ cache=3600s"));
    }
}

//! URL match patterns and host permissions
//!
//! Patterns follow the WebExtension syntax: `<all_urls>`, or
//! `<scheme>://<host><path>` where scheme may be `*` (http, https, ws, wss),
//! host may be `*` or start with `*.`, and path may contain `*` wildcards.

use std::collections::HashSet;

use url::{Position, Url};

/// Error returned for an unparsable match pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("Pattern '{0}' is missing '://'")]
    MissingSchemeSeparator(String),
    #[error("Pattern '{pattern}' has unsupported scheme '{scheme}'")]
    UnsupportedScheme { pattern: String, scheme: String },
    #[error("Pattern '{0}' has an invalid host")]
    InvalidHost(String),
    #[error("Pattern '{0}' is missing a path")]
    MissingPath(String),
}

const WILDCARD_SCHEMES: &[&str] = &["http", "https", "ws", "wss"];
const KNOWN_SCHEMES: &[&str] = &["http", "https", "ws", "wss", "ftp", "file", "data", "moz-extension"];

// =============================================================================
// Match Pattern
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Any,
    Exact(String),
    /// `*.example.com`: the domain itself and all subdomains.
    Subdomains(String),
}

impl HostPattern {
    fn matches(&self, host: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => host == expected,
            Self::Subdomains(domain) => {
                host == domain
                    || (host.len() > domain.len()
                        && host.ends_with(domain.as_str())
                        && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
            }
        }
    }

    /// True if some host matches both patterns.
    fn overlaps(&self, other: &HostPattern) -> bool {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Exact(a), _) => other.matches(a),
            (_, Self::Exact(b)) => self.matches(b),
            (Self::Subdomains(a), Self::Subdomains(b)) => self.matches(b) || other.matches(a),
        }
    }
}

/// A single parsed match pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPattern {
    source: String,
    schemes: Vec<String>,
    host: HostPattern,
    path: String,
}

impl MatchPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern == "<all_urls>" {
            return Ok(Self {
                source: pattern.to_string(),
                schemes: WILDCARD_SCHEMES.iter().map(|s| s.to_string()).collect(),
                host: HostPattern::Any,
                path: "/*".to_string(),
            });
        }

        let (scheme, rest) = pattern
            .split_once("://")
            .ok_or_else(|| PatternError::MissingSchemeSeparator(pattern.to_string()))?;

        let schemes = if scheme == "*" {
            WILDCARD_SCHEMES.iter().map(|s| s.to_string()).collect()
        } else if KNOWN_SCHEMES.contains(&scheme) {
            vec![scheme.to_string()]
        } else {
            return Err(PatternError::UnsupportedScheme {
                pattern: pattern.to_string(),
                scheme: scheme.to_string(),
            });
        };

        let path_start = rest
            .find('/')
            .ok_or_else(|| PatternError::MissingPath(pattern.to_string()))?;
        let (host, path) = rest.split_at(path_start);
        let host = strip_port(host).ok_or_else(|| PatternError::InvalidHost(pattern.to_string()))?;

        let host = if host == "*" {
            HostPattern::Any
        } else if let Some(domain) = host.strip_prefix("*.") {
            if domain.is_empty() || domain.contains('*') {
                return Err(PatternError::InvalidHost(pattern.to_string()));
            }
            HostPattern::Subdomains(domain.to_ascii_lowercase())
        } else if host.contains('*') || (host.is_empty() && scheme != "file") {
            return Err(PatternError::InvalidHost(pattern.to_string()));
        } else {
            HostPattern::Exact(host.to_ascii_lowercase())
        };

        Ok(Self {
            source: pattern.to_string(),
            schemes,
            host,
            path: path.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match scheme, host and path.
    pub fn matches(&self, url: &Url) -> bool {
        self.matches_ignoring_path(url) && glob_match(&self.path, url_path_and_query(url))
    }

    /// Match scheme and host only.
    pub fn matches_ignoring_path(&self, url: &Url) -> bool {
        if !self.schemes.iter().any(|s| s == url.scheme()) {
            return false;
        }
        match url.host_str() {
            Some(host) => self.host.matches(host),
            None => matches!(self.host, HostPattern::Any) || url.scheme() == "file",
        }
    }

    /// True if some URL could match both patterns (paths ignored).
    pub fn overlaps(&self, other: &MatchPattern) -> bool {
        self.schemes.iter().any(|s| other.schemes.contains(s)) && self.host.overlaps(&other.host)
    }
}

/// Drop a `:port` suffix; URLs are matched on host alone. `None` for a
/// malformed port.
fn strip_port(host: &str) -> Option<&str> {
    // Bracketed IPv6 literal without a port.
    if host.ends_with(']') {
        return Some(host);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => Some(name),
        Some(_) => None,
        None => Some(host),
    }
}

fn url_path_and_query(url: &Url) -> &str {
    &url[Position::BeforePath..Position::AfterQuery]
}

/// `*`-only glob match.
fn glob_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };

    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }

    rest.ends_with(last)
}

// =============================================================================
// Pattern Set
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchPatternSet {
    patterns: Vec<MatchPattern>,
}

impl MatchPatternSet {
    pub fn new(patterns: Vec<MatchPattern>) -> Self {
        Self { patterns }
    }

    /// Parse every pattern, failing on the first invalid one.
    pub fn parse<S: AsRef<str>>(patterns: &[S]) -> Result<Self, PatternError> {
        patterns
            .iter()
            .map(|p| MatchPattern::parse(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    pub fn patterns(&self) -> &[MatchPattern] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, url: &Url) -> bool {
        self.patterns.iter().any(|p| p.matches(url))
    }

    pub fn matches_ignoring_path(&self, url: &Url) -> bool {
        self.patterns.iter().any(|p| p.matches_ignoring_path(url))
    }

    pub fn overlaps(&self, pattern: &MatchPattern) -> bool {
        self.patterns.iter().any(|p| p.overlaps(pattern))
    }

    /// Every pattern here overlaps something in `granted` or `optional`.
    pub fn overlaps_permissions(&self, granted: &MatchPatternSet, optional: &MatchPatternSet) -> bool {
        self.patterns
            .iter()
            .all(|p| granted.overlaps(p) || optional.overlaps(p))
    }
}

// =============================================================================
// Host Permissions
// =============================================================================

/// Permission granted to the owner of a request pipeline.
pub const BLOCKING_PERMISSION: &str = "webRequestBlocking";

/// Permissions held by the owner of a request pipeline.
#[derive(Debug, Clone, Default)]
pub struct HostPermissions {
    /// Prefix of the owner's own URLs (e.g. `moz-extension://<uuid>/`).
    pub base_url: String,
    pub hosts: MatchPatternSet,
    pub optional_origins: MatchPatternSet,
    pub permissions: HashSet<String>,
}

impl HostPermissions {
    pub fn new(base_url: impl Into<String>, hosts: MatchPatternSet) -> Self {
        Self {
            base_url: base_url.into(),
            hosts,
            ..Self::default()
        }
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Whether `url` is within the granted host scope. Unparsable URLs are not.
    pub fn allows(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => self.hosts.matches_ignoring_path(&parsed),
            Err(_) => false,
        }
    }

    /// Whether `url` belongs to the owner itself.
    pub fn is_own_url(&self, url: &str) -> bool {
        !self.base_url.is_empty() && url.starts_with(&self.base_url)
    }

    pub fn overlaps(&self, patterns: &MatchPatternSet) -> bool {
        patterns.overlaps_permissions(&self.hosts, &self.optional_origins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(MatchPattern::parse("example.com"), Err(PatternError::MissingSchemeSeparator(_))));
        assert!(matches!(MatchPattern::parse("gopher://x/"), Err(PatternError::UnsupportedScheme { .. })));
        assert!(matches!(MatchPattern::parse("https://exa*mple.com/"), Err(PatternError::InvalidHost(_))));
        assert!(matches!(MatchPattern::parse("https://example.com"), Err(PatternError::MissingPath(_))));
    }

    #[test]
    fn test_port_in_host_is_ignored() {
        let p = MatchPattern::parse("https://example.com:8080/*").unwrap();
        assert!(p.matches(&url("https://example.com:8080/a")));
        assert!(p.matches(&url("https://example.com/a")));
        assert!(!p.matches(&url("https://other.com:8080/a")));

        let sub = MatchPattern::parse("*://*.example.com:443/*").unwrap();
        assert!(sub.matches(&url("https://cdn.example.com/x")));

        assert!(matches!(MatchPattern::parse("https://example.com:http/*"), Err(PatternError::InvalidHost(_))));
        assert!(matches!(MatchPattern::parse("https://example.com:/*"), Err(PatternError::InvalidHost(_))));
    }

    #[test]
    fn test_all_urls() {
        let p = MatchPattern::parse("<all_urls>").unwrap();
        assert!(p.matches(&url("https://example.com/a")));
        assert!(p.matches(&url("ws://example.com/")));
        assert!(!p.matches(&url("ftp://example.com/")));
    }

    #[test]
    fn test_wildcard_scheme_and_host() {
        let p = MatchPattern::parse("*://*/*").unwrap();
        assert!(p.matches(&url("http://a.b.c/x?y")));
        assert!(!p.matches(&url("file:///etc/hosts")));
    }

    #[test]
    fn test_subdomain_pattern() {
        let p = MatchPattern::parse("https://*.example.com/*").unwrap();
        assert!(p.matches(&url("https://example.com/")));
        assert!(p.matches(&url("https://a.b.example.com/x")));
        assert!(!p.matches(&url("https://badexample.com/")));
        assert!(!p.matches(&url("http://example.com/")));
    }

    #[test]
    fn test_path_glob() {
        let p = MatchPattern::parse("https://example.com/ads/*.js").unwrap();
        assert!(p.matches(&url("https://example.com/ads/banner.js")));
        assert!(!p.matches(&url("https://example.com/ads/banner.css")));
        assert!(p.matches_ignoring_path(&url("https://example.com/other")));
    }

    #[test]
    fn test_path_includes_query_not_fragment() {
        let p = MatchPattern::parse("https://example.com/*?id=*").unwrap();
        assert!(p.matches(&url("https://example.com/px?id=3#frag")));
        assert!(!p.matches(&url("https://example.com/px#?id=3")));
    }

    #[test]
    fn test_overlaps() {
        let all = MatchPattern::parse("<all_urls>").unwrap();
        let sub = MatchPattern::parse("https://*.example.com/*").unwrap();
        let exact = MatchPattern::parse("https://cdn.example.com/*").unwrap();
        let other = MatchPattern::parse("https://example.net/*").unwrap();
        let ws = MatchPattern::parse("ws://cdn.example.com/*").unwrap();

        assert!(all.overlaps(&exact));
        assert!(sub.overlaps(&exact));
        assert!(exact.overlaps(&sub));
        assert!(!sub.overlaps(&other));
        assert!(!exact.overlaps(&ws));
    }

    #[test]
    fn test_permissions_scope() {
        let hosts = MatchPatternSet::parse(&["*://*.example.com/*"]).unwrap();
        let perms = HostPermissions::new("moz-extension://abc/", hosts).with_permission(BLOCKING_PERMISSION);

        assert!(perms.allows("https://www.example.com/anything"));
        assert!(!perms.allows("https://tracker.net/"));
        assert!(!perms.allows("not a url"));
        assert!(perms.is_own_url("moz-extension://abc/page.html"));
        assert!(perms.has_permission(BLOCKING_PERMISSION));

        let filter = MatchPatternSet::parse(&["https://cdn.example.com/*"]).unwrap();
        assert!(perms.overlaps(&filter));
        let outside = MatchPatternSet::parse(&["https://cdn.example.com/*", "https://tracker.net/*"]).unwrap();
        assert!(!perms.overlaps(&outside));
    }
}

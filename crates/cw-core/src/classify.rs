//! Classification registry and request classifier
//!
//! A classification is a named predicate over requests: an optional set of
//! registrable domains plus an optional third-party requirement.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use crate::psl::{is_third_party, PublicSuffixSet};
use crate::types::{RawRequest, RequestRecord};
use crate::url::{all_hosts_for_url, parse_host};

/// Returned when a classification name has never been registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown classification: {0}")]
pub struct UnknownClassificationError(pub String);

// =============================================================================
// Classification
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub name: String,
    /// `None` matches every domain.
    pub domains: Option<HashSet<String>>,
    pub third_party_only: bool,
}

/// Arguments to [`ClassificationRegistry::classify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifyOptions {
    pub domains: Option<Vec<String>>,
    pub third_party: bool,
}

impl ClassifyOptions {
    pub fn domains<S: Into<String>>(domains: impl IntoIterator<Item = S>) -> Self {
        Self {
            domains: Some(domains.into_iter().map(Into::into).collect()),
            third_party: false,
        }
    }

    pub fn third_party(mut self, third_party: bool) -> Self {
        self.third_party = third_party;
        self
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Name → classification mapping.
///
/// Entries are replaced whole, so a reader always sees either the previous
/// or the new classification for a name.
#[derive(Debug, Default)]
pub struct ClassificationRegistry {
    entries: RwLock<HashMap<String, Arc<Classification>>>,
}

impl ClassificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace the classification for `name`.
    pub fn classify(&self, name: &str, options: ClassifyOptions) {
        let classification = Arc::new(Classification {
            name: name.to_string(),
            domains: options.domains.map(|domains| domains.into_iter().collect()),
            third_party_only: options.third_party,
        });

        log::debug!(
            "Classifying '{}' ({} domains, third-party only: {})",
            name,
            classification.domains.as_ref().map_or(0, HashSet::len),
            classification.third_party_only
        );

        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), classification);
    }

    /// Legacy form: a plain domain list without a third-party requirement.
    pub fn classify_urls<S: Into<String>>(&self, name: &str, urls: impl IntoIterator<Item = S>) {
        self.classify(name, ClassifyOptions::domains(urls));
    }

    pub fn get(&self, name: &str) -> Result<Arc<Classification>, UnknownClassificationError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| UnknownClassificationError(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

// =============================================================================
// Request Classifier
// =============================================================================

/// The parts of a request classification looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTarget<'a> {
    pub url: &'a str,
    pub origin_url: Option<&'a str>,
}

impl<'a> RequestTarget<'a> {
    pub fn new(url: &'a str, origin_url: Option<&'a str>) -> Self {
        Self { url, origin_url }
    }
}

impl<'a> From<&'a RawRequest> for RequestTarget<'a> {
    fn from(request: &'a RawRequest) -> Self {
        Self::new(&request.url, request.origin_url.as_deref())
    }
}

impl<'a> From<&'a RequestRecord> for RequestTarget<'a> {
    fn from(record: &'a RequestRecord) -> Self {
        Self::new(&record.url, record.origin_url.as_deref())
    }
}

/// Answers "is this request classified as X?".
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    registry: Arc<ClassificationRegistry>,
    suffixes: Arc<PublicSuffixSet>,
}

impl RequestClassifier {
    pub fn new(registry: Arc<ClassificationRegistry>, suffixes: Arc<PublicSuffixSet>) -> Self {
        Self { registry, suffixes }
    }

    pub fn registry(&self) -> &Arc<ClassificationRegistry> {
        &self.registry
    }

    pub fn suffixes(&self) -> &Arc<PublicSuffixSet> {
        &self.suffixes
    }

    /// Check a request against one classification. Unknown names never match.
    pub fn is_classified_as(&self, request: RequestTarget<'_>, name: &str) -> bool {
        let classification = match self.registry.get(name) {
            Ok(classification) => classification,
            Err(e) => {
                log::debug!("{e}");
                return false;
            }
        };

        // Unparsable targets are never classified, whatever the options.
        if let Err(e) = parse_host(request.url) {
            log::debug!("{e}");
            return false;
        }

        // Third-party check first; it is cheaper than the domain walk.
        if classification.third_party_only
            && !is_third_party(request.origin_url, request.url, &self.suffixes)
        {
            return false;
        }

        match &classification.domains {
            Some(domains) => all_hosts_for_url(request.url, &self.suffixes)
                .iter()
                .any(|host| domains.contains(host)),
            None => true,
        }
    }

    /// Check a request against several classifications; any match wins.
    pub fn is_classified_as_any<S: AsRef<str>>(&self, request: RequestTarget<'_>, names: &[S]) -> bool {
        names
            .iter()
            .any(|name| self.is_classified_as(request, name.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> RequestClassifier {
        let suffixes: PublicSuffixSet = ["com", "net", "uk", "co.uk"].into_iter().collect();
        RequestClassifier::new(Arc::new(ClassificationRegistry::new()), Arc::new(suffixes))
    }

    #[test]
    fn test_unknown_classification_is_false() {
        let c = classifier();
        let target = RequestTarget::new("https://tracker.net/px", Some("https://example.com/"));
        assert!(!c.is_classified_as(target, "tracker"));
        assert_eq!(
            c.registry().get("tracker").unwrap_err(),
            UnknownClassificationError("tracker".to_string())
        );
    }

    #[test]
    fn test_third_party_tracker() {
        let c = classifier();
        c.registry()
            .classify("tracker", ClassifyOptions::domains(["tracker.net"]).third_party(true));

        let third = RequestTarget::new("https://tracker.net/px", Some("https://example.com"));
        assert!(c.is_classified_as(third, "tracker"));

        let first = RequestTarget::new("https://tracker.net/px", Some("https://tracker.net/page"));
        assert!(!c.is_classified_as(first, "tracker"));
    }

    #[test]
    fn test_subdomain_matches_registered_domain() {
        let c = classifier();
        c.registry().classify_urls("tracker", ["tracker.net"]);
        let target = RequestTarget::new("https://pixel.eu.tracker.net/a.gif", None);
        assert!(c.is_classified_as(target, "tracker"));
        let other = RequestTarget::new("https://nottracker.net/a.gif", None);
        assert!(!c.is_classified_as(other, "tracker"));
    }

    #[test]
    fn test_match_all_domains_with_third_party_gate() {
        let c = classifier();
        c.registry().classify("cross-site", ClassifyOptions::default().third_party(true));

        assert!(c.is_classified_as(
            RequestTarget::new("https://cdn.other.com/x.js", Some("https://example.com/")),
            "cross-site"
        ));
        assert!(!c.is_classified_as(
            RequestTarget::new("https://cdn.example.com/x.js", Some("https://www.example.com/")),
            "cross-site"
        ));
        // Top-level navigation has no origin and is never third-party.
        assert!(!c.is_classified_as(RequestTarget::new("https://cdn.other.com/", None), "cross-site"));
    }

    #[test]
    fn test_reclassify_replaces() {
        let c = classifier();
        c.registry()
            .classify("tracker", ClassifyOptions::domains(["tracker.net"]).third_party(true));
        c.registry().classify_urls("tracker", ["ads.com"]);

        let classification = c.registry().get("tracker").unwrap();
        assert!(!classification.third_party_only);
        assert_eq!(classification.domains.as_ref().map(HashSet::len), Some(1));

        // tracker.net no longer listed, ads.com now matches without an origin.
        assert!(!c.is_classified_as(
            RequestTarget::new("https://tracker.net/px", Some("https://example.com")),
            "tracker"
        ));
        assert!(c.is_classified_as(RequestTarget::new("https://ads.com/banner", None), "tracker"));
    }

    #[test]
    fn test_classify_is_idempotent() {
        let c = classifier();
        c.registry().classify_urls("tracker", ["tracker.net"]);
        let first = c.registry().get("tracker").unwrap();
        c.registry().classify_urls("tracker", ["tracker.net"]);
        assert_eq!(*first, *c.registry().get("tracker").unwrap());
        assert_eq!(c.registry().names(), vec!["tracker"]);
    }

    #[test]
    fn test_malformed_url_never_classified() {
        let c = classifier();
        c.registry().classify("anything", ClassifyOptions::default());
        c.registry().classify_urls("tracker", ["tracker.net"]);
        assert!(!c.is_classified_as(RequestTarget::new("::not-a-url", None), "tracker"));
        assert!(!c.is_classified_as(RequestTarget::new("::not-a-url", None), "anything"));
        assert!(!c.is_classified_as(RequestTarget::new("data:text/plain,hi", None), "anything"));
    }

    #[test]
    fn test_malformed_url_with_third_party_gate() {
        let c = classifier();
        c.registry().classify("cross-site", ClassifyOptions::default().third_party(true));
        let target = RequestTarget::new("::not-a-url", Some("https://example.com/"));
        assert!(!c.is_classified_as(target, "cross-site"));
        assert!(!c.is_classified_as_any(target, &["cross-site"]));
    }

    #[test]
    fn test_any_of_several_names() {
        let c = classifier();
        c.registry().classify_urls("ads", ["ads.com"]);
        let target = RequestTarget::new("https://ads.com/", None);
        assert!(c.is_classified_as_any(target, &["tracker", "ads"]));
        assert!(!c.is_classified_as_any::<&str>(target, &[]));
    }
}

//! Tracker blocker setup
//!
//! Installs one blocking listener that cancels third-party requests to
//! tracker domains. With [`BlockingMode::Classified`] the tracker list is
//! registered as a classification and the listener only sees classified
//! requests. [`BlockingMode::Legacy`] listens to every request and checks the
//! blocklist itself.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use cw_core::classify::{ClassificationRegistry, ClassifyOptions, RequestClassifier};
use cw_core::dispatch::{Context, ListenerHandle};
use cw_core::pattern::{HostPermissions, MatchPatternSet, PatternError, BLOCKING_PERMISSION};
use cw_core::pipeline::{ClassifiedWebRequest, OnBeforeRequest, RequestListener, WebRequest, DEFAULT_URL_PATTERN};
use cw_core::psl::{is_third_party, PublicSuffixSet};
use cw_core::source::RequestSource;
use cw_core::types::{BlockingResponse, ExtraInfoSpec, RequestFilter, RequestRecord};
use cw_core::url::all_hosts_for_url;

use crate::services::DEFAULT_IGNORED_CATEGORIES;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockingMode {
    /// Register the list as a classification on the classifying API.
    #[default]
    Classified,
    /// Plain request API plus an in-listener blocklist check.
    Legacy,
}

/// Tracker blocker settings. Every field is optional in the JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockerConfig {
    /// Classification name the tracker list is registered under.
    pub classification: String,
    /// Registers the classification with the third-party requirement.
    pub third_party_only: bool,
    pub mode: BlockingMode,
    /// Services categories left out of the tracker list.
    pub ignored_categories: Vec<String>,
}

impl Default for BlockerConfig {
    fn default() -> Self {
        Self {
            classification: "tracker".to_string(),
            third_party_only: false,
            mode: BlockingMode::Classified,
            ignored_categories: DEFAULT_IGNORED_CATEGORIES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl BlockerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }
}

// =============================================================================
// Environment
// =============================================================================

/// Collaborators the blocker is installed into.
#[derive(Clone)]
pub struct BlockerEnv {
    pub context: Context,
    pub permissions: Arc<HostPermissions>,
    pub source: Arc<dyn RequestSource>,
    pub suffixes: Arc<PublicSuffixSet>,
}

impl BlockerEnv {
    /// Environment with access to every host and the blocking permission.
    pub fn unrestricted(source: Arc<dyn RequestSource>, suffixes: Arc<PublicSuffixSet>) -> Result<Self, PatternError> {
        let hosts = MatchPatternSet::parse(&["<all_urls>"])?;
        Ok(Self {
            context: Context::new(),
            permissions: Arc::new(HostPermissions::new("", hosts).with_permission(BLOCKING_PERMISSION)),
            source,
            suffixes,
        })
    }
}

// =============================================================================
// Tracker Blocker
// =============================================================================

fn handle_request(record: &RequestRecord, suffixes: &PublicSuffixSet) -> BlockingResponse {
    let third_party = is_third_party(record.origin_url.as_deref(), &record.url, suffixes);
    log::debug!(
        "{} from {}: third-party {}",
        record.url,
        record.origin_url.as_deref().unwrap_or("-"),
        third_party
    );
    BlockingResponse { cancel: third_party }
}

enum Api {
    Classified(ClassifiedWebRequest),
    Legacy(WebRequest),
}

/// An installed tracker blocker.
pub struct TrackerBlocker {
    api: Api,
    handle: ListenerHandle,
    domains: usize,
}

impl TrackerBlocker {
    pub fn install(config: &BlockerConfig, domains: Vec<String>, env: &BlockerEnv) -> Self {
        let count = domains.len();
        let suffixes = Arc::clone(&env.suffixes);

        let blocker = match config.mode {
            BlockingMode::Classified => {
                let api = ClassifiedWebRequest::new(
                    &env.context,
                    Arc::clone(&env.permissions),
                    Arc::clone(&env.source),
                    Arc::new(ClassificationRegistry::new()),
                    Arc::clone(&env.suffixes),
                );
                log::info!("Classifying {count} domains as '{}'", config.classification);
                api.classify_requests(
                    &config.classification,
                    ClassifyOptions::domains(domains).third_party(config.third_party_only),
                );

                let listener: RequestListener =
                    Arc::new(move |record: RequestRecord| Some(handle_request(&record, &suffixes)));
                let handle = api.on_before_request().add_listener(
                    listener,
                    RequestFilter::classified_as(config.classification.as_str()),
                    &[ExtraInfoSpec::Blocking],
                );
                Self {
                    api: Api::Classified(api),
                    handle,
                    domains: count,
                }
            }
            BlockingMode::Legacy => {
                let api = WebRequest::new(&env.context, Arc::clone(&env.permissions), Arc::clone(&env.source));
                let blocklist: HashSet<String> = domains.into_iter().collect();

                let listener: RequestListener = Arc::new(move |record: RequestRecord| {
                    let listed = all_hosts_for_url(&record.url, &suffixes)
                        .iter()
                        .any(|host| blocklist.contains(host));
                    if listed {
                        Some(handle_request(&record, &suffixes))
                    } else {
                        Some(BlockingResponse::ALLOW)
                    }
                });
                let handle = api.on_before_request().add_listener(
                    listener,
                    RequestFilter::urls([DEFAULT_URL_PATTERN]),
                    &[ExtraInfoSpec::Blocking],
                );
                Self {
                    api: Api::Legacy(api),
                    handle,
                    domains: count,
                }
            }
        };

        log::info!("Tracker blocker installed ({:?} mode)", blocker.mode());
        blocker
    }

    pub fn mode(&self) -> BlockingMode {
        match self.api {
            Api::Classified(_) => BlockingMode::Classified,
            Api::Legacy(_) => BlockingMode::Legacy,
        }
    }

    pub fn domain_count(&self) -> usize {
        self.domains
    }

    pub fn on_before_request(&self) -> &OnBeforeRequest {
        match &self.api {
            Api::Classified(api) => api.on_before_request(),
            Api::Legacy(api) => api.on_before_request(),
        }
    }

    /// The classifier behind the classifying API; `None` in legacy mode.
    pub fn classifier(&self) -> Option<&RequestClassifier> {
        match &self.api {
            Api::Classified(api) => Some(api.classifier()),
            Api::Legacy(_) => None,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.on_before_request().has_listener(self.handle)
    }

    pub fn uninstall(&self) {
        self.on_before_request().remove_listener(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_core::source::LocalRequestSource;
    use cw_core::types::RawRequest;

    fn setup(config: &BlockerConfig) -> (LocalRequestSource, TrackerBlocker) {
        let source = LocalRequestSource::new();
        let suffixes: PublicSuffixSet = ["com", "net", "org"].into_iter().collect();
        let env = BlockerEnv::unrestricted(Arc::new(source.clone()), Arc::new(suffixes)).unwrap();
        let blocker = TrackerBlocker::install(config, vec!["tracker.net".to_string()], &env);
        (source, blocker)
    }

    fn request(url: &str, origin: &str) -> RawRequest {
        RawRequest::new("1", url, "script").with_origin(origin)
    }

    fn check_blocking(config: &BlockerConfig) {
        let (source, blocker) = setup(config);
        assert!(blocker.is_installed());
        assert_eq!(blocker.domain_count(), 1);

        assert!(source.emit(&request("https://cdn.tracker.net/t.js", "https://example.com/")).cancel);
        assert!(!source.emit(&request("https://cdn.tracker.net/t.js", "https://www.tracker.net/")).cancel);
        assert!(!source.emit(&request("https://cdn.example.org/x.js", "https://example.com/")).cancel);
        // Navigations have no origin and are never cancelled.
        assert!(!source.emit(&RawRequest::new("2", "https://tracker.net/", "main_frame")).cancel);

        blocker.uninstall();
        assert!(!blocker.is_installed());
        assert_eq!(source.subscriber_count(), 0);
        assert!(!source.emit(&request("https://cdn.tracker.net/t.js", "https://example.com/")).cancel);
    }

    #[test]
    fn test_classified_mode() {
        let config = BlockerConfig::default();
        check_blocking(&config);

        let (_source, blocker) = setup(&config);
        assert_eq!(blocker.mode(), BlockingMode::Classified);
        let classifier = blocker.classifier().unwrap();
        assert!(classifier.registry().contains("tracker"));
    }

    #[test]
    fn test_classified_mode_third_party_only() {
        check_blocking(&BlockerConfig {
            third_party_only: true,
            ..BlockerConfig::default()
        });
    }

    #[test]
    fn test_legacy_mode() {
        let config = BlockerConfig {
            mode: BlockingMode::Legacy,
            ..BlockerConfig::default()
        };
        check_blocking(&config);

        let (source, blocker) = setup(&config);
        assert!(blocker.classifier().is_none());
        // Legacy listeners see every request, listed or not.
        let outcome = source.emit(&request("https://cdn.example.org/x.js", "https://example.com/"));
        assert_eq!(outcome.delivered, 1);
    }

    #[test]
    fn test_config_from_json() {
        let config = BlockerConfig::from_json(r#"{"mode": "legacy", "ignoredCategories": []}"#).unwrap();
        assert_eq!(config.mode, BlockingMode::Legacy);
        assert_eq!(config.classification, "tracker");
        assert!(config.ignored_categories.is_empty());

        assert_eq!(BlockerConfig::from_json("{}").unwrap(), BlockerConfig::default());
        assert!(BlockerConfig::from_json(r#"{"mode": "strict"}"#).is_err());
    }

    #[test]
    fn test_default_config() {
        let config = BlockerConfig::default();
        assert_eq!(config.mode, BlockingMode::Classified);
        assert_eq!(config.ignored_categories, vec!["Content"]);
        assert!(!config.third_party_only);
    }
}

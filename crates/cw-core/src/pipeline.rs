//! Request Filtering Pipeline
//!
//! Wires request listeners into a [`RequestSource`]. Each inbound request
//! goes through, in order:
//!
//! 1. the classification gate (`classifiedAs` on the classifying API),
//! 2. the system-principal check,
//! 3. host permission checks for the request URL and its document URL,
//! 4. the tab/window filter,
//!
//! and only then is normalized into a [`RequestRecord`] and handed to the
//! listener synchronously. The listener's [`BlockingResponse`] goes back to
//! the source.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::classify::{ClassificationRegistry, ClassifyOptions, RequestClassifier};
use crate::dispatch::{Context, EventDispatcher, FireHandle, Listener, ListenerHandle, Unregister};
use crate::pattern::{HostPermissions, MatchPattern, MatchPatternSet, PatternError, BLOCKING_PERMISSION};
use crate::psl::PublicSuffixSet;
use crate::source::{RequestSource, SourceFilter, SourceListener};
use crate::types::{BlockingResponse, ExtraInfoSpec, RawRequest, RequestFilter, RequestRecord, RequestType};

/// Filter URLs used when a registration names none.
pub const DEFAULT_URL_PATTERN: &str = "*://*/*";

/// Listener for request events.
pub type RequestListener = Listener<RequestRecord, Option<BlockingResponse>>;

/// Problems found while registering a listener. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Invalid URL pattern in {event}.addListener filter: {source}")]
    InvalidPattern {
        event: String,
        #[source]
        source: PatternError,
    },
    #[error("The {event}.addListener filter doesn't overlap with host permissions.")]
    NoHostPermission { event: String },
    #[error("Using {event}.addListener with the blocking option requires the '{permission}' permission.")]
    MissingBlockingPermission { event: String, permission: String },
    #[error("The {event}.addListener filter names no classification; the listener will never fire.")]
    MissingClassification { event: String },
}

/// Registration parameters for request listeners.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    pub filter: RequestFilter,
    pub extra_info: Vec<ExtraInfoSpec>,
}

// =============================================================================
// Record Building
// =============================================================================

/// Tab and window the request belongs to. Tab tracking is not available to
/// the core, so requests are always reported with `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowserData {
    pub tab_id: i64,
    pub window_id: i64,
}

impl BrowserData {
    pub const UNKNOWN: Self = Self {
        tab_id: -1,
        window_id: -1,
    };
}

fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Normalize a raw request into the shape listeners receive.
pub fn build_record(raw: &RawRequest, browser: BrowserData) -> RequestRecord {
    let main_frame = raw.kind() == RequestType::MAIN_FRAME;

    RequestRecord {
        request_id: raw.request_id.clone(),
        url: raw.url.clone(),
        origin_url: raw.origin_url.clone(),
        document_url: raw.document_url.clone(),
        method: raw.method.clone(),
        tab_id: browser.tab_id,
        window_id: browser.window_id,
        frame_id: if main_frame { 0 } else { raw.window_id },
        parent_frame_id: if main_frame { -1 } else { raw.parent_window_id },
        request_type: raw.request_type.clone(),
        time_stamp: now_millis(),
        // Only reported once a response exists.
        from_cache: None,
        ip: raw.ip.clone(),
        request_headers: raw.request_headers.clone(),
        response_headers: raw.response_headers.clone(),
        status_code: raw.status_code,
        status_line: raw.status_line.clone(),
        error: raw.error.clone(),
        redirect_url: raw.redirect_url.clone(),
        request_body: raw.request_body.clone(),
        scheme: raw.scheme.clone(),
        realm: raw.realm.clone(),
        is_proxy: raw.is_proxy,
        challenger: raw.challenger.clone(),
    }
}

// =============================================================================
// Per-listener Filtering
// =============================================================================

enum ClassificationGate {
    /// Non-classifying API: every request passes.
    Open,
    /// Classifying API without `classifiedAs`: nothing passes.
    Closed,
    Classified {
        classifier: RequestClassifier,
        names: Vec<String>,
    },
}

struct FilteringListener {
    gate: ClassificationGate,
    permissions: Arc<HostPermissions>,
    tab_id: Option<i64>,
    window_id: Option<i64>,
    fire: FireHandle<RequestRecord, Option<BlockingResponse>>,
}

impl FilteringListener {
    fn handle(&self, raw: &RawRequest) -> Option<BlockingResponse> {
        match &self.gate {
            ClassificationGate::Open => {}
            ClassificationGate::Closed => return None,
            ClassificationGate::Classified { classifier, names } => {
                if !classifier.is_classified_as_any(raw.into(), names.as_slice()) {
                    return None;
                }
            }
        }

        // Leave the browser's own traffic alone (updates, OCSP, ...).
        if raw.is_system_principal {
            return None;
        }

        if !self.permissions.allows(&raw.url) {
            return None;
        }
        if let Some(document_url) = raw.document_url.as_deref().filter(|url| !url.is_empty()) {
            if !self.permissions.is_own_url(document_url) && !self.permissions.allows(document_url) {
                return None;
            }
        }

        let browser = BrowserData::UNKNOWN;
        if self.tab_id.is_some_and(|tab_id| tab_id != browser.tab_id) {
            return None;
        }
        if self.window_id.is_some_and(|window_id| window_id != browser.window_id) {
            return None;
        }

        let record = build_record(raw, browser);
        self.fire.fire_sync(record).flatten()
    }
}

// =============================================================================
// Pipeline
// =============================================================================

struct Pipeline {
    event: String,
    classifier: Option<RequestClassifier>,
    permissions: Arc<HostPermissions>,
    source: Arc<dyn RequestSource>,
}

impl Pipeline {
    fn report(&self, error: ConfigurationError) {
        log::error!("{error}");
    }

    fn url_patterns(&self, urls: Option<Vec<String>>) -> MatchPatternSet {
        let Some(urls) = urls else {
            return MatchPatternSet::parse(&[DEFAULT_URL_PATTERN]).unwrap_or_default();
        };

        let mut patterns = Vec::with_capacity(urls.len());
        for url in &urls {
            match MatchPattern::parse(url) {
                Ok(pattern) => patterns.push(pattern),
                Err(source) => self.report(ConfigurationError::InvalidPattern {
                    event: self.event.clone(),
                    source,
                }),
            }
        }

        let patterns = MatchPatternSet::new(patterns);
        if !self.permissions.overlaps(&patterns) {
            self.report(ConfigurationError::NoHostPermission {
                event: self.event.clone(),
            });
        }
        patterns
    }

    fn extra_info(&self, requested: Vec<ExtraInfoSpec>) -> Vec<ExtraInfoSpec> {
        let mut granted = Vec::with_capacity(requested.len());
        for info in requested {
            if info == ExtraInfoSpec::Blocking && !self.permissions.has_permission(BLOCKING_PERMISSION) {
                self.report(ConfigurationError::MissingBlockingPermission {
                    event: self.event.clone(),
                    permission: BLOCKING_PERMISSION.to_string(),
                });
            } else {
                granted.push(info);
            }
        }
        granted
    }

    fn gate(&self, classified_as: Option<Vec<String>>) -> ClassificationGate {
        match (&self.classifier, classified_as) {
            (None, _) => ClassificationGate::Open,
            (Some(classifier), Some(names)) => ClassificationGate::Classified {
                classifier: classifier.clone(),
                names,
            },
            (Some(_), None) => {
                self.report(ConfigurationError::MissingClassification {
                    event: self.event.clone(),
                });
                ClassificationGate::Closed
            }
        }
    }

    fn register(&self, fire: FireHandle<RequestRecord, Option<BlockingResponse>>, options: ListenerOptions) -> Unregister {
        let ListenerOptions { filter, extra_info } = options;

        let source_filter = SourceFilter {
            urls: self.url_patterns(filter.urls),
            types: filter.types.as_deref().map(RequestType::from_names),
        };
        let extra_info = self.extra_info(extra_info);

        let listener = FilteringListener {
            gate: self.gate(filter.classified_as),
            permissions: Arc::clone(&self.permissions),
            tab_id: filter.tab_id,
            window_id: filter.window_id,
            fire,
        };
        let listener: SourceListener = Arc::new(move |raw: &RawRequest| listener.handle(raw));

        log::debug!("Registered {} listener", self.event);
        self.source.subscribe(source_filter, extra_info, listener)
    }
}

// =============================================================================
// Public API
// =============================================================================

/// The `onBeforeRequest` event.
#[derive(Debug, Clone)]
pub struct OnBeforeRequest {
    dispatcher: EventDispatcher<RequestRecord, Option<BlockingResponse>, ListenerOptions>,
}

impl OnBeforeRequest {
    fn new(context: &Context, pipeline: Pipeline) -> Self {
        let name = pipeline.event.clone();
        let pipeline = Arc::new(pipeline);
        Self {
            dispatcher: EventDispatcher::new(context.clone(), name, move |fire, options| {
                pipeline.register(fire, options)
            }),
        }
    }

    pub fn add_listener(
        &self,
        callback: RequestListener,
        filter: RequestFilter,
        extra_info: &[ExtraInfoSpec],
    ) -> ListenerHandle {
        self.dispatcher.add_listener(
            callback,
            ListenerOptions {
                filter,
                extra_info: extra_info.to_vec(),
            },
        )
    }

    pub fn remove_listener(&self, handle: ListenerHandle) {
        self.dispatcher.remove_listener(handle);
    }

    pub fn has_listener(&self, handle: ListenerHandle) -> bool {
        self.dispatcher.has_listener(handle)
    }

    pub fn listener_count(&self) -> usize {
        self.dispatcher.listener_count()
    }

    pub fn dispatcher(&self) -> &EventDispatcher<RequestRecord, Option<BlockingResponse>, ListenerOptions> {
        &self.dispatcher
    }
}

/// Request events gated by named classifications.
#[derive(Debug, Clone)]
pub struct ClassifiedWebRequest {
    classifier: RequestClassifier,
    on_before_request: OnBeforeRequest,
}

impl ClassifiedWebRequest {
    pub fn new(
        context: &Context,
        permissions: Arc<HostPermissions>,
        source: Arc<dyn RequestSource>,
        registry: Arc<ClassificationRegistry>,
        suffixes: Arc<PublicSuffixSet>,
    ) -> Self {
        let classifier = RequestClassifier::new(registry, suffixes);
        let pipeline = Pipeline {
            event: "classifiedWebRequest.onBeforeRequest".to_string(),
            classifier: Some(classifier.clone()),
            permissions,
            source,
        };

        Self {
            on_before_request: OnBeforeRequest::new(context, pipeline),
            classifier,
        }
    }

    /// Legacy form: classify by a plain domain list.
    pub fn classify_urls<S: Into<String>>(&self, name: &str, urls: impl IntoIterator<Item = S>) {
        self.classifier.registry().classify_urls(name, urls);
    }

    pub fn classify_requests(&self, name: &str, options: ClassifyOptions) {
        self.classifier.registry().classify(name, options);
    }

    pub fn classifier(&self) -> &RequestClassifier {
        &self.classifier
    }

    pub fn on_before_request(&self) -> &OnBeforeRequest {
        &self.on_before_request
    }
}

/// Request events without classification.
#[derive(Debug, Clone)]
pub struct WebRequest {
    on_before_request: OnBeforeRequest,
}

impl WebRequest {
    pub fn new(context: &Context, permissions: Arc<HostPermissions>, source: Arc<dyn RequestSource>) -> Self {
        let pipeline = Pipeline {
            event: "webRequest.onBeforeRequest".to_string(),
            classifier: None,
            permissions,
            source,
        };

        Self {
            on_before_request: OnBeforeRequest::new(context, pipeline),
        }
    }

    pub fn on_before_request(&self) -> &OnBeforeRequest {
        &self.on_before_request
    }
}

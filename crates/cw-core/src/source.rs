//! Request sources
//!
//! A [`RequestSource`] produces request events and lets listeners decide
//! whether to cancel them. [`LocalRequestSource`] is an in-process source used
//! by tools and tests: events are pushed in with [`LocalRequestSource::emit`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use url::Url;

use crate::dispatch::{Unregister, UnregisterError};
use crate::pattern::MatchPatternSet;
use crate::types::{BlockingResponse, ExtraInfoSpec, RawRequest, RequestType};

/// Listener wired into a source.
pub type SourceListener = Arc<dyn Fn(&RawRequest) -> Option<BlockingResponse> + Send + Sync>;

/// Which requests a subscription receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFilter {
    /// Request URL must match one of these. An empty set matches nothing.
    pub urls: MatchPatternSet,
    /// `None` accepts every type.
    pub types: Option<RequestType>,
}

impl SourceFilter {
    pub fn matches(&self, request: &RawRequest) -> bool {
        if let Some(types) = self.types {
            if !types.intersects(request.kind()) {
                return false;
            }
        }

        match Url::parse(&request.url) {
            Ok(url) => self.urls.matches(&url),
            Err(_) => false,
        }
    }
}

/// Producer of request events.
pub trait RequestSource: Send + Sync {
    /// Deliver matching requests to `listener` until the returned function is
    /// called. Results are used as decisions only when `extra_info` contains
    /// [`ExtraInfoSpec::Blocking`].
    fn subscribe(&self, filter: SourceFilter, extra_info: Vec<ExtraInfoSpec>, listener: SourceListener) -> Unregister;
}

// =============================================================================
// Local Source
// =============================================================================

/// Result of emitting one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RequestOutcome {
    pub cancel: bool,
    /// Subscriptions whose filter matched.
    pub delivered: usize,
}

struct Subscription {
    id: u64,
    filter: SourceFilter,
    blocking: bool,
    listener: SourceListener,
}

#[derive(Default)]
struct SourceState {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

/// In-process request source.
#[derive(Clone, Default)]
pub struct LocalRequestSource {
    state: Arc<Mutex<SourceState>>,
}

fn lock(state: &Mutex<SourceState>) -> MutexGuard<'_, SourceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LocalRequestSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).subscriptions.len()
    }

    /// Deliver `request` to every matching subscriber and merge the blocking
    /// decisions: any `cancel: true` cancels the request.
    pub fn emit(&self, request: &RawRequest) -> RequestOutcome {
        // Snapshot so listeners may subscribe or unsubscribe while we iterate.
        let matching: Vec<(bool, SourceListener)> = lock(&self.state)
            .subscriptions
            .iter()
            .filter(|sub| sub.filter.matches(request))
            .map(|sub| (sub.blocking, Arc::clone(&sub.listener)))
            .collect();

        let mut outcome = RequestOutcome {
            cancel: false,
            delivered: matching.len(),
        };

        for (blocking, listener) in matching {
            let response = listener(request);
            if blocking && response.is_some_and(|r| r.cancel) {
                outcome.cancel = true;
            }
        }

        if outcome.cancel {
            log::debug!("Cancelled request {} to {}", request.request_id, request.url);
        }
        outcome
    }
}

impl RequestSource for LocalRequestSource {
    fn subscribe(&self, filter: SourceFilter, extra_info: Vec<ExtraInfoSpec>, listener: SourceListener) -> Unregister {
        let id = {
            let mut state = lock(&self.state);
            let id = state.next_id;
            state.next_id += 1;
            state.subscriptions.push(Subscription {
                id,
                filter,
                blocking: extra_info.contains(&ExtraInfoSpec::Blocking),
                listener,
            });
            id
        };

        let state: Weak<Mutex<SourceState>> = Arc::downgrade(&self.state);
        Box::new(move || {
            let state = state
                .upgrade()
                .ok_or_else(|| UnregisterError("request source is gone".to_string()))?;
            let mut state = lock(&state);
            let before = state.subscriptions.len();
            state.subscriptions.retain(|sub| sub.id != id);
            if state.subscriptions.len() == before {
                return Err(UnregisterError(format!("subscription {id} not found")));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_urls() -> SourceFilter {
        SourceFilter {
            urls: MatchPatternSet::parse(&["<all_urls>"]).unwrap(),
            types: None,
        }
    }

    fn respond(cancel: bool) -> SourceListener {
        Arc::new(move |_: &RawRequest| Some(BlockingResponse { cancel }))
    }

    #[test]
    fn test_filter_by_type_and_url() {
        let filter = SourceFilter {
            urls: MatchPatternSet::parse(&["https://*.tracker.net/*"]).unwrap(),
            types: Some(RequestType::SCRIPT | RequestType::IMAGE),
        };
        assert!(filter.matches(&RawRequest::new("1", "https://cdn.tracker.net/a.js", "script")));
        assert!(!filter.matches(&RawRequest::new("2", "https://cdn.tracker.net/", "main_frame")));
        assert!(!filter.matches(&RawRequest::new("3", "https://example.com/a.js", "script")));
        assert!(!filter.matches(&RawRequest::new("4", "garbage", "script")));
    }

    #[test]
    fn test_empty_url_set_matches_nothing() {
        let filter = SourceFilter::default();
        assert!(!filter.matches(&RawRequest::new("1", "https://example.com/", "script")));
    }

    #[test]
    fn test_blocking_decisions_merge() {
        let source = LocalRequestSource::new();
        let _allow = source.subscribe(all_urls(), vec![ExtraInfoSpec::Blocking], respond(false));
        let _cancel = source.subscribe(all_urls(), vec![ExtraInfoSpec::Blocking], respond(true));

        let outcome = source.emit(&RawRequest::new("1", "https://tracker.net/px", "image"));
        assert_eq!(outcome, RequestOutcome { cancel: true, delivered: 2 });
    }

    #[test]
    fn test_non_blocking_results_ignored() {
        let source = LocalRequestSource::new();
        let _observer = source.subscribe(all_urls(), Vec::new(), respond(true));

        let outcome = source.emit(&RawRequest::new("1", "https://tracker.net/px", "image"));
        assert_eq!(outcome, RequestOutcome { cancel: false, delivered: 1 });
    }

    #[test]
    fn test_unsubscribe() {
        let source = LocalRequestSource::new();
        let unsubscribe = source.subscribe(all_urls(), vec![ExtraInfoSpec::Blocking], respond(true));
        assert_eq!(source.subscriber_count(), 1);

        unsubscribe().unwrap();
        assert_eq!(source.subscriber_count(), 0);
        assert!(!source.emit(&RawRequest::new("1", "https://tracker.net/", "image")).cancel);
    }

    #[test]
    fn test_unsubscribe_after_source_dropped() {
        let source = LocalRequestSource::new();
        let unsubscribe = source.subscribe(all_urls(), Vec::new(), respond(false));
        drop(source);
        assert_eq!(unsubscribe(), Err(UnregisterError("request source is gone".to_string())));
    }
}

//! ClassifiedWebRequest Core Library
//!
//! Classifies HTTP(S) requests by registrable domain and third-party status,
//! and lets subscribed listeners cancel or allow them.
//!
//! # Architecture
//!
//! A request source pushes [`RawRequest`]s into the request filtering
//! pipeline. For each registered listener the pipeline checks the listener's
//! classification gate, host permissions and filter, builds a
//! [`RequestRecord`] and fires the listener synchronously through an
//! [`EventDispatcher`]. Blocking decisions are merged back at the source.
//!
//! # Modules
//!
//! - `psl`: Public suffix table and third-party checks
//! - `url`: Host decomposition into registrable-domain candidates
//! - `classify`: Classification registry and request classifier
//! - `pattern`: WebExtension match patterns and host permissions
//! - `dispatch`: Event dispatcher, listener lifecycle and fire modes
//! - `source`: Request source trait and in-process source
//! - `pipeline`: Request filtering pipeline and the public request APIs
//! - `types`: Shared type definitions

pub mod classify;
pub mod dispatch;
pub mod pattern;
pub mod pipeline;
pub mod psl;
pub mod source;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use crate::classify::{
    ClassificationRegistry, ClassifyOptions, RequestClassifier, RequestTarget, UnknownClassificationError,
};
pub use crate::dispatch::{Context, EventDispatcher, FireHandle, Listener, ListenerHandle, LivenessViolation, UnregisterError};
pub use crate::pattern::{HostPermissions, MatchPattern, MatchPatternSet, PatternError, BLOCKING_PERMISSION};
pub use crate::pipeline::{ClassifiedWebRequest, ConfigurationError, OnBeforeRequest, RequestListener, WebRequest};
pub use crate::psl::{is_third_party, LoadError, PublicSuffixSet};
pub use crate::source::{LocalRequestSource, RequestOutcome, RequestSource};
pub use crate::types::{BlockingResponse, ExtraInfoSpec, RawRequest, RequestFilter, RequestRecord, RequestType};
pub use crate::url::{all_hosts_for_url, InvalidUrlError};

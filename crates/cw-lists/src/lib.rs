//! ClassifiedWebRequest List Loading
//!
//! This crate turns a tracker services document into a flat domain list and
//! installs a tracker blocker on top of the `cw-core` request APIs.

pub mod services;
pub mod setup;

pub use services::{load_services, parse_services, ServicesError, DEFAULT_IGNORED_CATEGORIES};
pub use setup::{BlockerConfig, BlockerEnv, BlockingMode, ConfigError, TrackerBlocker};

//! Tracker services document
//!
//! The document groups tracker domains by category and provider:
//!
//! ```json
//! {"categories": {"Advertising": [{"Acme": {"https://acme.example/": ["acme.net", "acme-ads.com"]}}]}}
//! ```
//!
//! Flattening yields every leaf domain outside the ignored categories.
//! Provider entries that are not domain arrays (such as `"dnt": "eff"`
//! markers) are skipped.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

/// Categories left out unless configured otherwise.
pub const DEFAULT_IGNORED_CATEGORIES: &[&str] = &["Content"];

/// Error type for services document loading.
#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error("Failed to read services file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid services JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Services document has no 'categories' object")]
    MissingCategories,
}

/// Flatten a services document into a sorted, de-duplicated domain list.
pub fn parse_services<S: AsRef<str>>(json: &str, ignored_categories: &[S]) -> Result<Vec<String>, ServicesError> {
    let document: Value = serde_json::from_str(json)?;
    let categories = document
        .get("categories")
        .and_then(Value::as_object)
        .ok_or(ServicesError::MissingCategories)?;

    let mut domains = BTreeSet::new();
    for (category, providers) in categories {
        if ignored_categories.iter().any(|ignored| ignored.as_ref() == category) {
            log::debug!("Skipping category '{category}'");
            continue;
        }

        let Some(providers) = providers.as_array() else {
            log::warn!("Category '{category}' is not a provider list");
            continue;
        };

        for provider in providers.iter().filter_map(Value::as_object) {
            for urls in provider.values().filter_map(Value::as_object) {
                for list in urls.values().filter_map(Value::as_array) {
                    domains.extend(list.iter().filter_map(Value::as_str).map(str::to_string));
                }
            }
        }
    }

    Ok(domains.into_iter().collect())
}

/// Read and flatten a services file.
pub fn load_services<S: AsRef<str>>(
    path: impl AsRef<Path>,
    ignored_categories: &[S],
) -> Result<Vec<String>, ServicesError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ServicesError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let domains = parse_services(&text, ignored_categories)?;
    log::info!("Loaded {} tracker domains from '{}'", domains.len(), path.display());
    Ok(domains)
}

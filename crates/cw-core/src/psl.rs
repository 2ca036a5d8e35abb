//! Public Suffix table and same-party checks
//!
//! The table is a plain set of suffix strings taken line by line from a
//! public suffix file. Entries are compared exactly as written: no wildcard
//! (`*.ck`) or exception (`!www.ck`) semantics and no case folding.
//!
//! # Examples
//!
//! ```
//! use cw_core::psl::{is_third_party, PublicSuffixSet};
//!
//! let suffixes = PublicSuffixSet::parse("// comment\ncom\nuk\nco.uk\n");
//! assert!(suffixes.contains("co.uk"));
//! assert!(!is_third_party(Some("https://a.example.com/"), "https://b.example.com/", &suffixes));
//! assert!(is_third_party(Some("https://example.com/"), "https://tracker.net/", &suffixes));
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::url::{all_hosts_for_url, host_candidates, parse_host};

/// Error type for suffix table loading.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read public suffix list '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// =============================================================================
// Suffix Set
// =============================================================================

/// Immutable set of public suffixes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicSuffixSet {
    entries: HashSet<String>,
}

impl PublicSuffixSet {
    /// Create an empty table. Nothing is treated as a suffix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse suffix file contents.
    ///
    /// Empty lines and lines starting with `//` are skipped; every other line
    /// is stored verbatim.
    pub fn parse(text: &str) -> Self {
        text.lines()
            .filter(|line| !line.is_empty() && !line.starts_with("//"))
            .map(str::to_string)
            .collect()
    }

    /// Load a suffix file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let set = Self::parse(&text);
        log::info!("Loaded {} public suffixes from '{}'", set.len(), path.display());
        Ok(set)
    }

    /// Check whether `label` is listed as a public suffix.
    #[inline]
    pub fn contains(&self, label: &str) -> bool {
        self.entries.contains(label)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<String> for PublicSuffixSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<&'a str> for PublicSuffixSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter().map(str::to_string).collect()
    }
}

// =============================================================================
// Party Checks
// =============================================================================

/// Check if a request to `url` made by a document at `origin_url` is
/// third-party.
///
/// A missing or empty origin (top-level navigation) is never third-party.
/// An origin that cannot be parsed is treated the same way. Otherwise the
/// request is third-party when the two host decompositions share no entry.
pub fn is_third_party(origin_url: Option<&str>, url: &str, suffixes: &PublicSuffixSet) -> bool {
    let origin_url = match origin_url {
        Some(origin) if !origin.is_empty() => origin,
        _ => return false,
    };

    let origin_host = match parse_host(origin_url) {
        Ok(host) => host,
        Err(e) => {
            log::debug!("Treating unparsable origin as first-party: {e}");
            return false;
        }
    };

    let origin_hosts: HashSet<String> = host_candidates(&origin_host, suffixes).into_iter().collect();
    !all_hosts_for_url(url, suffixes)
        .iter()
        .any(|host| origin_hosts.contains(host))
}

/// Check if two URLs share a registrable domain.
pub fn is_same_party(first_url: &str, second_url: &str, suffixes: &PublicSuffixSet) -> bool {
    let first: HashSet<String> = all_hosts_for_url(first_url, suffixes).into_iter().collect();
    all_hosts_for_url(second_url, suffixes)
        .iter()
        .any(|host| first.contains(host))
}

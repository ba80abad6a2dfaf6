//! URI ignore patterns.
//!
//! Patterns always match the *whole* URI: `example\.com` does not match
//! `https://example.com/`. The [`IgnoreList`] is copy-on-write so it can be
//! appended to while other threads are checking URIs against it.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use regex::Regex;

use crate::error::IdleError;

/// A compiled regular expression matched against entire URIs.
#[derive(Clone)]
pub struct UriPattern {
    source: String,
    anchored: Regex,
}

impl UriPattern {
    /// Compiles `pattern` with whole-string match semantics.
    pub fn new(pattern: &str) -> Result<Self, IdleError> {
        let invalid = |source: regex::Error| IdleError::Pattern {
            pattern: pattern.to_string(),
            source,
        };
        Regex::new(pattern).map_err(invalid)?;
        // In verbose mode a trailing `#` comment swallows the closing anchor;
        // a newline ends the comment and is otherwise ignored there.
        let anchored = Regex::new(&format!("^(?:{pattern})$"))
            .or_else(|_| Regex::new(&format!("^(?:{pattern}\n)$")))
            .map_err(invalid)?;
        Ok(Self {
            source: pattern.to_string(),
            anchored,
        })
    }

    /// Re-anchors an already compiled regex so it matches whole URIs only.
    pub fn from_regex(regex: &Regex) -> Result<Self, IdleError> {
        Self::new(regex.as_str())
    }

    /// Returns true if the whole of `uri` matches.
    pub fn matches(&self, uri: &str) -> bool {
        self.anchored.is_match(uri)
    }

    /// Returns the pattern as written, without anchors.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for UriPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UriPattern").field(&self.source).finish()
    }
}

impl fmt::Display for UriPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for UriPattern {
    type Err = IdleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Append-only set of [`UriPattern`]s.
///
/// Readers take a snapshot of the current list and iterate it without
/// holding the lock, so an append never produces a torn view.
#[derive(Debug, Default)]
pub struct IgnoreList {
    patterns: RwLock<Arc<[UriPattern]>>,
}

impl IgnoreList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pattern, publishing a new snapshot.
    pub fn push(&self, pattern: UriPattern) {
        let mut guard = self.patterns.write().unwrap_or_else(PoisonError::into_inner);
        let next: Arc<[UriPattern]> = guard.iter().cloned().chain(Some(pattern)).collect();
        *guard = next;
    }

    /// Returns the first pattern matching `uri`, if any.
    pub fn find_match(&self, uri: &str) -> Option<UriPattern> {
        self.snapshot().iter().find(|p| p.matches(uri)).cloned()
    }

    /// Returns the current patterns.
    pub fn snapshot(&self) -> Arc<[UriPattern]> {
        Arc::clone(&self.patterns.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

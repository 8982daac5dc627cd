//! Route skip matcher
//!
//! Paths matching any of these patterns bypass authentication entirely. The
//! identity provider's own login and callback endpoints live here, so they
//! stay reachable whatever credential the caller holds.

use regex_lite::Regex;
use tracing::warn;

/// Precompiled, ordered set of skip patterns
#[derive(Debug, Clone, Default)]
pub struct RouteSkipMatcher {
    patterns: Vec<Regex>,
}

impl RouteSkipMatcher {
    /// Compile `patterns` in order.
    ///
    /// A pattern that fails to compile is logged and left out.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .filter_map(|p| match Regex::new(p.as_ref()) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = p.as_ref(), error = %e, "ignoring invalid skip route pattern");
                    None
                }
            })
            .collect();

        Self { patterns }
    }

    /// Index of the first pattern matching `path`
    pub fn first_match(&self, path: &str) -> Option<usize> {
        self.patterns.iter().position(|re| re.is_match(path))
    }

    pub fn matches(&self, path: &str) -> bool {
        self.first_match(path).is_some()
    }

    /// Number of patterns that compiled
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

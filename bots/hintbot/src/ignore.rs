// SPDX-License-Identifier: PMPL-1.0-or-later
//! Ignored URL patterns.
//!
//! Keys are rule ids, or [`ALL`] for patterns that silence an event for
//! every subscriber. Patterns are regular expressions searched (unanchored)
//! in the event's resource.

use crate::error::{EngineError, Result};
use regex::Regex;
use std::collections::HashMap;

/// Key whose patterns suppress dispatch entirely
pub const ALL: &str = "all";

/// Compiled ignore patterns, read-only once built
#[derive(Debug, Clone, Default)]
pub struct IgnoredUrls {
    patterns: HashMap<String, Vec<Regex>>,
}

impl IgnoredUrls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile the configured `key -> patterns` mapping
    pub fn compile(raw: &HashMap<String, Vec<String>>) -> Result<Self> {
        let mut patterns = HashMap::with_capacity(raw.len());

        for (key, sources) in raw {
            let compiled = sources
                .iter()
                .map(|source| {
                    Regex::new(source).map_err(|e| EngineError::InvalidPattern {
                        key: key.clone(),
                        pattern: source.clone(),
                        source: e,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            patterns.insert(key.clone(), compiled);
        }

        Ok(Self { patterns })
    }

    /// Whether `resource` matches a pattern registered under `key`
    pub fn is_ignored(&self, key: &str, resource: &str) -> bool {
        self.patterns
            .get(key)
            .is_some_and(|list| list.iter().any(|re| re.is_match(resource)))
    }

    /// Whether `resource` is ignored for every subscriber
    pub fn is_ignored_for_all(&self, resource: &str) -> bool {
        self.is_ignored(ALL, resource)
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.values().all(Vec::is_empty)
    }
}

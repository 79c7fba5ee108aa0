// SPDX-License-Identifier: PMPL-1.0-or-later
//! Problem store: append-only record of what rules reported.

use crate::config::Severity;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// Position of a problem in the resource's source. `(-1, -1)` when unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemLocation {
    pub line: i64,
    pub column: i64,
}

impl ProblemLocation {
    pub fn new(line: i64, column: i64) -> Self {
        Self { line, column }
    }

    pub fn is_known(&self) -> bool {
        self.line >= 0 && self.column >= 0
    }
}

impl Default for ProblemLocation {
    fn default() -> Self {
        Self { line: -1, column: -1 }
    }
}

/// A problem reported by a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    /// URL or path the problem concerns
    pub resource: String,
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    pub location: ProblemLocation,
    /// Offending snippet, empty when the rule had no element
    pub source_code: String,
}

impl Problem {
    /// Create a new problem with an unknown location and no source snippet
    pub fn new(resource: &str, rule_id: &str, severity: Severity, message: &str) -> Self {
        Self {
            resource: resource.to_string(),
            rule_id: rule_id.to_string(),
            severity,
            message: message.to_string(),
            location: ProblemLocation::default(),
            source_code: String::new(),
        }
    }

    /// Set the location
    pub fn with_location(mut self, location: ProblemLocation) -> Self {
        self.location = location;
        self
    }

    /// Set the source snippet
    pub fn with_source_code(mut self, source_code: &str) -> Self {
        self.source_code = source_code.to_string();
        self
    }
}

/// Longest source snippet kept on a problem, in characters
pub const SOURCE_CODE_MAX: usize = 50;

/// Shorten `text` to at most `max` characters by eliding its middle
pub fn cut_string(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }

    let part = max.saturating_sub(3) / 2;
    let head: String = text.chars().take(part).collect();
    let tail: String = text.chars().skip(count - part).collect();
    format!("{} … {}", head, tail)
}

/// Whether any problem in `problems` fails the analysis
pub fn has_errors(problems: &[Problem]) -> bool {
    problems.iter().any(|p| p.severity == Severity::Error)
}

/// Append-only problem list shared by every active rule of one engine.
///
/// Entries are kept in report order; nothing here sorts or deduplicates.
#[derive(Debug, Default)]
pub struct ProblemStore {
    problems: Mutex<Vec<Problem>>,
}

impl ProblemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Problem>> {
        // push/retain/clear never leave the Vec half-written
        self.problems.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a problem
    pub fn add(&mut self, problem: Problem) {
        self.problems
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .push(problem);
    }

    /// Append a problem through a shared reference
    pub fn report(&self, problem: Problem) {
        self.lock().push(problem);
    }

    /// Every problem, in report order
    pub fn all(&self) -> Vec<Problem> {
        self.lock().clone()
    }

    /// Remove every problem reported for `resource`
    pub fn clean(&self, resource: &str) {
        self.lock().retain(|p| p.resource != resource);
    }

    /// Empty the store
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

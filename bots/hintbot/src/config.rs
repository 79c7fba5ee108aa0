// SPDX-License-Identifier: PMPL-1.0-or-later
//! Resolved engine configuration.
//!
//! Loading, merging and validating configuration files happens upstream;
//! this module only owns the shape the engine consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Severity of a reported problem, or `Off` for a disabled rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Rule disabled
    Off,
    /// Should be addressed
    Warning,
    /// Fails the analysis
    Error,
}

impl Severity {
    /// Whether the rule is enabled at this severity
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Severity::Off)
    }

    /// Parse a severity given as a number (`0..=2`) or a name.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => match n.as_u64()? {
                0 => Some(Severity::Off),
                1 => Some(Severity::Warning),
                2 => Some(Severity::Error),
                _ => None,
            },
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Off => write!(f, "off"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(Severity::Off),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(format!("Unknown severity: {}", other)),
        }
    }
}

/// Per-rule configuration: a severity, optionally followed by rule options.
///
/// Accepts `"error"`, `2`, or `["warning", { ... }]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub struct RuleConfig {
    pub severity: Severity,
    pub options: Vec<Value>,
}

impl RuleConfig {
    pub fn new(severity: Severity) -> Self {
        Self {
            severity,
            options: Vec::new(),
        }
    }

    /// Attach rule options
    pub fn with_options(mut self, options: Vec<Value>) -> Self {
        self.options = options;
        self
    }
}

impl TryFrom<Value> for RuleConfig {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(mut items) => {
                if items.is_empty() {
                    return Err("rule configuration array is empty".to_string());
                }
                let first = items.remove(0);
                let severity = Severity::from_value(&first)
                    .ok_or_else(|| format!("invalid severity {}", first))?;
                Ok(Self {
                    severity,
                    options: items,
                })
            }
            other => Severity::from_value(&other)
                .map(Self::new)
                .ok_or_else(|| format!("invalid severity {}", other)),
        }
    }
}

/// Which connector to use and how to set it up
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    pub name: String,

    #[serde(default)]
    pub options: Value,
}

impl ConnectorConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            options: Value::Null,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Wall-clock budget for a single rule handler invocation
    #[serde(default = "default_rules_timeout", deserialize_with = "millis")]
    pub rules_timeout: Duration,

    /// Targeted browsers, passed through to rules
    #[serde(default)]
    pub browserslist: Vec<String>,

    /// Rule id (or `all`) to regex patterns matched against resources
    #[serde(default)]
    pub ignored_urls: HashMap<String, Vec<String>>,

    #[serde(default)]
    pub rules: HashMap<String, RuleConfig>,

    pub connector: ConnectorConfig,
}

impl Config {
    /// Minimal configuration for the given connector and no rules
    pub fn new(connector: &str) -> Self {
        Self {
            rules_timeout: default_rules_timeout(),
            browserslist: Vec::new(),
            ignored_urls: HashMap::new(),
            rules: HashMap::new(),
            connector: ConnectorConfig::new(connector),
        }
    }

    pub fn with_rules_timeout(mut self, timeout: Duration) -> Self {
        self.rules_timeout = timeout;
        self
    }

    pub fn with_rule(mut self, id: &str, rule: RuleConfig) -> Self {
        self.rules.insert(id.to_string(), rule);
        self
    }

    pub fn with_ignored_urls(mut self, key: &str, patterns: &[&str]) -> Self {
        self.ignored_urls
            .entry(key.to_string())
            .or_default()
            .extend(patterns.iter().map(|p| p.to_string()));
        self
    }

    pub fn with_browserslist(mut self, browsers: &[&str]) -> Self {
        self.browserslist = browsers.iter().map(|b| b.to_string()).collect();
        self
    }
}

fn default_rules_timeout() -> Duration {
    Duration::from_millis(60_000)
}

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

// SPDX-License-Identifier: PMPL-1.0-or-later
//! Decides which catalog rules activate under a given connector.

use super::{Rule, RuleScope, LOCAL_CONNECTOR};
use crate::config::{RuleConfig, Severity};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A rule left out because its scope does not fit the connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeWarning {
    pub rule_id: String,
    pub connector_id: String,
}

impl fmt::Display for ScopeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "The rule \"{}\" will be ignored for the connector \"{}\"",
            self.rule_id, self.connector_id
        )
    }
}

/// A rule that passed every exclusion, with its configuration
#[derive(Clone)]
pub struct EnabledRule {
    pub rule: Arc<dyn Rule>,
    pub config: RuleConfig,
}

impl fmt::Debug for EnabledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnabledRule")
            .field("id", &self.rule.meta().id)
            .field("config", &self.config)
            .finish()
    }
}

/// Outcome of [`resolve`]
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Enabled rules, in catalog order
    pub enabled: Vec<EnabledRule>,
    pub warnings: Vec<ScopeWarning>,
}

impl Resolution {
    pub fn enabled_ids(&self) -> Vec<&str> {
        self.enabled
            .iter()
            .map(|e| e.rule.meta().id.as_str())
            .collect()
    }
}

/// Compute the active rule set for `connector_id`.
///
/// Exclusions are checked in order: severity off or unset, connector listed
/// in the rule's ignored connectors, `local` scope off the local connector,
/// `site` scope on it. Only the two scope exclusions produce a warning.
pub fn resolve(
    catalog: &[Arc<dyn Rule>],
    rules: &HashMap<String, RuleConfig>,
    connector_id: &str,
) -> Resolution {
    let mut resolution = Resolution::default();
    let on_local = connector_id == LOCAL_CONNECTOR;

    for rule in catalog {
        let meta = rule.meta();

        let config = match rules.get(&meta.id) {
            Some(config) if config.severity != Severity::Off => config,
            _ => {
                debug!("Rule \"{}\" is disabled", meta.id);
                continue;
            }
        };

        if meta.ignores_connector(connector_id) {
            debug!("Rule \"{}\" is disabled for the connector \"{}\"", meta.id, connector_id);
            continue;
        }

        let misplaced = match meta.scope {
            RuleScope::Local => !on_local,
            RuleScope::Site => on_local,
            RuleScope::Any => false,
        };
        if misplaced {
            let warning = ScopeWarning {
                rule_id: meta.id.clone(),
                connector_id: connector_id.to_string(),
            };
            warn!("{}", warning);
            resolution.warnings.push(warning);
            continue;
        }

        resolution.enabled.push(EnabledRule {
            rule: rule.clone(),
            config: config.clone(),
        });
    }

    resolution
}

// SPDX-License-Identifier: PMPL-1.0-or-later
//! Resources registry.
//!
//! Built once at startup by whatever loads rules and connectors, then handed
//! to [`Engine::new`](crate::engine::Engine::new). Connector factories are
//! keyed by name; rules keep their registration order, which becomes the
//! subscription order on the bus.

use crate::connector::{Connector, ConnectorFactory};
use crate::dispatcher::Emitter;
use crate::error::{EngineError, Result};
use crate::rules::Rule;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Wrap a closure as a [`ConnectorFactory`]
pub fn connector_factory<F>(f: F) -> ConnectorFactory
where
    F: Fn(Emitter, &Value) -> anyhow::Result<Arc<dyn Connector>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Connector factories and the rule catalog
#[derive(Clone, Default)]
pub struct Resources {
    connectors: HashMap<String, ConnectorFactory>,
    rules: Vec<Arc<dyn Rule>>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector factory, replacing any previous one of that name
    pub fn register_connector(&mut self, name: &str, factory: ConnectorFactory) {
        debug!("Registering connector {}", name);
        self.connectors.insert(name.to_string(), factory);
    }

    /// Add a rule to the end of the catalog
    pub fn register_rule(&mut self, rule: Arc<dyn Rule>) -> Result<()> {
        let id = rule.meta().id.clone();
        if self.rules.iter().any(|r| r.meta().id == id) {
            return Err(EngineError::DuplicateRule(id));
        }
        debug!("Registering rule {}", id);
        self.rules.push(rule);
        Ok(())
    }

    pub fn with_connector(mut self, name: &str, factory: ConnectorFactory) -> Self {
        self.register_connector(name, factory);
        self
    }

    pub fn with_rule(mut self, rule: Arc<dyn Rule>) -> Result<Self> {
        self.register_rule(rule)?;
        Ok(self)
    }

    pub fn connector(&self, name: &str) -> Option<&ConnectorFactory> {
        self.connectors.get(name)
    }

    /// Registered connector names, sorted
    pub fn connector_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The rule catalog, in registration order
    pub fn rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
//! Rule capability interfaces.
//!
//! A rule is supplied by an external catalog as a [`Rule`]: immutable
//! [`RuleMeta`] plus a factory for a [`RuleInstance`]. The engine creates one
//! instance per enabled rule and lets it subscribe through a
//! [`RuleSubscriber`], which routes every handler through the scheduler.

pub mod context;
pub mod resolver;

pub use context::RuleContext;
pub use resolver::{resolve, Resolution, ScopeWarning};

use crate::config::Severity;
use crate::dispatcher::{Dispatcher, Listener};
use crate::error::Result;
use crate::scheduler::RuleScheduler;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Connector id of the filesystem connector
pub const LOCAL_CONNECTOR: &str = "local";

/// Which kind of connector a rule may run under
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    /// Only against local files
    Local,
    /// Only against live sites
    Site,
    #[default]
    Any,
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleScope::Local => write!(f, "local"),
            RuleScope::Site => write!(f, "site"),
            RuleScope::Any => write!(f, "any"),
        }
    }
}

/// Rule descriptor, never mutated after the catalog is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMeta {
    pub id: String,

    #[serde(default)]
    pub scope: RuleScope,

    /// Connector ids this rule must never run under
    #[serde(default)]
    pub ignored_connectors: Vec<String>,

    /// JSON schema of the rule's options
    #[serde(default)]
    pub schema: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RuleMeta {
    pub fn new(id: &str, scope: RuleScope) -> Self {
        Self {
            id: id.to_string(),
            scope,
            ignored_connectors: Vec::new(),
            schema: Value::Null,
            description: None,
        }
    }

    pub fn with_ignored_connectors(mut self, connectors: &[&str]) -> Self {
        self.ignored_connectors = connectors.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn ignores_connector(&self, connector_id: &str) -> bool {
        self.ignored_connectors.iter().any(|c| c == connector_id)
    }
}

/// A rule as provided by the catalog
pub trait Rule: Send + Sync {
    fn meta(&self) -> &RuleMeta;

    /// Build the per-engine instance bound to `context`
    fn create(&self, context: RuleContext) -> Box<dyn RuleInstance>;
}

/// A rule bound to one engine
pub trait RuleInstance: Send + Sync {
    /// Register the instance's event handlers
    fn subscribe(&self, subscriber: &RuleSubscriber<'_>) -> Result<()>;
}

/// Subscription surface handed to [`RuleInstance::subscribe`]
pub struct RuleSubscriber<'a> {
    rule_id: &'a str,
    scheduler: &'a RuleScheduler,
    dispatcher: &'a Dispatcher,
}

impl<'a> RuleSubscriber<'a> {
    pub(crate) fn new(rule_id: &'a str, scheduler: &'a RuleScheduler, dispatcher: &'a Dispatcher) -> Self {
        Self {
            rule_id,
            scheduler,
            dispatcher,
        }
    }

    pub fn rule_id(&self) -> &str {
        self.rule_id
    }

    /// Subscribe `handler` to `pattern` with this rule's timeout and ignores
    pub fn on(&self, pattern: &str, handler: Listener) -> Result<()> {
        self.scheduler
            .register(self.dispatcher, self.rule_id, pattern, handler)
    }
}

/// An enabled rule: descriptor, resolved severity and live instance
pub struct ActiveRule {
    meta: RuleMeta,
    severity: Severity,
    context: RuleContext,
    instance: Box<dyn RuleInstance>,
}

impl ActiveRule {
    pub(crate) fn new(context: RuleContext, instance: Box<dyn RuleInstance>) -> Self {
        Self {
            meta: context.meta().clone(),
            severity: context.severity(),
            context,
            instance,
        }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn options(&self) -> &[Value] {
        self.context.options()
    }

    pub fn instance(&self) -> &dyn RuleInstance {
        self.instance.as_ref()
    }
}

impl fmt::Debug for ActiveRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveRule")
            .field("id", &self.meta.id)
            .field("scope", &self.meta.scope)
            .field("severity", &self.severity)
            .finish()
    }
}

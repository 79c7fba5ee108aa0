// SPDX-License-Identifier: PMPL-1.0-or-later
//! What a rule instance can see and do.

use super::RuleMeta;
use crate::config::{RuleConfig, Severity};
use crate::connector::{Connector, HtmlElement, NetworkData};
use crate::error::{EngineError, Result};
use crate::problems::{cut_string, Problem, ProblemLocation, ProblemStore, SOURCE_CODE_MAX};
use crate::scheduler::invocation_expired;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::Url;

struct ContextInner {
    meta: RuleMeta,
    severity: Severity,
    options: Vec<Value>,
    browsers: Vec<String>,
    connector: Arc<dyn Connector>,
    store: Arc<ProblemStore>,
}

/// Per-rule handle on the engine. Cheap to clone into handlers.
#[derive(Clone)]
pub struct RuleContext {
    inner: Arc<ContextInner>,
}

impl RuleContext {
    pub(crate) fn new(
        meta: RuleMeta,
        config: RuleConfig,
        browsers: Vec<String>,
        connector: Arc<dyn Connector>,
        store: Arc<ProblemStore>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                meta,
                severity: config.severity,
                options: config.options,
                browsers,
                connector,
                store,
            }),
        }
    }

    pub fn rule_id(&self) -> &str {
        &self.inner.meta.id
    }

    pub fn severity(&self) -> Severity {
        self.inner.severity
    }

    pub fn meta(&self) -> &RuleMeta {
        &self.inner.meta
    }

    /// Options that followed the severity in the rule's configuration
    pub fn options(&self) -> &[Value] {
        &self.inner.options
    }

    /// Deserialize the option at `index`, if present
    pub fn option<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>> {
        self.inner
            .options
            .get(index)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| EngineError::InvalidRuleConfig {
                    rule_id: self.rule_id().to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    pub fn targeted_browsers(&self) -> &[String] {
        &self.inner.browsers
    }

    /// Record a problem against `resource`.
    ///
    /// With an element, the snippet is its shortened markup and the location
    /// falls back to the connector's. Reports from an invocation that already
    /// timed out are dropped.
    pub async fn report(
        &self,
        resource: &str,
        element: Option<&dyn HtmlElement>,
        message: &str,
        location: Option<ProblemLocation>,
    ) {
        if invocation_expired() {
            debug!("Dropping late report from {} on {}", self.rule_id(), resource);
            return;
        }

        let (source_code, location) = match element {
            Some(element) => {
                let html = element.outer_html().await;
                let location = match location {
                    Some(location) => location,
                    None => self.find_problem_location(element, None).await,
                };
                (cut_string(&html, SOURCE_CODE_MAX), location)
            }
            None => (String::new(), location.unwrap_or_default()),
        };

        // the awaits above may have outlived the budget
        if invocation_expired() {
            debug!("Dropping late report from {} on {}", self.rule_id(), resource);
            return;
        }

        let problem = Problem::new(resource, self.rule_id(), self.severity(), message)
            .with_location(location)
            .with_source_code(&source_code);
        self.inner.store.report(problem);
    }

    /// Where `element` (or `content` inside it) sits in the page source
    pub async fn find_problem_location(
        &self,
        element: &dyn HtmlElement,
        content: Option<&str>,
    ) -> ProblemLocation {
        self.inner
            .connector
            .find_problem_location(element, content)
            .await
            .unwrap_or_default()
    }

    pub async fn fetch_content(
        &self,
        target: &Url,
        headers: &HashMap<String, String>,
    ) -> anyhow::Result<NetworkData> {
        self.inner.connector.fetch_content(target, headers).await
    }

    pub async fn evaluate(&self, source: &str) -> anyhow::Result<Value> {
        self.inner.connector.evaluate(source).await
    }

    pub async fn query_selector_all(&self, selector: &str) -> anyhow::Result<Vec<Arc<dyn HtmlElement>>> {
        self.inner.connector.query_selector_all(selector).await
    }

    pub fn page_dom(&self) -> Option<Arc<dyn HtmlElement>> {
        self.inner.connector.dom()
    }

    pub async fn page_html(&self) -> anyhow::Result<String> {
        self.inner.connector.html().await
    }

    pub fn page_headers(&self) -> HashMap<String, String> {
        self.inner.connector.headers()
    }
}

impl fmt::Debug for RuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("rule_id", &self.inner.meta.id)
            .field("severity", &self.inner.severity)
            .field("options", &self.inner.options)
            .finish()
    }
}

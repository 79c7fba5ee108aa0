// SPDX-License-Identifier: PMPL-1.0-or-later
//! Engine facade.
//!
//! Owns the bus, the scheduler, the connector, the problem store and the
//! active rules of one analysis session. A target is scanned as:
//!
//! 1. `scan::start` is emitted and settles,
//! 2. the connector collects the target, emitting its own events,
//! 3. `scan::end` is emitted and settles,
//! 4. `print` is emitted with the problem store contents, which are returned.

use crate::config::Config;
use crate::connector::{Connector, HtmlElement, NetworkData};
use crate::dispatcher::{Dispatcher, Emitter, HandlerOutput, Listener, Observer};
use crate::error::{EngineError, Result};
use crate::events::Payload;
use crate::ignore::IgnoredUrls;
use crate::problems::{Problem, ProblemStore};
use crate::registry::Resources;
use crate::rules::{resolve, ActiveRule, RuleContext, RuleSubscriber, ScopeWarning};
use crate::scheduler::{RuleScheduler, RuleTimeout};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Marks the engine busy for the lifetime of one scan
struct ScanGuard<'a> {
    scanning: &'a AtomicBool,
}

impl<'a> ScanGuard<'a> {
    fn acquire(scanning: &'a AtomicBool) -> Result<Self> {
        scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| EngineError::ScanInProgress)?;
        Ok(Self { scanning })
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.scanning.store(false, Ordering::SeqCst);
    }
}

/// Collaborator errors that wrap an engine error are unwrapped
fn from_connector(error: anyhow::Error) -> EngineError {
    match error.downcast::<EngineError>() {
        Ok(engine) => engine,
        Err(other) => EngineError::Connector(other),
    }
}

/// The analysis engine
pub struct Engine {
    connector_id: String,
    browsers: Vec<String>,
    dispatcher: Arc<Dispatcher>,
    scheduler: RuleScheduler,
    connector: Arc<dyn Connector>,
    store: Arc<ProblemStore>,
    rules: Vec<ActiveRule>,
    warnings: Vec<ScopeWarning>,
    scanning: AtomicBool,
}

impl Engine {
    /// Build an engine from resolved configuration and loaded resources.
    ///
    /// Fails with [`EngineError::ConnectorNotFound`] before anything else is
    /// built if the configured connector has no factory.
    pub fn new(config: &Config, resources: &Resources) -> Result<Self> {
        let connector_id = config.connector.name.clone();
        let factory = resources
            .connector(&connector_id)
            .ok_or_else(|| EngineError::ConnectorNotFound(connector_id.clone()))?;

        debug!("Initializing engine");
        let ignored = Arc::new(IgnoredUrls::compile(&config.ignored_urls)?);
        let dispatcher = Arc::new(Dispatcher::new(ignored.clone()));
        let connector = factory(dispatcher.emitter(), &config.connector.options)
            .map_err(EngineError::Connector)?;
        let scheduler = RuleScheduler::new(config.rules_timeout, ignored);
        let store = Arc::new(ProblemStore::new());

        let resolution = resolve(resources.rules(), &config.rules, &connector_id);
        let mut rules = Vec::with_capacity(resolution.enabled.len());

        for enabled in resolution.enabled {
            let context = RuleContext::new(
                enabled.rule.meta().clone(),
                enabled.config,
                config.browserslist.clone(),
                connector.clone(),
                store.clone(),
            );
            let instance = enabled.rule.create(context.clone());
            instance.subscribe(&RuleSubscriber::new(context.rule_id(), &scheduler, &dispatcher))?;

            debug!("Rule {} enabled at {}", context.rule_id(), context.severity());
            rules.push(ActiveRule::new(context, instance));
        }

        info!(
            "Engine ready: connector {}, {} active rules",
            connector_id,
            rules.len()
        );

        Ok(Self {
            connector_id,
            browsers: config.browserslist.clone(),
            dispatcher,
            scheduler,
            connector,
            store,
            rules,
            warnings: resolution.warnings,
            scanning: AtomicBool::new(false),
        })
    }

    /// Scan one target and return the problem store contents.
    ///
    /// Handler and connector failures abort this target and surface here.
    pub async fn execute_on(&self, target: &Url) -> Result<Vec<Problem>> {
        let _guard = ScanGuard::acquire(&self.scanning)?;
        let resource = target.to_string();

        info!("Starting scan of {}", resource);
        self.dispatcher
            .emit("scan::start", Payload::scan(&resource))
            .await?;

        self.connector.collect(target).await.map_err(from_connector)?;

        self.dispatcher
            .emit("scan::end", Payload::scan(&resource))
            .await?;
        debug!("Scan of {} finished", resource);

        self.notify().await
    }

    /// Emit `print` with the current problems and return them
    pub async fn notify(&self) -> Result<Vec<Problem>> {
        let problems = self.store.all();
        self.dispatcher
            .emit("print", Payload::Print(problems.clone()))
            .await?;
        Ok(problems)
    }

    /// Subscribe a raw listener (formatters, progress feedback)
    pub fn on(&self, pattern: &str, listener: Listener) -> Result<()> {
        self.dispatcher.on(pattern, listener)
    }

    pub fn on_any(&self, observer: Observer) {
        self.dispatcher.on_any(observer);
    }

    pub async fn emit(&self, topic: &str, payload: Payload) -> Result<Vec<HandlerOutput>> {
        self.dispatcher.emit(topic, payload).await
    }

    pub fn emitter(&self) -> Emitter {
        self.dispatcher.emitter()
    }

    /// Append a problem directly
    pub fn report(&self, problem: Problem) {
        self.store.report(problem);
    }

    pub fn problems(&self) -> Vec<Problem> {
        self.store.all()
    }

    /// Drop the problems reported for `resource`
    pub fn clean(&self, resource: &str) {
        self.store.clean(resource);
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    /// Release the connector's browser or file handles
    pub async fn close(&self) -> Result<()> {
        debug!("Closing connector {}", self.connector_id);
        self.connector.close().await.map_err(EngineError::Connector)
    }

    pub async fn fetch_content(
        &self,
        target: &Url,
        headers: &HashMap<String, String>,
    ) -> Result<NetworkData> {
        self.connector
            .fetch_content(target, headers)
            .await
            .map_err(EngineError::Connector)
    }

    pub async fn evaluate(&self, source: &str) -> Result<Value> {
        self.connector
            .evaluate(source)
            .await
            .map_err(EngineError::Connector)
    }

    pub async fn query_selector_all(&self, selector: &str) -> Result<Vec<Arc<dyn HtmlElement>>> {
        self.connector
            .query_selector_all(selector)
            .await
            .map_err(EngineError::Connector)
    }

    pub fn page_dom(&self) -> Option<Arc<dyn HtmlElement>> {
        self.connector.dom()
    }

    pub async fn page_html(&self) -> Result<String> {
        self.connector.html().await.map_err(EngineError::Connector)
    }

    pub fn page_headers(&self) -> HashMap<String, String> {
        self.connector.headers()
    }

    pub fn targeted_browsers(&self) -> &[String] {
        &self.browsers
    }

    /// Budget for one rule handler invocation
    pub fn timeout(&self) -> Duration {
        self.scheduler.timeout()
    }

    pub fn connector_id(&self) -> &str {
        &self.connector_id
    }

    /// Enabled rules, in catalog order
    pub fn active_rules(&self) -> &[ActiveRule] {
        &self.rules
    }

    /// Rules excluded because their scope did not fit the connector
    pub fn scope_warnings(&self) -> &[ScopeWarning] {
        &self.warnings
    }

    pub fn rule_timeouts(&self) -> Vec<RuleTimeout> {
        self.scheduler.timeouts()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }
}

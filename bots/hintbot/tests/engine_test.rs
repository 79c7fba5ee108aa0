// SPDX-License-Identifier: PMPL-1.0-or-later
//! Integration tests for the hintbot engine
//!
//! Tests cover:
//! - End-to-end reporting from a connector-driven fetch event
//! - Per-handler timeouts bounding emission settlement
//! - Scan lifecycle ordering and the print event
//! - Failure propagation and ignored URLs
//! - Multi-target runs under both retention policies

use async_trait::async_trait;
use hintbot::dispatcher::Observer;
use hintbot::events::{ElementFound, FetchEnd};
use hintbot::driver::{AnalysisSummary, TargetOutcome};
use hintbot::prelude::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use url::Url;

// =============================================================================
// Test collaborators
// =============================================================================

struct Link {
    href: String,
}

#[async_trait]
impl HtmlElement for Link {
    fn node_name(&self) -> String {
        "link".to_string()
    }

    fn get_attribute(&self, name: &str) -> Option<String> {
        (name == "href").then(|| self.href.clone())
    }

    async fn outer_html(&self) -> String {
        format!("<link rel=\"manifest\" href=\"{}\">", self.href)
    }
}

/// Connector that narrates a one-page site: the page is served with the
/// configured status, holds one `<link>`, and hosts named `down` fail.
struct SiteConnector {
    emitter: Emitter,
    status: u16,
}

impl SiteConnector {
    fn factory() -> hintbot::connector::ConnectorFactory {
        connector_factory(|emitter, options: &Value| {
            let status = options.get("status").and_then(Value::as_u64).unwrap_or(200) as u16;
            Ok(Arc::new(SiteConnector { emitter, status }) as Arc<dyn Connector>)
        })
    }
}

#[async_trait]
impl Connector for SiteConnector {
    async fn collect(&self, target: &Url) -> anyhow::Result<()> {
        if target.host_str() == Some("down") {
            anyhow::bail!("net::ERR_NAME_NOT_RESOLVED");
        }

        let resource = target.to_string();
        self.emitter
            .emit("fetch::start", Payload::FetchStart { resource: resource.clone() })
            .await?;
        self.emitter
            .emit(
                "fetch::end::html",
                Payload::FetchEnd(FetchEnd {
                    resource: resource.clone(),
                    request: NetworkRequest {
                        url: resource.clone(),
                        headers: HashMap::new(),
                    },
                    response: NetworkResponse {
                        url: resource.clone(),
                        status_code: self.status,
                        ..Default::default()
                    },
                    element: None,
                }),
            )
            .await?;
        self.emitter
            .emit("traverse::start", Payload::traverse(&resource))
            .await?;
        self.emitter
            .emit(
                "element::link",
                Payload::Element(ElementFound {
                    resource: resource.clone(),
                    element: Arc::new(Link {
                        href: "site.webmanifest".to_string(),
                    }),
                }),
            )
            .await?;
        self.emitter
            .emit("traverse::end", Payload::traverse(&resource))
            .await?;
        Ok(())
    }

    async fn html(&self) -> anyhow::Result<String> {
        Ok("<html><head><link rel=\"manifest\"></head></html>".to_string())
    }

    fn headers(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    async fn fetch_content(
        &self,
        target: &Url,
        _headers: &HashMap<String, String>,
    ) -> anyhow::Result<NetworkData> {
        Ok(NetworkData {
            request: NetworkRequest {
                url: target.to_string(),
                headers: HashMap::new(),
            },
            response: NetworkResponse {
                url: target.to_string(),
                status_code: 200,
                ..Default::default()
            },
        })
    }

    async fn evaluate(&self, _source: &str) -> anyhow::Result<Value> {
        Ok(json!(true))
    }

    async fn query_selector_all(&self, _selector: &str) -> anyhow::Result<Vec<Arc<dyn HtmlElement>>> {
        Ok(Vec::new())
    }

    async fn find_problem_location(
        &self,
        _element: &dyn HtmlElement,
        _content: Option<&str>,
    ) -> Option<ProblemLocation> {
        Some(ProblemLocation::new(1, 12))
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

type Body = Arc<dyn Fn(RuleContext, Event) -> hintbot::dispatcher::BoxFuture<anyhow::Result<HandlerOutput>> + Send + Sync>;

/// Rule subscribing `body` to one topic
struct TopicRule {
    meta: RuleMeta,
    topic: &'static str,
    body: Body,
}

struct TopicInstance {
    context: RuleContext,
    topic: &'static str,
    body: Body,
}

impl Rule for TopicRule {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn create(&self, context: RuleContext) -> Box<dyn RuleInstance> {
        Box::new(TopicInstance {
            context,
            topic: self.topic,
            body: self.body.clone(),
        })
    }
}

impl RuleInstance for TopicInstance {
    fn subscribe(&self, subscriber: &RuleSubscriber<'_>) -> hintbot::Result<()> {
        let context = self.context.clone();
        let body = self.body.clone();
        subscriber.on(
            self.topic,
            listener(move |event| body(context.clone(), event)),
        )
    }
}

fn topic_rule<F, Fut>(id: &str, topic: &'static str, body: F) -> Arc<dyn Rule>
where
    F: Fn(RuleContext, Event) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<HandlerOutput>> + Send + 'static,
{
    Arc::new(TopicRule {
        meta: RuleMeta::new(id, RuleScope::Any),
        topic,
        body: Arc::new(move |context: RuleContext, event: Event| -> hintbot::dispatcher::BoxFuture<anyhow::Result<HandlerOutput>> {
            Box::pin(body(context, event))
        }),
    })
}

/// Reports an error whenever the page status is 400 or above
fn http_status_rule() -> Arc<dyn Rule> {
    topic_rule("http-status", "fetch::end::html", |context, event| async move {
        if let Some(fetch) = event.fetch_end() {
            if fetch.response.status_code >= 400 {
                let message = format!("Response has status code {}", fetch.response.status_code);
                context.report(&fetch.resource, None, &message, None).await;
            }
        }
        Ok(None)
    })
}

/// Reports a warning for every manifest `<link>`
fn manifest_rule() -> Arc<dyn Rule> {
    topic_rule("manifest-file-extension", "element::link", |context, event| async move {
        if let Some(found) = event.element() {
            context
                .report(
                    &found.resource,
                    Some(found.element.as_ref()),
                    "Web app manifest should have the .webmanifest extension",
                    None,
                )
                .await;
        }
        Ok(None)
    })
}

/// Sleeps, reports, and answers with `value`
fn delayed_rule(id: &str, ms: u64, value: i64) -> Arc<dyn Rule> {
    topic_rule(id, "fetch::end::html", move |context, event| async move {
        sleep(Duration::from_millis(ms)).await;
        let resource = event.resource().unwrap_or_default().to_string();
        context.report(&resource, None, "slow check", None).await;
        Ok(Some(json!(value)))
    })
}

fn resources(rules: Vec<Arc<dyn Rule>>) -> Resources {
    let mut resources = Resources::new().with_connector("site", SiteConnector::factory());
    for rule in rules {
        resources.register_rule(rule).unwrap();
    }
    resources
}

fn site_config(status: u16) -> Config {
    let mut config = Config::new("site");
    config.connector.options = json!({ "status": status });
    config
}

fn target(raw: &str) -> Url {
    Url::parse(raw).unwrap()
}

fn fetch_end(resource: &str) -> Payload {
    Payload::FetchEnd(FetchEnd {
        resource: resource.to_string(),
        request: NetworkRequest::default(),
        response: NetworkResponse::default(),
        element: None,
    })
}

fn recorder(log: Arc<Mutex<Vec<String>>>) -> Observer {
    Arc::new(move |event: &Event| log.lock().unwrap().push(event.topic().to_string()))
}

// =============================================================================
// End-to-end reporting
// =============================================================================

#[tokio::test]
async fn test_error_status_is_reported_once() {
    let config = site_config(404).with_rule("http-status", RuleConfig::new(Severity::Error));
    let engine = Engine::new(&config, &resources(vec![http_status_rule()])).unwrap();

    let problems = engine.execute_on(&target("http://x/")).await.unwrap();

    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].resource, "http://x/");
    assert_eq!(problems[0].rule_id, "http-status");
    assert_eq!(problems[0].severity, Severity::Error);
    assert_eq!(problems[0].message, "Response has status code 404");
}

#[tokio::test]
async fn test_success_status_reports_nothing() {
    let config = site_config(200).with_rule("http-status", RuleConfig::new(Severity::Error));
    let engine = Engine::new(&config, &resources(vec![http_status_rule()])).unwrap();

    assert!(engine.execute_on(&target("http://x/")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_element_report_carries_snippet_and_location() {
    let config = site_config(200).with_rule("manifest-file-extension", RuleConfig::new(Severity::Warning));
    let engine = Engine::new(&config, &resources(vec![manifest_rule()])).unwrap();

    let problems = engine.execute_on(&target("http://x/")).await.unwrap();

    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].severity, Severity::Warning);
    assert_eq!(problems[0].location, ProblemLocation::new(1, 12));
    assert_eq!(problems[0].source_code, "<link rel=\"manifest\" href=\"site.webmanifest\">");
}

#[tokio::test]
async fn test_config_json_drives_engine() {
    let config: Config = serde_json::from_value(json!({
        "connector": { "name": "site", "options": { "status": 500 } },
        "rules": {
            "http-status": "error",
            "manifest-file-extension": ["off", {}]
        },
        "rulesTimeout": 1000,
        "browserslist": ["last 2 versions"]
    }))
    .unwrap();
    let engine = Engine::new(&config, &resources(vec![http_status_rule(), manifest_rule()])).unwrap();

    assert_eq!(engine.active_rules().len(), 1);
    assert_eq!(engine.timeout(), Duration::from_secs(1));

    let problems = engine.execute_on(&target("http://x/")).await.unwrap();
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].rule_id, "http-status");
}

// =============================================================================
// Timeouts
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_slow_rule_is_bounded_by_timeout() {
    let config = site_config(200)
        .with_rule("fast", RuleConfig::new(Severity::Warning))
        .with_rule("slow", RuleConfig::new(Severity::Warning))
        .with_rules_timeout(Duration::from_millis(20));
    let engine = Engine::new(
        &config,
        &resources(vec![delayed_rule("fast", 5, 1), delayed_rule("slow", 50, 2)]),
    )
    .unwrap();

    let started = Instant::now();
    let outputs = engine.emit("fetch::end::html", fetch_end("http://x/")).await.unwrap();

    assert_eq!(outputs, vec![Some(json!(1)), None]);
    assert_eq!(started.elapsed(), Duration::from_millis(20));

    // let the slow body finish; its report must not land
    sleep(Duration::from_millis(100)).await;

    let problems = engine.problems();
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].rule_id, "fast");

    let timeouts = engine.rule_timeouts();
    assert_eq!(timeouts.len(), 1);
    assert_eq!(timeouts[0].rule_id, "slow");
    assert_eq!(timeouts[0].topic, "fetch::end::html");
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_rule_does_not_fail_scan() {
    let config = site_config(404)
        .with_rule("slow", RuleConfig::new(Severity::Error))
        .with_rule("http-status", RuleConfig::new(Severity::Error))
        .with_rules_timeout(Duration::from_millis(20));
    let engine = Engine::new(
        &config,
        &resources(vec![delayed_rule("slow", 50, 2), http_status_rule()]),
    )
    .unwrap();

    let problems = engine.execute_on(&target("http://x/")).await.unwrap();

    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].rule_id, "http-status");
    assert_eq!(engine.rule_timeouts().len(), 1);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_lifecycle_events_are_ordered() {
    let engine = Engine::new(&site_config(200), &resources(Vec::new())).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    engine.on_any(recorder(log.clone()));

    engine.execute_on(&target("http://x/")).await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "scan::start",
            "fetch::start",
            "fetch::end::html",
            "traverse::start",
            "element::link",
            "traverse::end",
            "scan::end",
            "print",
        ]
    );
}

#[tokio::test]
async fn test_print_carries_store_contents() {
    let config = site_config(404).with_rule("http-status", RuleConfig::new(Severity::Error));
    let engine = Engine::new(&config, &resources(vec![http_status_rule()])).unwrap();

    let printed: Arc<Mutex<Vec<Problem>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = printed.clone();
    engine
        .on(
            "print",
            listener(move |event| {
                let sink = sink.clone();
                async move {
                    if let Payload::Print(problems) = event.payload() {
                        sink.lock().unwrap().extend(problems.iter().cloned());
                    }
                    Ok(None)
                }
            }),
        )
        .unwrap();

    let returned = engine.execute_on(&target("http://x/")).await.unwrap();

    assert_eq!(*printed.lock().unwrap(), returned);
}

#[tokio::test]
async fn test_wildcard_listener_sees_every_fetch_end() {
    let engine = Engine::new(&site_config(200), &resources(Vec::new())).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine
        .on(
            "fetch::end::*",
            listener(move |event| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(event.topic().to_string());
                    Ok(None)
                }
            }),
        )
        .unwrap();

    engine.emit("fetch::end::css", fetch_end("http://x/a.css")).await.unwrap();
    engine.execute_on(&target("http://x/")).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["fetch::end::css", "fetch::end::html"]);
}

// =============================================================================
// Failures and ignores
// =============================================================================

#[tokio::test]
async fn test_handler_failure_aborts_target() {
    let broken = topic_rule("broken", "fetch::end::html", |_context, _event| async {
        Err(anyhow::anyhow!("selector engine crashed"))
    });
    let config = site_config(200).with_rule("broken", RuleConfig::new(Severity::Error));
    let engine = Engine::new(&config, &resources(vec![broken])).unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    engine.on_any(recorder(log.clone()));

    let err = engine.execute_on(&target("http://x/")).await.unwrap_err();

    match err {
        EngineError::HandlerFailure { subscriber, topic, .. } => {
            assert_eq!(subscriber, "broken");
            assert_eq!(topic, "fetch::end::html");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!log.lock().unwrap().contains(&"scan::end".to_string()));
    assert!(!engine.is_scanning());
}

#[tokio::test]
async fn test_connector_failure_surfaces() {
    let engine = Engine::new(&site_config(200), &resources(Vec::new())).unwrap();

    let err = engine.execute_on(&target("http://down/")).await.unwrap_err();
    assert!(matches!(err, EngineError::Connector(_)));
}

#[tokio::test]
async fn test_all_ignored_resource_reaches_no_rule() {
    let config = site_config(404)
        .with_rule("http-status", RuleConfig::new(Severity::Error))
        .with_ignored_urls("all", &["^http://x/$"]);
    let engine = Engine::new(&config, &resources(vec![http_status_rule()])).unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    engine.on_any(recorder(log.clone()));

    let problems = engine.execute_on(&target("http://x/")).await.unwrap();

    assert!(problems.is_empty());
    assert_eq!(*log.lock().unwrap(), vec!["print"]);
}

#[tokio::test]
async fn test_rule_ignore_only_silences_that_rule() {
    let config = site_config(404)
        .with_rule("http-status", RuleConfig::new(Severity::Error))
        .with_rule("manifest-file-extension", RuleConfig::new(Severity::Warning))
        .with_ignored_urls("http-status", &["x/$"]);
    let engine = Engine::new(&config, &resources(vec![http_status_rule(), manifest_rule()])).unwrap();

    let problems = engine.execute_on(&target("http://x/")).await.unwrap();

    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].rule_id, "manifest-file-extension");
}

#[test]
fn test_unknown_connector_builds_no_engine() {
    let config = Config::new("chrome").with_rule("http-status", RuleConfig::new(Severity::Error));
    let result = Engine::new(&config, &resources(vec![http_status_rule()]));
    assert!(matches!(result, Err(EngineError::ConnectorNotFound(name)) if name == "chrome"));
}

// =============================================================================
// Multi-target runs
// =============================================================================

fn problem_resources(summary: &AnalysisSummary, index: usize) -> Vec<String> {
    match &summary.reports[index].outcome {
        TargetOutcome::Completed { problems } => problems.iter().map(|p| p.resource.clone()).collect(),
        TargetOutcome::Failed { error } => panic!("target failed: {error}"),
    }
}

#[tokio::test]
async fn test_per_target_retention_clears_between_targets() {
    let config = site_config(404).with_rule("http-status", RuleConfig::new(Severity::Error));
    let engine = Engine::new(&config, &resources(vec![http_status_rule()])).unwrap();
    let targets = vec![target("http://x/"), target("http://down/"), target("http://y/")];

    let summary = hintbot::driver::analyze(&engine, &targets, Retention::PerTarget)
        .await
        .unwrap();

    assert_eq!(summary.reports.len(), 3);
    assert_eq!(problem_resources(&summary, 0), vec!["http://x/"]);
    assert!(summary.reports[1].failed());
    assert_eq!(problem_resources(&summary, 2), vec!["http://y/"]);
    assert_eq!(summary.failures(), 1);
    assert_eq!(summary.exit_code(), 1);
}

#[tokio::test]
async fn test_accumulate_retention_keeps_earlier_targets() {
    let config = site_config(404).with_rule("http-status", RuleConfig::new(Severity::Warning));
    let engine = Engine::new(&config, &resources(vec![http_status_rule()])).unwrap();
    let targets = vec![target("http://x/"), target("http://y/")];

    let summary = hintbot::driver::analyze(&engine, &targets, Retention::Accumulate)
        .await
        .unwrap();

    assert_eq!(problem_resources(&summary, 0), vec!["http://x/"]);
    assert_eq!(problem_resources(&summary, 1), vec!["http://x/", "http://y/"]);
    assert_eq!(summary.exit_code(), 0);
}

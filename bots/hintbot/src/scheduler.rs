// SPDX-License-Identifier: PMPL-1.0-or-later
//! Rule execution scheduler.
//!
//! Every rule subscription goes through [`RuleScheduler::register`], which
//! wraps the handler so that each invocation:
//!
//! 1. resolves to an absent result without running if the event's resource
//!    is ignored for that rule,
//! 2. runs the handler body as its own task rather than inline,
//! 3. races the body against `rules_timeout`; on timeout the invocation
//!    resolves absent, a [`RuleTimeout`] is recorded and the body is left to
//!    finish on its own with its result (and any later reports) discarded,
//! 4. passes handler errors through untouched.

use crate::dispatcher::{BoxFuture, Dispatcher, HandlerOutput, Listener, SubscriptionFn};
use crate::error::{EngineError, Result};
use crate::events::{Event, Topic};
use crate::ignore::IgnoredUrls;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

tokio::task_local! {
    static INVOCATION: Arc<Invocation>;
}

/// Per-invocation state visible to the handler body's task
#[derive(Debug, Default)]
struct Invocation {
    expired: AtomicBool,
}

/// Whether the rule invocation running on this task has already timed out.
///
/// Always `false` outside a scheduled handler.
pub(crate) fn invocation_expired() -> bool {
    INVOCATION
        .try_with(|invocation| invocation.expired.load(Ordering::SeqCst))
        .unwrap_or(false)
}

/// Diagnostic left behind by a handler that ran past its budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTimeout {
    pub rule_id: String,
    pub topic: String,
    pub resource: Option<String>,
}

/// Wraps rule handlers with ignore checks, deferred start and a timeout
#[derive(Clone)]
pub struct RuleScheduler {
    timeout: Duration,
    ignored: Arc<IgnoredUrls>,
    timeouts: Arc<Mutex<Vec<RuleTimeout>>>,
}

impl RuleScheduler {
    pub fn new(timeout: Duration, ignored: Arc<IgnoredUrls>) -> Self {
        Self {
            timeout,
            ignored,
            timeouts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Budget for one handler invocation
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Every timeout recorded so far, oldest first
    pub fn timeouts(&self) -> Vec<RuleTimeout> {
        self.timeouts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Subscribe `listener` for `rule_id` on `pattern`, wrapped
    pub fn register(
        &self,
        dispatcher: &Dispatcher,
        rule_id: &str,
        pattern: &str,
        listener: Listener,
    ) -> Result<()> {
        let pattern = Topic::pattern(pattern)?;
        dispatcher.subscribe(pattern, rule_id, self.wrap(rule_id, listener));
        Ok(())
    }

    pub(crate) fn wrap(&self, rule_id: &str, listener: Listener) -> SubscriptionFn {
        let scheduler = self.clone();
        let rule_id: Arc<str> = Arc::from(rule_id);

        Arc::new(move |event: Event| -> BoxFuture<Result<HandlerOutput>> {
            let scheduler = scheduler.clone();
            let rule_id = rule_id.clone();
            let listener = listener.clone();
            Box::pin(async move { scheduler.run(&rule_id, &listener, event).await })
        })
    }

    /// Run one invocation of `listener` for `rule_id`
    pub async fn run(&self, rule_id: &str, listener: &Listener, event: Event) -> Result<HandlerOutput> {
        let topic = event.topic().to_string();
        let resource = event.resource().map(str::to_string);

        if let Some(resource) = resource.as_deref() {
            if self.ignored.is_ignored(rule_id, resource) {
                debug!("Rule {} ignores {} for {}", rule_id, topic, resource);
                return Ok(None);
            }
        }

        let invocation = Arc::new(Invocation::default());
        let deadline = tokio::time::sleep(self.timeout);
        let body = tokio::spawn(INVOCATION.scope(invocation.clone(), listener(event)));

        tokio::select! {
            joined = body => match joined {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(source)) => Err(EngineError::HandlerFailure {
                    subscriber: rule_id.to_string(),
                    topic,
                    source,
                }),
                Err(join) => Err(EngineError::HandlerFailure {
                    subscriber: rule_id.to_string(),
                    topic,
                    source: anyhow::anyhow!("handler panicked: {}", join),
                }),
            },
            _ = deadline => {
                invocation.expired.store(true, Ordering::SeqCst);
                warn!("Rule {} timed out on {}", rule_id, topic);
                self.timeouts
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(RuleTimeout {
                        rule_id: rule_id.to_string(),
                        topic,
                        resource,
                    });
                Ok(None)
            }
        }
    }
}

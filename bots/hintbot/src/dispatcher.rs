// SPDX-License-Identifier: PMPL-1.0-or-later
//! Namespaced publish/subscribe bus.
//!
//! Subscribers register on an exact topic (`fetch::end::css`) or on a topic
//! whose final segment is the wildcard (`fetch::end::*`). Emission fans out
//! to both lists, runs every matching subscriber as its own task, and
//! settles once all of them have. Results come back in subscription order.

use crate::error::{EngineError, Result};
use crate::events::{Event, Payload, Topic};
use crate::ignore::IgnoredUrls;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::debug;

/// What a handler hands back. `None` is the absent result.
pub type HandlerOutput = Option<Value>;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Collaborator-facing handler: rule bodies, formatters, progress hooks
pub type Listener = Arc<dyn Fn(Event) -> BoxFuture<anyhow::Result<HandlerOutput>> + Send + Sync>;

/// Synchronous hook run for every dispatched event before subscribers start
pub type Observer = Arc<dyn Fn(&Event) + Send + Sync>;

/// Subscriber body as stored by the dispatcher, errors already attributed
pub(crate) type SubscriptionFn = Arc<dyn Fn(Event) -> BoxFuture<Result<HandlerOutput>> + Send + Sync>;

/// Subscriber name used for raw (non-rule) listeners
pub const RAW_SUBSCRIBER: &str = "listener";

/// Wrap an async closure as a [`Listener`]
pub fn listener<F, Fut>(f: F) -> Listener
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<HandlerOutput>> + Send + 'static,
{
    Arc::new(move |event| -> BoxFuture<anyhow::Result<HandlerOutput>> { Box::pin(f(event)) })
}

#[derive(Clone)]
struct Subscription {
    seq: u64,
    subscriber: Arc<str>,
    run: SubscriptionFn,
}

#[derive(Default)]
struct SubscriptionTable {
    exact: HashMap<String, Vec<Subscription>>,
    wildcard: HashMap<String, Vec<Subscription>>,
    observers: Vec<Observer>,
    next_seq: u64,
}

/// Event bus shared by the engine, its connector and its rules
pub struct Dispatcher {
    table: RwLock<SubscriptionTable>,
    ignored: Arc<IgnoredUrls>,
}

impl Dispatcher {
    pub fn new(ignored: Arc<IgnoredUrls>) -> Self {
        Self {
            table: RwLock::new(SubscriptionTable::default()),
            ignored,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SubscriptionTable> {
        self.table.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SubscriptionTable> {
        self.table.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe a raw listener. No timeout or per-rule ignore applies.
    pub fn on(&self, pattern: &str, listener: Listener) -> Result<()> {
        let pattern = Topic::pattern(pattern)?;
        let run: SubscriptionFn = Arc::new(move |event: Event| -> BoxFuture<Result<HandlerOutput>> {
            let listener = listener.clone();
            Box::pin(async move {
                let topic = event.topic().to_string();
                listener(event)
                    .await
                    .map_err(|source| EngineError::HandlerFailure {
                        subscriber: RAW_SUBSCRIBER.to_string(),
                        topic,
                        source,
                    })
            })
        });
        self.subscribe(pattern, RAW_SUBSCRIBER, run);
        Ok(())
    }

    /// Register an observer for every event that gets dispatched
    pub fn on_any(&self, observer: Observer) {
        self.write().observers.push(observer);
    }

    pub(crate) fn subscribe(&self, pattern: Topic, subscriber: &str, run: SubscriptionFn) {
        let mut table = self.write();
        let subscription = Subscription {
            seq: table.next_seq,
            subscriber: Arc::from(subscriber),
            run,
        };
        table.next_seq += 1;

        let key = pattern.to_string();
        debug!("{} subscribed to {}", subscriber, key);
        let list = if pattern.is_wildcard() {
            table.wildcard.entry(key).or_default()
        } else {
            table.exact.entry(key).or_default()
        };
        list.push(subscription);
    }

    /// Subscribers that `topic` would reach, in subscription order
    fn matching(&self, topic: &Topic) -> Vec<Subscription> {
        let table = self.read();
        let mut matched: Vec<Subscription> = Vec::new();
        if let Some(list) = table.exact.get(&topic.to_string()) {
            matched.extend(list.iter().cloned());
        }
        if let Some(list) = table.wildcard.get(&topic.wildcard_key()) {
            matched.extend(list.iter().cloned());
        }
        matched.sort_by_key(|s| s.seq);
        matched
    }

    /// Names of the subscribers `topic` would reach, in subscription order
    pub fn subscribers(&self, topic: &str) -> Result<Vec<String>> {
        let topic = Topic::parse(topic)?;
        Ok(self
            .matching(&topic)
            .iter()
            .map(|s| s.subscriber.to_string())
            .collect())
    }

    /// Build and dispatch an event
    pub async fn emit(&self, topic: &str, payload: Payload) -> Result<Vec<HandlerOutput>> {
        self.dispatch(Event::new(topic, payload)?).await
    }

    /// Fan `event` out to every matching subscriber and wait for all of them.
    ///
    /// Events whose resource is ignored for `all` settle immediately with no
    /// results. If a subscriber failed, the first failure in subscription
    /// order is returned once every subscriber has settled.
    pub async fn dispatch(&self, event: Event) -> Result<Vec<HandlerOutput>> {
        if let Some(resource) = event.resource() {
            if self.ignored.is_ignored_for_all(resource) {
                debug!("Ignoring {} for {}", event.topic(), resource);
                return Ok(Vec::new());
            }
        }

        let observers = self.read().observers.clone();
        for observer in &observers {
            observer(&event);
        }

        let subscriptions = self.matching(event.topic());
        let topic = event.topic().to_string();

        let handles: Vec<_> = subscriptions
            .iter()
            .map(|s| tokio::spawn((s.run)(event.clone())))
            .collect();

        let mut outputs = Vec::with_capacity(handles.len());
        let mut failure = None;

        for (subscription, handle) in subscriptions.iter().zip(handles) {
            let settled = match handle.await {
                Ok(result) => result,
                Err(join) => Err(EngineError::HandlerFailure {
                    subscriber: subscription.subscriber.to_string(),
                    topic: topic.clone(),
                    source: anyhow::anyhow!("handler panicked: {}", join),
                }),
            };
            match settled {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    outputs.push(None);
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(outputs),
        }
    }

    /// Weak handle for collaborators that emit events
    pub fn emitter(self: &Arc<Self>) -> Emitter {
        Emitter {
            dispatcher: Arc::downgrade(self),
        }
    }
}

/// Emission handle given to connectors.
///
/// Holds the dispatcher weakly: subscribers own rule contexts, which own the
/// connector, which owns this handle.
#[derive(Clone)]
pub struct Emitter {
    dispatcher: Weak<Dispatcher>,
}

impl Emitter {
    /// Emitter attached to no dispatcher; every emission settles empty
    pub fn detached() -> Self {
        Self {
            dispatcher: Weak::new(),
        }
    }

    pub async fn emit(&self, topic: &str, payload: Payload) -> Result<Vec<HandlerOutput>> {
        let event = Event::new(topic, payload)?;
        match self.dispatcher.upgrade() {
            Some(dispatcher) => dispatcher.dispatch(event).await,
            None => {
                debug!("Engine dropped, {} not dispatched", event.topic());
                Ok(Vec::new())
            }
        }
    }
}

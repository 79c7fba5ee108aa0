// SPDX-License-Identifier: PMPL-1.0-or-later
//! hintbot - event-driven website analysis engine
//!
//! A connector acquires a target (a site or a local path) and narrates it as
//! events on a namespaced bus. Rules subscribe to those events, each handler
//! bounded by a per-invocation timeout, and report problems into a shared
//! store that the engine hands back once the scan settles.
//!
//! # Architecture
//!
//! ```text
//! Engine → scan::start ─┐
//!          Connector → fetch::* / traverse::* / element::* ─→ Dispatcher → Scheduler → Rules
//!          scan::end ───┘                                                             │
//!          print ← ProblemStore ←──────────────────────────────────────── report ─────┘
//! ```
//!
//! Connectors, rules and formatters live outside this crate; they plug in
//! through [`connector::Connector`], [`rules::Rule`] and raw listeners.

pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod driver;
pub mod engine;
pub mod error;
pub mod events;
pub mod ignore;
pub mod problems;
pub mod registry;
pub mod rules;
pub mod scheduler;

pub use config::{Config, ConnectorConfig, RuleConfig, Severity};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use problems::{Problem, ProblemLocation};
pub use registry::Resources;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, RuleConfig, Severity};
    pub use crate::connector::{Connector, HtmlElement, NetworkData, NetworkRequest, NetworkResponse};
    pub use crate::dispatcher::{listener, Emitter, HandlerOutput, Listener};
    pub use crate::driver::{analyze, as_uri, Retention};
    pub use crate::engine::Engine;
    pub use crate::error::{EngineError, Result};
    pub use crate::events::{Event, FetchEnd, Payload};
    pub use crate::problems::{Problem, ProblemLocation};
    pub use crate::registry::{connector_factory, Resources};
    pub use crate::rules::{Rule, RuleContext, RuleInstance, RuleMeta, RuleScope, RuleSubscriber};
}

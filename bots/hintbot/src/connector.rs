// SPDX-License-Identifier: PMPL-1.0-or-later
//! Content-acquisition collaborators.
//!
//! A connector loads a target (browser, headless DOM, filesystem) and drives
//! the `fetch::*`, `traverse::*` and `element::*` events through the
//! [`Emitter`] it receives at construction. The engine never looks inside.

use crate::dispatcher::Emitter;
use crate::problems::ProblemLocation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// An element of the loaded document, as exposed by a connector
#[async_trait]
pub trait HtmlElement: Send + Sync {
    /// Tag name, lowercase (e.g. `link`)
    fn node_name(&self) -> String;

    fn get_attribute(&self, name: &str) -> Option<String>;

    /// Serialized markup of the element
    async fn outer_html(&self) -> String;
}

/// Request half of a fetch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
}

/// Response half of a fetch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkResponse {
    pub url: String,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    /// Decoded body text
    pub content: String,
    /// Body bytes as received
    #[serde(default)]
    pub raw_content: Vec<u8>,
    /// Redirect chain that led to `url`
    #[serde(default)]
    pub hops: Vec<String>,
}

impl NetworkResponse {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A completed request/response pair
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkData {
    pub request: NetworkRequest,
    pub response: NetworkResponse,
}

/// Content-acquisition collaborator
#[async_trait]
pub trait Connector: Send + Sync {
    /// Acquire `target` and emit the events describing it. Resolves once
    /// every event it emitted has settled.
    async fn collect(&self, target: &Url) -> anyhow::Result<()>;

    /// Root element of the loaded page, if the connector has a DOM
    fn dom(&self) -> Option<Arc<dyn HtmlElement>> {
        None
    }

    /// Markup of the loaded page
    async fn html(&self) -> anyhow::Result<String>;

    /// Response headers of the loaded page
    fn headers(&self) -> HashMap<String, String>;

    async fn fetch_content(
        &self,
        target: &Url,
        headers: &HashMap<String, String>,
    ) -> anyhow::Result<NetworkData>;

    /// Run script source in the page context
    async fn evaluate(&self, source: &str) -> anyhow::Result<Value>;

    async fn query_selector_all(&self, selector: &str) -> anyhow::Result<Vec<Arc<dyn HtmlElement>>>;

    /// Where `element` (optionally narrowed to `content` inside it) sits in
    /// the page source. `None` when the connector cannot tell.
    async fn find_problem_location(
        &self,
        _element: &dyn HtmlElement,
        _content: Option<&str>,
    ) -> Option<ProblemLocation> {
        None
    }

    /// Release any browser or file handles
    async fn close(&self) -> anyhow::Result<()>;
}

/// Builds a connector from its configured options and the engine's emitter
pub type ConnectorFactory =
    Arc<dyn Fn(Emitter, &Value) -> anyhow::Result<Arc<dyn Connector>> + Send + Sync>;

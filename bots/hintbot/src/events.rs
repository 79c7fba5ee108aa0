// SPDX-License-Identifier: PMPL-1.0-or-later
//! Typed topics and payloads.
//!
//! Topics are `::`-delimited segments (`fetch::end::css`). Each topic family
//! (the first segment) declares the payload shape it carries:
//!
//! | Topic | Payload |
//! |---|---|
//! | `scan::start`, `scan::end` | [`Payload::Scan`] |
//! | `fetch::start` | [`Payload::FetchStart`] |
//! | `fetch::end::<kind>` | [`Payload::FetchEnd`] |
//! | `fetch::error` | [`Payload::FetchError`] |
//! | `traverse::*` | [`Payload::Traverse`] |
//! | `element::<tag>` | [`Payload::Element`] |
//! | `print` | [`Payload::Print`] |
//! | anything else | [`Payload::Custom`] |

use crate::connector::{HtmlElement, NetworkRequest, NetworkResponse};
use crate::error::{EngineError, Result};
use crate::problems::Problem;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Topic segment delimiter
pub const DELIMITER: &str = "::";

/// Final-segment wildcard marker, valid in subscriptions only
pub const WILDCARD: &str = "*";

/// A parsed topic or subscription pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    segments: Vec<String>,
}

impl Topic {
    fn split(raw: &str) -> Result<Vec<String>> {
        let segments: Vec<String> = raw.split(DELIMITER).map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(EngineError::InvalidTopic(raw.to_string()));
        }
        Ok(segments)
    }

    /// Parse an emission topic. Wildcards are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let segments = Self::split(raw)?;
        if segments.iter().any(|s| s.contains('*')) {
            return Err(EngineError::InvalidTopic(raw.to_string()));
        }
        Ok(Self { segments })
    }

    /// Parse a subscription pattern: a topic whose final segment may be `*`.
    pub fn pattern(raw: &str) -> Result<Self> {
        let segments = Self::split(raw)?;
        let last = segments.len() - 1;
        let misplaced = segments
            .iter()
            .enumerate()
            .any(|(i, s)| s.contains('*') && (i != last || s != WILDCARD));
        if misplaced {
            return Err(EngineError::InvalidTopic(raw.to_string()));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// First segment (`fetch` for `fetch::end::css`)
    pub fn family(&self) -> &str {
        &self.segments[0]
    }

    pub fn is_wildcard(&self) -> bool {
        self.segments.last().map(String::as_str) == Some(WILDCARD)
    }

    /// This topic with its final segment replaced by the wildcard marker
    pub fn wildcard_key(&self) -> String {
        let mut segments: Vec<&str> = self.segments.iter().map(String::as_str).collect();
        if let Some(last) = segments.last_mut() {
            *last = WILDCARD;
        }
        segments.join(DELIMITER)
    }

    /// Payload shape this topic requires
    pub fn expected_payload(&self) -> PayloadKind {
        let second = self.segments.get(1).map(String::as_str);
        match (self.family(), second) {
            ("scan", _) => PayloadKind::Scan,
            ("fetch", Some("start")) => PayloadKind::FetchStart,
            ("fetch", Some("error")) => PayloadKind::FetchError,
            ("fetch", _) => PayloadKind::FetchEnd,
            ("traverse", _) => PayloadKind::Traverse,
            ("element", _) => PayloadKind::Element,
            ("print", _) => PayloadKind::Print,
            _ => PayloadKind::Custom,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join(DELIMITER))
    }
}

/// Discriminant of [`Payload`], used for shape checks and messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Scan,
    FetchStart,
    FetchEnd,
    FetchError,
    Traverse,
    Element,
    Print,
    Custom,
}

impl PayloadKind {
    pub fn name(&self) -> &'static str {
        match self {
            PayloadKind::Scan => "scan",
            PayloadKind::FetchStart => "fetch-start",
            PayloadKind::FetchEnd => "fetch-end",
            PayloadKind::FetchError => "fetch-error",
            PayloadKind::Traverse => "traverse",
            PayloadKind::Element => "element",
            PayloadKind::Print => "print",
            PayloadKind::Custom => "custom",
        }
    }
}

/// A resource finished downloading
#[derive(Clone)]
pub struct FetchEnd {
    pub resource: String,
    pub request: NetworkRequest,
    pub response: NetworkResponse,
    /// Element that referenced the resource, if any
    pub element: Option<Arc<dyn HtmlElement>>,
}

/// A resource failed to download
#[derive(Clone)]
pub struct FetchError {
    pub resource: String,
    pub element: Option<Arc<dyn HtmlElement>>,
    pub error: String,
    pub hops: Vec<String>,
}

/// An element was reached while traversing the DOM
#[derive(Clone)]
pub struct ElementFound {
    pub resource: String,
    pub element: Arc<dyn HtmlElement>,
}

fn element_name(element: &Option<Arc<dyn HtmlElement>>) -> Option<String> {
    element.as_ref().map(|e| e.node_name())
}

impl fmt::Debug for FetchEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchEnd")
            .field("resource", &self.resource)
            .field("request", &self.request)
            .field("response", &self.response)
            .field("element", &element_name(&self.element))
            .finish()
    }
}

impl fmt::Debug for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchError")
            .field("resource", &self.resource)
            .field("element", &element_name(&self.element))
            .field("error", &self.error)
            .field("hops", &self.hops)
            .finish()
    }
}

impl fmt::Debug for ElementFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementFound")
            .field("resource", &self.resource)
            .field("element", &self.element.node_name())
            .finish()
    }
}

/// Event payload; the variant must match the topic family
#[derive(Debug, Clone)]
pub enum Payload {
    Scan { resource: String },
    FetchStart { resource: String },
    FetchEnd(FetchEnd),
    FetchError(FetchError),
    Traverse { resource: String },
    Element(ElementFound),
    Print(Vec<Problem>),
    Custom { resource: String, data: Value },
}

impl Payload {
    pub fn scan(resource: &str) -> Self {
        Payload::Scan {
            resource: resource.to_string(),
        }
    }

    pub fn traverse(resource: &str) -> Self {
        Payload::Traverse {
            resource: resource.to_string(),
        }
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Scan { .. } => PayloadKind::Scan,
            Payload::FetchStart { .. } => PayloadKind::FetchStart,
            Payload::FetchEnd(_) => PayloadKind::FetchEnd,
            Payload::FetchError(_) => PayloadKind::FetchError,
            Payload::Traverse { .. } => PayloadKind::Traverse,
            Payload::Element(_) => PayloadKind::Element,
            Payload::Print(_) => PayloadKind::Print,
            Payload::Custom { .. } => PayloadKind::Custom,
        }
    }

    /// URL or path this payload concerns. `print` has none.
    pub fn resource(&self) -> Option<&str> {
        match self {
            Payload::Scan { resource }
            | Payload::FetchStart { resource }
            | Payload::Traverse { resource }
            | Payload::Custom { resource, .. } => Some(resource),
            Payload::FetchEnd(e) => Some(&e.resource),
            Payload::FetchError(e) => Some(&e.resource),
            Payload::Element(e) => Some(&e.resource),
            Payload::Print(_) => None,
        }
    }
}

/// A topic plus a payload of the shape that topic requires
#[derive(Debug, Clone)]
pub struct Event {
    topic: Topic,
    payload: Payload,
}

impl Event {
    /// Build an event, checking the topic and payload shape
    pub fn new(topic: &str, payload: Payload) -> Result<Self> {
        Self::from_topic(Topic::parse(topic)?, payload)
    }

    pub fn from_topic(topic: Topic, payload: Payload) -> Result<Self> {
        let expected = topic.expected_payload();
        if payload.kind() != expected {
            return Err(EngineError::PayloadMismatch {
                topic: topic.to_string(),
                expected: expected.name(),
                found: payload.kind().name(),
            });
        }
        Ok(Self { topic, payload })
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn resource(&self) -> Option<&str> {
        self.payload.resource()
    }

    pub fn fetch_end(&self) -> Option<&FetchEnd> {
        match &self.payload {
            Payload::FetchEnd(e) => Some(e),
            _ => None,
        }
    }

    pub fn element(&self) -> Option<&ElementFound> {
        match &self.payload {
            Payload::Element(e) => Some(e),
            _ => None,
        }
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
//! Multi-target analysis.
//!
//! One engine is built per run and handed here along with the targets. Each
//! target is scanned in turn; a target that fails is recorded and the loop
//! moves on. What happens to the problem store between targets is an explicit
//! [`Retention`] choice.

use crate::dispatcher::Observer;
use crate::engine::Engine;
use crate::error::Result;
use crate::events::Event;
use crate::problems::{cut_string, has_errors, Problem, SOURCE_CODE_MAX};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Install the fmt subscriber. Later calls are no-ops.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("hintbot=debug")
    } else {
        EnvFilter::new("hintbot=warn")
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Turn a command-line target into a URL.
///
/// URLs with a host (or `file:` URLs) are kept, existing paths become
/// `file://` URLs and bare host names get `http://`. Anything else is `None`.
pub fn as_uri(source: &str) -> Option<Url> {
    let source = source.trim();
    if source.is_empty() {
        return None;
    }

    if let Ok(url) = Url::parse(source) {
        if url.has_host() || url.scheme() == "file" {
            return Some(url);
        }
    }

    let path = Path::new(source);
    if path.exists() {
        let absolute = path.canonicalize().ok()?;
        return Url::from_file_path(absolute).ok();
    }

    Url::parse(&format!("http://{}", source))
        .ok()
        .filter(|url| url.host_str().is_some_and(|host| !host.is_empty()))
}

/// [`as_uri`] over many sources, dropping the ones that are not targets
pub fn as_uris<S: AsRef<str>>(sources: &[S]) -> Vec<Url> {
    sources
        .iter()
        .filter_map(|source| {
            let url = as_uri(source.as_ref());
            if url.is_none() {
                warn!("Ignoring invalid target {}", source.as_ref());
            }
            url
        })
        .collect()
}

/// What to do with the problem store between targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Retention {
    /// Clear the store before each target; each report covers one target
    #[default]
    PerTarget,
    /// Keep everything; each report covers every target so far
    Accumulate,
}

impl fmt::Display for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Retention::PerTarget => write!(f, "per-target"),
            Retention::Accumulate => write!(f, "accumulate"),
        }
    }
}

/// How one target's scan ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TargetOutcome {
    Completed { problems: Vec<Problem> },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetReport {
    pub target: Url,
    #[serde(flatten)]
    pub outcome: TargetOutcome,
}

impl TargetReport {
    pub fn failed(&self) -> bool {
        matches!(self.outcome, TargetOutcome::Failed { .. })
    }

    pub fn has_errors(&self) -> bool {
        match &self.outcome {
            TargetOutcome::Completed { problems } => has_errors(problems),
            TargetOutcome::Failed { .. } => false,
        }
    }
}

/// Result of an [`analyze`] run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisSummary {
    pub reports: Vec<TargetReport>,
}

impl AnalysisSummary {
    /// `1` if any target failed or reported an error-severity problem
    pub fn exit_code(&self) -> i32 {
        let failed = self.reports.iter().any(|r| r.failed() || r.has_errors());
        i32::from(failed)
    }

    pub fn failures(&self) -> usize {
        self.reports.iter().filter(|r| r.failed()).count()
    }
}

/// Scan `targets` one after another, then close the engine
pub async fn analyze(engine: &Engine, targets: &[Url], retention: Retention) -> Result<AnalysisSummary> {
    let started = Instant::now();
    let mut summary = AnalysisSummary::default();

    for target in targets {
        if retention == Retention::PerTarget {
            engine.clear();
        }

        let outcome = match engine.execute_on(target).await {
            Ok(problems) => {
                info!("{}: {} problems", target, problems.len());
                TargetOutcome::Completed { problems }
            }
            Err(e) => {
                warn!("Failed to analyze {}: {}", target, e);
                TargetOutcome::Failed { error: e.to_string() }
            }
        };

        summary.reports.push(TargetReport {
            target: target.clone(),
            outcome,
        });
    }

    engine.close().await?;
    debug!("Total runtime: {}ms", started.elapsed().as_millis());

    Ok(summary)
}

/// Spinner text for a lifecycle event, if it has one
pub fn progress_message(event: &Event) -> Option<String> {
    let resource = || cut_string(event.resource().unwrap_or_default(), SOURCE_CODE_MAX);
    let segments = event.topic().segments();
    let second = segments.get(1).map(String::as_str);

    match (segments[0].as_str(), second) {
        ("scan", Some("start")) => Some(format!("Analyzing {}", resource())),
        ("scan", Some("end")) => Some("Finishing...".to_string()),
        ("fetch", Some("start")) => Some(format!("Downloading {}", resource())),
        ("fetch", Some("end")) => Some(format!("{} downloaded", resource())),
        ("traverse", Some("start" | "down" | "up")) => Some("Traversing the DOM".to_string()),
        ("traverse", Some("end")) => Some("Traversing finished".to_string()),
        _ => None,
    }
}

/// Observer feeding [`progress_message`] text to `sink`
pub fn progress_observer<F>(sink: F) -> Observer
where
    F: Fn(&str) + Send + Sync + 'static,
{
    Arc::new(move |event: &Event| {
        if let Some(message) = progress_message(event) {
            sink(&message);
        }
    })
}

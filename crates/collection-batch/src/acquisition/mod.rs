//! Acquisition strategy chain.
//!
//! Each entry is offered to an ordered list of strategies. The first one to
//! produce a completed file wins; every attempt is recorded whatever the
//! outcome. Strategies are uniform operations behind one trait:
//!
//! - `direct_request`: replay the session cookies against the site's
//!   download-URL endpoint and stream the file ([`direct`])
//! - `click_flow`: drive the files tab like a user would and let the browser
//!   save the file ([`click_flow`])

pub mod click_flow;
pub mod direct;
pub mod http_client;
pub mod script;

use crate::config::{RunConfig, Timing};
use crate::error::{error_chain, AcquisitionError};
use crate::reconcile::{Baseline, ReconcileOutcome, Reconciler};
use crate::session::BrowserSession;
use crate::types::{
    AcquisitionResult, AcquisitionStatus, AttemptOutcome, QueueEntry, StrategyAttempt,
};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

pub use click_flow::ClickFlowStrategy;
pub use direct::DirectRequestStrategy;

/// Per-run facts every strategy may need.
#[derive(Debug, Clone)]
pub struct AcquisitionContext {
    pub downloads_dir: PathBuf,
    /// Site origin direct requests are sent to.
    pub origin: String,
    /// Numeric game id scraped from the collection page.
    pub game_id: Option<u64>,
    /// `Cookie` header value of the logged-in session.
    pub cookie_header: Option<String>,
    pub timing: Timing,
}

/// What a strategy produced.
#[derive(Debug)]
pub enum Attempt {
    /// The strategy wrote the file itself.
    Saved(PathBuf),
    /// The strategy asked the browser to download; the reconciler takes over.
    Triggered {
        started_at: SystemTime,
        baseline: Baseline,
    },
}

/// One way of getting an entry's archive into the downloads folder.
#[async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Outer bound for one attempt, reconciliation included.
    fn budget(&self, timing: &Timing) -> Duration;

    async fn attempt(
        &self,
        session: &dyn BrowserSession,
        entry: &QueueEntry,
        ctx: &AcquisitionContext,
    ) -> Result<Attempt, AcquisitionError>;
}

/// Ordered strategies plus the reconciler that finishes triggered downloads.
pub struct StrategyChain {
    strategies: Vec<Box<dyn AcquisitionStrategy>>,
    reconciler: Reconciler,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Box<dyn AcquisitionStrategy>>, reconciler: Reconciler) -> Self {
        Self {
            strategies,
            reconciler,
        }
    }

    /// Direct request (when enabled) followed by the click flow.
    pub fn standard(config: &RunConfig) -> Self {
        let mut strategies: Vec<Box<dyn AcquisitionStrategy>> = Vec::new();
        if config.direct_strategy {
            strategies.push(Box::new(DirectRequestStrategy::new(
                &config.timing,
                config.insecure_tls_fallback,
            )));
        }
        strategies.push(Box::new(ClickFlowStrategy::new()));
        Self::new(strategies, Reconciler::from_timing(&config.timing))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Acquire one entry. Never fails: the outcome, good or bad, is in the
    /// returned result.
    pub async fn acquire(
        &self,
        session: &dyn BrowserSession,
        entry: &QueueEntry,
        ctx: &AcquisitionContext,
    ) -> AcquisitionResult {
        let mut result = AcquisitionResult::pending();
        let mut last_failure: Option<(&'static str, AcquisitionError)> = None;

        for strategy in &self.strategies {
            let name = strategy.name();
            let budget = strategy.budget(&ctx.timing);
            let started = Instant::now();
            debug!("{}: trying {name} (budget {budget:?})", entry.identifier);

            let outcome = match tokio::time::timeout(
                budget,
                self.run_strategy(strategy.as_ref(), session, entry, ctx, &mut result),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(AcquisitionError::Timeout {
                    stage: format!("{name} attempt"),
                    after_ms: budget.as_millis() as u64,
                }),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok((path, bytes)) => {
                    result.attempts.push(StrategyAttempt {
                        strategy: name.to_string(),
                        outcome: AttemptOutcome::Completed,
                        detail: Some(path.display().to_string()),
                        elapsed_ms,
                    });
                    info!("{}: acquired via {name} ({bytes} bytes)", entry.identifier);
                    result.complete(name, path, bytes);
                    return result;
                }
                Err(AcquisitionError::NotApplicable(reason)) => {
                    debug!("{}: {name} not applicable: {reason}", entry.identifier);
                    result.attempts.push(StrategyAttempt {
                        strategy: name.to_string(),
                        outcome: AttemptOutcome::NotApplicable,
                        detail: Some(reason),
                        elapsed_ms,
                    });
                }
                Err(err) => {
                    let detail = error_chain(&err);
                    warn!("{}: {name} failed: {detail}", entry.identifier);
                    result.attempts.push(StrategyAttempt {
                        strategy: name.to_string(),
                        outcome: if err.is_timeout() {
                            AttemptOutcome::TimedOut
                        } else {
                            AttemptOutcome::Failed
                        },
                        detail: Some(detail),
                        elapsed_ms,
                    });
                    last_failure = Some((name, err));
                }
            }
        }

        match last_failure {
            Some((name, err)) => {
                let status = if err.is_timeout() {
                    AcquisitionStatus::TimedOut
                } else {
                    AcquisitionStatus::Failed
                };
                result.fail(status, Some(name), error_chain(&err));
            }
            None => {
                result.fail(
                    AcquisitionStatus::Failed,
                    None,
                    "no acquisition strategy was applicable".to_string(),
                );
            }
        }
        result
    }

    async fn run_strategy(
        &self,
        strategy: &dyn AcquisitionStrategy,
        session: &dyn BrowserSession,
        entry: &QueueEntry,
        ctx: &AcquisitionContext,
        result: &mut AcquisitionResult,
    ) -> Result<(PathBuf, u64), AcquisitionError> {
        match strategy.attempt(session, entry, ctx).await? {
            Attempt::Saved(path) => {
                result.advance(AcquisitionStatus::Downloading);
                let window = self.reconciler.stability_window();
                let bytes = self
                    .reconciler
                    .confirm_stable(&path, window * 3 + ctx.timing.poll_interval * 2)
                    .await?;
                Ok((path, bytes))
            }
            Attempt::Triggered {
                started_at,
                baseline,
            } => {
                let outcome = self
                    .reconciler
                    .await_completion(
                        &ctx.downloads_dir,
                        entry,
                        &baseline,
                        started_at,
                        ctx.timing.download_timeout,
                    )
                    .await;
                match outcome {
                    ReconcileOutcome::Completed { path, bytes } => {
                        result.advance(AcquisitionStatus::Downloading);
                        Ok((path, bytes))
                    }
                    ReconcileOutcome::TimedOut { partial } => {
                        if let Some(partial) = &partial {
                            result.advance(AcquisitionStatus::Downloading);
                            result.file = Some(partial.clone());
                        }
                        Err(AcquisitionError::Timeout {
                            stage: "download".to_string(),
                            after_ms: ctx.timing.download_timeout.as_millis() as u64,
                        })
                    }
                    ReconcileOutcome::Corrupt { path, reason } => {
                        result.file = Some(path);
                        Err(AcquisitionError::Corrupt(reason))
                    }
                }
            }
        }
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publish coordinator
//!
//! Moves one batch of unpublished readings through every configured sink and
//! decides whether the batch is committed or retained.
//!
//! # Operation
//!
//! ```text
//! Idle -> Fetching -> Dispatching(0) -> ... -> Dispatching(n) -> Committing -> Idle
//!                                   \
//!                                    +-> Retaining -> Idle   (first sink failure)
//! ```
//!
//! 1. Fetch up to `batch_size` unpublished readings, oldest first
//! 2. Hand the same batch to each sink in order, stopping at the first failure
//! 3. If every sink succeeded, mark the batch published in one transaction
//!
//! Nothing is carried over between runs; a retained batch is simply fetched
//! again next time.

use crate::config::{CoordinatorConfig, SinkKind};
use crate::error::{PublishError, SinkError};
use crate::sink::Sink;
use crate::store::{Batch, ReadingStore};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Coordinator state within a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Fetching,
    /// Sending to the sink at this position
    Dispatching(usize),
    Committing,
    Retaining,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "Idle"),
            RunState::Fetching => write!(f, "Fetching"),
            RunState::Dispatching(i) => write!(f, "Dispatching({})", i),
            RunState::Committing => write!(f, "Committing"),
            RunState::Retaining => write!(f, "Retaining"),
        }
    }
}

impl RunState {
    fn advance(&mut self, next: RunState) {
        tracing::trace!("Publish run: {} -> {}", self, next);
        *self = next;
    }
}

/// What happened to the batch at one sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkStatus {
    /// Sink accepted every reading
    Delivered,
    /// Sink is switched off; counted as success
    Disabled,
    /// Sink rejected the batch
    Failed(String),
    /// Dispatch stopped before reaching this sink
    NotAttempted,
}

impl fmt::Display for SinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkStatus::Delivered => write!(f, "delivered"),
            SinkStatus::Disabled => write!(f, "disabled"),
            SinkStatus::Failed(reason) => write!(f, "failed ({})", reason),
            SinkStatus::NotAttempted => write!(f, "not attempted"),
        }
    }
}

/// Per-sink line of a run report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    pub name: String,
    pub kind: SinkKind,
    pub status: SinkStatus,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No sinks are configured; nothing was fetched
    NoSinks,
    /// No unpublished readings
    Empty,
    /// Every sink succeeded and this many readings were marked published
    Committed(usize),
    /// A sink failed; the batch stays unpublished
    Retained { sink: String, reason: String },
    /// Every sink succeeded but marking failed; the batch will be sent again
    CommitFailed(String),
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::NoSinks => write!(f, "no sinks configured"),
            RunOutcome::Empty => write!(f, "nothing to publish"),
            RunOutcome::Committed(n) => write!(f, "committed {} readings", n),
            RunOutcome::Retained { sink, reason } => {
                write!(f, "retained for retry (sink '{}': {})", sink, reason)
            }
            RunOutcome::CommitFailed(reason) => {
                write!(f, "delivered but not marked published ({})", reason)
            }
        }
    }
}

/// Summary of one coordinator run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Readings in the batch
    pub fetched: usize,
    /// One entry per configured sink, in dispatch order
    pub sinks: Vec<SinkReport>,
    pub outcome: RunOutcome,
}

impl RunReport {
    /// Process exit status for this outcome
    pub fn exit_code(&self) -> u8 {
        match self.outcome {
            RunOutcome::NoSinks | RunOutcome::Empty | RunOutcome::Committed(_) => 0,
            RunOutcome::Retained { .. } => 3,
            RunOutcome::CommitFailed(_) => 4,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Committed(_))
    }
}

/// Cumulative statistics over several runs
#[derive(Debug, Default, Clone)]
pub struct PublishStats {
    /// Total runs
    pub runs: u64,
    /// Runs that found nothing to publish
    pub empty_runs: u64,
    /// Readings marked published
    pub readings_published: u64,
    /// Runs whose batch was retained after a sink failure
    pub retained_runs: u64,
    /// Runs that delivered but failed to mark
    pub commit_failures: u64,
}

impl PublishStats {
    /// Fold one run into the totals
    pub fn record(&mut self, report: &RunReport) {
        self.runs += 1;
        match &report.outcome {
            RunOutcome::NoSinks | RunOutcome::Empty => self.empty_runs += 1,
            RunOutcome::Committed(n) => self.readings_published += *n as u64,
            RunOutcome::Retained { .. } => self.retained_runs += 1,
            RunOutcome::CommitFailed(_) => self.commit_failures += 1,
        }
    }
}

/// Publish coordinator
///
/// Owns the ordered sink list and a shared handle to the store. Runs against
/// the same store are serialized: the write guard is held from fetch to
/// commit.
pub struct PublishCoordinator<S: ReadingStore> {
    config: CoordinatorConfig,
    store: Arc<RwLock<S>>,
    sinks: Vec<Box<dyn Sink>>,
}

impl<S: ReadingStore + Send + Sync> PublishCoordinator<S> {
    /// Create a coordinator that owns its store
    pub fn new(config: CoordinatorConfig, store: S, sinks: Vec<Box<dyn Sink>>) -> Self {
        Self::with_shared_store(config, Arc::new(RwLock::new(store)), sinks)
    }

    /// Create a coordinator over a store shared with other components
    pub fn with_shared_store(
        config: CoordinatorConfig,
        store: Arc<RwLock<S>>,
        sinks: Vec<Box<dyn Sink>>,
    ) -> Self {
        Self {
            config,
            store,
            sinks,
        }
    }

    /// Get the store for direct access
    pub fn store(&self) -> Arc<RwLock<S>> {
        Arc::clone(&self.store)
    }

    /// Execute one fetch / dispatch / commit-or-retain cycle.
    ///
    /// Sink failures are reported in the returned [`RunReport`]; only invalid
    /// settings and store read failures surface as errors.
    pub async fn run_once(&self) -> Result<RunReport, PublishError> {
        self.config.validate()?;
        let mut state = RunState::Idle;

        if self.sinks.is_empty() {
            tracing::info!("No sinks configured. Nothing to publish.");
            return Ok(RunReport {
                fetched: 0,
                sinks: Vec::new(),
                outcome: RunOutcome::NoSinks,
            });
        }

        let store = self.store.write().await;

        state.advance(RunState::Fetching);
        let readings = store.fetch_unpublished(self.config.batch_size)?;
        let mut reports: Vec<SinkReport> = self
            .sinks
            .iter()
            .map(|sink| SinkReport {
                name: sink.name().to_string(),
                kind: sink.kind(),
                status: SinkStatus::NotAttempted,
            })
            .collect();

        if readings.is_empty() {
            tracing::info!("No new records to publish.");
            state.advance(RunState::Idle);
            return Ok(RunReport {
                fetched: 0,
                sinks: reports,
                outcome: RunOutcome::Empty,
            });
        }

        let batch = Batch::new(readings);
        tracing::info!("Found {} records to publish.", batch.len());

        for (i, sink) in self.sinks.iter().enumerate() {
            state.advance(RunState::Dispatching(i));

            match self.dispatch(sink.as_ref(), &batch).await {
                Ok(()) => {
                    reports[i].status = if sink.is_enabled() {
                        SinkStatus::Delivered
                    } else {
                        SinkStatus::Disabled
                    };
                }
                Err(e) => {
                    let reason = e.to_string();
                    tracing::warn!(
                        "{} sink '{}' failed: {}. Retaining {} records for retry.",
                        sink.kind(),
                        sink.name(),
                        reason,
                        batch.len()
                    );
                    reports[i].status = SinkStatus::Failed(reason.clone());
                    state.advance(RunState::Retaining);
                    state.advance(RunState::Idle);
                    return Ok(RunReport {
                        fetched: batch.len(),
                        sinks: reports,
                        outcome: RunOutcome::Retained {
                            sink: sink.name().to_string(),
                            reason,
                        },
                    });
                }
            }
        }

        state.advance(RunState::Committing);
        let outcome = match store.mark_published(&batch.ids()) {
            Ok(()) => {
                tracing::info!("Successfully marked {} records as published.", batch.len());
                RunOutcome::Committed(batch.len())
            }
            Err(e) => {
                tracing::error!(
                    "Batch of {} records was delivered to every sink but could not be marked \
                     published: {}. Duplicates are possible on the next run.",
                    batch.len(),
                    e
                );
                RunOutcome::CommitFailed(e.to_string())
            }
        };
        state.advance(RunState::Idle);

        Ok(RunReport {
            fetched: batch.len(),
            sinks: reports,
            outcome,
        })
    }

    /// Run one sink call under `sink_call_timeout`.
    ///
    /// On expiry the sink's future is dropped where it stands, so a sink
    /// holding a connection releases it without its normal close sequence
    /// (an MQTT session ends without DISCONNECT).
    async fn dispatch(&self, sink: &dyn Sink, batch: &Batch) -> Result<(), SinkError> {
        let limit = self.config.sink_call_timeout;
        match tokio::time::timeout(limit, sink.send(batch)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Transport(format!(
                "sink call did not finish within {:?}",
                limit
            ))),
        }
    }
}

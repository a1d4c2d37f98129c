//! Lifecycle events and the sinks that receive them
//!
//! The core never logs directly. Every observable step goes through an
//! [`EventSink`] handed to the coordinator and each worker.

use crate::report::RunReport;
use crate::stats::StatsSnapshot;
use crate::types::{ItemId, WorkerId};
use crate::worker::WorkerExit;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    RunStarted {
        producers: usize,
        consumers: usize,
        messages_per_producer: usize,
        channel_capacity: usize,
    },
    WorkerStarted {
        worker: WorkerId,
    },
    ItemProduced {
        worker: WorkerId,
        item: ItemId,
        /// 1-based position within the producer's quota
        sequence: usize,
    },
    ItemConsumed {
        worker: WorkerId,
        item: ItemId,
        latency_ms: u64,
    },
    WorkerFinished {
        worker: WorkerId,
        exit: WorkerExit,
        processed: usize,
    },
    WorkerFailed {
        worker: WorkerId,
        reason: String,
    },
    TerminationInjected,
    StatsSnapshot(StatsSnapshot),
    ShutdownTimeout {
        grace: Duration,
        outstanding: usize,
    },
    RunSummary(Arc<RunReport>),
}

/// Receiver of pipeline lifecycle events. Called concurrently from every worker.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

pub type SharedSink = Arc<dyn EventSink>;

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &PipelineEvent) {}
}

/// Routes events to `tracing`
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    /// Log one line per completed item in the run summary
    pub per_item_summary: bool,
}

impl Default for TracingSink {
    fn default() -> Self {
        Self {
            per_item_summary: true,
        }
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStarted {
                producers,
                consumers,
                messages_per_producer,
                channel_capacity,
            } => {
                info!(
                    producers,
                    consumers,
                    messages_per_producer,
                    channel_capacity,
                    "starting pipeline run"
                );
            }
            PipelineEvent::WorkerStarted { worker } => {
                debug!(%worker, "worker started");
            }
            PipelineEvent::ItemProduced {
                worker,
                item,
                sequence,
            } => {
                debug!(%worker, %item, sequence, "item produced");
            }
            PipelineEvent::ItemConsumed {
                worker,
                item,
                latency_ms,
            } => {
                debug!(%worker, %item, latency_ms, "item consumed");
            }
            PipelineEvent::WorkerFinished {
                worker,
                exit,
                processed,
            } => {
                info!(%worker, ?exit, processed, "worker completed");
            }
            PipelineEvent::WorkerFailed { worker, reason } => {
                warn!(%worker, %reason, "worker failed");
            }
            PipelineEvent::TerminationInjected => {
                info!("all producers done, termination marker injected");
            }
            PipelineEvent::StatsSnapshot(stats) => {
                info!(
                    active_producers = stats.active_producers,
                    active_consumers = stats.active_consumers,
                    produced = stats.produced,
                    consumed = stats.consumed,
                    channel_len = stats.channel_len,
                    "pipeline stats"
                );
            }
            PipelineEvent::ShutdownTimeout { grace, outstanding } => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    outstanding, "shutdown grace period expired, cancelling remaining workers"
                );
            }
            PipelineEvent::RunSummary(report) => {
                info!(
                    termination = ?report.termination,
                    expected = report.expected,
                    produced = report.produced,
                    consumed = report.consumed,
                    elapsed_ms = report.elapsed_ms,
                    "run complete"
                );
                info!("{}", report.latency);
                if self.per_item_summary {
                    for entry in &report.items {
                        info!(item = %entry.id, latency_ms = entry.latency_ms, "item latency");
                    }
                }
            }
        }
    }
}

/// Forwards a copy of every event into a crossbeam channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<PipelineEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<PipelineEvent>) -> Self {
        Self { tx }
    }

    pub fn unbounded() -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = unbounded();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &PipelineEvent) {
        // a dropped receiver just stops observing
        self.tx.send(event.clone()).ok();
    }
}

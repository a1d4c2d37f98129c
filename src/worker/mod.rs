//! Producer and consumer units

mod consumer;
mod producer;

pub use consumer::Consumer;
pub use producer::Producer;

use crate::channel::ItemChannel;
use crate::events::{PipelineEvent, SharedSink};
use crate::ledger::LatencyLedger;
use crate::stats::PipelineStats;
use crate::types::{WorkerId, WorkerRole};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a worker loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerExit {
    /// Producer emitted its full quota
    QuotaReached,
    /// Consumer observed the termination marker and passed it on
    Terminated,
    /// Cancellation interrupted a wait or a simulated delay
    Cancelled,
    /// The channel was closed underneath the worker
    ChannelClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: WorkerId,
    pub exit: WorkerExit,
    /// Items produced or consumed
    pub processed: usize,
}

/// Everything a worker shares with the rest of the run
#[derive(Clone)]
pub struct WorkerContext {
    pub channel: Arc<ItemChannel>,
    pub ledger: Arc<LatencyLedger>,
    pub stats: Arc<PipelineStats>,
    pub sink: SharedSink,
    pub cancel: CancellationToken,
}

impl WorkerContext {
    pub fn new(
        channel: Arc<ItemChannel>,
        ledger: Arc<LatencyLedger>,
        stats: Arc<PipelineStats>,
        sink: SharedSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channel,
            ledger,
            stats,
            sink,
            cancel,
        }
    }

    pub(crate) fn emit(&self, event: PipelineEvent) {
        self.sink.emit(&event);
    }

    /// Mark the worker active until the returned guard drops, even if the task is aborted
    pub(crate) fn activate(&self, worker: WorkerId) -> ActiveGuard {
        self.stats.worker_started(worker.role);
        self.emit(PipelineEvent::WorkerStarted { worker });
        ActiveGuard {
            stats: self.stats.clone(),
            role: worker.role,
        }
    }

    pub(crate) fn finish(&self, worker: WorkerId, exit: WorkerExit, processed: usize) -> WorkerReport {
        if exit == WorkerExit::Cancelled {
            self.stats.worker_cancelled();
        }
        self.emit(PipelineEvent::WorkerFinished {
            worker,
            exit,
            processed,
        });
        WorkerReport {
            worker,
            exit,
            processed,
        }
    }

    /// Simulated work. Returns false if cancelled first.
    pub(crate) async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

pub(crate) struct ActiveGuard {
    stats: Arc<PipelineStats>,
    role: WorkerRole,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.stats.worker_stopped(self.role);
    }
}

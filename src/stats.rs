//! Run-wide counters
//!
//! Plain atomics shared by every worker; each update is mirrored into the
//! `metrics` facade, which is a no-op until a recorder is installed.

use crate::types::WorkerRole;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const METRIC_PRODUCED: &str = "pipeline_items_produced_total";
pub const METRIC_CONSUMED: &str = "pipeline_items_consumed_total";
pub const METRIC_ACTIVE_PRODUCERS: &str = "pipeline_active_producers";
pub const METRIC_ACTIVE_CONSUMERS: &str = "pipeline_active_consumers";
pub const METRIC_LATENCY_MS: &str = "pipeline_item_latency_ms";
pub const METRIC_CANCELLED_WORKERS: &str = "pipeline_cancelled_workers_total";
pub const METRIC_FAILED_WORKERS: &str = "pipeline_failed_workers_total";

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub active_producers: AtomicU64,
    pub active_consumers: AtomicU64,
    pub produced: AtomicU64,
    pub consumed: AtomicU64,
    pub cancelled_workers: AtomicU64,
    pub failed_workers: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub active_producers: u64,
    pub active_consumers: u64,
    pub produced: u64,
    pub consumed: u64,
    pub cancelled_workers: u64,
    pub failed_workers: u64,
    pub channel_len: usize,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker_started(&self, role: WorkerRole) {
        match role {
            WorkerRole::Producer => {
                self.active_producers.fetch_add(1, Ordering::Relaxed);
                metrics::gauge!(METRIC_ACTIVE_PRODUCERS).increment(1.0);
            }
            WorkerRole::Consumer => {
                self.active_consumers.fetch_add(1, Ordering::Relaxed);
                metrics::gauge!(METRIC_ACTIVE_CONSUMERS).increment(1.0);
            }
        }
    }

    pub fn worker_stopped(&self, role: WorkerRole) {
        match role {
            WorkerRole::Producer => {
                self.active_producers.fetch_sub(1, Ordering::Relaxed);
                metrics::gauge!(METRIC_ACTIVE_PRODUCERS).decrement(1.0);
            }
            WorkerRole::Consumer => {
                self.active_consumers.fetch_sub(1, Ordering::Relaxed);
                metrics::gauge!(METRIC_ACTIVE_CONSUMERS).decrement(1.0);
            }
        }
    }

    pub fn worker_cancelled(&self) {
        self.cancelled_workers.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRIC_CANCELLED_WORKERS).increment(1);
    }

    pub fn worker_failed(&self) {
        self.failed_workers.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRIC_FAILED_WORKERS).increment(1);
    }

    pub fn item_produced(&self) {
        self.produced.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRIC_PRODUCED).increment(1);
    }

    pub fn item_consumed(&self, latency: Duration) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRIC_CONSUMED).increment(1);
        metrics::histogram!(METRIC_LATENCY_MS).record(latency.as_secs_f64() * 1_000.0);
    }

    pub fn snapshot(&self, channel_len: usize) -> StatsSnapshot {
        StatsSnapshot {
            active_producers: self.active_producers.load(Ordering::Relaxed),
            active_consumers: self.active_consumers.load(Ordering::Relaxed),
            produced: self.produced.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            cancelled_workers: self.cancelled_workers.load(Ordering::Relaxed),
            failed_workers: self.failed_workers.load(Ordering::Relaxed),
            channel_len,
        }
    }
}

//! Latency statistics and the final run report

use crate::coordinator::Termination;
use crate::ledger::{LatencyEntry, LedgerSnapshot};
use crate::stats::StatsSnapshot;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// Summary of end-to-end latencies, whole milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: usize,
    pub total_ms: u64,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

impl std::fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "latency over {} items | avg: {:.2}ms | min: {}ms | p50: {}ms | p95: {}ms | p99: {}ms | max: {}ms",
            self.count, self.avg_ms, self.min_ms, self.p50_ms, self.p95_ms, self.p99_ms, self.max_ms
        )
    }
}

impl LatencyStats {
    pub fn from_samples(mut samples: Vec<u64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();

        let count = samples.len();
        let total: u64 = samples.iter().sum();
        let last = count - 1;
        let at = |pct: usize| samples[(last * pct) / 100];

        Self {
            count,
            total_ms: total,
            avg_ms: total as f64 / count as f64,
            min_ms: samples[0],
            max_ms: samples[last],
            p50_ms: at(50),
            p95_ms: at(95),
            p99_ms: at(99),
        }
    }

    pub fn from_ledger(snapshot: &LedgerSnapshot) -> Self {
        Self::from_samples(snapshot.completed.iter().map(|c| c.latency_ms()).collect())
    }
}

/// Everything a finished run hands back besides the raw ledger
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub termination: Termination,
    pub expected: usize,
    pub produced: u64,
    pub consumed: usize,
    pub elapsed_ms: u64,
    /// Largest channel length observed during the run
    pub peak_channel_len: usize,
    pub latency: LatencyStats,
    pub stats: StatsSnapshot,
    pub items: Vec<LatencyEntry>,
}

impl RunReport {
    pub fn new(
        termination: Termination,
        expected: usize,
        elapsed: Duration,
        peak_channel_len: usize,
        ledger: &LedgerSnapshot,
        stats: StatsSnapshot,
    ) -> Self {
        Self {
            termination,
            expected,
            produced: stats.produced,
            consumed: ledger.completed_count(),
            elapsed_ms: crate::types::whole_millis(elapsed),
            peak_channel_len,
            latency: LatencyStats::from_ledger(ledger),
            stats,
            items: ledger.latencies(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.termination == Termination::Completed && self.consumed == self.expected
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

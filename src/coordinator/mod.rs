//! Run coordinator
//!
//! Launches the worker pool, runs the completion protocol and bounds the
//! whole wait by the shutdown grace period:
//!
//! 1. join every producer
//! 2. inject one termination marker
//! 3. join every consumer
//!
//! On cancellation or grace expiry it still returns whatever the ledger holds.

use crate::channel::ItemChannel;
use crate::config::PipelineConfig;
use crate::error::{ConfigError, PipelineError};
use crate::events::{PipelineEvent, SharedSink, TracingSink};
use crate::ledger::{LatencyLedger, LedgerSnapshot};
use crate::report::RunReport;
use crate::stats::PipelineStats;
use crate::types::{Envelope, WorkerId};
use crate::worker::{Consumer, Producer, WorkerContext, WorkerExit, WorkerReport};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every worker reported done
    Completed,
    /// External cancellation; results are partial
    Cancelled,
    /// Workers outlived the grace period and were aborted
    GraceExpired,
}

/// Final state of a run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub ledger: LedgerSnapshot,
    pub report: Arc<RunReport>,
    pub workers: Vec<WorkerReport>,
}

impl RunOutcome {
    pub fn termination(&self) -> Termination {
        self.report.termination
    }
}

type WorkerResult = Result<WorkerReport, PipelineError>;
type WorkerHandle = (WorkerId, JoinHandle<WorkerResult>);

/// Joins still pending for one worker group. Outlives the grace timeout so
/// aborted tasks can be awaited before the ledger is read.
type Joining = FuturesUnordered<BoxFuture<'static, (WorkerId, Result<WorkerResult, JoinError>)>>;

#[derive(Default)]
struct Progress {
    reports: Vec<WorkerReport>,
    joined: usize,
}

pub struct Coordinator {
    config: Arc<PipelineConfig>,
    sink: SharedSink,
}

impl Coordinator {
    /// Validates eagerly; nothing is spawned for a rejected config
    pub fn new(config: PipelineConfig, sink: SharedSink) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            sink,
        })
    }

    /// Coordinator that logs every event through `tracing`
    pub fn with_tracing(config: PipelineConfig) -> Result<Self, ConfigError> {
        Self::new(config, Arc::new(TracingSink::default()))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(&self) -> RunOutcome {
        self.run_with_cancel(CancellationToken::new()).await
    }

    /// Run until completion, cancellation of `external`, or grace expiry.
    ///
    /// Cancelling the run internally never cancels `external`.
    pub async fn run_with_cancel(&self, external: CancellationToken) -> RunOutcome {
        let started = Instant::now();
        let config = &self.config;
        let cancel = external.child_token();

        let ctx = WorkerContext::new(
            Arc::new(ItemChannel::new(config.channel_capacity)),
            Arc::new(LatencyLedger::new()),
            Arc::new(PipelineStats::new()),
            self.sink.clone(),
            cancel.clone(),
        );
        ctx.emit(PipelineEvent::RunStarted {
            producers: config.producers,
            consumers: config.consumers,
            messages_per_producer: config.messages_per_producer,
            channel_capacity: config.channel_capacity,
        });

        let producers: Vec<WorkerHandle> = (1..=config.producers)
            .map(|index| {
                let producer = Producer::new(
                    index,
                    config.messages_per_producer,
                    config.producer_delay,
                    ctx.clone(),
                );
                (producer.id(), tokio::spawn(producer.run()))
            })
            .collect();

        let consumers: Vec<WorkerHandle> = (1..=config.consumers)
            .map(|index| {
                let consumer = Consumer::new(
                    index,
                    config.consumer_delay,
                    config.take_timeout(),
                    ctx.clone(),
                );
                (consumer.id(), tokio::spawn(consumer.run()))
            })
            .collect();

        let abort_handles: Vec<AbortHandle> = producers
            .iter()
            .chain(consumers.iter())
            .map(|(_, handle)| handle.abort_handle())
            .collect();
        let total_workers = abort_handles.len();

        let monitor_stop = cancel.child_token();
        let monitor = config
            .stats_interval()
            .map(|every| tokio::spawn(stats_monitor(ctx.clone(), every, monitor_stop.clone())));

        let mut producers = joining(producers);
        let mut consumers = joining(consumers);
        let mut progress = Progress::default();
        let grace = config.shutdown_grace();
        let finished = tokio::time::timeout(
            grace,
            complete(&ctx, &mut producers, &mut consumers, &mut progress),
        )
        .await
        .is_ok();

        let termination = if finished {
            classify(&progress.reports)
        } else {
            let outstanding = total_workers.saturating_sub(progress.joined);
            ctx.emit(PipelineEvent::ShutdownTimeout { grace, outstanding });
            cancel.cancel();
            for handle in &abort_handles {
                handle.abort();
            }
            // no task may still be inside the ledger when it is read
            join_group(&ctx, &mut producers, &mut progress).await;
            join_group(&ctx, &mut consumers, &mut progress).await;
            Termination::GraceExpired
        };

        monitor_stop.cancel();
        if let Some(monitor) = monitor {
            monitor.await.ok();
        }

        let ledger = ctx.ledger.snapshot();
        let report = Arc::new(RunReport::new(
            termination,
            config.expected_items(),
            started.elapsed(),
            ctx.channel.high_water_mark(),
            &ledger,
            ctx.stats.snapshot(ctx.channel.len()),
        ));
        ctx.emit(PipelineEvent::RunSummary(report.clone()));

        RunOutcome {
            ledger,
            report,
            workers: progress.reports,
        }
    }
}

/// Completion protocol. Records progress as it goes so a timed-out run
/// still knows which workers reported.
async fn complete(
    ctx: &WorkerContext,
    producers: &mut Joining,
    consumers: &mut Joining,
    progress: &mut Progress,
) {
    join_group(ctx, producers, progress).await;

    // on failure the run is cancelled and consumers unwind on their own
    if ctx.channel.put(Envelope::Terminate, &ctx.cancel).await.is_ok() {
        ctx.emit(PipelineEvent::TerminationInjected);
    }

    join_group(ctx, consumers, progress).await;
}

fn joining(group: Vec<WorkerHandle>) -> Joining {
    group
        .into_iter()
        .map(|(worker, handle)| -> BoxFuture<'static, _> {
            Box::pin(async move { (worker, handle.await) })
        })
        .collect()
}

async fn join_group(ctx: &WorkerContext, pending: &mut Joining, progress: &mut Progress) {
    while let Some((worker, joined)) = pending.next().await {
        progress.joined += 1;
        let reason = match joined {
            Ok(Ok(report)) => {
                progress.reports.push(report);
                continue;
            }
            Ok(Err(err)) => err.to_string(),
            // aborted after the grace period; already reported as outstanding
            Err(err) if err.is_cancelled() => continue,
            Err(err) => PipelineError::from(err).to_string(),
        };
        ctx.stats.worker_failed();
        ctx.emit(PipelineEvent::WorkerFailed { worker, reason });
    }
}

/// A run that finished inside the grace period is cancelled as soon as one
/// worker stopped early, however late the token fired.
fn classify(reports: &[WorkerReport]) -> Termination {
    let interrupted = reports
        .iter()
        .any(|r| matches!(r.exit, WorkerExit::Cancelled | WorkerExit::ChannelClosed));
    if interrupted {
        Termination::Cancelled
    } else {
        Termination::Completed
    }
}

async fn stats_monitor(ctx: WorkerContext, every: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    // the first tick fires immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let snapshot = ctx.stats.snapshot(ctx.channel.len());
                ctx.emit(PipelineEvent::StatsSnapshot(snapshot));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DelayRange;
    use crate::events::{ChannelSink, EventSink};
    use crossbeam_channel::Receiver;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn fast_config(producers: usize, consumers: usize, messages: usize) -> PipelineConfig {
        PipelineConfig {
            channel_capacity: 4,
            producer_delay: DelayRange::from_millis(1, 5),
            consumer_delay: DelayRange::from_millis(1, 5),
            take_timeout_ms: 50,
            shutdown_grace_ms: 10_000,
            stats_interval_ms: None,
            ..PipelineConfig::with_counts(producers, consumers, messages)
        }
    }

    fn observed(config: PipelineConfig) -> (Coordinator, Receiver<PipelineEvent>) {
        let (sink, rx) = ChannelSink::unbounded();
        (Coordinator::new(config, Arc::new(sink)).unwrap(), rx)
    }

    #[test]
    fn test_rejects_zero_counts_before_starting() {
        for (p, c, m) in [(0, 2, 5), (2, 0, 5), (2, 2, 0)] {
            let (sink, rx) = ChannelSink::unbounded();
            let result = Coordinator::new(fast_config(p, c, m), Arc::new(sink));
            assert!(result.is_err());
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_by_two_by_five() {
        let (coordinator, events) = observed(fast_config(2, 2, 5));
        let started = Instant::now();
        let outcome = coordinator.run().await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(outcome.termination(), Termination::Completed);
        assert_eq!(outcome.ledger.completed_count(), 10);
        assert_eq!(outcome.ledger.records.len(), 10);
        assert!(outcome.ledger.is_consistent());
        assert!(outcome
            .ledger
            .completed
            .iter()
            .all(|c| c.completed_at >= c.created_at));
        assert!(outcome.report.is_complete());
        assert!(outcome.report.peak_channel_len <= 4);

        let events: Vec<_> = events.try_iter().collect();
        let count = |f: fn(&PipelineEvent) -> bool| events.iter().filter(|e| f(e)).count();
        assert_eq!(count(|e| matches!(e, PipelineEvent::WorkerStarted { .. })), 4);
        assert_eq!(count(|e| matches!(e, PipelineEvent::ItemProduced { .. })), 10);
        assert_eq!(count(|e| matches!(e, PipelineEvent::ItemConsumed { .. })), 10);
        assert_eq!(count(|e| matches!(e, PipelineEvent::TerminationInjected)), 1);
        assert_eq!(count(|e| matches!(e, PipelineEvent::RunSummary(_))), 1);

        let exits: Vec<_> = outcome.workers.iter().map(|w| w.exit).collect();
        assert_eq!(exits.iter().filter(|e| **e == WorkerExit::QuotaReached).count(), 2);
        assert_eq!(exits.iter().filter(|e| **e == WorkerExit::Terminated).count(), 2);
    }

    #[tokio::test]
    async fn test_single_item_latency_covers_both_delays() {
        let config = PipelineConfig {
            producer_delay: DelayRange::fixed(30),
            consumer_delay: DelayRange::fixed(20),
            ..fast_config(1, 1, 1)
        };
        let (coordinator, _events) = observed(config);
        let outcome = coordinator.run().await;

        assert_eq!(outcome.ledger.completed_count(), 1);
        let item = outcome.ledger.completed[0];
        assert!(item.latency() >= Duration::from_millis(50));
        assert!(outcome.report.items[0].latency_ms >= 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_capacity_one_backpressure() {
        let config = PipelineConfig {
            channel_capacity: 1,
            producer_delay: DelayRange::zero(),
            ..fast_config(4, 2, 10)
        };
        let (coordinator, _events) = observed(config);
        let outcome = coordinator.run().await;

        assert_eq!(outcome.ledger.completed_count(), 40);
        assert_eq!(outcome.report.peak_channel_len, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_external_cancellation_returns_partial() {
        let config = PipelineConfig {
            producer_delay: DelayRange::fixed(20),
            consumer_delay: DelayRange::fixed(20),
            shutdown_grace_ms: 5_000,
            ..fast_config(3, 2, 50)
        };
        let (coordinator, _events) = observed(config);
        let external = CancellationToken::new();

        let trigger = external.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = coordinator.run_with_cancel(external).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(outcome.termination(), Termination::Cancelled);
        assert!(outcome.ledger.completed_count() < 150);
        assert!(outcome.ledger.is_consistent());
        assert!(outcome
            .workers
            .iter()
            .all(|w| w.exit == WorkerExit::Cancelled || w.exit == WorkerExit::QuotaReached));
    }

    #[tokio::test]
    async fn test_grace_expiry_aborts_stragglers() {
        let config = PipelineConfig {
            producer_delay: DelayRange::fixed(60_000),
            shutdown_grace_ms: 100,
            ..fast_config(2, 2, 3)
        };
        let (coordinator, events) = observed(config);

        let started = Instant::now();
        let outcome = coordinator.run().await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome.termination(), Termination::GraceExpired);
        assert_eq!(outcome.ledger.completed_count(), 0);

        let timeout = events
            .try_iter()
            .find_map(|e| match e {
                PipelineEvent::ShutdownTimeout { outstanding, .. } => Some(outstanding),
                _ => None,
            });
        assert_eq!(timeout, Some(4));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_grace_expiry_mid_run_keeps_ledger_consistent() {
        let config = PipelineConfig {
            producer_delay: DelayRange::fixed(2),
            consumer_delay: DelayRange::fixed(2),
            shutdown_grace_ms: 150,
            ..fast_config(2, 2, 1_000)
        };
        let (coordinator, _events) = observed(config);
        let outcome = coordinator.run().await;

        assert_eq!(outcome.termination(), Termination::GraceExpired);
        assert!(outcome.ledger.completed_count() > 0);
        assert!(outcome.ledger.completed_count() < 2_000);
        assert!(outcome.ledger.is_consistent());
        // every aborted task was awaited before the snapshot
        assert_eq!(outcome.report.stats.active_producers, 0);
        assert_eq!(outcome.report.stats.active_consumers, 0);
        assert_eq!(outcome.report.stats.failed_workers, 0);
    }

    /// Cancels the external token once every worker has reported finished
    struct CancelWhenDone {
        remaining: std::sync::atomic::AtomicUsize,
        token: CancellationToken,
    }

    impl EventSink for CancelWhenDone {
        fn emit(&self, event: &PipelineEvent) {
            if matches!(event, PipelineEvent::WorkerFinished { .. })
                && self.remaining.fetch_sub(1, Ordering::SeqCst) == 1
            {
                self.token.cancel();
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_late_cancellation_keeps_full_run_completed() {
        let external = CancellationToken::new();
        let sink = Arc::new(CancelWhenDone {
            remaining: std::sync::atomic::AtomicUsize::new(4),
            token: external.clone(),
        });
        let coordinator = Coordinator::new(fast_config(2, 2, 5), sink).unwrap();
        let outcome = coordinator.run_with_cancel(external.clone()).await;

        assert!(external.is_cancelled());
        assert_eq!(outcome.termination(), Termination::Completed);
        assert_eq!(outcome.ledger.completed_count(), 10);
        assert!(outcome.report.is_complete());
    }

    #[test]
    fn test_classify_by_worker_exits() {
        let report = |exit| WorkerReport {
            worker: WorkerId::consumer(1),
            exit,
            processed: 0,
        };
        assert_eq!(classify(&[]), Termination::Completed);
        assert_eq!(
            classify(&[report(WorkerExit::QuotaReached), report(WorkerExit::Terminated)]),
            Termination::Completed
        );
        assert_eq!(
            classify(&[report(WorkerExit::Terminated), report(WorkerExit::Cancelled)]),
            Termination::Cancelled
        );
    }

    #[tokio::test]
    async fn test_stats_monitor_reports_progress() {
        let config = PipelineConfig {
            producer_delay: DelayRange::fixed(10),
            stats_interval_ms: Some(10),
            ..fast_config(2, 1, 5)
        };
        let (coordinator, events) = observed(config);
        coordinator.run().await;

        let snapshots = events
            .try_iter()
            .filter(|e| matches!(e, PipelineEvent::StatsSnapshot(_)))
            .count();
        assert!(snapshots >= 1);
    }

    /// Panics the first time an item is consumed
    struct PanicOnce {
        fired: AtomicBool,
        inner: ChannelSink,
    }

    impl EventSink for PanicOnce {
        fn emit(&self, event: &PipelineEvent) {
            self.inner.emit(event);
            if matches!(event, PipelineEvent::ItemConsumed { .. })
                && !self.fired.swap(true, Ordering::SeqCst)
            {
                panic!("sink failure");
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_panicking_worker_is_reported_not_fatal() {
        let (inner, events) = ChannelSink::unbounded();
        let sink = Arc::new(PanicOnce {
            fired: AtomicBool::new(false),
            inner,
        });
        let coordinator = Coordinator::new(fast_config(2, 2, 5), sink).unwrap();
        let outcome = coordinator.run().await;

        assert_eq!(outcome.termination(), Termination::Completed);
        assert_eq!(outcome.report.stats.failed_workers, 1);
        // the panicking consumer had already completed its item
        assert_eq!(outcome.ledger.completed_count(), 10);
        assert!(outcome.ledger.is_consistent());
        assert!(events
            .try_iter()
            .any(|e| matches!(e, PipelineEvent::WorkerFailed { .. })));
    }
}

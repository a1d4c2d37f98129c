//! Pipeline Core
//!
//! Bounded producer/consumer simulator with end-to-end latency accounting.
//!
//! ## Architecture
//! - Channel: fixed-capacity FIFO with cancellable blocking put/take
//! - Ledger: concurrent per-item timing records and the completed list
//! - Worker: producer and consumer units with randomized simulated cost
//! - Coordinator: worker lifecycle, termination marker protocol, shutdown grace
//! - Events: injected sink for every lifecycle event (tracing, channel, null)

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod ledger;
pub mod report;
pub mod stats;
pub mod types;
pub mod worker;

pub use channel::{BoundedChannel, ItemChannel, Take};
pub use config::{DelayRange, PipelineConfig};
pub use coordinator::{Coordinator, RunOutcome, Termination};
pub use error::{ChannelError, ConfigError, ItemError, PipelineError};
pub use events::{ChannelSink, EventSink, NullSink, PipelineEvent, SharedSink, TracingSink};
pub use ledger::{CompletedItem, LatencyLedger, LedgerSnapshot};
pub use report::{LatencyStats, RunReport};
pub use types::{Envelope, Item, ItemId, WorkerId, WorkerRole};

/// Validate `config` and run it to completion, logging through `tracing`
pub async fn run_pipeline(config: PipelineConfig) -> Result<RunOutcome, ConfigError> {
    let coordinator = Coordinator::with_tracing(config)?;
    Ok(coordinator.run().await)
}

//! Run reporting
//! Latency summaries over completed items

pub mod latency;

pub use latency::{LatencyStats, RunReport};

//! Upstream RPC: one HTTP client per source, per-source backoff, and a
//! parallel fan-out that returns the first valid response.

pub mod backoff;
pub mod client;
pub mod fanout;

pub use backoff::BackoffTable;
pub use client::{RpcClient, Source, Tip};
pub use fanout::{FanOutWinner, ParallelFanOut};

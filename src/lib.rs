pub mod config;
pub mod controller;
pub mod error;
pub mod gossip;
pub mod metrics;
pub mod peers;
pub mod poller;
pub mod rpc;
pub mod status;
pub mod types;

pub use config::Config;
pub use controller::Controller;
pub use error::{ConfigError, FanOutError, PeerWriteError, RpcCallError};
pub use gossip::Gossip;
pub use metrics::{MetricsReporter, MetricsSink};
pub use peers::{Peer, PeerDialer, PeerRegistry};
pub use poller::{build_probe, BlockProbe, CadenceReason, OverrideRequest, PollState, Poller, PredictiveMonitor};
pub use rpc::{BackoffTable, ParallelFanOut, RpcClient, Source, Tip};
pub use status::{HealthState, StatusHandle, StatusSnapshot, StatusWriter};
pub use types::{now_ms, BlockEvent, BlockHash, PollSnapshot, SourceId};

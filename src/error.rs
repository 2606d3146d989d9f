//! Error taxonomy.
//!
//! Errors are handled at the component boundary closest to their source
//! (see SPEC_FULL.md §7) — `RpcError` never escapes `BackoffTable`,
//! `PeerWriteError` never escapes `Gossip`. `ConfigError` is the only
//! variant the Controller surfaces to the operator.

use thiserror::Error;

/// Fatal at startup; surfaced to the operator and causes a non-zero exit.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One RPC call's failure, recovered locally by `BackoffTable` and never
/// surfaced to peers.
#[derive(Debug, Error)]
pub enum RpcCallError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("http status {0}")]
    Http(u16),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed response body: {0}")]
    Decode(String),

    #[error("authentication failed (status {0})")]
    Auth(u16),
}

/// Failure of a whole fan-out round across all configured sources.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FanOutError {
    #[error("no sources available (all in backoff)")]
    NoSourcesAvailable,

    #[error("all sources failed")]
    AllFailed,

    #[error("fan-out deadline exceeded")]
    Timeout,
}

/// A single peer write that failed or exceeded its deadline. Recovered
/// locally by `Gossip` via eviction; never retried inline.
#[derive(Debug, Error)]
pub enum PeerWriteError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("write deadline exceeded")]
    DeadlineExceeded,
}

//! Fires `RpcClient` against every non-backed-off source concurrently and
//! returns the first valid result. See SPEC_FULL.md §4.3.

use super::backoff::BackoffTable;
use super::client::{RpcClient, Source, Tip};
use crate::error::FanOutError;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::time::timeout as tokio_timeout;

pub struct ParallelFanOut<'a> {
    client: &'a RpcClient,
}

/// A successful fan-out round, naming the source that won so the caller
/// can record it in the `PollSnapshot` for observability.
pub struct FanOutWinner {
    pub source: Source,
    pub tip: Tip,
}

impl<'a> ParallelFanOut<'a> {
    pub fn new(client: &'a RpcClient) -> Self {
        Self { client }
    }

    /// Launches one concurrent call per non-skipped source and returns the
    /// first result with a non-empty hash. Every failure observed before a
    /// winner is found is recorded in `backoff` as it arrives; dropping the
    /// in-flight `FuturesUnordered` once a winner is picked (or the
    /// deadline fires) cancels every call still outstanding, so a source
    /// that never gets to respond is left untouched rather than penalized.
    pub async fn poll(
        &self,
        sources: &[Source],
        backoff: &mut BackoffTable,
        deadline: Duration,
    ) -> Result<FanOutWinner, FanOutError> {
        let now = Instant::now();
        let eligible: Vec<Source> = sources
            .iter()
            .filter(|s| !backoff.should_skip(&s.id, now))
            .cloned()
            .collect();
        if eligible.is_empty() {
            return Err(FanOutError::NoSourcesAvailable);
        }

        let mut in_flight: FuturesUnordered<_> = eligible
            .into_iter()
            .map(|source| {
                let client = self.client;
                async move {
                    let tip = client.get_blockchain_info(&source, deadline).await;
                    (source, tip)
                }
            })
            .collect();

        let race = async {
            while let Some((source, result)) = in_flight.next().await {
                match result {
                    Ok(tip) if !tip.hash.is_empty() => {
                        backoff.on_success(&source.id);
                        return Some(FanOutWinner { source, tip });
                    }
                    Ok(_) | Err(_) => {
                        backoff.on_failure(&source.id, Instant::now());
                        continue;
                    }
                }
            }
            None
        };

        match tokio_timeout(deadline, race).await {
            Ok(Some(winner)) => Ok(winner),
            Ok(None) => Err(FanOutError::AllFailed),
            Err(_) => Err(FanOutError::Timeout),
        }
    }
}

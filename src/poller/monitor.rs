//! Parallel monitor: a 30 s window of concurrent all-source polling after
//! a detection, used to bypass a lagging primary source. See
//! SPEC_FULL.md §4.5.

use crate::rpc::{RpcClient, Source, Tip};
use futures::future::join_all;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(30);
const TICK: Duration = Duration::from_millis(100);
const QUERY_TIMEOUT: Duration = Duration::from_millis(100);

/// Polls every source every 100 ms for up to 30 s. Returns as soon as a
/// source reports a hash different from `current_hash` AND a strictly
/// greater height than `current_height`; never blocks the caller's own
/// tick loop because it runs on an independently-spawned task with its
/// own deadline.
pub async fn run(sources: Vec<Source>, client: RpcClient, current_hash: String, current_height: u64) -> Option<(Source, Tip)> {
    let deadline = Instant::now() + WINDOW;
    let mut ticker = tokio::time::interval(TICK);

    while Instant::now() < deadline {
        ticker.tick().await;

        let calls = sources.iter().map(|source| {
            let client = &client;
            async move { (source.clone(), client.get_blockchain_info(source, QUERY_TIMEOUT).await) }
        });

        for (source, result) in join_all(calls).await {
            if let Ok(tip) = result {
                if tip.hash != current_hash && tip.height > current_height {
                    return Some((source, tip));
                }
            }
        }
    }
    None
}

use std::{sync::atomic::Ordering, time::Duration};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::{logging::category_channel, server::AppState};

pub fn spawn_sweep_task(state: AppState, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let evicted = state.runtime.edits.sweep();
            if evicted > 0 {
                state
                    .metrics
                    .sweep_evictions_total
                    .fetch_add(evicted as u64, Ordering::Relaxed);
                debug!(
                    "{} sweep evicted {evicted} stale channel entries",
                    category_channel()
                );
            }
        }
    })
}

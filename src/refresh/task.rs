use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{self, Duration, Interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::refresh::PriceRefreshCoordinator;
use crate::state::StoreEvent;

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Drive one viewing session until its coordinator is closed.
///
/// On start: backfill missing details, then auto-fetch. Afterwards every
/// store change re-runs the auto-fetch policy, untracked cars are dropped
/// from the price map, and (if enabled) priced cars are re-sampled every
/// `auto_refresh`.
pub async fn run_session(coord: PriceRefreshCoordinator, auto_refresh: Option<Duration>) -> Result<()> {
    let life = coord.lifetime();
    let mut events = coord.store().subscribe();

    if let Err(e) = coord.store().backfill_details(&life).await {
        warn!("initial backfill failed: {e}");
    }
    coord.auto_fetch();

    let mut interval = auto_refresh.map(|every| {
        let mut i = time::interval_at(time::Instant::now() + every, every);
        i.set_missed_tick_behavior(MissedTickBehavior::Delay);
        i
    });

    loop {
        tokio::select! {
            biased;
            _ = life.ended() => break,

            ev = events.recv() => match ev {
                Ok(StoreEvent::Untracked(car_id)) => coord.forget(&car_id),
                Ok(_) => {
                    coord.auto_fetch();
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "store events lagged; re-checking prices");
                    if let Err(e) = coord.store().backfill_details(&life).await {
                        warn!("backfill failed: {e}");
                    }
                    // Lost Untracked events leave orphans; drop anything no longer tracked.
                    for row_id in orphaned(&coord) {
                        coord.forget(&row_id);
                    }
                    coord.auto_fetch();
                }
                Err(RecvError::Closed) => break,
            },

            _ = next_tick(&mut interval) => {
                let batch = coord.refresh_in_place();
                if !batch.is_empty() {
                    info!(cars = batch.car_ids().len(), "periodic price refresh");
                }
            }
        }
    }

    info!("price session loop stopped");
    Ok(())
}

fn orphaned(coord: &PriceRefreshCoordinator) -> Vec<String> {
    coord.priced_ids()
        .into_iter()
        .filter(|id| !coord.store().is_tracked(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{default_catalog, MockPriceSource};
    use crate::state::TrackingStore;
    use std::sync::Arc;

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn tracks_trigger_fetches_and_untrack_forgets() {
        let src = MockPriceSource::with_seed(default_catalog(), Duration::ZERO, 500, 5);
        let store = TrackingStore::new("u", Arc::new(src), 16);
        let coord = PriceRefreshCoordinator::new(store.clone());
        let handle = tokio::spawn(run_session(coord.clone(), None));

        settle().await;
        store.track(default_catalog()[0].clone());
        settle().await;
        assert!(coord.price("1").is_some());

        store.untrack("1");
        settle().await;
        assert!(coord.price("1").is_none());

        coord.close();
        handle.await.unwrap().unwrap();
    }
}

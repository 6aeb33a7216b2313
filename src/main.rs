use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use car_tracker::auth::{AuthProvider, MockAuthProvider};
use car_tracker::config::Config;
use car_tracker::refresh::{task, PriceRefreshCoordinator};
use car_tracker::report;
use car_tracker::source::MockPriceSource;
use car_tracker::state::TrackingStore;

const DEMO_UID: &str = "mockUser123";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // RUST_LOG=debug to see individual samples.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::from_env()?;
    info!(?cfg, "starting");

    let email = env::var("CAR_TRACKER_EMAIL").unwrap_or_else(|_| "demo@example.com".to_string());
    let password = env::var("CAR_TRACKER_PASSWORD").unwrap_or_else(|_| "password123".to_string());

    let auth = MockAuthProvider::new(cfg.latency()).with_account(DEMO_UID, &email, &password);
    auth.bootstrap();
    let user = auth.login(&email, &password).await.context("sign-in failed")?;

    let source = Arc::new(MockPriceSource::from_config(&cfg));
    let store = TrackingStore::new(user.uid.clone(), source, cfg.event_capacity);

    // Discover
    let catalog = store.catalog_view().await.context("loading catalog")?;
    for id in &cfg.track_on_start {
        match catalog.iter().find(|e| &e.car.id == id) {
            Some(entry) => {
                store.track(entry.car.clone());
            }
            None => warn!(car_id = %id, "not in catalog, skipping"),
        }
    }
    report::log_catalog(&store.catalog_view().await?);

    // Tracking view
    let coord = PriceRefreshCoordinator::new(store.clone());
    let session = tokio::spawn(task::run_session(coord.clone(), cfg.auto_refresh()));

    sleep(cfg.latency() * 4).await;
    report::log_tracked(&coord.rows());

    info!("manual refresh");
    let batch = coord.refresh_all();
    report::log_tracked(&coord.rows());
    for (car_id, res) in batch.join().await {
        if let Err(e) = res {
            warn!(car_id = %car_id, "refresh failed: {e}");
        }
    }
    report::log_tracked(&coord.rows());

    sleep(Duration::from_secs(cfg.run_secs)).await;
    report::log_tracked(&coord.rows());

    coord.close();
    session.await.context("session task panicked")??;

    auth.logout().await?;
    Ok(())
}

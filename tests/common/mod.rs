#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use car_tracker::error::PriceSourceError;
use car_tracker::refresh::PriceRefreshCoordinator;
use car_tracker::source::{default_catalog, MockPriceSource, PriceSource};
use car_tracker::state::TrackingStore;
use car_tracker::types::{Car, PriceUpdate};

pub const USER: &str = "mockUser123";

pub fn car(id: &str) -> Car {
    default_catalog()
        .into_iter()
        .find(|c| c.id == id)
        .expect("car in default catalog")
}

pub fn mock_source(seed: u64) -> MockPriceSource {
    MockPriceSource::with_seed(default_catalog(), Duration::ZERO, 500, seed)
}

pub fn setup_store(seed: u64) -> TrackingStore {
    TrackingStore::new(USER, Arc::new(mock_source(seed)), 64)
}

pub fn setup_coordinator(source: Arc<dyn PriceSource>) -> PriceRefreshCoordinator {
    PriceRefreshCoordinator::new(TrackingStore::new(USER, source, 64))
}

/// Price samples block until the test hands out a permit, one per sample,
/// in the order the samples were requested.
pub struct GatedSource {
    inner: MockPriceSource,
    pub gate: Semaphore,
}

impl GatedSource {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: mock_source(seed),
            gate: Semaphore::new(0),
        }
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

#[async_trait]
impl PriceSource for GatedSource {
    async fn list_catalog(&self) -> Result<Vec<Car>, PriceSourceError> {
        self.inner.list_catalog().await
    }

    async fn get_details(&self, car_id: &str) -> Result<Option<Car>, PriceSourceError> {
        self.inner.get_details(car_id).await
    }

    async fn sample_current_price(&self, car_id: &str) -> Result<Option<PriceUpdate>, PriceSourceError> {
        self.gate
            .acquire()
            .await
            .map_err(|e| PriceSourceError::Other(e.to_string()))?
            .forget();
        self.inner.sample_current_price(car_id).await
    }
}

/// Catalog lookups work; every price sample and detail lookup fails.
pub struct FailingSource;

#[async_trait]
impl PriceSource for FailingSource {
    async fn list_catalog(&self) -> Result<Vec<Car>, PriceSourceError> {
        Ok(default_catalog())
    }

    async fn get_details(&self, _car_id: &str) -> Result<Option<Car>, PriceSourceError> {
        Err(PriceSourceError::Unavailable("backend down".to_string()))
    }

    async fn sample_current_price(&self, _car_id: &str) -> Result<Option<PriceUpdate>, PriceSourceError> {
        Err(PriceSourceError::Unavailable("backend down".to_string()))
    }
}

pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
}

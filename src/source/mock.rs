//! In-process price backend.
//!
//! Serves a fixed catalog and produces prices as a bounded random walk:
//! every sample moves at most `fluctuation` dollars away from the previous
//! sample for the same car, and the first sample starts from `base_price`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::sleep;
use tracing::debug;

use crate::config::Config;
use crate::error::PriceSourceError;
use crate::source::PriceSource;
use crate::types::{Car, PriceUpdate};

pub fn default_catalog() -> Vec<Car> {
    vec![
        Car::new("1", "Toyota", "Camry", 2023, 25_000),
        Car::new("2", "Honda", "Civic", 2022, 22_000),
        Car::new("3", "Ford", "Mustang", 2024, 45_000),
        Car::new("4", "Tesla", "Model 3", 2023, 42_000),
        Car::new("5", "BMW", "X5", 2023, 65_000),
    ]
}

struct Walk {
    // car id -> last sampled price
    baselines: HashMap<String, i64>,
    rng: StdRng,
}

pub struct MockPriceSource {
    catalog: Vec<Car>,
    latency: Duration,
    fluctuation: i64,
    walk: Mutex<Walk>,
}

impl MockPriceSource {
    pub fn new(catalog: Vec<Car>, latency: Duration, fluctuation: i64) -> Self {
        Self::build(catalog, latency, fluctuation, StdRng::from_entropy())
    }

    /// Reproducible walk.
    pub fn with_seed(catalog: Vec<Car>, latency: Duration, fluctuation: i64, seed: u64) -> Self {
        Self::build(catalog, latency, fluctuation, StdRng::seed_from_u64(seed))
    }

    pub fn from_config(cfg: &Config) -> Self {
        match cfg.rng_seed {
            Some(seed) => Self::with_seed(default_catalog(), cfg.latency(), cfg.fluctuation, seed),
            None => Self::new(default_catalog(), cfg.latency(), cfg.fluctuation),
        }
    }

    fn build(catalog: Vec<Car>, latency: Duration, fluctuation: i64, rng: StdRng) -> Self {
        Self {
            catalog,
            latency,
            fluctuation: fluctuation.max(0),
            walk: Mutex::new(Walk {
                baselines: HashMap::new(),
                rng,
            }),
        }
    }

    fn find(&self, car_id: &str) -> Option<&Car> {
        self.catalog.iter().find(|c| c.id == car_id)
    }

    /// Current baseline for a car, if it has been sampled at least once.
    pub fn baseline(&self, car_id: &str) -> Option<i64> {
        self.walk.lock().baselines.get(car_id).copied()
    }

    // One step of the walk. Persists the result as the next baseline.
    fn step(&self, car: &Car) -> i64 {
        let mut w = self.walk.lock();
        let base = w.baselines.get(&car.id).copied().unwrap_or(car.base_price);

        let f = self.fluctuation as f64;
        let delta: f64 = w.rng.gen_range(-f..=f);
        let next = ((base as f64) + delta).round() as i64;
        // Prices can't go below zero; clamping keeps the step within bounds.
        let next = next.max(0);

        w.baselines.insert(car.id.clone(), next);
        next
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    async fn list_catalog(&self) -> Result<Vec<Car>, PriceSourceError> {
        sleep(self.latency).await;
        Ok(self.catalog.clone())
    }

    async fn get_details(&self, car_id: &str) -> Result<Option<Car>, PriceSourceError> {
        sleep(self.latency).await;
        Ok(self.find(car_id).cloned())
    }

    async fn sample_current_price(&self, car_id: &str) -> Result<Option<PriceUpdate>, PriceSourceError> {
        sleep(self.latency).await;

        let Some(car) = self.find(car_id) else {
            debug!(car_id, "price sample for unknown car");
            return Ok(None);
        };

        let current_price = self.step(car);
        debug!(car_id, current_price, "price sampled");

        Ok(Some(PriceUpdate {
            car_id: car_id.to_string(),
            current_price,
            timestamp: Utc::now(),
        }))
    }
}

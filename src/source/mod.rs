pub mod mock;

use async_trait::async_trait;

use crate::error::PriceSourceError;
use crate::types::{Car, PriceUpdate};

pub use mock::{default_catalog, MockPriceSource};

/// Where catalog entries and price samples come from.
///
/// Unknown ids are `Ok(None)`. `Err` is reserved for failures the caller
/// did not expect (transport, backend down) and must be propagated.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Full catalog. Each call returns a fresh copy.
    async fn list_catalog(&self) -> Result<Vec<Car>, PriceSourceError>;

    async fn get_details(&self, car_id: &str) -> Result<Option<Car>, PriceSourceError>;

    async fn sample_current_price(&self, car_id: &str) -> Result<Option<PriceUpdate>, PriceSourceError>;
}

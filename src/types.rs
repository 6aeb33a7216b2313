use std::fmt;

use chrono::{DateTime, Utc};

/// Catalog entry. Immutable once the price source hands it out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Car {
    pub id: String,
    pub make: String,
    pub model: String,
    pub year: i32,
    // Whole dollars, reference price at first observation.
    pub base_price: i64,
}

impl Car {
    pub fn new(id: &str, make: &str, model: &str, year: i32, base_price: i64) -> Self {
        Self {
            id: id.to_string(),
            make: make.to_string(),
            model: model.to_string(),
            year,
            base_price: base_price.max(0),
        }
    }

    /// "Toyota Camry (2023)"
    pub fn label(&self) -> String {
        format!("{} {} ({})", self.make, self.model, self.year)
    }
}

/// A user's subscription to one car.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedCar {
    pub car_id: String,
    pub user_id: String,
    pub date_tracked: DateTime<Utc>,

    // Reserved for price alerting; nothing reads these yet.
    pub target_price: Option<i64>,
    pub last_notified_price: Option<i64>,
}

/// One price observation. Lives only in a coordinator's price map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceUpdate {
    pub car_id: String,
    pub current_price: i64,
    pub timestamp: DateTime<Utc>,
}

/// Signed-in identity as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: String,
    pub email: String,
}

/// What a tracked row shows in the price column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceDisplay {
    Loading,
    Price(i64),
    Unavailable,
}

impl fmt::Display for PriceDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceDisplay::Loading => write!(f, "loading"),
            PriceDisplay::Price(p) => write!(f, "${p}"),
            PriceDisplay::Unavailable => write!(f, "N/A"),
        }
    }
}

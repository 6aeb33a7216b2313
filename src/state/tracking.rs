use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::{Car, TrackedCar};

/// Everything the store owns. Only `TrackingStore` mutates it, under its lock.
#[derive(Debug, Clone, Default)]
pub struct TrackingState {
    // Insertion order; listings iterate this.
    pub tracked: Vec<TrackedCar>,
    pub details: HashMap<String, Car>,
    // Backfills currently running; the busy flag is `> 0`.
    pub backfills_in_flight: usize,
}

impl TrackingState {
    pub fn is_tracked(&self, car_id: &str) -> bool {
        self.tracked.iter().any(|tc| tc.car_id == car_id)
    }

    pub fn is_loading(&self) -> bool {
        self.backfills_in_flight > 0
    }

    /// Returns false (and changes nothing) if the car is already tracked.
    pub fn track(&mut self, car: Car, user_id: &str, now: DateTime<Utc>) -> bool {
        if self.is_tracked(&car.id) {
            return false;
        }
        self.tracked.push(TrackedCar {
            car_id: car.id.clone(),
            user_id: user_id.to_string(),
            date_tracked: now,
            target_price: None,
            last_notified_price: None,
        });
        self.details.insert(car.id.clone(), car);
        true
    }

    /// Returns true if anything was removed.
    pub fn untrack(&mut self, car_id: &str) -> bool {
        let before = self.tracked.len();
        self.tracked.retain(|tc| tc.car_id != car_id);
        let had_details = self.details.remove(car_id).is_some();
        before != self.tracked.len() || had_details
    }

    /// Tracked ids without cached details, in tracked order.
    pub fn missing_details(&self) -> Vec<String> {
        self.tracked
            .iter()
            .filter(|tc| !self.details.contains_key(&tc.car_id))
            .map(|tc| tc.car_id.clone())
            .collect()
    }

    /// Batch merge for a finished backfill.
    ///
    /// Entries for cars untracked since the scan, or already cached again,
    /// are skipped. Returns the ids actually inserted.
    pub fn merge_details(&mut self, batch: Vec<Car>) -> Vec<String> {
        let mut merged = Vec::with_capacity(batch.len());
        for car in batch {
            if !self.is_tracked(&car.id) || self.details.contains_key(&car.id) {
                continue;
            }
            merged.push(car.id.clone());
            self.details.insert(car.id.clone(), car);
        }
        merged
    }

    /// Re-seed tracked entries (e.g. from an earlier session) without details.
    /// Ids already tracked are skipped. Returns the ids added.
    pub fn restore(&mut self, entries: Vec<TrackedCar>) -> Vec<String> {
        let mut added = Vec::new();
        for tc in entries {
            if self.is_tracked(&tc.car_id) {
                continue;
            }
            added.push(tc.car_id.clone());
            self.tracked.push(tc);
        }
        added
    }

    pub fn set_target_price(&mut self, car_id: &str, target: Option<i64>) -> bool {
        match self.tracked.iter_mut().find(|tc| tc.car_id == car_id) {
            Some(tc) => {
                tc.target_price = target;
                true
            }
            None => false,
        }
    }
}

pub mod tracking;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::PriceSourceError;
use crate::lifetime::Lifetime;
use crate::source::PriceSource;
use crate::types::{Car, PriceUpdate, TrackedCar};

use tracking::TrackingState;

/// Published after each store transition, once the lock is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Tracked(String),
    Untracked(String),
    DetailsMerged(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    // Ids that lacked details when the scan started.
    pub scanned: usize,
    pub merged: Vec<String>,
    // Ids the catalog had no entry for; they stay tracked without details.
    pub unresolved: Vec<String>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub car: Car,
    pub is_tracked: bool,
}

struct Inner {
    user_id: String,
    state: RwLock<TrackingState>,
    source: Arc<dyn PriceSource>,
    events: broadcast::Sender<StoreEvent>,
}

/// Handle to one user's tracking state. Clones share the same state.
#[derive(Clone)]
pub struct TrackingStore {
    inner: Arc<Inner>,
}

// Keeps the busy flag raised for as long as a backfill future is alive,
// including when it is dropped mid-scan.
struct BusyGuard<'a> {
    inner: &'a Inner,
}

impl<'a> BusyGuard<'a> {
    fn raise(inner: &'a Inner) -> Self {
        inner.state.write().backfills_in_flight += 1;
        Self { inner }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.inner.state.write();
        st.backfills_in_flight = st.backfills_in_flight.saturating_sub(1);
    }
}

impl TrackingStore {
    pub fn new(user_id: impl Into<String>, source: Arc<dyn PriceSource>, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                user_id: user_id.into(),
                state: RwLock::new(TrackingState::default()),
                source,
                events,
            }),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn source(&self) -> Arc<dyn PriceSource> {
        self.inner.source.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    fn publish(&self, ev: StoreEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(ev);
    }

    /// Start tracking `car`. Already tracked => no-op, returns false.
    pub fn track(&self, car: Car) -> bool {
        let car_id = car.id.clone();
        let added = self.inner.state.write().track(car, &self.inner.user_id, Utc::now());

        if added {
            info!(car_id = %car_id, user_id = %self.inner.user_id, "tracking car");
            self.publish(StoreEvent::Tracked(car_id));
        } else {
            debug!(car_id = %car_id, "already tracking");
        }
        added
    }

    /// Stop tracking and drop cached details. Unknown id => no-op, returns false.
    pub fn untrack(&self, car_id: &str) -> bool {
        let removed = self.inner.state.write().untrack(car_id);
        if removed {
            info!(car_id, "untracked car");
            self.publish(StoreEvent::Untracked(car_id.to_string()));
        }
        removed
    }

    /// Seed tracked entries that have no cached details yet, such as ids
    /// carried over from an earlier session. `backfill_details` fills them in.
    pub fn restore_tracked(&self, car_ids: &[&str]) -> Vec<String> {
        let now = Utc::now();
        let entries = car_ids
            .iter()
            .map(|id| TrackedCar {
                car_id: id.to_string(),
                user_id: self.inner.user_id.clone(),
                date_tracked: now,
                target_price: None,
                last_notified_price: None,
            })
            .collect();
        let added = self.inner.state.write().restore(entries);
        for id in &added {
            self.publish(StoreEvent::Tracked(id.clone()));
        }
        if !added.is_empty() {
            info!(count = added.len(), "restored tracked cars");
        }
        added
    }

    /// Fetch details for tracked cars that have none cached.
    ///
    /// Lookups run one at a time. Results land in the cache in a single
    /// merge at the end, so readers never see a half-filled batch. Cars
    /// tracked after the scan started are left for the next call.
    ///
    /// If `lifetime` ends first, nothing is merged. A source error aborts the
    /// run with nothing merged.
    pub async fn backfill_details(&self, lifetime: &Lifetime) -> Result<BackfillReport, PriceSourceError> {
        let _busy = BusyGuard::raise(&self.inner);
        let missing = self.inner.state.read().missing_details();

        let mut report = BackfillReport {
            scanned: missing.len(),
            ..Default::default()
        };
        if missing.is_empty() {
            return Ok(report);
        }
        debug!(count = missing.len(), "backfilling car details");

        let mut found = Vec::with_capacity(missing.len());
        for car_id in &missing {
            let res = tokio::select! {
                biased;
                _ = lifetime.ended() => None,
                res = self.inner.source.get_details(car_id) => Some(res),
            };
            let Some(res) = res else {
                info!(car_id = %car_id, "backfill abandoned, lifetime ended");
                report.cancelled = true;
                return Ok(report);
            };

            match res? {
                Some(car) => found.push(car),
                None => {
                    warn!(car_id = %car_id, "no catalog entry for tracked car");
                    report.unresolved.push(car_id.clone());
                }
            }
        }

        if lifetime.is_ended() {
            report.cancelled = true;
            return Ok(report);
        }

        report.merged = self.inner.state.write().merge_details(found);
        if !report.merged.is_empty() {
            info!(merged = report.merged.len(), "car details backfilled");
            self.publish(StoreEvent::DetailsMerged(report.merged.clone()));
        }
        Ok(report)
    }

    /// Observation hook for price samples. Logs only; tracked cars and the
    /// details cache are left untouched.
    pub fn record_price_update(&self, update: &PriceUpdate) {
        debug!(
            car_id = %update.car_id,
            current_price = update.current_price,
            timestamp = %update.timestamp.to_rfc3339(),
            "price update observed"
        );
    }

    /// Set (or clear) the alert threshold on a tracked car.
    pub fn set_target_price(&self, car_id: &str, target: Option<i64>) -> bool {
        let ok = self.inner.state.write().set_target_price(car_id, target);
        if ok {
            info!(car_id, ?target, "target price set");
        }
        ok
    }

    pub fn is_tracked(&self, car_id: &str) -> bool {
        self.inner.state.read().is_tracked(car_id)
    }

    /// True while any backfill is running.
    pub fn is_loading(&self) -> bool {
        self.inner.state.read().is_loading()
    }

    pub fn tracked(&self) -> Vec<TrackedCar> {
        self.inner.state.read().tracked.clone()
    }

    pub fn details(&self, car_id: &str) -> Option<Car> {
        self.inner.state.read().details.get(car_id).cloned()
    }

    pub fn details_snapshot(&self) -> HashMap<String, Car> {
        self.inner.state.read().details.clone()
    }

    /// Consistent copy of the whole aggregate.
    pub fn snapshot(&self) -> TrackingState {
        self.inner.state.read().clone()
    }

    /// Catalog paired with "already tracking" for each car.
    pub async fn catalog_view(&self) -> Result<Vec<CatalogEntry>, PriceSourceError> {
        let cars = self.inner.source.list_catalog().await?;
        let st = self.inner.state.read();
        Ok(cars
            .into_iter()
            .map(|car| {
                let is_tracked = st.is_tracked(&car.id);
                CatalogEntry { car, is_tracked }
            })
            .collect())
    }

    #[cfg(test)]
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut TrackingState) -> R) -> R {
        f(&mut self.inner.state.write())
    }
}

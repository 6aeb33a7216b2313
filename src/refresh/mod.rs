//! Per-session price cache and fetch orchestration.
//!
//! A coordinator belongs to one viewing session. It keeps the latest
//! sample and a loading flag per car id, both in keyed maps so fetches for
//! different cars never step on each other.
//!
//! Manual refresh is invalidate-then-repopulate: `refresh_all` bumps the
//! generation, wipes both maps and marks every car loading in one step.
//! A fetch only writes if its generation is still current, so a sample
//! started before the refresh can never reappear after it.

pub mod task;

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PriceSourceError;
use crate::lifetime::{Lifetime, LifetimeGuard};
use crate::source::PriceSource;
use crate::state::TrackingStore;
use crate::types::{Car, PriceDisplay, PriceUpdate};

pub type FetchResult = Result<Option<PriceUpdate>, PriceSourceError>;

/// One line of the tracked-cars listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRow {
    pub car_id: String,
    pub details: Option<Car>,
    pub price: PriceDisplay,
}

/// Fetches started together by one call. Dropping it detaches the fetches;
/// they still run to completion.
#[derive(Debug)]
pub struct RefreshBatch {
    pub generation: u64,
    handles: Vec<(String, JoinHandle<FetchResult>)>,
}

impl RefreshBatch {
    pub fn car_ids(&self) -> Vec<String> {
        self.handles.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every fetch. Source errors come back per car.
    pub async fn join(self) -> Vec<(String, FetchResult)> {
        let mut out = Vec::with_capacity(self.handles.len());
        for (car_id, handle) in self.handles {
            match handle.await {
                Ok(res) => out.push((car_id, res)),
                Err(e) => {
                    warn!(car_id = %car_id, "price fetch task failed: {e}");
                    out.push((car_id, Err(PriceSourceError::Other(e.to_string()))));
                }
            }
        }
        out
    }
}

// Fetches holding a car's loading flag. The flag drops when the last one
// finishes.
#[derive(Debug, Clone, Copy)]
struct Pending {
    generation: u64,
    fetches: usize,
}

impl Pending {
    fn first(generation: u64) -> Self {
        Self { generation, fetches: 1 }
    }
}

struct Inner {
    store: TrackingStore,
    source: Arc<dyn PriceSource>,

    prices: DashMap<String, PriceUpdate>,
    loading: DashMap<String, Pending>,

    // Writers of fetch results hold it shared; refresh_all holds it exclusive.
    generation: RwLock<u64>,

    guard: LifetimeGuard,
    lifetime: Lifetime,
}

#[derive(Clone)]
pub struct PriceRefreshCoordinator {
    inner: Arc<Inner>,
}

impl PriceRefreshCoordinator {
    pub fn new(store: TrackingStore) -> Self {
        let (guard, lifetime) = LifetimeGuard::new();
        Self {
            inner: Arc::new(Inner {
                source: store.source(),
                store,
                prices: DashMap::new(),
                loading: DashMap::new(),
                generation: RwLock::new(0),
                guard,
                lifetime,
            }),
        }
    }

    pub fn store(&self) -> &TrackingStore {
        &self.inner.store
    }

    pub fn lifetime(&self) -> Lifetime {
        self.inner.lifetime.clone()
    }

    pub fn generation(&self) -> u64 {
        *self.inner.generation.read()
    }

    pub fn price(&self, car_id: &str) -> Option<PriceUpdate> {
        self.inner.prices.get(car_id).map(|p| p.value().clone())
    }

    pub fn is_loading(&self, car_id: &str) -> bool {
        self.inner.loading.contains_key(car_id)
    }

    pub fn priced_count(&self) -> usize {
        self.inner.prices.len()
    }

    pub fn priced_ids(&self) -> Vec<String> {
        self.inner.prices.iter().map(|e| e.key().clone()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lifetime.is_ended()
    }

    /// Sample one car's price and cache it.
    ///
    /// The loading flag is raised for the duration. It clears on every path
    /// once no other fetch for the car is still pending. An unknown car
    /// leaves the cache unset. Source errors are returned to the caller.
    pub async fn refresh_one(&self, car_id: &str) -> FetchResult {
        let generation = self.generation();
        self.fetch(car_id, generation, false).await
    }

    // `claimed`: the caller already raised the loading flag for this fetch.
    async fn fetch(&self, car_id: &str, generation: u64, claimed: bool) -> FetchResult {
        let life = &self.inner.lifetime;
        if life.is_ended() {
            return Ok(None);
        }

        let was_tracked = self.inner.store.is_tracked(car_id);
        {
            let current = self.inner.generation.read();
            if *current != generation {
                debug!(car_id, generation, "fetch superseded before start");
                return Ok(None);
            }
            if !claimed {
                self.join_loading(car_id, generation);
            }
        }

        let res = tokio::select! {
            biased;
            _ = life.ended() => None,
            res = self.inner.source.sample_current_price(car_id) => Some(res),
        };
        // Session is gone; leave its maps alone.
        let Some(res) = res else {
            return Ok(None);
        };

        let dropped = was_tracked && !self.inner.store.is_tracked(car_id);
        {
            let current = self.inner.generation.read();
            if *current != generation || life.is_ended() {
                debug!(car_id, generation, current = *current, "discarding superseded price sample");
                return res;
            }

            match &res {
                Ok(Some(update)) if !dropped => {
                    self.inner.prices.insert(car_id.to_string(), update.clone());
                }
                Ok(Some(_)) => debug!(car_id, "car untracked while fetching; sample dropped"),
                Ok(None) => debug!(car_id, "no price for car"),
                Err(e) => warn!(car_id, "price fetch failed: {e}"),
            }
            self.release_loading(car_id, generation);
        }

        if let Ok(Some(update)) = &res {
            self.inner.store.record_price_update(update);
        }
        res
    }

    // The loading-flag helpers below expect the generation lock to be held.

    fn join_loading(&self, car_id: &str, generation: u64) {
        self.inner
            .loading
            .entry(car_id.to_string())
            .and_modify(|p| {
                if p.generation == generation {
                    p.fetches += 1;
                } else {
                    *p = Pending::first(generation);
                }
            })
            .or_insert(Pending::first(generation));
    }

    /// Raise the flag only if no fetch holds it. Returns whether it was raised.
    fn claim_idle(&self, car_id: &str, generation: u64) -> bool {
        match self.inner.loading.entry(car_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(Pending::first(generation));
                true
            }
        }
    }

    fn release_loading(&self, car_id: &str, generation: u64) {
        let Entry::Occupied(mut held) = self.inner.loading.entry(car_id.to_string()) else {
            return;
        };
        if held.get().generation != generation {
            return;
        }
        let p = held.get_mut();
        p.fetches = p.fetches.saturating_sub(1);
        if p.fetches == 0 {
            held.remove();
        }
    }

    // The loading flag for `car_id` must already be claimed.
    fn spawn_fetch(&self, car_id: String, generation: u64) -> (String, JoinHandle<FetchResult>) {
        let this = self.clone();
        let id = car_id.clone();
        let handle = tokio::spawn(async move { this.fetch(&id, generation, true).await });
        (car_id, handle)
    }

    // Tracked ids with cached details, in tracked order.
    fn detailed_ids(&self) -> Vec<String> {
        let snap = self.inner.store.snapshot();
        snap.tracked
            .iter()
            .filter(|tc| snap.details.contains_key(&tc.car_id))
            .map(|tc| tc.car_id.clone())
            .collect()
    }

    /// Drop every cached price, then re-fetch each tracked car that has
    /// details. On return every such car already reads as loading.
    pub fn refresh_all(&self) -> RefreshBatch {
        if self.is_closed() {
            return RefreshBatch { generation: self.generation(), handles: Vec::new() };
        }
        let ids = self.detailed_ids();

        let generation = {
            let mut g = self.inner.generation.write();
            *g += 1;
            self.inner.prices.clear();
            self.inner.loading.clear();
            for id in &ids {
                self.inner.loading.insert(id.clone(), Pending::first(*g));
            }
            *g
        };
        info!(generation, cars = ids.len(), "refreshing all prices");

        let handles = ids
            .into_iter()
            .map(|id| self.spawn_fetch(id, generation))
            .collect();
        RefreshBatch { generation, handles }
    }

    /// Fetch a price for each detailed car that has neither a price nor a
    /// fetch in flight. Safe to call repeatedly.
    pub fn auto_fetch(&self) -> RefreshBatch {
        if self.is_closed() {
            return RefreshBatch { generation: self.generation(), handles: Vec::new() };
        }

        let mut handles = Vec::new();
        let generation = {
            let g = self.inner.generation.read();
            for id in self.detailed_ids() {
                if self.inner.prices.contains_key(&id) {
                    continue;
                }
                // Claim the flag here so a second call can't double-trigger.
                if self.claim_idle(&id, *g) {
                    handles.push(id);
                }
            }
            *g
        };

        if !handles.is_empty() {
            debug!(cars = handles.len(), "auto-fetching prices");
        }
        let handles = handles
            .into_iter()
            .map(|id| self.spawn_fetch(id, generation))
            .collect();
        RefreshBatch { generation, handles }
    }

    /// Re-sample every detailed car that isn't already loading, replacing
    /// cached values as results arrive. Nothing is invalidated first.
    pub fn refresh_in_place(&self) -> RefreshBatch {
        if self.is_closed() {
            return RefreshBatch { generation: self.generation(), handles: Vec::new() };
        }

        let (generation, ids) = {
            let g = self.inner.generation.read();
            let ids: Vec<String> = self
                .detailed_ids()
                .into_iter()
                .filter(|id| self.claim_idle(id, *g))
                .collect();
            (*g, ids)
        };
        let handles = ids
            .into_iter()
            .map(|id| self.spawn_fetch(id, generation))
            .collect();
        RefreshBatch { generation, handles }
    }

    /// Drop one car's price and loading state.
    pub fn forget(&self, car_id: &str) {
        self.inner.prices.remove(car_id);
        self.inner.loading.remove(car_id);
    }

    /// Tracked cars in insertion order with what the price column shows.
    pub fn rows(&self) -> Vec<TrackedRow> {
        let snap = self.inner.store.snapshot();
        snap.tracked
            .iter()
            .map(|tc| {
                let price = if self.is_loading(&tc.car_id) {
                    PriceDisplay::Loading
                } else {
                    match self.inner.prices.get(&tc.car_id) {
                        Some(p) => PriceDisplay::Price(p.current_price),
                        None => PriceDisplay::Unavailable,
                    }
                };
                TrackedRow {
                    car_id: tc.car_id.clone(),
                    details: snap.details.get(&tc.car_id).cloned(),
                    price,
                }
            })
            .collect()
    }

    /// End the session. In-flight fetches stop writing; both maps are cleared.
    pub fn close(&self) {
        self.inner.guard.end();
        let _g = self.inner.generation.write();
        self.inner.prices.clear();
        self.inner.loading.clear();
        info!("price session closed");
    }
}

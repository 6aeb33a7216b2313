// src/report.rs
use tracing::info;

use crate::refresh::TrackedRow;
use crate::state::CatalogEntry;

pub fn log_catalog(entries: &[CatalogEntry]) {
    if entries.is_empty() {
        info!("no cars available to track currently");
        return;
    }
    for e in entries {
        info!(
            car_id = %e.car.id,
            car = %e.car.label(),
            base_price = e.car.base_price,
            tracking = e.is_tracked,
            "catalog"
        );
    }
}

pub fn log_tracked(rows: &[TrackedRow]) {
    if rows.is_empty() {
        info!("you are not tracking any cars yet");
        return;
    }
    for row in rows {
        // Rows whose details haven't arrived yet are not shown.
        let Some(car) = row.details.as_ref() else { continue; };
        info!(
            car_id = %row.car_id,
            car = %car.label(),
            current_price = %row.price,
            "tracked"
        );
    }
}

mod catalog;
mod configuration;
mod error;
mod reservation;
mod resolver;
mod suggestion;
mod tier;
#[cfg(test)]
mod tests;

pub use catalog::bookable_dates;
pub use configuration::Confirmation;
pub use error::{EngineError, StaleSlotWarning};
pub use reservation::{Booking, BookingRequest, ReconcileReport};
pub use resolver::{general_choices, service_choices};
pub use suggestion::earliest;

use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::ServiceId;
use crate::store::{AvailabilityStore, StoreError};

use tier::TierEntry;

/// Availability resolution and reservation over one shared store.
///
/// Holds no per-session state: service, date and "today" are parameters of
/// every call, so one instance serves any number of concurrent sessions.
pub struct Engine<S> {
    store: S,
    tiers: DashMap<ServiceId, TierEntry>,
    /// Serialises multi-step read-then-write sequences touching one date.
    day_locks: DashMap<NaiveDate, Arc<Mutex<()>>>,
}

impl<S: AvailabilityStore> Engine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            tiers: DashMap::new(),
            day_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub(super) async fn lock_day(&self, date: NaiveDate) -> OwnedMutexGuard<()> {
        let lock = self.day_locks.entry(date).or_default().value().clone();
        lock.lock_owned().await
    }

    /// Drop the locks of dates before `before` that nobody holds or waits on.
    /// Returns how many were dropped.
    pub fn prune_day_locks(&self, before: NaiveDate) -> usize {
        let len = self.day_locks.len();
        self.day_locks
            .retain(|date, lock| *date >= before || Arc::strong_count(lock) > 1);
        len.saturating_sub(self.day_locks.len())
    }

    pub fn day_lock_count(&self) -> usize {
        self.day_locks.len()
    }
}

/// The caller's local calendar date.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// A row that vanished needs no restoring.
fn ignore_missing<T>(result: Result<T, StoreError>) -> Result<(), StoreError> {
    match result {
        Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

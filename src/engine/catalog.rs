use chrono::NaiveDate;
use tracing::warn;

use crate::model::{ServiceId, Tier};
use crate::store::{AvailabilityStore, ServiceSlotQuery};

use super::{Engine, EngineError};

/// Ascending, deduplicated, and never before `today`.
pub fn bookable_dates(mut dates: Vec<NaiveDate>, today: NaiveDate) -> Vec<NaiveDate> {
    dates.retain(|d| *d >= today);
    dates.sort_unstable();
    dates.dedup();
    dates
}

impl<S: AvailabilityStore> Engine<S> {
    /// Dates a client may pick for `service_id`, from `today` on.
    ///
    /// A configured service lists the days where it has at least one open
    /// row. Otherwise every registered day is listed, even if all of its
    /// general times are taken; the per-day check belongs to `slots_for`.
    /// Store failures yield an empty catalog.
    pub async fn dates_for(&self, service_id: ServiceId, today: NaiveDate) -> Vec<NaiveDate> {
        match self.try_dates_for(service_id, today).await {
            Ok(dates) => dates,
            Err(e) => {
                warn!(%service_id, "date catalog unavailable: {e}");
                metrics::counter!(crate::observability::DEGRADED_READS_TOTAL, "op" => "dates_for").increment(1);
                Vec::new()
            }
        }
    }

    async fn try_dates_for(&self, service_id: ServiceId, today: NaiveDate) -> Result<Vec<NaiveDate>, EngineError> {
        let dates = match self.tier(service_id).await? {
            Tier::ServiceSpecific => self
                .store
                .list_service_slots(&ServiceSlotQuery::for_service(service_id).available().from(today))
                .await?
                .into_iter()
                .map(|slot| slot.date)
                .collect(),
            Tier::General => self
                .store
                .list_date_records()
                .await?
                .into_iter()
                .map(|record| record.date)
                .collect(),
        };
        Ok(bookable_dates(dates, today))
    }
}

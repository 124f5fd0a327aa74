use std::collections::HashSet;
use std::time::Instant;

use chrono::{NaiveDate, NaiveTime};
use tracing::warn;

use crate::model::*;
use crate::store::{AvailabilityStore, ServiceSlotQuery};

use super::{Engine, EngineError};

// ── Resolution rules ──────────────────────────────────────────────

/// Service tier: the service's own open rows, by time. Closed rows are never offered.
pub fn service_choices(rows: &[ServiceSlot]) -> Vec<SlotChoice> {
    let mut choices: Vec<SlotChoice> = rows
        .iter()
        .filter(|s| s.available)
        .map(|s| SlotChoice {
            time: s.time,
            available: true,
        })
        .collect();
    choices.sort_by_key(|c| c.time);
    choices.dedup_by_key(|c| c.time);
    choices
}

/// General tier: open general rows minus every time any service claimed on
/// that day. The exclusion is keyed by time alone, not by who asks.
pub fn general_choices(rows: &[GeneralSlot], claimed: &[NaiveTime]) -> Vec<SlotChoice> {
    let claimed: HashSet<NaiveTime> = claimed.iter().copied().collect();
    let mut choices: Vec<SlotChoice> = rows
        .iter()
        .filter(|s| s.available && !claimed.contains(&s.time))
        .map(|s| SlotChoice {
            time: s.time,
            available: true,
        })
        .collect();
    choices.sort_by_key(|c| c.time);
    choices.dedup_by_key(|c| c.time);
    choices
}

impl<S: AvailabilityStore> Engine<S> {
    /// Open times for `service_id` on `date`, ascending.
    ///
    /// Empty when the date is not registered, when the governing tier has no
    /// open rows that day, or when the store fails.
    pub async fn slots_for(&self, service_id: ServiceId, date: NaiveDate) -> Vec<SlotChoice> {
        let start = Instant::now();
        let result = self.try_slots_for(service_id, date).await;
        metrics::histogram!(crate::observability::RESOLVE_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
        match result {
            Ok(choices) => choices,
            Err(e) => {
                warn!(%service_id, %date, "slot resolution unavailable: {e}");
                metrics::counter!(crate::observability::DEGRADED_READS_TOTAL, "op" => "slots_for").increment(1);
                Vec::new()
            }
        }
    }

    async fn try_slots_for(&self, service_id: ServiceId, date: NaiveDate) -> Result<Vec<SlotChoice>, EngineError> {
        let Some(record) = self.store.find_date_record(date).await? else {
            return Ok(Vec::new());
        };

        match self.tier(service_id).await? {
            Tier::ServiceSpecific => {
                let rows = self
                    .store
                    .list_service_slots(&ServiceSlotQuery::for_service(service_id).on_day(record.id).available())
                    .await?;
                Ok(service_choices(&rows))
            }
            Tier::General => {
                let general = self.store.list_general_slots(record.id, true).await?;
                let claimed: Vec<NaiveTime> = self
                    .store
                    .list_service_slots(&ServiceSlotQuery::for_day(record.id))
                    .await?
                    .iter()
                    .map(|s| s.time)
                    .collect();
                Ok(general_choices(&general, &claimed))
            }
        }
    }
}

use chrono::{NaiveDate, NaiveTime};
use tracing::warn;

use crate::limits::SUGGESTION_SCAN_CAP;
use crate::model::*;
use crate::store::{AvailabilityStore, ServiceSlotQuery};

use super::Engine;

/// Earliest open row from `today` on, ordered by (date, time).
pub fn earliest(rows: &[ServiceSlot], today: NaiveDate) -> Option<(NaiveDate, NaiveTime)> {
    rows.iter()
        .filter(|s| s.available && s.date >= today)
        .map(|s| (s.date, s.time))
        .min()
}

impl<S: AvailabilityStore> Engine<S> {
    /// Hint for a configured service: its earliest open slot.
    ///
    /// Scans at most `SUGGESTION_SCAN_CAP` rows, so with more rows than that
    /// the answer is best effort. It only drives a hint, never a booking.
    pub async fn suggest(&self, service_id: ServiceId, today: NaiveDate) -> Suggestion {
        match self.tier(service_id).await {
            Ok(Tier::ServiceSpecific) => {}
            Ok(Tier::General) => return Suggestion::NotConfigured,
            Err(e) => {
                warn!(%service_id, "suggestion skipped, tier unknown: {e}");
                return Suggestion::NotConfigured;
            }
        }

        let query = ServiceSlotQuery::for_service(service_id)
            .available()
            .from(today)
            .limit(SUGGESTION_SCAN_CAP);
        let rows = match self.store.list_service_slots(&query).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(%service_id, "suggestion scan failed: {e}");
                metrics::counter!(crate::observability::DEGRADED_READS_TOTAL, "op" => "suggest").increment(1);
                return Suggestion::PickADate;
            }
        };

        match earliest(&rows, today) {
            Some((date, time)) => Suggestion::Earliest { date, time },
            None => Suggestion::PickADate,
        }
    }
}

use chrono::{NaiveDate, NaiveTime};
use tracing::info;

use crate::model::*;
use crate::observability::CONFIG_CHANGES_TOTAL;
use crate::store::{AppointmentFilter, AvailabilityStore, ServiceSlotQuery, StoreError};

use super::{Engine, EngineError, ignore_missing};

/// Explicit acknowledgement for destructive configuration changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Unconfirmed,
}

impl<S: AvailabilityStore> Engine<S> {
    /// Give `service_id` its own slot at (date, time). The general row at that
    /// time, if any, is removed so the time is never offered twice.
    pub async fn add_service_slot(
        &self,
        service_id: ServiceId,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<ServiceSlot, EngineError> {
        let _day = self.lock_day(date).await;
        let record = self.store.upsert_date_record(date).await?;
        let slot = match self.store.insert_service_slot(service_id, record.id, time).await {
            Ok(slot) => slot,
            Err(StoreError::Conflict(_)) => return Err(EngineError::DuplicateSlot { date, time }),
            Err(e) => return Err(e.into()),
        };
        self.set_cached_tier(service_id, Some(Tier::ServiceSpecific));

        let general = self
            .store
            .list_general_slots(record.id, false)
            .await?
            .into_iter()
            .find(|g| g.time == time);
        if let Some(general) = general {
            ignore_missing(self.store.delete_general_slot(general.id).await)?;
        }

        metrics::counter!(CONFIG_CHANGES_TOTAL, "op" => "add_service_slot").increment(1);
        info!(%service_id, %date, time = %time.format("%H:%M"), "service slot added");
        Ok(slot)
    }

    /// Remove a service slot, releasing whoever booked it. The time goes back
    /// to the general tier.
    pub async fn remove_service_slot(
        &self,
        service_id: ServiceId,
        date: NaiveDate,
        time: NaiveTime,
        confirmation: Confirmation,
    ) -> Result<(), EngineError> {
        if confirmation != Confirmation::Confirmed {
            return Err(EngineError::ConfirmationRequired);
        }
        let _day = self.lock_day(date).await;
        let (record, slot) = self.find_service_slot(service_id, date, time).await?;

        let holders = self
            .store
            .list_appointments(&AppointmentFilter {
                service_id: Some(service_id),
                date: Some(date),
                time: Some(time),
                active_only: true,
                ..AppointmentFilter::default()
            })
            .await?;
        for appointment in &holders {
            self.release_locked(appointment).await?;
        }

        ignore_missing(self.store.delete_service_slot(slot.id).await)?;
        self.restore_general(date, record.id, time).await?;
        self.set_cached_tier(service_id, None);

        metrics::counter!(CONFIG_CHANGES_TOTAL, "op" => "remove_service_slot").increment(1);
        info!(
            %service_id,
            %date,
            time = %time.format("%H:%M"),
            released = holders.len(),
            "service slot removed"
        );
        Ok(())
    }

    /// Flip the flag of one service slot and return the new value. The
    /// general tier is left alone.
    pub async fn toggle_service_slot(
        &self,
        service_id: ServiceId,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<bool, EngineError> {
        let _day = self.lock_day(date).await;
        let (_, slot) = self.find_service_slot(service_id, date, time).await?;
        let next = !slot.available;
        if !self
            .store
            .set_service_slot_available(slot.id, next, Some(slot.available))
            .await?
        {
            return Err(StoreError::Conflict("slot flag changed concurrently").into());
        }

        metrics::counter!(CONFIG_CHANGES_TOTAL, "op" => "toggle_service_slot").increment(1);
        info!(%service_id, %date, time = %time.format("%H:%M"), available = next, "service slot toggled");
        Ok(next)
    }

    pub async fn add_general_slot(&self, date: NaiveDate, time: NaiveTime) -> Result<GeneralSlot, EngineError> {
        let _day = self.lock_day(date).await;
        let record = self.store.upsert_date_record(date).await?;
        let slot = match self.store.insert_general_slot(record.id, time).await {
            Ok(slot) => slot,
            Err(StoreError::Conflict(_)) => return Err(EngineError::DuplicateSlot { date, time }),
            Err(e) => return Err(e.into()),
        };
        metrics::counter!(CONFIG_CHANGES_TOTAL, "op" => "add_general_slot").increment(1);
        info!(%date, time = %time.format("%H:%M"), "general slot added");
        Ok(slot)
    }

    pub async fn remove_general_slot(&self, date: NaiveDate, time: NaiveTime) -> Result<(), EngineError> {
        let _day = self.lock_day(date).await;
        let unknown = EngineError::UnknownSlot { date, time };
        let Some(record) = self.store.find_date_record(date).await? else {
            return Err(unknown);
        };
        let Some(slot) = self
            .store
            .list_general_slots(record.id, false)
            .await?
            .into_iter()
            .find(|g| g.time == time)
        else {
            return Err(unknown);
        };
        match self.store.delete_general_slot(slot.id).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => return Err(unknown),
            Err(e) => return Err(e.into()),
        }
        metrics::counter!(CONFIG_CHANGES_TOTAL, "op" => "remove_general_slot").increment(1);
        info!(%date, time = %time.format("%H:%M"), "general slot removed");
        Ok(())
    }

    async fn find_service_slot(
        &self,
        service_id: ServiceId,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<(DateRecord, ServiceSlot), EngineError> {
        let unknown = EngineError::UnknownSlot { date, time };
        let Some(record) = self.store.find_date_record(date).await? else {
            return Err(unknown);
        };
        let slot = self
            .store
            .list_service_slots(&ServiceSlotQuery::for_service(service_id).on_day(record.id))
            .await?
            .into_iter()
            .find(|s| s.time == time)
            .ok_or(unknown)?;
        Ok((record, slot))
    }
}

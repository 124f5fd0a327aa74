use std::time::Instant;

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::limits::{MAX_CLIENT_NAME_LEN, MAX_RECONCILE_BATCH};
use crate::model::*;
use crate::observability;
use crate::store::{AppointmentFilter, AvailabilityStore, ServiceSlotQuery, StoreError};

use super::{Engine, EngineError, StaleSlotWarning, ignore_missing};

/// A booking form as submitted. Fields are optional so that an incomplete
/// form is representable and rejected with the name of the missing field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingRequest {
    pub client_name: Option<String>,
    pub service: Option<ServiceId>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

impl BookingRequest {
    pub fn new(client_name: impl Into<String>, service: ServiceId, date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            client_name: Some(client_name.into()),
            service: Some(service),
            date: Some(date),
            time: Some(time),
        }
    }

    pub fn validate(self) -> Result<NewAppointment, EngineError> {
        let client_name = self
            .client_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty() && n.chars().count() <= MAX_CLIENT_NAME_LEN)
            .ok_or(EngineError::Validation("client_name"))?;
        Ok(NewAppointment {
            client_name,
            service_id: self.service.ok_or(EngineError::Validation("service"))?,
            date: self.date.ok_or(EngineError::Validation("date"))?,
            time: self.time.ok_or(EngineError::Validation("time"))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub appointment: Appointment,
    /// Set when no slot row existed to flip; the appointment stands regardless.
    pub warning: Option<StaleSlotWarning>,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub examined: usize,
    pub repaired: usize,
    pub still_stale: usize,
}

enum ClaimOutcome {
    Held(SlotRef),
    /// The slot row exists but was already unavailable.
    Refused,
    /// Neither tier has a row at the appointment's time.
    Missing,
}

enum Reconciled {
    Repaired,
    StillStale,
    /// Settled by someone else since the batch was listed.
    Skipped,
}

impl<S: AvailabilityStore> Engine<S> {
    // ── Booking ──────────────────────────────────────────────────

    /// Write the appointment, then claim its slot.
    ///
    /// A refused claim cancels the appointment again and reports `SlotTaken`.
    /// A missing slot row keeps the appointment as `Stale` with a warning.
    pub async fn book(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        let start = Instant::now();
        let result = self.try_book(request).await;
        metrics::histogram!(observability::BOOKING_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
        let outcome = match &result {
            Ok(booking) if booking.warning.is_some() => "stale",
            Ok(_) => "ok",
            Err(e) => observability::error_label(e),
        };
        metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn try_book(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        let new = request.validate()?;
        let (date, time) = (new.date, new.time);
        let _day = self.lock_day(date).await;

        let appointment = match self.store.insert_appointment(new).await {
            Ok(a) => a,
            Err(StoreError::Conflict(_)) => return Err(EngineError::SlotTaken { date, time }),
            Err(e) => return Err(e.into()),
        };

        let outcome = match self.claim_for(&appointment).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(appointment_id = %appointment.id, "slot claim failed: {e}");
                self.abandon(&appointment).await;
                return Err(e.into());
            }
        };

        match outcome {
            ClaimOutcome::Held(slot) => {
                let appointment = Appointment {
                    claim: SlotClaim::Held(slot),
                    ..appointment
                };
                info!(
                    appointment_id = %appointment.id,
                    service_id = %appointment.service_id,
                    %date,
                    time = %time.format("%H:%M"),
                    tier = ?slot.tier(),
                    "booked"
                );
                Ok(Booking {
                    appointment,
                    warning: None,
                })
            }
            ClaimOutcome::Refused => {
                self.abandon(&appointment).await;
                debug!(%date, time = %time.format("%H:%M"), "slot already unavailable");
                Err(EngineError::SlotTaken { date, time })
            }
            ClaimOutcome::Missing => {
                let appointment = match self.store.set_appointment_claim(appointment.id, SlotClaim::Stale).await {
                    Ok(a) => a,
                    Err(e) => {
                        warn!(appointment_id = %appointment.id, "could not mark appointment stale: {e}");
                        appointment
                    }
                };
                let warning = StaleSlotWarning {
                    appointment_id: appointment.id,
                    service_id: appointment.service_id,
                    date,
                    time,
                };
                warn!("{warning}");
                metrics::counter!(observability::STALE_SLOTS_TOTAL).increment(1);
                Ok(Booking {
                    appointment,
                    warning: Some(warning),
                })
            }
        }
    }

    /// Find the row governing the appointment's time and claim it for the
    /// appointment. The service's own row wins over the general one.
    async fn claim_for(&self, appointment: &Appointment) -> Result<ClaimOutcome, StoreError> {
        let Some(record) = self.store.find_date_record(appointment.date).await? else {
            return Ok(ClaimOutcome::Missing);
        };

        let own = self
            .store
            .list_service_slots(&ServiceSlotQuery::for_service(appointment.service_id).on_day(record.id))
            .await?
            .into_iter()
            .find(|s| s.time == appointment.time);
        let slot = match own {
            Some(s) => SlotRef::Service {
                id: s.id,
                date_record_id: record.id,
            },
            None => {
                let general = self
                    .store
                    .list_general_slots(record.id, false)
                    .await?
                    .into_iter()
                    .find(|g| g.time == appointment.time);
                match general {
                    Some(g) => SlotRef::General {
                        id: g.id,
                        date_record_id: record.id,
                    },
                    None => return Ok(ClaimOutcome::Missing),
                }
            }
        };

        match self.store.claim_slot(appointment.id, slot).await {
            Ok(true) => Ok(ClaimOutcome::Held(slot)),
            Ok(false) => Ok(ClaimOutcome::Refused),
            // Row deleted between lookup and claim.
            Err(StoreError::NotFound(id)) if id == slot.id() => Ok(ClaimOutcome::Missing),
            Err(e) => Err(e),
        }
    }

    /// Compensation for an appointment whose slot could not be claimed.
    async fn abandon(&self, appointment: &Appointment) {
        if let Err(e) = self
            .store
            .set_appointment_status(appointment.id, AppointmentStatus::Cancelled)
            .await
        {
            error!(appointment_id = %appointment.id, "compensating cancel failed: {e}");
        }
    }

    // ── Cancellation ─────────────────────────────────────────────

    /// Administrative release: cancels the appointment and hands its time
    /// back to the general tier when it held a service-specific row.
    /// Releasing a cancelled or completed appointment is a no-op.
    pub async fn release(&self, appointment_id: Ulid) -> Result<(), EngineError> {
        let Some(appointment) = self.active_appointment(appointment_id).await? else {
            return Ok(());
        };
        let _day = self.lock_day(appointment.date).await;
        // Re-read under the day lock: a concurrent release may have won.
        let Some(appointment) = self.active_appointment(appointment_id).await? else {
            return Ok(());
        };
        self.release_locked(&appointment).await
    }

    /// Caller holds the day lock.
    pub(super) async fn release_locked(&self, appointment: &Appointment) -> Result<(), EngineError> {
        self.store
            .set_appointment_status(appointment.id, AppointmentStatus::Cancelled)
            .await?;

        match appointment.claim {
            SlotClaim::Held(SlotRef::Service { id, date_record_id }) => {
                ignore_missing(self.store.delete_service_slot(id).await)?;
                self.set_cached_tier(appointment.service_id, None);
                self.restore_general(appointment.date, date_record_id, appointment.time)
                    .await?;
            }
            SlotClaim::Held(SlotRef::General { id, .. }) => {
                ignore_missing(self.store.set_general_slot_available(id, true, None).await)?;
            }
            SlotClaim::Pending | SlotClaim::Stale => {}
        }

        metrics::counter!(observability::RELEASES_TOTAL, "kind" => "release").increment(1);
        info!(appointment_id = %appointment.id, claim = ?appointment.claim, "appointment released");
        Ok(())
    }

    /// Client cancellation: the held row becomes available again in its own tier.
    pub async fn cancel(&self, appointment_id: Ulid) -> Result<(), EngineError> {
        let Some(appointment) = self.active_appointment(appointment_id).await? else {
            return Ok(());
        };
        let _day = self.lock_day(appointment.date).await;
        let Some(appointment) = self.active_appointment(appointment_id).await? else {
            return Ok(());
        };

        self.store
            .set_appointment_status(appointment.id, AppointmentStatus::Cancelled)
            .await?;
        if let SlotClaim::Held(slot) = appointment.claim {
            let reopened = match slot {
                SlotRef::Service { id, .. } => self.store.set_service_slot_available(id, true, None).await,
                SlotRef::General { id, .. } => self.store.set_general_slot_available(id, true, None).await,
            };
            ignore_missing(reopened)?;
        }

        metrics::counter!(observability::RELEASES_TOTAL, "kind" => "cancel").increment(1);
        info!(%appointment_id, "appointment cancelled");
        Ok(())
    }

    /// `None` for terminal appointments, `NotFound` for unknown ids.
    async fn active_appointment(&self, id: Ulid) -> Result<Option<Appointment>, EngineError> {
        let appointment = self.store.get_appointment(id).await?.ok_or(EngineError::NotFound(id))?;
        Ok(appointment.status.is_active().then_some(appointment))
    }

    /// Put a general row back at (day, time) unless one is already there.
    ///
    /// An active appointment may still hold a general row at that time that
    /// was deleted by `add_service_slot`. The fresh row is claimed for it so
    /// the time is not offered a second time.
    pub(super) async fn restore_general(
        &self,
        date: NaiveDate,
        date_record_id: Ulid,
        time: NaiveTime,
    ) -> Result<(), StoreError> {
        let exists = self
            .store
            .list_general_slots(date_record_id, false)
            .await?
            .iter()
            .any(|g| g.time == time);
        if exists {
            return Ok(());
        }
        let slot = match self.store.insert_general_slot(date_record_id, time).await {
            Ok(slot) => slot,
            Err(StoreError::Conflict(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let holder = self
            .store
            .list_appointments(&AppointmentFilter {
                date: Some(date),
                time: Some(time),
                active_only: true,
                ..AppointmentFilter::default()
            })
            .await?
            .into_iter()
            .find(|a| matches!(a.claim, SlotClaim::Held(SlotRef::General { .. })));
        if let Some(holder) = holder {
            let slot = SlotRef::General {
                id: slot.id,
                date_record_id,
            };
            if self.store.claim_slot(holder.id, slot).await? {
                debug!(appointment_id = %holder.id, "restored general slot re-linked to its holder");
            } else {
                warn!(appointment_id = %holder.id, "restored general slot already unavailable");
            }
        }
        Ok(())
    }

    // ── Status transitions ───────────────────────────────────────

    pub async fn confirm(&self, appointment_id: Ulid) -> Result<Appointment, EngineError> {
        self.transition(appointment_id, AppointmentStatus::Confirmed, |from| {
            from == AppointmentStatus::Pending
        })
        .await
    }

    pub async fn complete(&self, appointment_id: Ulid) -> Result<Appointment, EngineError> {
        self.transition(appointment_id, AppointmentStatus::Completed, AppointmentStatus::is_active)
            .await
    }

    async fn transition(
        &self,
        id: Ulid,
        to: AppointmentStatus,
        allowed: impl Fn(AppointmentStatus) -> bool,
    ) -> Result<Appointment, EngineError> {
        let date = self.store.get_appointment(id).await?.ok_or(EngineError::NotFound(id))?.date;
        let _day = self.lock_day(date).await;
        let current = self.store.get_appointment(id).await?.ok_or(EngineError::NotFound(id))?;
        if !allowed(current.status) {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to,
            });
        }
        let updated = self.store.set_appointment_status(id, to).await?;
        debug!(appointment_id = %id, from = %current.status, %to, "status changed");
        Ok(updated)
    }

    // ── Reconciliation ───────────────────────────────────────────

    /// Retry the slot claim of every active appointment that holds none.
    pub async fn reconcile_stale(&self) -> Result<ReconcileReport, EngineError> {
        let filter = AppointmentFilter {
            active_only: true,
            unclaimed_only: true,
            limit: Some(MAX_RECONCILE_BATCH),
            ..AppointmentFilter::default()
        };
        let pending = self.store.list_appointments(&filter).await?;

        let results = futures::future::join_all(pending.iter().map(|a| self.reconcile_one(a))).await;

        let mut report = ReconcileReport {
            examined: pending.len(),
            ..ReconcileReport::default()
        };
        for (appointment, result) in pending.iter().zip(results) {
            match result {
                Ok(Reconciled::Repaired) => report.repaired += 1,
                Ok(Reconciled::StillStale) => report.still_stale += 1,
                Ok(Reconciled::Skipped) => {}
                Err(e) => {
                    warn!(appointment_id = %appointment.id, "reconcile failed: {e}");
                    report.still_stale += 1;
                }
            }
        }
        if report.repaired > 0 {
            metrics::counter!(observability::RECONCILED_TOTAL).increment(report.repaired as u64);
        }
        Ok(report)
    }

    async fn reconcile_one(&self, listed: &Appointment) -> Result<Reconciled, EngineError> {
        let _day = self.lock_day(listed.date).await;
        let Some(appointment) = self.store.get_appointment(listed.id).await? else {
            return Ok(Reconciled::Skipped);
        };
        if !appointment.status.is_active() || matches!(appointment.claim, SlotClaim::Held(_)) {
            return Ok(Reconciled::Skipped);
        }

        match self.claim_for(&appointment).await? {
            ClaimOutcome::Held(slot) => {
                info!(appointment_id = %appointment.id, tier = ?slot.tier(), "stale appointment repaired");
                Ok(Reconciled::Repaired)
            }
            ClaimOutcome::Refused | ClaimOutcome::Missing => {
                if appointment.claim != SlotClaim::Stale {
                    self.store.set_appointment_claim(appointment.id, SlotClaim::Stale).await?;
                }
                Ok(Reconciled::StillStale)
            }
        }
    }

    // ── Queries ──────────────────────────────────────────────────

    pub async fn appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.store.get_appointment(id).await?.ok_or(EngineError::NotFound(id))
    }

    /// Every appointment for the service on `date`, any status, by time.
    pub async fn appointments_for(&self, service_id: ServiceId, date: NaiveDate) -> Result<Vec<Appointment>, EngineError> {
        let filter = AppointmentFilter {
            service_id: Some(service_id),
            date: Some(date),
            ..AppointmentFilter::default()
        };
        Ok(self.store.list_appointments(&filter).await?)
    }
}

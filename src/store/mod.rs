//! Storage boundary of the engine.
//!
//! The engine never assumes a transaction spans more than one call. The two
//! guarantees it leans on for double-booking safety are pushed down here:
//! conditional flag updates (`expected`) and the atomic `claim_slot`, plus a
//! uniqueness rule on active appointments.

mod wal_store;

pub use wal_store::WalStore;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(Ulid),
    /// A uniqueness rule rejected the write.
    Conflict(&'static str),
    LimitExceeded(&'static str),
    Wal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::Conflict(what) => write!(f, "conflict: {what}"),
            StoreError::LimitExceeded(what) => write!(f, "limit exceeded: {what}"),
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter for service-specific rows. Everything unset matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSlotQuery {
    pub service_id: Option<ServiceId>,
    pub date_record_id: Option<Ulid>,
    pub available_only: bool,
    /// Inclusive lower bound on the row's date.
    pub from_date: Option<NaiveDate>,
    /// Cap applied in store order, before any caller-side sorting.
    pub limit: Option<usize>,
}

impl ServiceSlotQuery {
    pub fn for_service(service_id: ServiceId) -> Self {
        Self {
            service_id: Some(service_id),
            ..Self::default()
        }
    }

    /// Rows of every service on one day.
    pub fn for_day(date_record_id: Ulid) -> Self {
        Self {
            date_record_id: Some(date_record_id),
            ..Self::default()
        }
    }

    pub fn on_day(mut self, date_record_id: Ulid) -> Self {
        self.date_record_id = Some(date_record_id);
        self
    }

    pub fn available(mut self) -> Self {
        self.available_only = true;
        self
    }

    pub fn from(mut self, date: NaiveDate) -> Self {
        self.from_date = Some(date);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn matches(&self, slot: &ServiceSlot) -> bool {
        self.service_id.is_none_or(|s| s == slot.service_id)
            && self.date_record_id.is_none_or(|d| d == slot.date_record_id)
            && (!self.available_only || slot.available)
            && self.from_date.is_none_or(|d| slot.date >= d)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    pub service_id: Option<ServiceId>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub active_only: bool,
    /// Only appointments whose slot flip is still outstanding.
    pub unclaimed_only: bool,
    pub limit: Option<usize>,
}

impl AppointmentFilter {
    pub fn matches(&self, a: &Appointment) -> bool {
        self.service_id.is_none_or(|s| s == a.service_id)
            && self.date.is_none_or(|d| d == a.date)
            && self.time.is_none_or(|t| t == a.time)
            && (!self.active_only || a.status.is_active())
            && (!self.unclaimed_only || !matches!(a.claim, SlotClaim::Held(_)))
    }
}

#[async_trait]
pub trait AvailabilityStore: Send + Sync + 'static {
    async fn find_date_record(&self, date: NaiveDate) -> StoreResult<Option<DateRecord>>;

    async fn upsert_date_record(&self, date: NaiveDate) -> StoreResult<DateRecord>;

    /// All registered days, ascending by date.
    async fn list_date_records(&self) -> StoreResult<Vec<DateRecord>>;

    async fn list_service_slots(&self, query: &ServiceSlotQuery) -> StoreResult<Vec<ServiceSlot>>;

    async fn has_service_slots(&self, service_id: ServiceId) -> StoreResult<bool>;

    async fn list_general_slots(
        &self,
        date_record_id: Ulid,
        available_only: bool,
    ) -> StoreResult<Vec<GeneralSlot>>;

    /// `Conflict` if (service, day, time) already has a row.
    async fn insert_service_slot(
        &self,
        service_id: ServiceId,
        date_record_id: Ulid,
        time: NaiveTime,
    ) -> StoreResult<ServiceSlot>;

    async fn delete_service_slot(&self, id: Ulid) -> StoreResult<()>;

    /// Set the flag. With `expected`, only when the current flag equals it.
    /// Returns whether the write happened.
    async fn set_service_slot_available(
        &self,
        id: Ulid,
        available: bool,
        expected: Option<bool>,
    ) -> StoreResult<bool>;

    /// `Conflict` if (day, time) already has a row.
    async fn insert_general_slot(&self, date_record_id: Ulid, time: NaiveTime) -> StoreResult<GeneralSlot>;

    async fn delete_general_slot(&self, id: Ulid) -> StoreResult<()>;

    async fn set_general_slot_available(
        &self,
        id: Ulid,
        available: bool,
        expected: Option<bool>,
    ) -> StoreResult<bool>;

    /// Status `Pending`, claim `Pending`. `Conflict` while another active
    /// appointment holds the same (service, date, time).
    async fn insert_appointment(&self, new: NewAppointment) -> StoreResult<Appointment>;

    async fn get_appointment(&self, id: Ulid) -> StoreResult<Option<Appointment>>;

    async fn list_appointments(&self, filter: &AppointmentFilter) -> StoreResult<Vec<Appointment>>;

    async fn set_appointment_status(&self, id: Ulid, status: AppointmentStatus) -> StoreResult<Appointment>;

    async fn set_appointment_claim(&self, id: Ulid, claim: SlotClaim) -> StoreResult<Appointment>;

    /// Flip `slot` from available to unavailable and record it as the
    /// appointment's claim, all or nothing. `Ok(false)` if the slot was
    /// already unavailable.
    async fn claim_slot(&self, appointment_id: Ulid, slot: SlotRef) -> StoreResult<bool>;
}

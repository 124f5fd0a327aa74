use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Services live in an external catalog; the engine only needs their id.
pub type ServiceId = Ulid;

/// Which table governs a service's slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Date-scoped slots shared by every unconfigured service.
    General,
    /// The service has its own slot rows and never falls back.
    ServiceSpecific,
}

/// A registered bookable day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRecord {
    pub id: Ulid,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralSlot {
    pub id: Ulid,
    pub date_record_id: Ulid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSlot {
    pub id: Ulid,
    pub service_id: ServiceId,
    pub date_record_id: Ulid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// Pending and confirmed appointments occupy their slot.
    pub fn is_active(self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The exact slot row an appointment flipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotRef {
    Service { id: Ulid, date_record_id: Ulid },
    General { id: Ulid, date_record_id: Ulid },
}

impl SlotRef {
    pub fn id(&self) -> Ulid {
        match self {
            SlotRef::Service { id, .. } | SlotRef::General { id, .. } => *id,
        }
    }

    pub fn date_record_id(&self) -> Ulid {
        match self {
            SlotRef::Service { date_record_id, .. } | SlotRef::General { date_record_id, .. } => {
                *date_record_id
            }
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            SlotRef::Service { .. } => Tier::ServiceSpecific,
            SlotRef::General { .. } => Tier::General,
        }
    }
}

/// Reservation progress of an appointment: written first, slot flipped second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotClaim {
    /// Appointment written, slot flip not yet done.
    Pending,
    /// Holding this slot row (its flag is false on our behalf).
    Held(SlotRef),
    /// No slot row existed to flip when we tried.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub client_name: String,
    pub service_id: ServiceId,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    pub claim: SlotClaim,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub client_name: String,
    pub service_id: ServiceId,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    DateRecordCreated {
        id: Ulid,
        date: NaiveDate,
    },
    GeneralSlotInserted {
        id: Ulid,
        date_record_id: Ulid,
        time: NaiveTime,
        available: bool,
    },
    GeneralSlotDeleted {
        id: Ulid,
        date_record_id: Ulid,
    },
    GeneralSlotAvailabilitySet {
        id: Ulid,
        date_record_id: Ulid,
        available: bool,
    },
    ServiceSlotInserted {
        id: Ulid,
        service_id: ServiceId,
        date_record_id: Ulid,
        time: NaiveTime,
        available: bool,
    },
    ServiceSlotDeleted {
        id: Ulid,
        date_record_id: Ulid,
    },
    ServiceSlotAvailabilitySet {
        id: Ulid,
        date_record_id: Ulid,
        available: bool,
    },
    AppointmentCreated {
        id: Ulid,
        client_name: String,
        service_id: ServiceId,
        date: NaiveDate,
        time: NaiveTime,
        status: AppointmentStatus,
        claim: SlotClaim,
    },
    AppointmentStatusSet {
        id: Ulid,
        status: AppointmentStatus,
    },
    AppointmentClaimSet {
        id: Ulid,
        claim: SlotClaim,
    },
    /// Slot flag flipped to unavailable and the claim recorded, as one record.
    SlotClaimed {
        appointment_id: Ulid,
        slot: SlotRef,
    },
}

// ── Query result types ───────────────────────────────────────────

/// One offered time on a resolved day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotChoice {
    pub time: NaiveTime,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suggestion {
    /// Service is in the general tier; no hint.
    NotConfigured,
    /// Configured, but nothing bookable from today on.
    PickADate,
    Earliest { date: NaiveDate, time: NaiveTime },
}

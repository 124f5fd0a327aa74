use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::{AppointmentStatus, ServiceId};
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    /// A required booking field is missing or unusable.
    Validation(&'static str),
    DuplicateSlot {
        date: NaiveDate,
        time: NaiveTime,
    },
    /// Another booking holds the slot.
    SlotTaken {
        date: NaiveDate,
        time: NaiveTime,
    },
    /// No slot row at (date, time) for the operation to act on.
    UnknownSlot {
        date: NaiveDate,
        time: NaiveTime,
    },
    NotFound(Ulid),
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    /// Destructive configuration change attempted without confirmation.
    ConfirmationRequired,
    Storage(StoreError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(field) => write!(f, "missing or invalid field: {field}"),
            EngineError::DuplicateSlot { date, time } => {
                write!(f, "slot {date} {} already exists", time.format("%H:%M"))
            }
            EngineError::SlotTaken { date, time } => {
                write!(f, "slot {date} {} is already booked", time.format("%H:%M"))
            }
            EngineError::UnknownSlot { date, time } => {
                write!(f, "no slot at {date} {}", time.format("%H:%M"))
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "appointment cannot move from {from} to {to}")
            }
            EngineError::ConfirmationRequired => {
                write!(f, "removing a slot requires explicit confirmation")
            }
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Storage(e)
    }
}

/// A booking went through but no slot row existed to flip. The appointment is
/// kept and marked stale for the reconciler and the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleSlotWarning {
    pub appointment_id: Ulid,
    pub service_id: ServiceId,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl std::fmt::Display for StaleSlotWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "appointment {} booked at {} {} for service {} without a slot row to flip",
            self.appointment_id,
            self.date,
            self.time.format("%H:%M"),
            self.service_id
        )
    }
}

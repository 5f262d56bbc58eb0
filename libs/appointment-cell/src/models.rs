// libs/appointment-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Store collection holding appointment records.
pub const APPOINTMENTS: &str = "appointments";

/// A booked, time-bounded commitment against a doctor. Never structurally
/// deleted in the normal lifecycle; cancellation is a status change. The
/// interval is half-open `[start_time, end_time)` and scoped to a single
/// calendar date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub work_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// Requested service items; a set, stored in sorted order.
    pub services: BTreeSet<String>,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Booked,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// Only live bookings occupy a slot for conflict purposes.
    pub fn blocks_slot(&self) -> bool {
        matches!(self, AppointmentStatus::Booked)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Booked => write!(f, "booked"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub work_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub services: BTreeSet<String>,
}

/// Which party's timeline an overlap check runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Doctor,
    Patient,
}

impl ResourceKind {
    pub fn key_field(&self) -> &'static str {
        match self {
            ResourceKind::Doctor => "doctor_id",
            ResourceKind::Patient => "patient_id",
        }
    }
}

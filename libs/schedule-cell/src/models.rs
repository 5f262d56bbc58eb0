// libs/schedule-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

pub const SCHEDULES: &str = "schedules";
pub const CHANGE_REQUESTS: &str = "schedule_change_requests";

/// A doctor's declared availability window on one calendar date. Created,
/// updated and deleted only through an applied change request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub work_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Create => write!(f, "create"),
            ChangeKind::Update => write!(f, "update"),
            ChangeKind::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Applied,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Rejected | RequestStatus::Applied)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Approved => write!(f, "approved"),
            RequestStatus::Rejected => write!(f, "rejected"),
            RequestStatus::Applied => write!(f, "applied"),
        }
    }
}

/// Explicit set of doctor ids. Persists as a deduplicated list in sorted
/// order, so stored representations compare deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DoctorIdSet(BTreeSet<Uuid>);

impl DoctorIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id was already present.
    pub fn insert(&mut self, id: Uuid) -> bool {
        self.0.insert(id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.0.contains(&id)
    }

    pub fn is_subset(&self, other: &DoctorIdSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.0.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<Uuid> {
        self.0.iter().copied().collect()
    }
}

impl FromIterator<Uuid> for DoctorIdSet {
    fn from_iter<I: IntoIterator<Item = Uuid>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One doctor/time-window entry of a change request. A single-target
/// request is a one-item batch; `schedule_id` targets the existing window
/// for update/delete kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleChangeItem {
    pub doctor_id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub work_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// A proposed structural change to doctors' working schedules, gated by
/// unanimous approval of every affected doctor. Retained after it reaches a
/// terminal status for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleChangeRequest {
    pub id: Uuid,
    pub kind: ChangeKind,
    pub status: RequestStatus,
    pub items: Vec<ScheduleChangeItem>,
    pub affected_doctor_ids: DoctorIdSet,
    pub approved_doctor_ids: DoctorIdSet,
    pub reason: String,
    pub rejection_note: Option<String>,
    pub rejected_by: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

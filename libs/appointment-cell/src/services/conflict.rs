use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_models::SchedulingError;
use shared_store::{EntityStore, FieldFilter};

use crate::models::{Appointment, ResourceKind, APPOINTMENTS};

/// Half-open overlap test: `[s1, e1)` and `[s2, e2)` conflict iff
/// `s1 < e2 && s2 < e1`. Touching boundaries (`e1 == s2`) do not conflict.
pub fn intervals_overlap(s1: NaiveTime, e1: NaiveTime, s2: NaiveTime, e2: NaiveTime) -> bool {
    s1 < e2 && s2 < e1
}

pub fn ensure_valid_interval(start: NaiveTime, end: NaiveTime) -> Result<(), SchedulingError> {
    if end <= start {
        return Err(SchedulingError::Validation(format!(
            "end time {} must be after start time {}",
            end, start
        )));
    }
    Ok(())
}

/// Overlap detection for one party's appointments on one date. The same
/// routine serves doctor-keyed and patient-keyed checks, parameterized by
/// `ResourceKind`.
pub struct TimeSlotValidator {
    store: Arc<dyn EntityStore>,
}

impl TimeSlotValidator {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// True if any slot-blocking appointment of `resource_id` on
    /// `work_date` overlaps `[start, end)`. `exclude_id` lets an update
    /// ignore the record being replaced.
    pub async fn has_conflict(
        &self,
        resource: ResourceKind,
        resource_id: Uuid,
        work_date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        exclude_id: Option<Uuid>,
    ) -> Result<bool, SchedulingError> {
        ensure_valid_interval(start, end)?;
        debug!(
            "Checking conflicts for {} {} on {} from {} to {}",
            resource.key_field(),
            resource_id,
            work_date,
            start,
            end
        );

        let rows = self
            .store
            .find(
                APPOINTMENTS,
                &[
                    FieldFilter::eq(resource.key_field(), json!(resource_id)),
                    FieldFilter::eq("work_date", json!(work_date)),
                ],
            )
            .await
            .map_err(|e| SchedulingError::Store(e.to_string()))?;

        let appointments: Vec<Appointment> = rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| SchedulingError::Store(format!("Failed to parse appointments: {}", e)))?;

        Ok(appointments.iter().any(|apt| {
            exclude_id != Some(apt.id)
                && apt.status.blocks_slot()
                && intervals_overlap(start, end, apt.start_time, apt.end_time)
        }))
    }
}

use chrono::Utc;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use shared_models::SchedulingError;
use shared_store::{EntityStore, FieldFilter, WriteOp};
use shared_utils::LockRegistry;

use appointment_cell::{ensure_valid_interval, intervals_overlap, ResourceKind, TimeSlotValidator};

use crate::models::{
    ChangeKind, RequestStatus, Schedule, ScheduleChangeItem, ScheduleChangeRequest,
    CHANGE_REQUESTS, SCHEDULES,
};

/// Commits an approved change request into the canonical schedule store,
/// revalidating every item against current schedules and appointments at
/// commit time. The whole batch validates first and commits as one atomic
/// write set; a mid-batch failure leaves the store untouched. The request's
/// own transition to Applied rides in the same write set, so schedules can
/// never land without the status flip (or the other way round).
pub struct ScheduleApplier {
    store: Arc<dyn EntityStore>,
    validator: Arc<TimeSlotValidator>,
    /// Same registry as the appointment ledger: an apply can race a booking
    /// made after approval, so both sides exclude per doctor id.
    doctor_locks: Arc<LockRegistry>,
}

impl ScheduleApplier {
    pub fn new(
        store: Arc<dyn EntityStore>,
        validator: Arc<TimeSlotValidator>,
        doctor_locks: Arc<LockRegistry>,
    ) -> Self {
        Self {
            store,
            validator,
            doctor_locks,
        }
    }

    pub async fn apply(
        &self,
        request: &ScheduleChangeRequest,
    ) -> Result<ScheduleChangeRequest, SchedulingError> {
        if request.status != RequestStatus::Approved {
            return Err(SchedulingError::NotPending(request.status.to_string()));
        }
        debug!(
            "Applying {} request {} with {} items",
            request.kind,
            request.id,
            request.items.len()
        );

        let _guards = self
            .doctor_locks
            .acquire_many(request.items.iter().map(|item| item.doctor_id))
            .await
            .map_err(|_| SchedulingError::Busy("doctor timeline".to_string()))?;

        // Windows introduced earlier in this batch, and schedule ids the
        // batch replaces or removes; both feed the per-item revalidation.
        let mut staged: Vec<Schedule> = Vec::new();
        let mut displaced: BTreeSet<Uuid> = BTreeSet::new();
        let mut ops: Vec<WriteOp> = Vec::new();
        let now = Utc::now();

        for item in &request.items {
            match request.kind {
                ChangeKind::Create => {
                    ensure_valid_interval(item.start_time, item.end_time)?;
                    self.ensure_window_free(item, None, &staged, &displaced)
                        .await?;

                    let schedule = Schedule {
                        id: Uuid::new_v4(),
                        doctor_id: item.doctor_id,
                        work_date: item.work_date,
                        start_time: item.start_time,
                        end_time: item.end_time,
                        created_at: now,
                        updated_at: now,
                    };
                    ops.push(WriteOp::upsert(
                        SCHEDULES,
                        schedule.id,
                        serialize(&schedule)?,
                    ));
                    staged.push(schedule);
                }
                ChangeKind::Update => {
                    let schedule_id = target_schedule_id(item)?;
                    let mut schedule = self.load_schedule(schedule_id).await?;
                    if schedule.doctor_id != item.doctor_id {
                        return Err(SchedulingError::Validation(format!(
                            "schedule {} does not belong to doctor {}",
                            schedule_id, item.doctor_id
                        )));
                    }
                    ensure_valid_interval(item.start_time, item.end_time)?;
                    displaced.insert(schedule_id);
                    self.ensure_window_free(item, Some(schedule_id), &staged, &displaced)
                        .await?;

                    schedule.work_date = item.work_date;
                    schedule.start_time = item.start_time;
                    schedule.end_time = item.end_time;
                    schedule.updated_at = now;
                    ops.push(WriteOp::upsert(
                        SCHEDULES,
                        schedule.id,
                        serialize(&schedule)?,
                    ));
                    staged.push(schedule);
                }
                ChangeKind::Delete => {
                    let schedule_id = target_schedule_id(item)?;
                    let schedule = self.load_schedule(schedule_id).await?;
                    if schedule.doctor_id != item.doctor_id {
                        return Err(SchedulingError::Validation(format!(
                            "schedule {} does not belong to doctor {}",
                            schedule_id, item.doctor_id
                        )));
                    }

                    // Removing a window that still has live bookings would
                    // orphan them.
                    if self
                        .validator
                        .has_conflict(
                            ResourceKind::Doctor,
                            schedule.doctor_id,
                            schedule.work_date,
                            schedule.start_time,
                            schedule.end_time,
                            None,
                        )
                        .await?
                    {
                        return Err(SchedulingError::InUse(format!(
                            "schedule {} still has booked appointments",
                            schedule_id
                        )));
                    }

                    displaced.insert(schedule_id);
                    ops.push(WriteOp::delete(SCHEDULES, schedule_id));
                }
            }
        }

        let mut applied = request.clone();
        applied.status = RequestStatus::Applied;
        applied.processed_at = Some(now);
        applied.updated_at = now;
        ops.push(WriteOp::upsert(
            CHANGE_REQUESTS,
            applied.id,
            serialize(&applied)?,
        ));

        self.store
            .apply_batch(ops)
            .await
            .map_err(|e| SchedulingError::Store(e.to_string()))?;

        info!(
            "Applied {} schedule change items for request {}",
            applied.items.len(),
            applied.id
        );
        Ok(applied)
    }

    /// The proposed window must not overlap the doctor's remaining
    /// schedules, windows staged earlier in the batch, or any booked
    /// appointment (a booking made between approval and apply is a
    /// conflict, not something to silently absorb).
    async fn ensure_window_free(
        &self,
        item: &ScheduleChangeItem,
        exclude_schedule_id: Option<Uuid>,
        staged: &[Schedule],
        displaced: &BTreeSet<Uuid>,
    ) -> Result<(), SchedulingError> {
        let existing = self
            .schedules_for(item.doctor_id, item.work_date)
            .await?;

        for schedule in &existing {
            if Some(schedule.id) == exclude_schedule_id || displaced.contains(&schedule.id) {
                continue;
            }
            if intervals_overlap(
                item.start_time,
                item.end_time,
                schedule.start_time,
                schedule.end_time,
            ) {
                return Err(SchedulingError::Conflict(format!(
                    "proposed window {}-{} overlaps schedule {}",
                    item.start_time, item.end_time, schedule.id
                )));
            }
        }

        for schedule in staged {
            if schedule.doctor_id == item.doctor_id
                && schedule.work_date == item.work_date
                && intervals_overlap(
                    item.start_time,
                    item.end_time,
                    schedule.start_time,
                    schedule.end_time,
                )
            {
                return Err(SchedulingError::Conflict(format!(
                    "proposed window {}-{} overlaps another item in the same batch",
                    item.start_time, item.end_time
                )));
            }
        }

        if self
            .validator
            .has_conflict(
                ResourceKind::Doctor,
                item.doctor_id,
                item.work_date,
                item.start_time,
                item.end_time,
                None,
            )
            .await?
        {
            return Err(SchedulingError::Conflict(format!(
                "a booked appointment overlaps the proposed window {}-{}",
                item.start_time, item.end_time
            )));
        }

        Ok(())
    }

    async fn schedules_for(
        &self,
        doctor_id: Uuid,
        work_date: chrono::NaiveDate,
    ) -> Result<Vec<Schedule>, SchedulingError> {
        let rows = self
            .store
            .find(
                SCHEDULES,
                &[
                    FieldFilter::eq("doctor_id", json!(doctor_id)),
                    FieldFilter::eq("work_date", json!(work_date)),
                ],
            )
            .await
            .map_err(|e| SchedulingError::Store(e.to_string()))?;

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| SchedulingError::Store(format!("Failed to parse schedules: {}", e)))
    }

    async fn load_schedule(&self, schedule_id: Uuid) -> Result<Schedule, SchedulingError> {
        let row = self
            .store
            .get(SCHEDULES, schedule_id)
            .await
            .map_err(|e| SchedulingError::Store(e.to_string()))?
            .ok_or_else(|| SchedulingError::NotFound(format!("schedule {}", schedule_id)))?;

        serde_json::from_value(row)
            .map_err(|e| SchedulingError::Store(format!("Failed to parse schedule: {}", e)))
    }
}

fn target_schedule_id(item: &ScheduleChangeItem) -> Result<Uuid, SchedulingError> {
    item.schedule_id.ok_or_else(|| {
        SchedulingError::Validation(format!(
            "item for doctor {} is missing its target schedule id",
            item.doctor_id
        ))
    })
}

fn serialize<T: serde::Serialize>(record: &T) -> Result<serde_json::Value, SchedulingError> {
    serde_json::to_value(record)
        .map_err(|e| SchedulingError::Store(format!("Failed to serialize record: {}", e)))
}

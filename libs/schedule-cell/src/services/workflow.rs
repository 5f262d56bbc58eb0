use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::{Actor, NotificationDispatcher, SchedulingError, SchedulingEvent};
use shared_store::EntityStore;
use shared_utils::LockRegistry;

use appointment_cell::ensure_valid_interval;

use crate::models::{
    ChangeKind, DoctorIdSet, RequestStatus, ScheduleChangeItem, ScheduleChangeRequest,
    CHANGE_REQUESTS,
};
use crate::services::applier::ScheduleApplier;
use crate::services::approval::{aggregate_approvals, ApprovalOutcome};

/// Approval state machine for proposed schedule mutations.
///
/// Pending -> Approved (every affected doctor approved)
/// Pending -> Rejected (any single veto)
/// Approved -> Applied (committed by the applier)
///
/// Rejected and Applied are terminal; terminated requests are kept for
/// audit. Decisions on one request are serialized through a per-request
/// lock so the "last approver" transition is computed from a single
/// consistent view.
pub struct ScheduleChangeWorkflow {
    store: Arc<dyn EntityStore>,
    applier: Arc<ScheduleApplier>,
    request_locks: LockRegistry,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl ScheduleChangeWorkflow {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn EntityStore>,
        applier: Arc<ScheduleApplier>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            applier,
            request_locks: LockRegistry::new(config.lock_wait()),
            dispatcher,
        }
    }

    /// Open a change request. The creator is a staff actor and is not an
    /// approver; the affected set is the union of doctor ids across all
    /// items.
    pub async fn create(
        &self,
        kind: ChangeKind,
        items: Vec<ScheduleChangeItem>,
        reason: String,
        created_by: &Actor,
    ) -> Result<ScheduleChangeRequest, SchedulingError> {
        if !created_by.can_propose_schedule_changes() {
            return Err(SchedulingError::Validation(
                "only staff may propose schedule changes".to_string(),
            ));
        }
        if items.is_empty() {
            return Err(SchedulingError::Validation(
                "a change request needs at least one item".to_string(),
            ));
        }

        for item in &items {
            match kind {
                ChangeKind::Create => {
                    ensure_valid_interval(item.start_time, item.end_time)?;
                    if item.schedule_id.is_some() {
                        return Err(SchedulingError::Validation(
                            "create items must not reference an existing schedule".to_string(),
                        ));
                    }
                }
                ChangeKind::Update => {
                    ensure_valid_interval(item.start_time, item.end_time)?;
                    if item.schedule_id.is_none() {
                        return Err(SchedulingError::Validation(
                            "update items must reference the schedule being replaced".to_string(),
                        ));
                    }
                }
                ChangeKind::Delete => {
                    if item.schedule_id.is_none() {
                        return Err(SchedulingError::Validation(
                            "delete items must reference the schedule being removed".to_string(),
                        ));
                    }
                }
            }
        }

        let affected_doctor_ids: DoctorIdSet = items.iter().map(|item| item.doctor_id).collect();
        let now = Utc::now();
        let request = ScheduleChangeRequest {
            id: Uuid::new_v4(),
            kind,
            status: RequestStatus::Pending,
            items,
            affected_doctor_ids,
            approved_doctor_ids: DoctorIdSet::new(),
            reason,
            rejection_note: None,
            rejected_by: None,
            created_by: created_by.id,
            created_at: now,
            updated_at: now,
            processed_at: None,
        };
        self.persist(&request).await?;

        info!(
            "Schedule change request {} created ({} items, {} affected doctors)",
            request.id,
            request.items.len(),
            request.affected_doctor_ids.len()
        );
        self.dispatcher
            .dispatch(SchedulingEvent::ChangeRequestCreated {
                request_id: request.id,
                affected_doctor_ids: request.affected_doctor_ids.to_vec(),
            });

        Ok(request)
    }

    /// Record one affected doctor's approval. The request flips to Approved
    /// the moment the approved set equals the affected set.
    pub async fn approve(
        &self,
        request_id: Uuid,
        doctor_id: Uuid,
    ) -> Result<ScheduleChangeRequest, SchedulingError> {
        let _guard = self
            .request_locks
            .acquire(request_id)
            .await
            .map_err(|_| SchedulingError::Busy("change request".to_string()))?;

        let mut request = self.load(request_id).await?;
        if request.status != RequestStatus::Pending {
            return Err(SchedulingError::NotPending(request.status.to_string()));
        }
        if !request.affected_doctor_ids.contains(doctor_id) {
            return Err(SchedulingError::Validation(format!(
                "doctor {} is not affected by request {}",
                doctor_id, request_id
            )));
        }
        if request.approved_doctor_ids.contains(doctor_id) {
            return Err(SchedulingError::AlreadyDecided(doctor_id));
        }

        request.approved_doctor_ids.insert(doctor_id);
        debug!(
            "Doctor {} approved request {} ({}/{})",
            doctor_id,
            request_id,
            request.approved_doctor_ids.len(),
            request.affected_doctor_ids.len()
        );

        let fully_approved = aggregate_approvals(
            &request.affected_doctor_ids,
            &request.approved_doctor_ids,
        ) == ApprovalOutcome::Approved;
        if fully_approved {
            request.status = RequestStatus::Approved;
        }
        request.updated_at = Utc::now();
        self.persist(&request).await?;

        if fully_approved {
            info!("Schedule change request {} fully approved", request_id);
            self.dispatcher
                .dispatch(SchedulingEvent::ChangeRequestApproved { request_id });
        }

        Ok(request)
    }

    /// A single veto is decisive: the request transitions to Rejected
    /// regardless of how many approvals were already recorded.
    pub async fn reject(
        &self,
        request_id: Uuid,
        doctor_id: Uuid,
        note: String,
    ) -> Result<ScheduleChangeRequest, SchedulingError> {
        let _guard = self
            .request_locks
            .acquire(request_id)
            .await
            .map_err(|_| SchedulingError::Busy("change request".to_string()))?;

        let mut request = self.load(request_id).await?;
        if request.status != RequestStatus::Pending {
            return Err(SchedulingError::NotPending(request.status.to_string()));
        }
        if !request.affected_doctor_ids.contains(doctor_id) {
            return Err(SchedulingError::Validation(format!(
                "doctor {} is not affected by request {}",
                doctor_id, request_id
            )));
        }

        request.status = RequestStatus::Rejected;
        request.rejected_by = Some(doctor_id);
        request.rejection_note = Some(note);
        request.updated_at = Utc::now();
        self.persist(&request).await?;

        info!(
            "Schedule change request {} rejected by doctor {}",
            request_id, doctor_id
        );
        self.dispatcher
            .dispatch(SchedulingEvent::ChangeRequestRejected {
                request_id,
                rejected_by: doctor_id,
            });

        Ok(request)
    }

    /// Commit an approved request through the applier. The applier writes
    /// the schedule mutations and the request's Applied transition as one
    /// write set. On failure the request stays Approved and the error is
    /// surfaced; staff can revise or retry, the workflow never retries on
    /// its own.
    pub async fn apply(&self, request_id: Uuid) -> Result<ScheduleChangeRequest, SchedulingError> {
        let _guard = self
            .request_locks
            .acquire(request_id)
            .await
            .map_err(|_| SchedulingError::Busy("change request".to_string()))?;

        let request = self.load(request_id).await?;
        if request.status != RequestStatus::Approved {
            return Err(SchedulingError::NotPending(request.status.to_string()));
        }

        let applied = match self.applier.apply(&request).await {
            Ok(applied) => applied,
            Err(e) => {
                warn!("Applying schedule change request {} failed: {}", request_id, e);
                return Err(e);
            }
        };

        info!("Schedule change request {} applied", request_id);
        self.dispatcher
            .dispatch(SchedulingEvent::ChangeRequestApplied { request_id });

        Ok(applied)
    }

    pub async fn get(&self, request_id: Uuid) -> Result<ScheduleChangeRequest, SchedulingError> {
        self.load(request_id).await
    }

    async fn load(&self, request_id: Uuid) -> Result<ScheduleChangeRequest, SchedulingError> {
        let row = self
            .store
            .get(CHANGE_REQUESTS, request_id)
            .await
            .map_err(|e| SchedulingError::Store(e.to_string()))?
            .ok_or_else(|| {
                SchedulingError::NotFound(format!("schedule change request {}", request_id))
            })?;

        serde_json::from_value(row)
            .map_err(|e| SchedulingError::Store(format!("Failed to parse change request: {}", e)))
    }

    async fn persist(&self, request: &ScheduleChangeRequest) -> Result<(), SchedulingError> {
        let record = serde_json::to_value(request).map_err(|e| {
            SchedulingError::Store(format!("Failed to serialize change request: {}", e))
        })?;
        self.store
            .upsert(CHANGE_REQUESTS, request.id, record)
            .await
            .map_err(|e| SchedulingError::Store(e.to_string()))
    }
}

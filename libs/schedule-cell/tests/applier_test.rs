// libs/schedule-cell/tests/applier_test.rs

use std::collections::BTreeSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use appointment_cell::{AppointmentLedger, BookAppointmentRequest, TimeSlotValidator};
use schedule_cell::{
    ChangeKind, RequestStatus, Schedule, ScheduleApplier, ScheduleChangeItem,
    ScheduleChangeRequest, ScheduleChangeWorkflow, CHANGE_REQUESTS, SCHEDULES,
};
use shared_config::AppConfig;
use shared_models::{Actor, ActorRole, LogDispatcher, SchedulingError};
use shared_store::{EntityStore, InMemoryStore};
use shared_utils::LockRegistry;

// ==============================================================================
// TEST FIXTURES AND UTILITIES
// ==============================================================================

struct TestSetup {
    workflow: Arc<ScheduleChangeWorkflow>,
    applier: Arc<ScheduleApplier>,
    ledger: Arc<AppointmentLedger>,
    store: Arc<InMemoryStore>,
    doctor_locks: Arc<LockRegistry>,
    staff: Actor,
}

impl TestSetup {
    fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let validator = Arc::new(TimeSlotValidator::new(store.clone()));
        // Bookings and applies share one exclusion domain per doctor.
        let doctor_locks = Arc::new(LockRegistry::new(config.lock_wait()));
        let applier = Arc::new(ScheduleApplier::new(
            store.clone(),
            validator.clone(),
            doctor_locks.clone(),
        ));
        let workflow = Arc::new(ScheduleChangeWorkflow::new(
            &config,
            store.clone(),
            applier.clone(),
            Arc::new(LogDispatcher),
        ));
        let ledger = Arc::new(AppointmentLedger::new(
            &config,
            store.clone(),
            validator,
            doctor_locks.clone(),
            Arc::new(LogDispatcher),
        ));
        Self {
            workflow,
            applier,
            ledger,
            store,
            doctor_locks,
            staff: Actor::new(Uuid::new_v4(), ActorRole::Staff),
        }
    }

    async fn seed_schedule(&self, doctor_id: Uuid, start: NaiveTime, end: NaiveTime) -> Schedule {
        let now = Utc::now();
        let schedule = Schedule {
            id: Uuid::new_v4(),
            doctor_id,
            work_date: date(),
            start_time: start,
            end_time: end,
            created_at: now,
            updated_at: now,
        };
        self.store
            .upsert(
                SCHEDULES,
                schedule.id,
                serde_json::to_value(&schedule).unwrap(),
            )
            .await
            .unwrap();
        schedule
    }

    async fn stored_schedule(&self, schedule_id: Uuid) -> Option<Schedule> {
        self.store
            .get(SCHEDULES, schedule_id)
            .await
            .unwrap()
            .map(|row| serde_json::from_value(row).unwrap())
    }
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 5).unwrap()
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn booking(doctor_id: Uuid, start: NaiveTime, end: NaiveTime) -> BookAppointmentRequest {
    BookAppointmentRequest {
        patient_id: Uuid::new_v4(),
        doctor_id,
        work_date: date(),
        start_time: start,
        end_time: end,
        services: BTreeSet::from(["general_consultation".to_string()]),
    }
}

fn item(
    doctor_id: Uuid,
    schedule_id: Option<Uuid>,
    start: NaiveTime,
    end: NaiveTime,
) -> ScheduleChangeItem {
    ScheduleChangeItem {
        doctor_id,
        schedule_id,
        work_date: date(),
        start_time: start,
        end_time: end,
    }
}

// ==============================================================================
// COMMIT-TIME REVALIDATION
// ==============================================================================

#[tokio::test]
async fn booking_made_between_approval_and_apply_blocks_the_update() {
    let setup = TestSetup::new();
    let doctor = Uuid::new_v4();
    let schedule = setup.seed_schedule(doctor, t(9, 0), t(12, 0)).await;

    let request = setup
        .workflow
        .create(
            ChangeKind::Update,
            vec![item(doctor, Some(schedule.id), t(14, 0), t(17, 0))],
            "move to afternoons".to_string(),
            &setup.staff,
        )
        .await
        .unwrap();
    setup.workflow.approve(request.id, doctor).await.unwrap();

    // The doctor gets booked inside the proposed window before apply runs.
    let appointment = setup
        .ledger
        .book(booking(doctor, t(14, 30), t(15, 0)))
        .await
        .unwrap();

    let err = setup.workflow.apply(request.id).await.unwrap_err();
    assert_matches!(err, SchedulingError::Conflict(_));

    // The request stays Approved and the schedule is unchanged.
    let current = setup.workflow.get(request.id).await.unwrap();
    assert_eq!(current.status, RequestStatus::Approved);
    assert!(current.processed_at.is_none());
    let stored = setup.stored_schedule(schedule.id).await.unwrap();
    assert_eq!(stored.start_time, t(9, 0));

    // Once the blocking appointment is gone, the same request applies.
    setup.ledger.cancel(appointment.id).await.unwrap();
    let applied = setup.workflow.apply(request.id).await.unwrap();
    assert_eq!(applied.status, RequestStatus::Applied);
    let stored = setup.stored_schedule(schedule.id).await.unwrap();
    assert_eq!(stored.start_time, t(14, 0));
    assert_eq!(stored.end_time, t(17, 0));
}

#[tokio::test]
async fn create_revalidates_against_appointments_and_schedules() {
    let setup = TestSetup::new();
    let doctor = Uuid::new_v4();
    setup
        .ledger
        .book(booking(doctor, t(10, 0), t(10, 30)))
        .await
        .unwrap();

    let request = setup
        .workflow
        .create(
            ChangeKind::Create,
            vec![item(doctor, None, t(9, 0), t(12, 0))],
            "morning block".to_string(),
            &setup.staff,
        )
        .await
        .unwrap();
    setup.workflow.approve(request.id, doctor).await.unwrap();

    let err = setup.workflow.apply(request.id).await.unwrap_err();
    assert_matches!(err, SchedulingError::Conflict(_));
    assert!(setup.store.is_empty(SCHEDULES).await);
}

#[tokio::test]
async fn update_may_overlap_the_window_it_replaces() {
    let setup = TestSetup::new();
    let doctor = Uuid::new_v4();
    let schedule = setup.seed_schedule(doctor, t(9, 0), t(12, 0)).await;

    let request = setup
        .workflow
        .create(
            ChangeKind::Update,
            vec![item(doctor, Some(schedule.id), t(10, 0), t(13, 0))],
            "push the morning back an hour".to_string(),
            &setup.staff,
        )
        .await
        .unwrap();
    setup.workflow.approve(request.id, doctor).await.unwrap();

    let applied = setup.workflow.apply(request.id).await.unwrap();
    assert_eq!(applied.status, RequestStatus::Applied);
    let stored = setup.stored_schedule(schedule.id).await.unwrap();
    assert_eq!(stored.start_time, t(10, 0));
    assert_eq!(stored.end_time, t(13, 0));
}

// ==============================================================================
// DELETE
// ==============================================================================

#[tokio::test]
async fn delete_fails_while_live_bookings_reference_the_window() {
    let setup = TestSetup::new();
    let doctor = Uuid::new_v4();
    let schedule = setup.seed_schedule(doctor, t(9, 0), t(12, 0)).await;
    let appointment = setup
        .ledger
        .book(booking(doctor, t(10, 0), t(10, 30)))
        .await
        .unwrap();

    let request = setup
        .workflow
        .create(
            ChangeKind::Delete,
            vec![item(doctor, Some(schedule.id), t(9, 0), t(12, 0))],
            "retire the morning block".to_string(),
            &setup.staff,
        )
        .await
        .unwrap();
    setup.workflow.approve(request.id, doctor).await.unwrap();

    let err = setup.workflow.apply(request.id).await.unwrap_err();
    assert_matches!(err, SchedulingError::InUse(_));
    assert!(setup.stored_schedule(schedule.id).await.is_some());

    // Cancelled bookings no longer hold the window in use.
    setup.ledger.cancel(appointment.id).await.unwrap();
    let applied = setup.workflow.apply(request.id).await.unwrap();
    assert_eq!(applied.status, RequestStatus::Applied);
    assert!(setup.stored_schedule(schedule.id).await.is_none());
}

// ==============================================================================
// BATCH ATOMICITY
// ==============================================================================

#[tokio::test]
async fn a_mid_batch_failure_commits_nothing() {
    let setup = TestSetup::new();
    let d1 = Uuid::new_v4();
    let d2 = Uuid::new_v4();
    let existing = setup.seed_schedule(d2, t(9, 0), t(12, 0)).await;

    let request = setup
        .workflow
        .create(
            ChangeKind::Create,
            vec![
                item(d1, None, t(9, 0), t(12, 0)),
                // Overlaps d2's existing window: the whole batch must abort.
                item(d2, None, t(10, 0), t(11, 0)),
            ],
            "mirror the morning block".to_string(),
            &setup.staff,
        )
        .await
        .unwrap();
    setup.workflow.approve(request.id, d1).await.unwrap();
    setup.workflow.approve(request.id, d2).await.unwrap();

    let err = setup.workflow.apply(request.id).await.unwrap_err();
    assert_matches!(err, SchedulingError::Conflict(_));

    assert_eq!(setup.store.len(SCHEDULES).await, 1);
    assert!(setup.stored_schedule(existing.id).await.is_some());
    assert_eq!(
        setup.workflow.get(request.id).await.unwrap().status,
        RequestStatus::Approved
    );
}

#[tokio::test]
async fn the_applied_transition_rides_in_the_schedule_write_set() {
    let setup = TestSetup::new();
    let doctor = Uuid::new_v4();

    let request = setup
        .workflow
        .create(
            ChangeKind::Create,
            vec![item(doctor, None, t(9, 0), t(12, 0))],
            "morning block".to_string(),
            &setup.staff,
        )
        .await
        .unwrap();
    setup.workflow.approve(request.id, doctor).await.unwrap();

    // Driving the applier directly: its single batch must cover both the
    // new schedule and the request's status flip, with no separate
    // follow-up write for either.
    let approved = setup.workflow.get(request.id).await.unwrap();
    let applied = setup.applier.apply(&approved).await.unwrap();
    assert_eq!(applied.status, RequestStatus::Applied);
    assert!(applied.processed_at.is_some());

    assert_eq!(setup.store.len(SCHEDULES).await, 1);
    let stored: ScheduleChangeRequest = serde_json::from_value(
        setup
            .store
            .get(CHANGE_REQUESTS, request.id)
            .await
            .unwrap()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(stored.status, RequestStatus::Applied);
    assert!(stored.processed_at.is_some());
}

#[tokio::test]
async fn items_within_one_batch_must_not_overlap_each_other() {
    let setup = TestSetup::new();
    let doctor = Uuid::new_v4();

    let request = setup
        .workflow
        .create(
            ChangeKind::Create,
            vec![
                item(doctor, None, t(9, 0), t(12, 0)),
                item(doctor, None, t(11, 0), t(14, 0)),
            ],
            "double-booked proposal".to_string(),
            &setup.staff,
        )
        .await
        .unwrap();
    setup.workflow.approve(request.id, doctor).await.unwrap();

    let err = setup.workflow.apply(request.id).await.unwrap_err();
    assert_matches!(err, SchedulingError::Conflict(_));
    assert!(setup.store.is_empty(SCHEDULES).await);
}

// ==============================================================================
// GUARDS
// ==============================================================================

#[tokio::test]
async fn the_applier_refuses_non_approved_requests() {
    let setup = TestSetup::new();
    let doctor = Uuid::new_v4();

    let pending = setup
        .workflow
        .create(
            ChangeKind::Create,
            vec![item(doctor, None, t(9, 0), t(12, 0))],
            "morning block".to_string(),
            &setup.staff,
        )
        .await
        .unwrap();

    let err = setup.applier.apply(&pending).await.unwrap_err();
    assert_matches!(err, SchedulingError::NotPending(_));
    assert!(setup.store.is_empty(SCHEDULES).await);
}

#[tokio::test]
async fn apply_reports_busy_while_a_doctor_timeline_is_locked() {
    let setup = TestSetup::with_config(AppConfig { lock_wait_ms: 50 });
    let doctor = Uuid::new_v4();

    let request = setup
        .workflow
        .create(
            ChangeKind::Create,
            vec![item(doctor, None, t(9, 0), t(12, 0))],
            "morning block".to_string(),
            &setup.staff,
        )
        .await
        .unwrap();
    setup.workflow.approve(request.id, doctor).await.unwrap();

    let _held = setup.doctor_locks.acquire(doctor).await.unwrap();
    let err = setup.workflow.apply(request.id).await.unwrap_err();
    assert_matches!(err, SchedulingError::Busy(_));
    assert!(err.is_retryable());
    assert_eq!(
        setup.workflow.get(request.id).await.unwrap().status,
        RequestStatus::Approved
    );
}

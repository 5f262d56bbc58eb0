use chrono::{NaiveDate, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::{NotificationDispatcher, SchedulingError, SchedulingEvent};
use shared_store::{EntityStore, FieldFilter, WriteOp};
use shared_utils::LockRegistry;

use crate::models::{
    Appointment, AppointmentStatus, BookAppointmentRequest, ResourceKind, APPOINTMENTS,
};
use crate::services::conflict::{ensure_valid_interval, TimeSlotValidator};

/// Source of truth for booked appointments. Every mutation validates first
/// and writes once, under the owning parties' timeline locks, so two
/// concurrent requests can never both observe "no conflict" and commit.
pub struct AppointmentLedger {
    store: Arc<dyn EntityStore>,
    validator: Arc<TimeSlotValidator>,
    /// Shared with the schedule applier: bookings and applies against the
    /// same doctor's timeline are mutually exclusive.
    doctor_locks: Arc<LockRegistry>,
    patient_locks: LockRegistry,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl AppointmentLedger {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn EntityStore>,
        validator: Arc<TimeSlotValidator>,
        doctor_locks: Arc<LockRegistry>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            validator,
            doctor_locks,
            patient_locks: LockRegistry::new(config.lock_wait()),
            dispatcher,
        }
    }

    /// Atomic check-and-insert booking. Fails with `Conflict` if the slot
    /// overlaps an existing commitment of either the doctor or the patient.
    pub async fn book(
        &self,
        request: BookAppointmentRequest,
    ) -> Result<Appointment, SchedulingError> {
        ensure_valid_interval(request.start_time, request.end_time)?;
        debug!(
            "Booking appointment for patient {} with doctor {} on {}",
            request.patient_id, request.doctor_id, request.work_date
        );

        // Doctor first, then patient: the fixed order keeps concurrent
        // bookings that share a party deadlock-free.
        let _doctor_guard = self
            .doctor_locks
            .acquire(request.doctor_id)
            .await
            .map_err(|_| SchedulingError::Busy("doctor timeline".to_string()))?;
        let _patient_guard = self
            .patient_locks
            .acquire(request.patient_id)
            .await
            .map_err(|_| SchedulingError::Busy("patient timeline".to_string()))?;

        if self
            .validator
            .has_conflict(
                ResourceKind::Doctor,
                request.doctor_id,
                request.work_date,
                request.start_time,
                request.end_time,
                None,
            )
            .await?
        {
            return Err(SchedulingError::Conflict(format!(
                "doctor {} already has an appointment overlapping {}-{}",
                request.doctor_id, request.start_time, request.end_time
            )));
        }

        if self
            .validator
            .has_conflict(
                ResourceKind::Patient,
                request.patient_id,
                request.work_date,
                request.start_time,
                request.end_time,
                None,
            )
            .await?
        {
            return Err(SchedulingError::Conflict(format!(
                "patient {} already has an appointment overlapping {}-{}",
                request.patient_id, request.start_time, request.end_time
            )));
        }

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            doctor_id: request.doctor_id,
            work_date: request.work_date,
            start_time: request.start_time,
            end_time: request.end_time,
            services: request.services,
            status: AppointmentStatus::Booked,
            created_at: now,
            updated_at: now,
        };
        self.persist(&appointment).await?;

        info!("Appointment booked successfully with ID: {}", appointment.id);
        self.dispatcher.dispatch(SchedulingEvent::AppointmentBooked {
            appointment_id: appointment.id,
            patient_id: appointment.patient_id,
            doctor_id: appointment.doctor_id,
        });

        Ok(appointment)
    }

    /// Move an appointment to another doctor, revalidating against the new
    /// doctor's existing commitments before committing.
    pub async fn reassign_doctor(
        &self,
        appointment_id: Uuid,
        new_doctor_id: Uuid,
    ) -> Result<Appointment, SchedulingError> {
        debug!(
            "Reassigning appointment {} to doctor {}",
            appointment_id, new_doctor_id
        );

        let _doctor_guard = self
            .doctor_locks
            .acquire(new_doctor_id)
            .await
            .map_err(|_| SchedulingError::Busy("doctor timeline".to_string()))?;

        let mut appointment = self.load(appointment_id).await?;
        if !appointment.status.blocks_slot() {
            return Err(SchedulingError::Validation(format!(
                "cannot reassign a {} appointment",
                appointment.status
            )));
        }

        if self
            .validator
            .has_conflict(
                ResourceKind::Doctor,
                new_doctor_id,
                appointment.work_date,
                appointment.start_time,
                appointment.end_time,
                Some(appointment_id),
            )
            .await?
        {
            return Err(SchedulingError::Conflict(format!(
                "doctor {} is already booked for {}-{}",
                new_doctor_id, appointment.start_time, appointment.end_time
            )));
        }

        let previous_doctor_id = appointment.doctor_id;
        appointment.doctor_id = new_doctor_id;
        appointment.updated_at = Utc::now();
        self.persist(&appointment).await?;

        self.dispatcher
            .dispatch(SchedulingEvent::AppointmentReassigned {
                appointment_id,
                previous_doctor_id,
                new_doctor_id,
            });

        Ok(appointment)
    }

    /// Cancellation is a status change, never a removal.
    pub async fn cancel(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        let mut appointment = self.load(appointment_id).await?;
        match appointment.status {
            AppointmentStatus::Cancelled => {
                return Err(SchedulingError::Validation(
                    "appointment is already cancelled".to_string(),
                ))
            }
            AppointmentStatus::Completed => {
                return Err(SchedulingError::Validation(
                    "cannot cancel a completed appointment".to_string(),
                ))
            }
            AppointmentStatus::Booked => {}
        }

        appointment.status = AppointmentStatus::Cancelled;
        appointment.updated_at = Utc::now();
        self.persist(&appointment).await?;

        self.dispatcher
            .dispatch(SchedulingEvent::AppointmentCancelled { appointment_id });

        Ok(appointment)
    }

    pub async fn get(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        self.load(appointment_id).await
    }

    pub async fn appointments_for_doctor(
        &self,
        doctor_id: Uuid,
        work_date: NaiveDate,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        self.find_by(ResourceKind::Doctor.key_field(), doctor_id, Some(work_date))
            .await
    }

    pub async fn appointments_for_patient(
        &self,
        patient_id: Uuid,
        work_date: NaiveDate,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        self.find_by(ResourceKind::Patient.key_field(), patient_id, Some(work_date))
            .await
    }

    /// Structural removal of every appointment of one patient. Account
    /// deletion hook; not part of the normal lifecycle.
    pub async fn purge_for_patient(&self, patient_id: Uuid) -> Result<usize, SchedulingError> {
        self.purge(ResourceKind::Patient, patient_id).await
    }

    /// Structural removal of every appointment of one doctor.
    pub async fn purge_for_doctor(&self, doctor_id: Uuid) -> Result<usize, SchedulingError> {
        self.purge(ResourceKind::Doctor, doctor_id).await
    }

    async fn purge(
        &self,
        resource: ResourceKind,
        resource_id: Uuid,
    ) -> Result<usize, SchedulingError> {
        let appointments = self.find_by(resource.key_field(), resource_id, None).await?;
        let ops: Vec<WriteOp> = appointments
            .iter()
            .map(|apt| WriteOp::delete(APPOINTMENTS, apt.id))
            .collect();
        let purged = ops.len();

        if purged > 0 {
            self.store
                .apply_batch(ops)
                .await
                .map_err(|e| SchedulingError::Store(e.to_string()))?;
            info!(
                "Purged {} appointments for {} {}",
                purged,
                resource.key_field(),
                resource_id
            );
        }
        Ok(purged)
    }

    async fn find_by(
        &self,
        key_field: &str,
        key: Uuid,
        work_date: Option<NaiveDate>,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let mut filters = vec![FieldFilter::eq(key_field, json!(key))];
        if let Some(date) = work_date {
            filters.push(FieldFilter::eq("work_date", json!(date)));
        }

        let rows = self
            .store
            .find(APPOINTMENTS, &filters)
            .await
            .map_err(|e| SchedulingError::Store(e.to_string()))?;

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| SchedulingError::Store(format!("Failed to parse appointments: {}", e)))
    }

    async fn load(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        let row = self
            .store
            .get(APPOINTMENTS, appointment_id)
            .await
            .map_err(|e| SchedulingError::Store(e.to_string()))?
            .ok_or_else(|| SchedulingError::NotFound(format!("appointment {}", appointment_id)))?;

        serde_json::from_value(row)
            .map_err(|e| SchedulingError::Store(format!("Failed to parse appointment: {}", e)))
    }

    async fn persist(&self, appointment: &Appointment) -> Result<(), SchedulingError> {
        let record = serde_json::to_value(appointment)
            .map_err(|e| SchedulingError::Store(format!("Failed to serialize appointment: {}", e)))?;
        self.store
            .upsert(APPOINTMENTS, appointment.id, record)
            .await
            .map_err(|e| SchedulingError::Store(e.to_string()))
    }
}

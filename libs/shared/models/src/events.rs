use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// State transitions the core announces to downstream messaging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulingEvent {
    AppointmentBooked {
        appointment_id: Uuid,
        patient_id: Uuid,
        doctor_id: Uuid,
    },
    AppointmentReassigned {
        appointment_id: Uuid,
        previous_doctor_id: Uuid,
        new_doctor_id: Uuid,
    },
    AppointmentCancelled {
        appointment_id: Uuid,
    },
    ChangeRequestCreated {
        request_id: Uuid,
        affected_doctor_ids: Vec<Uuid>,
    },
    ChangeRequestApproved {
        request_id: Uuid,
    },
    ChangeRequestRejected {
        request_id: Uuid,
        rejected_by: Uuid,
    },
    ChangeRequestApplied {
        request_id: Uuid,
    },
}

/// Fire-and-forget delivery to the external notification pipeline. The core
/// never blocks on or retries dispatch; implementations that need IO should
/// hand the event off to their own queue.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, event: SchedulingEvent);
}

/// Default dispatcher: logs the event and drops it.
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn dispatch(&self, event: SchedulingEvent) {
        info!(?event, "scheduling event");
    }
}

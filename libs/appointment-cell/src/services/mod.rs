pub mod booking;
pub mod conflict;

pub use booking::AppointmentLedger;
pub use conflict::TimeSlotValidator;

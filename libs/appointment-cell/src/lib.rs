pub mod models;
pub mod services;

pub use models::*;
pub use services::booking::AppointmentLedger;
pub use services::conflict::{ensure_valid_interval, intervals_overlap, TimeSlotValidator};

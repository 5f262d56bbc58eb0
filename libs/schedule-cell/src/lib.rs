pub mod models;
pub mod services;

pub use models::*;
pub use services::applier::ScheduleApplier;
pub use services::approval::{aggregate_approvals, ApprovalOutcome};
pub use services::workflow::ScheduleChangeWorkflow;

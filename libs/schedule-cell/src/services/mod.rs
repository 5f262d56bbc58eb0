pub mod applier;
pub mod approval;
pub mod workflow;

pub use applier::ScheduleApplier;
pub use workflow::ScheduleChangeWorkflow;

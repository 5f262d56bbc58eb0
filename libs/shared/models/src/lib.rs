pub mod actor;
pub mod error;
pub mod events;

pub use actor::{Actor, ActorRole};
pub use error::SchedulingError;
pub use events::{LogDispatcher, NotificationDispatcher, SchedulingEvent};

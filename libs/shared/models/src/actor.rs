use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authenticated caller identity, supplied by the external identity
/// provider. The core trusts it as-is and only enforces membership rules
/// (e.g. "is this doctor among the affected set"), never authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Staff,
    Doctor,
    Patient,
    Admin,
}

impl Actor {
    pub fn new(id: Uuid, role: ActorRole) -> Self {
        Self { id, role }
    }

    /// Staff and admins may propose schedule changes.
    pub fn can_propose_schedule_changes(&self) -> bool {
        matches!(self.role, ActorRole::Staff | ActorRole::Admin)
    }
}

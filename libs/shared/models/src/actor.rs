use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::User;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Admin,
    Receptionist,
    Doctor,
    Patient,
    System,
}

impl ActorRole {
    pub fn parse(role: &str) -> Option<Self> {
        match role.trim().to_ascii_lowercase().as_str() {
            "admin" | "super_admin" => Some(ActorRole::Admin),
            "receptionist" | "front_desk" | "staff" => Some(ActorRole::Receptionist),
            "doctor" => Some(ActorRole::Doctor),
            "patient" | "authenticated" => Some(ActorRole::Patient),
            _ => None,
        }
    }
}

/// Identity recorded in audit fields (`booked_by`, `updated_by`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Cow<'static, str>,
    pub role: ActorRole,
}

/// Used for callbacks that arrive without a user session, such as payment webhooks.
pub const SYSTEM_ACTOR: Actor = Actor {
    id: Cow::Borrowed("system"),
    role: ActorRole::System,
};

impl Actor {
    pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: Cow::Owned(id.into()),
            role,
        }
    }

    pub fn from_user(user: &User) -> Result<Self, AppError> {
        let role = user
            .clinic_role()
            .and_then(ActorRole::parse)
            .ok_or_else(|| AppError::Forbidden("Unrecognized caller role".to_string()))?;

        Ok(Self::new(user.id.clone(), role))
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Which records a caller may read or write, resolved once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationScope {
    All,
    OwnedByDoctor(Uuid),
    OwnedByPatient(Uuid),
}

impl AuthorizationScope {
    pub fn for_actor(actor: &Actor) -> Result<Self, AppError> {
        match actor.role {
            ActorRole::Admin | ActorRole::Receptionist | ActorRole::System => Ok(AuthorizationScope::All),
            ActorRole::Doctor => Ok(AuthorizationScope::OwnedByDoctor(parse_owner_id(&actor.id)?)),
            ActorRole::Patient => Ok(AuthorizationScope::OwnedByPatient(parse_owner_id(&actor.id)?)),
        }
    }

    pub fn allows_doctor(&self, doctor_id: Uuid) -> bool {
        match self {
            AuthorizationScope::All => true,
            AuthorizationScope::OwnedByDoctor(id) => *id == doctor_id,
            AuthorizationScope::OwnedByPatient(_) => false,
        }
    }
}

fn parse_owner_id(id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id).map_err(|_| AppError::BadRequest("Invalid user ID format".to_string()))
}

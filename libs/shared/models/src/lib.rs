pub mod actor;
pub mod appointment;
pub mod auth;
pub mod error;

pub use actor::{Actor, ActorRole, AuthorizationScope, SYSTEM_ACTOR};
pub use appointment::{AdditionalInfo, Appointment, AppointmentStatus, AppointmentType, ConsultationMode};

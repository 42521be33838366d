pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::AvailabilityError;
pub use router::availability_routes;
pub use services::availability::AvailabilityService;

pub mod availability;
pub mod engine;
pub mod repository;

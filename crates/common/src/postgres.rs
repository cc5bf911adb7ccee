mod application_repository;
mod client;
mod config;
mod device_repository;
mod integration_repository;

pub use application_repository::*;
pub use client::*;
pub use config::*;
pub use device_repository::*;
pub use integration_repository::*;

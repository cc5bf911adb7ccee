mod config;
mod handler;
mod topic;

pub use config::*;
pub use handler::*;
pub use topic::*;

mod config;
mod handler;
pub mod line_protocol;

pub use config::*;
pub use handler::*;

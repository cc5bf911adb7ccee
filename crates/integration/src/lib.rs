//! Integration back-ends and the multi-backend event dispatcher.

pub mod aws_sns;
mod dispatcher;
mod error;
mod factory;
mod handler;
pub mod http;
pub mod influxdb;
pub mod mqtt;
pub mod postgres;
pub mod thingsboard;

#[cfg(test)]
mod test_fixtures;

pub use aws_sns::{AwsSnsHandler, AwsSnsSettings, SnsClientCache};
pub use dispatcher::MultiDispatcher;
pub use error::{IntegrationError, Result};
pub use factory::HandlerFactory;
pub use handler::{deliver, IntegrationHandler};
pub use http::{HttpHandler, HttpSettings};
pub use influxdb::{InfluxDbHandler, InfluxDbSettings, InfluxDbVersion};
pub use mqtt::{MqttHandler, MqttIntegrationConfig};
pub use postgres::{PostgresHandler, PostgresIntegrationConfig};
pub use thingsboard::{ThingsBoardHandler, ThingsBoardSettings};

#[cfg(any(test, feature = "testing"))]
pub use handler::MockIntegrationHandler;

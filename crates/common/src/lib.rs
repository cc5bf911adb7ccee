pub mod domain;
pub mod grpc;
pub mod postgres;
pub mod redis;
pub mod telemetry;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockApplicationRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockDeviceProfileRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockDeviceRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockDownlinkLock;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockEventDispatcher;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockEventLog;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockIntegrationRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockMetricsStore;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockNetworkServerClient;

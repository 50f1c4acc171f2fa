pub mod graceful_shutdown;
pub mod in_flight;

pub use graceful_shutdown::{GracefulShutdown, ShutdownReason};
pub use in_flight::{InFlightGuard, InFlightTracker};

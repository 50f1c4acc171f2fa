//! Ports: the traits the core depends on, implemented by adapters.
pub mod http_client;

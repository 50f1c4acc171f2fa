pub mod error;
pub mod gateway;
pub mod instance;
pub mod load_balancer;
pub mod normalize;
pub mod streaming;

pub use error::{AttemptFailure, GatewayError};
pub use gateway::{
    ForwardRequest, ForwardResponse, ForwardSettings, GatewayService, RequestBody, ResponseBody,
};
pub use instance::{Instance, InstanceRegistry, RegistryHealth};
pub use load_balancer::{LoadBalancingStrategy, RandomStrategy, RoundRobinSelector, TriedSet};
pub use streaming::EventStream;

mod cache;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod resolver;
pub mod routing;

pub use coordinator::{Acquire, Coordinator};
pub use error::{ErrorEnvelope, GatewayError};
pub use gateway::{GatewayService, InboundRequest};
pub use resolver::{KeyResolver, RequestKey};
pub use routing::{RoutingTable, RoutingTarget};

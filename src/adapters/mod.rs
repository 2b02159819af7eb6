pub mod http_dispatcher;
pub mod http_handler;
pub mod middleware;
pub mod server;

/// Re-export commonly used types from adapters
pub use http_dispatcher::HttpDispatcher;
pub use http_handler::{HttpHandler, router};
pub use middleware::BasicAuth;
pub use server::{GatewayServer, RunningServer};

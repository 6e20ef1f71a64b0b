pub mod authz;
pub mod config;
pub mod executor;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod patch;
pub mod routing;
pub mod server;

pub use authz::{AUTHORIZATION_FAILED, AccessDecision, AccessPolicy, AllowAll, PolicyKind, ReadOnly};
pub use config::{AppConfig, BundleSettings, RoutingConfig, SearchSettings, ServerConfig};
pub use executor::StorageDispatcher;
pub use observability::{init_tracing, shutdown_tracing};
pub use routing::RouteTable;
pub use server::{AppState, FhirkitServer, ServerBuilder, build_app, search_handler};

//! callsheet-api - HTTP surface for account provisioning and clone recovery.

pub mod config;
pub mod error;
pub mod provisioning;
pub mod routes;
pub mod state;

pub use config::{ApiConfig, StoreBackend};
pub use error::ApiError;
pub use routes::router;
pub use state::{spawn_event_logger, AppState, Backend};

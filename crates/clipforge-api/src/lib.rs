//! HTTP surface and WebSocket gateway.
//!
//! Handlers are thin: validate input, call a repository or queue operation,
//! return JSON. Pipeline work never happens on the request path. The
//! gateway owns the fan-out of progress events to subscribed clients.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod security;
pub mod state;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;

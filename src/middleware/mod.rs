//! Ambient HTTP middleware: request logging and API-key auth, applied as
//! router layers rather than duplicated per handler.

pub mod auth;
pub mod logging;

pub use auth::{auth_middleware, ApiKeys};
pub use logging::request_logging;

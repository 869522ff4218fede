//! Aegis402 HTTP API
//!
//! The HTTP boundary of the clearinghouse: request/response DTOs,
//! handlers, routes, configuration and the application state that the
//! server binary wires up at start.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::AegisConfig;
pub use routes::router;
pub use state::App;

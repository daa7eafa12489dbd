//! warden gateway: the command-and-control HTTP API for warden agents.
//!
//! Operators issue enrollment keys and jobs through bearer-token
//! endpoints; agents redeem keys, heartbeat, poll, and acknowledge
//! through HMAC-signed requests. All protocol state lives behind the
//! [`store::ProtocolStore`] port, backed by Valkey in production.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod store;

pub use config::Config;
pub use routes::build_router;
pub use state::AppState;

//! # Capstan Gateway
//!
//! The HTTP surface of the orchestration runtime: synchronous
//! orchestration endpoints, asynchronous task endpoints, and the
//! process bootstrap that selects roles from `GOMIND_MODE`.

pub mod error;
pub mod handlers;
pub mod server;
pub mod state;

pub use error::{GatewayError, GatewayResult};
pub use server::{GatewayServer, GatewayServerConfig};
pub use state::AppState;

//! Herald HTTP control plane.
//!
//! A small axum surface over the batch scheduler: trigger a batch, read
//! counts, check liveness. Configuration loading lives here too so the binary
//! stays thin.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use server::{create_router, shutdown_signal, start_server, AppState};

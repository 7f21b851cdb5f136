//! Tally HTTP API service.
//!
//! Hosts the collection orchestrator and the cycle aggregation engine behind an HTTP
//! API:
//!
//! - Provider discovery and credential health
//! - Collection runs: trigger, batch trigger, status, cancel, resume
//! - Direct ingestion of canonical usage events
//! - Billing-cycle aggregation and quarantine inspection
//!
//! # Authentication
//!
//! Every `/v1` endpoint requires the shared service API key in `x-api-key`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers are async for the router

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;

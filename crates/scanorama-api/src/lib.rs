//! scanorama-api: versioned REST endpoints plus WebSocket progress streams.
//!
//! Request pipeline: request-id stamping → API-key authentication →
//! per-key rate limiting → handler. Every response uses the same envelope
//! (`data` / `error` / `message` / `request_id` / `timestamp`), and error
//! codes map uniformly onto HTTP statuses.

pub mod auth;
pub mod handlers;
pub mod response;
pub mod server;
pub mod ws;

pub use server::{serve, ApiState, SharedState};

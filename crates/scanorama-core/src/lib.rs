//! scanorama-core: Shared types, configuration, and error handling for Scanorama.
//!
//! This crate provides the foundational pieces used across all Scanorama
//! components:
//! - Domain entities (Network, Host, PortObservation, jobs, API keys)
//! - The error-code classification table driving retry and HTTP mapping
//! - Configuration loading (YAML file + `SCANORAMA_` environment overlay)
//! - Progress events fanned out over the API's WebSocket endpoints

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::{CoreError, ErrorCode};

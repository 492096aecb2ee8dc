//! scanorama-engine: the working core of Scanorama.
//!
//! Wraps the external nmap binary for discovery and port/service scans,
//! executes jobs on a bounded worker pool, generates exclusion-aware target
//! lists, and dispatches recurring jobs from cron schedules.

pub mod discovery;
pub mod error;
pub mod nmap_xml;
pub mod pool;
pub mod scan;
pub mod scanner;
pub mod schedule;
pub mod targets;

pub use error::EngineError;
pub use pool::{Job, JobResult, PoolConfig, WorkerPool};

/// In-process bus carrying progress events to WebSocket subscribers.
pub type EventBus = tokio::sync::broadcast::Sender<scanorama_core::events::ScanoramaEvent>;

/// Create an event bus with a bounded replay buffer.
pub fn event_bus() -> EventBus {
    tokio::sync::broadcast::channel(256).0
}

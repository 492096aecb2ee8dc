//! Progress events for discovery and scan runs.
//!
//! The engine publishes these over an in-process broadcast bus; the HTTP
//! API fans them out to WebSocket subscribers on `/ws/scans` and
//! `/ws/discovery`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// An event emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanoramaEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl ScanoramaEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Which WebSocket stream this event belongs on.
    pub fn stream(&self) -> EventStream {
        match self.payload {
            EventPayload::DiscoveryStarted { .. }
            | EventPayload::DiscoveryHostFound { .. }
            | EventPayload::DiscoveryCompleted { .. }
            | EventPayload::DiscoveryFailed { .. } => EventStream::Discovery,
            EventPayload::ScanStarted { .. }
            | EventPayload::ScanHostCompleted { .. }
            | EventPayload::ScanCompleted { .. }
            | EventPayload::ScanFailed { .. } => EventStream::Scan,
            EventPayload::ScheduledJobDispatched { .. } => EventStream::Scan,
        }
    }
}

/// The two WebSocket fan-out streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStream {
    Discovery,
    Scan,
}

/// The event payload, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    DiscoveryStarted {
        job_id: Uuid,
        network: String,
        target_count: usize,
    },
    DiscoveryHostFound {
        job_id: Uuid,
        ip: String,
    },
    DiscoveryCompleted {
        job_id: Uuid,
        hosts_discovered: i64,
        hosts_responsive: i64,
    },
    DiscoveryFailed {
        job_id: Uuid,
        error: String,
    },
    ScanStarted {
        job_id: Uuid,
        target_count: usize,
    },
    ScanHostCompleted {
        job_id: Uuid,
        ip: String,
        open_ports: usize,
    },
    ScanCompleted {
        job_id: Uuid,
        hosts_scanned: usize,
    },
    ScanFailed {
        job_id: Uuid,
        error: String,
    },
    ScheduledJobDispatched {
        schedule: String,
        job_id: Uuid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_roundtrip() {
        let event = ScanoramaEvent::new(EventPayload::DiscoveryCompleted {
            job_id: Uuid::new_v4(),
            hosts_discovered: 12,
            hosts_responsive: 9,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"discovery_completed\""));

        let back: ScanoramaEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.stream(), EventStream::Discovery);
    }

    #[test]
    fn stream_routing() {
        let scan = ScanoramaEvent::new(EventPayload::ScanStarted {
            job_id: Uuid::new_v4(),
            target_count: 3,
        });
        assert_eq!(scan.stream(), EventStream::Scan);

        let disc = ScanoramaEvent::new(EventPayload::DiscoveryHostFound {
            job_id: Uuid::new_v4(),
            ip: "10.0.1.5".to_string(),
        });
        assert_eq!(disc.stream(), EventStream::Discovery);
    }
}

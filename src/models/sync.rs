//! Background sync state.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Serialize;

/// Latest known state of a connection's introspection/index/graph sync.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Running {
        attempt: u32,
    },
    Ready {
        tables: usize,
        records: usize,
        graph_tables: usize,
        graph_failures: usize,
        finished_at: DateTime<Utc>,
    },
    Failed {
        stage: String,
        message: String,
        attempts: u32,
        finished_at: DateTime<Utc>,
    },
}

impl SyncStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready { .. } | Self::Failed { .. })
    }
}

/// Counts reported by one successful sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub tables: usize,
    pub records: usize,
    pub graph_tables: usize,
    pub graph_failures: usize,
}

/// Broadcast to subscribers whenever a connection's status changes.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent {
    pub connection_id: String,
    pub status: SyncStatus,
}

//! The relay's in-memory view of a connected agent (§3, relay agent
//! record).

use std::time::{SystemTime, UNIX_EPOCH};

/// A connected agent, as tracked by the relay server. Created on
/// `register`, updated on every inbound frame (for `last_seen`), removed
/// on socket close unless the agent is a designated storage peer.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub public_key: String,
    pub name: Option<String>,
    pub last_seen: i64,
    pub metadata: Option<serde_json::Value>,
}

impl AgentRecord {
    pub fn new(public_key: String, name: Option<String>) -> Self {
        Self {
            public_key,
            name,
            last_seen: now_ms(),
            metadata: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = now_ms();
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as i64
}

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

/// Declared at registration and snapshotted for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub hostname: String,
    pub version: String,
    pub platform: String,
    pub tags: HashSet<String>,
    pub connected_at: DateTime<Utc>,
}

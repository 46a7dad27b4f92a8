//! Structured audit trail for material actions.
//!
//! Events: user creation, symbol listing, share grants, order submission
//! and cancellation. Format: one JSON line per event with timestamp, actor,
//! action, resource, outcome. Sink: stdout or pluggable (e.g. test mock).

use serde::Serialize;

use crate::types::unix_timestamp;

/// Single audit record: one line of JSON per event.
#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    /// Unix timestamp (seconds since epoch).
    pub timestamp_secs: i64,
    /// Who performed the action (user id or "system").
    pub actor: String,
    /// Action type: user_create, symbol_add, shares_grant, order_submit,
    /// order_cancel.
    pub action: String,
    /// Resource identifiers (order id, symbol, quantities). Flexible per
    /// action type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<serde_json::Value>,
    /// Outcome: success or rejected.
    pub outcome: String,
}

impl AuditEvent {
    pub fn now(
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: Option<serde_json::Value>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            timestamp_secs: unix_timestamp(),
            actor: actor.into(),
            action: action.into(),
            resource,
            outcome: outcome.into(),
        }
    }
}

/// Sink for audit events. Implementations write to stdout, a file, or
/// memory (tests).
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &AuditEvent);
}

/// Discards every event. Default for embedded/library use.
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn emit(&self, _event: &AuditEvent) {}
}

/// Writes one JSON line per event to stdout. Safe from multiple threads.
pub struct StdoutAuditSink;

impl AuditSink for StdoutAuditSink {
    fn emit(&self, event: &AuditEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
    }
}

/// In-memory sink that stores events for tests. Clones share the backing
/// buffer.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: std::sync::Arc<std::sync::Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("lock").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("lock").clear();
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: &AuditEvent) {
        self.events.lock().expect("lock").push(event.clone());
    }
}

//! Structured lifecycle events, parsed from the dotted `message` strings and
//! JSON payloads every callback already carries (§6's "Callback contract").
//!
//! Grounded on the teacher's `notification.rs` (`NotificationType`'s
//! dotted-suffix `From<&str>` parsing) generalized from the teacher's fixed
//! `MaaNotification*` prefixes to this crate's own dotted namespaces
//! (`task.*`, `controller.*`, `resource.*`).

use serde::Deserialize;
use serde_json::Value;

/// A structured lifecycle event. Unrecognized or malformed messages parse to
/// [`Event::Unknown`] rather than failing — a forward-incompatible message
/// must never crash a callback dispatch (§4.9).
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TaskStarted { task_id: u64, entry: String },
    NodeHit { task_id: u64, node: String, hit_count: u32 },
    TaskFinished { task_id: u64, reason: String },
    ControllerConnected { uuid: String },
    ControllerAction { action: String, ok: bool },
    ResourceLoading { path: String, ok: bool },
    /// The message parsed but carries a namespace/shape this version does not
    /// recognize, or the JSON payload failed to deserialize.
    Unknown { message: String, payload: Value },
}

#[derive(Debug, Deserialize)]
struct TaskStartedPayload {
    task_id: u64,
    entry: String,
}

#[derive(Debug, Deserialize)]
struct NodeHitPayload {
    task_id: u64,
    node: String,
    hit_count: u32,
}

#[derive(Debug, Deserialize)]
struct TaskFinishedPayload {
    task_id: u64,
    reason: String,
}

#[derive(Debug, Deserialize)]
struct ControllerConnectedPayload {
    uuid: String,
}

#[derive(Debug, Deserialize)]
struct ControllerActionPayload {
    action: String,
    ok: bool,
}

#[derive(Debug, Deserialize)]
struct ResourceLoadingPayload {
    path: String,
    ok: bool,
}

impl Event {
    /// Parse a `(message, details_json)` pair as delivered through the raw
    /// callback contract. Never fails: any parse error falls back to
    /// `Unknown`.
    pub fn parse(message: &str, details_json: &str) -> Event {
        let payload: Value = serde_json::from_str(details_json).unwrap_or(Value::Null);
        Self::from_parts(message, payload)
    }

    fn from_parts(message: &str, payload: Value) -> Event {
        let parsed = match message {
            "task.started" => serde_json::from_value::<TaskStartedPayload>(payload.clone())
                .ok()
                .map(|p| Event::TaskStarted { task_id: p.task_id, entry: p.entry }),
            "task.node_hit" => serde_json::from_value::<NodeHitPayload>(payload.clone())
                .ok()
                .map(|p| Event::NodeHit { task_id: p.task_id, node: p.node, hit_count: p.hit_count }),
            "task.finished" => serde_json::from_value::<TaskFinishedPayload>(payload.clone())
                .ok()
                .map(|p| Event::TaskFinished { task_id: p.task_id, reason: p.reason }),
            "controller.connected" => {
                serde_json::from_value::<ControllerConnectedPayload>(payload.clone())
                    .ok()
                    .map(|p| Event::ControllerConnected { uuid: p.uuid })
            }
            "controller.action" => serde_json::from_value::<ControllerActionPayload>(payload.clone())
                .ok()
                .map(|p| Event::ControllerAction { action: p.action, ok: p.ok }),
            "resource.loading" => serde_json::from_value::<ResourceLoadingPayload>(payload.clone())
                .ok()
                .map(|p| Event::ResourceLoading { path: p.path, ok: p.ok }),
            _ => None,
        };
        parsed.unwrap_or(Event::Unknown { message: message.to_string(), payload })
    }
}

/// An embedder that wants typed events instead of hand-parsing raw callback
/// strings implements this and registers it alongside (or instead of) a raw
/// sink.
pub trait EventSink: Send + Sync {
    fn on_event(&self, source_id: u64, event: &Event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_task_started_parses() {
        let event = Event::parse("task.started", r#"{"task_id":7,"entry":"login"}"#);
        assert_eq!(event, Event::TaskStarted { task_id: 7, entry: "login".into() });
    }

    #[test]
    fn unrecognized_namespace_degrades_to_unknown() {
        let event = Event::parse("future.thing", r#"{"x":1}"#);
        match event {
            Event::Unknown { message, .. } => assert_eq!(message, "future.thing"),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_degrades_to_unknown_without_panicking() {
        let event = Event::parse("task.started", "not json");
        assert!(matches!(event, Event::Unknown { .. }));
    }

    #[test]
    fn shape_mismatch_degrades_to_unknown() {
        // Known namespace, but payload missing a required field.
        let event = Event::parse("task.started", r#"{"entry":"login"}"#);
        assert!(matches!(event, Event::Unknown { .. }));
    }
}

//! Route a decoded frame to its message variant by top-level key set.
//!
//! Priority, first match wins:
//! empty object, `id`, `event`, `direct_message`, `friends`, `delete.status`, `warning`.
//! Anything else is `Unrecognized`. Total: never fails.

use serde_json::{Map, Value};

use crate::message::{Event, Payload, StreamMessage};

/// Classify any decoded JSON value. Non-objects are `Unrecognized`.
pub fn classify_value(value: Value) -> StreamMessage {
    match value {
        Value::Object(object) => classify(object),
        other => StreamMessage::Unrecognized(other),
    }
}

/// Classify a decoded JSON object.
pub fn classify(mut object: Map<String, Value>) -> StreamMessage {
    if object.is_empty() {
        return StreamMessage::KeepAlive;
    }
    if object.contains_key("id") {
        return StreamMessage::ContentItem(Payload::new(Value::Object(object)));
    }
    if object.contains_key("event") {
        return StreamMessage::StatusEvent(Event::from_object(object));
    }
    if let Some(dm) = object.remove("direct_message") {
        return StreamMessage::DirectMessage(Payload::new(dm));
    }
    if let Some(friends) = object.remove("friends") {
        return StreamMessage::ConnectionRoster(Payload::new(friends));
    }
    if let Some(status) = take_deleted_status(&mut object) {
        return StreamMessage::DeletionNotice(Payload::new(status));
    }
    if let Some(warning) = object.remove("warning") {
        return StreamMessage::StallWarning(Payload::new(warning));
    }
    StreamMessage::Unrecognized(Value::Object(object))
}

/// `delete.status`, removed only when present so a non-matching object is left intact.
fn take_deleted_status(object: &mut Map<String, Value>) -> Option<Value> {
    let has_status = object
        .get("delete")
        .and_then(Value::as_object)
        .is_some_and(|d| d.contains_key("status"));
    if !has_status {
        return None;
    }
    match object.remove("delete") {
        Some(Value::Object(mut delete)) => delete.remove("status"),
        _ => None,
    }
}

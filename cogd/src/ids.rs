//! Short identifier generation
//!
//! All IDs use the format `{kind}-{12-char-hex}`, e.g. `task-019430a1b2c3`.
//! The hex portion is the leading bytes of a UUIDv7, so IDs sort roughly by
//! creation time.

/// Generate a short ID with a kind prefix
pub fn short_id(kind: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex = uuid.simple().to_string();
    format!("{}-{}", kind, &hex[..12])
}

/// Generate a task ID
pub fn task_id() -> String {
    short_id("task")
}

/// Generate an event ID
pub fn event_id() -> String {
    short_id("ev")
}

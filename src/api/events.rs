use serde::Serialize;

/// Out-of-band notifications published on the process-wide broadcast bus.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum NotificationEvent {
    UserValidated { user_id: i32, username: String },
}

use chrono::{DateTime, Utc};
use faststr::FastStr;
use serde::{Deserialize, Serialize};

/// A chat message as stored under `messages/<group>/<key>`.
///
/// `user` is a foreign key into `users/<id>`; the display name is joined in
/// at read time, never denormalized into the message itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user:    FastStr,
    pub message: FastStr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(user: impl AsRef<str>, message: impl AsRef<str>) -> Self {
        Self {
            user:    FastStr::new(user),
            message: FastStr::new(message),
            sent_at: Some(Utc::now()),
        }
    }
}

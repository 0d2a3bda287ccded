use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric user identifier, shared by end-users and agents.
pub type UserId = u64;

/// Recipient id of a message sent while no agent was assigned.
pub const UNASSIGNED: UserId = 0;

/// What a message body carries. Images and files are sent as URLs in `content`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }

    /// Kind of an uploaded attachment, judged by its extension.
    pub fn from_file_name(file_name: &str) -> Self {
        let ext = std::path::Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("jpg" | "jpeg" | "png" | "gif") => Self::Image,
            _ => Self::File,
        }
    }

    /// Parse the stored column value. Unknown values read back as text.
    pub fn from_db(s: &str) -> Self {
        match s {
            "image" => Self::Image,
            "file" => Self::File,
            _ => Self::Text,
        }
    }
}

/// A chat message between an end-user and an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Assigned by the store on save; 0 while unpersisted.
    pub id: u64,
    pub from_id: UserId,
    /// Agent or end-user id, or `UNASSIGNED` when no agent was attached yet.
    pub to_id: UserId,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        from_id: UserId,
        to_id: UserId,
        content: String,
        kind: MessageKind,
        file_name: Option<String>,
    ) -> Self {
        Self {
            id: 0,
            from_id,
            to_id,
            content,
            kind,
            file_name,
            created_at: Utc::now(),
        }
    }

    pub fn text(from_id: UserId, to_id: UserId, content: impl Into<String>) -> Self {
        Self::new(from_id, to_id, content.into(), MessageKind::Text, None)
    }

    /// Whether this message belongs to the conversation of `user_id`.
    pub fn involves(&self, user_id: UserId) -> bool {
        self.from_id == user_id || self.to_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_file_name() {
        assert_eq!(MessageKind::from_file_name("cat.png"), MessageKind::Image);
        assert_eq!(MessageKind::from_file_name("Photo.JPEG"), MessageKind::Image);
        assert_eq!(MessageKind::from_file_name("receipt.pdf"), MessageKind::File);
        assert_eq!(MessageKind::from_file_name("noext"), MessageKind::File);
    }
}

//! JSON wire payloads exchanged over `/ws/chat`.
//!
//! Inbound: end-users send plain text (or a small JSON object), agents send
//! either a command or a direct message. Outbound: either a chat `Message` or
//! a control `ServerResponse`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::model::{Message, MessageKind, UserId};

/// Maximum page size for an agent `history` command.
pub const MAX_HISTORY_PAGE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid message format")]
    InvalidFormat,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Message content is empty")]
    EmptyContent,
}

/// Raw agent command frame: `{"command": "take", "user_id": 42}`.
#[derive(Debug, Deserialize)]
struct RawCommand {
    #[serde(default)]
    command: String,
    #[serde(default)]
    user_id: UserId,
    before_id: Option<u64>,
    limit: Option<usize>,
}

/// Agent → end-user direct message: `{"user_id": 42, "content": "hi"}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentMessage {
    pub user_id: UserId,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Structured end-user frame. Anything that doesn't parse as this is taken
/// as verbatim text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserMessage {
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    Take { user_id: UserId },
    List,
    Close { user_id: UserId },
    Sessions,
    History {
        user_id: UserId,
        before_id: Option<u64>,
        limit: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentFrame {
    Command(AgentCommand),
    Message(AgentMessage),
}

/// Parse a frame sent by an agent.
///
/// A frame with a non-empty `command` field is a command; everything else
/// must be a direct message.
pub fn parse_agent_frame(raw: &str) -> Result<AgentFrame, ProtocolError> {
    if let Ok(cmd) = serde_json::from_str::<RawCommand>(raw) {
        if !cmd.command.is_empty() {
            let command = match cmd.command.as_str() {
                "take" => AgentCommand::Take { user_id: cmd.user_id },
                "list" => AgentCommand::List,
                "close" => AgentCommand::Close { user_id: cmd.user_id },
                "sessions" => AgentCommand::Sessions,
                "history" => AgentCommand::History {
                    user_id: cmd.user_id,
                    before_id: cmd.before_id,
                    limit: cmd.limit,
                },
                other => return Err(ProtocolError::UnknownCommand(other.to_string())),
            };
            return Ok(AgentFrame::Command(command));
        }
    }

    let message: AgentMessage =
        serde_json::from_str(raw).map_err(|_| ProtocolError::InvalidFormat)?;
    if message.content.trim().is_empty() {
        return Err(ProtocolError::EmptyContent);
    }
    Ok(AgentFrame::Message(message))
}

/// Parse a frame sent by an end-user.
pub fn parse_user_frame(raw: &str) -> Result<UserMessage, ProtocolError> {
    let message = serde_json::from_str::<UserMessage>(raw).unwrap_or_else(|_| UserMessage {
        content: raw.to_string(),
        kind: MessageKind::Text,
        file_name: None,
    });
    if message.content.trim().is_empty() {
        return Err(ProtocolError::EmptyContent);
    }
    Ok(message)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Control response: assignment confirmations, waiting lists, notifications, errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerResponse {
    pub status: Status,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ServerResponse {
    pub fn success(message: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
            payload,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
            payload: None,
        }
    }

    /// A notification is a success response whose payload names an event.
    pub fn event(message: impl Into<String>, event: &str, user_id: UserId) -> Self {
        Self::success(
            message,
            Some(serde_json::json!({ "event": event, "user_id": user_id })),
        )
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }
}

/// Everything the hub can put on a connection's outbound queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Chat(Message),
    Response(ServerResponse),
}

impl From<Message> for ServerFrame {
    fn from(message: Message) -> Self {
        Self::Chat(message)
    }
}

impl From<ServerResponse> for ServerFrame {
    fn from(response: ServerResponse) -> Self {
        Self::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::model::UNASSIGNED;

    #[test]
    fn test_parse_take_list_close() {
        assert_eq!(
            parse_agent_frame(r#"{"command":"take","user_id":5}"#),
            Ok(AgentFrame::Command(AgentCommand::Take { user_id: 5 }))
        );
        assert_eq!(
            parse_agent_frame(r#"{"command":"list"}"#),
            Ok(AgentFrame::Command(AgentCommand::List))
        );
        assert_eq!(
            parse_agent_frame(r#"{"command":"close","user_id":9}"#),
            Ok(AgentFrame::Command(AgentCommand::Close { user_id: 9 }))
        );
    }

    #[test]
    fn test_parse_history_command() {
        assert_eq!(
            parse_agent_frame(r#"{"command":"history","user_id":3,"before_id":40,"limit":10}"#),
            Ok(AgentFrame::Command(AgentCommand::History {
                user_id: 3,
                before_id: Some(40),
                limit: Some(10),
            }))
        );
    }

    #[test]
    fn test_empty_command_falls_back_to_message() {
        let frame = parse_agent_frame(r#"{"command":"","user_id":5,"content":"hi"}"#).unwrap();
        match frame {
            AgentFrame::Message(msg) => {
                assert_eq!(msg.user_id, 5);
                assert_eq!(msg.content, "hi");
                assert_eq!(msg.kind, MessageKind::Text);
            }
            other => panic!("Expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert_eq!(
            parse_agent_frame(r#"{"command":"transfer","user_id":5}"#),
            Err(ProtocolError::UnknownCommand("transfer".to_string()))
        );
    }

    #[test]
    fn test_garbage_agent_frame_is_invalid() {
        assert_eq!(parse_agent_frame("hello"), Err(ProtocolError::InvalidFormat));
        assert_eq!(
            parse_agent_frame(r#"{"user_id":5}"#),
            Err(ProtocolError::InvalidFormat)
        );
        assert_eq!(
            parse_agent_frame(r#"{"user_id":5,"content":"  "}"#),
            Err(ProtocolError::EmptyContent)
        );
    }

    #[test]
    fn test_user_frame_plain_text_is_verbatim() {
        let msg = parse_user_frame("  where is my parcel? ").unwrap();
        assert_eq!(msg.content, "  where is my parcel? ");
        assert_eq!(msg.kind, MessageKind::Text);
        assert!(msg.file_name.is_none());
    }

    #[test]
    fn test_user_frame_json_with_attachment() {
        let msg = parse_user_frame(
            r#"{"content":"https://cdn.example/a.png","type":"image","file_name":"a.png"}"#,
        )
        .unwrap();
        assert_eq!(msg.kind, MessageKind::Image);
        assert_eq!(msg.file_name.as_deref(), Some("a.png"));
    }

    #[test]
    fn test_user_frame_empty_is_rejected() {
        assert_eq!(parse_user_frame(""), Err(ProtocolError::EmptyContent));
        assert_eq!(parse_user_frame(r#"{"content":""}"#), Err(ProtocolError::EmptyContent));
    }

    #[test]
    fn test_response_serialization_shape() {
        let json = serde_json::to_value(ServerFrame::from(ServerResponse::error("nope"))).unwrap();
        assert_eq!(json, serde_json::json!({"status": "error", "message": "nope"}));

        let json = serde_json::to_value(ServerFrame::from(ServerResponse::success(
            "Waiting users list.",
            Some(serde_json::json!([1, 2])),
        )))
        .unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["payload"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_chat_frame_serialization_shape() {
        let json = serde_json::to_value(ServerFrame::from(Message::text(4, UNASSIGNED, "hey")))
            .unwrap();
        assert_eq!(json["from_id"], 4);
        assert_eq!(json["to_id"], 0);
        assert_eq!(json["content"], "hey");
        assert_eq!(json["type"], "text");
        assert!(json.get("file_name").is_none());
        assert!(json["created_at"].is_string());
    }
}

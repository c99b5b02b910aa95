//! Chat domain types
//!
//! Rooms, memberships and messages, plus the JSON frames exchanged over the
//! per-room WebSocket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::ApiError;

/// Characters of a replied-to message quoted in the reply.
pub const REPLY_PREVIEW_CHARS: usize = 100;
pub const DEFAULT_MESSAGE_PAGE: i64 = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    #[default]
    Direct,
    Project,
    Group,
}

string_enum!(RoomType);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    #[default]
    Member,
    Admin,
    Owner,
}

string_enum!(MemberRole);

impl MemberRole {
    pub fn can_manage(self) -> bool {
        matches!(self, Self::Admin | Self::Owner)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    System,
}

string_enum!(MessageType);

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ChatRoom {
    pub id: Uuid,
    pub name: Option<String>,
    pub room_type: String,
    pub project_id: Option<Uuid>,
    pub created_by: Uuid,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatRoom {
    pub fn room_type(&self) -> RoomType {
        self.room_type.parse().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Membership {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub joined_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub is_muted: bool,
}

impl Membership {
    pub fn role(&self) -> MemberRole {
        self.role.parse().unwrap_or_default()
    }
}

/// Adding participants needs admin/owner, except in direct rooms.
pub fn can_add_participant(actor: Option<MemberRole>, room_type: RoomType) -> bool {
    room_type == RoomType::Direct || actor.map(MemberRole::can_manage).unwrap_or(false)
}

/// Anyone may remove themselves; removing others needs admin/owner.
pub fn can_remove_participant(actor: Option<MemberRole>, actor_id: Uuid, target_id: Uuid) -> bool {
    actor_id == target_id || actor.map(MemberRole::can_manage).unwrap_or(false)
}

/// Message row joined with sender and reply information
#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub content: String,
    pub message_type: String,
    pub file: Option<String>,
    pub image: Option<String>,
    pub reply_to: Option<Uuid>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub sender_first_name: Option<String>,
    pub sender_last_name: Option<String>,
    pub sender_avatar: Option<String>,
    pub reply_content: Option<String>,
    pub reply_sender_first_name: Option<String>,
    pub reply_sender_last_name: Option<String>,
}

/// Columns and joins that produce a [`MessageRow`]; callers append WHERE.
pub const MESSAGE_SELECT: &str = r#"
    SELECT m.id, m.room_id, m.sender_id, m.content, m.message_type, m.file, m.image,
           m.reply_to, m.is_edited, m.edited_at, m.created_at,
           s.first_name AS sender_first_name, s.last_name AS sender_last_name,
           s.avatar AS sender_avatar,
           r.content AS reply_content,
           rs.first_name AS reply_sender_first_name, rs.last_name AS reply_sender_last_name
    FROM messages m
    LEFT JOIN users s ON s.id = m.sender_id
    LEFT JOIN messages r ON r.id = m.reply_to
    LEFT JOIN users rs ON rs.id = r.sender_id
"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageSender {
    pub id: Uuid,
    pub name: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyPreview {
    pub id: Uuid,
    pub content: String,
    pub sender_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageView {
    pub id: Uuid,
    pub room_id: Uuid,
    pub content: String,
    pub sender: Option<MessageSender>,
    pub message_type: String,
    pub file: Option<String>,
    pub image: Option<String>,
    pub reply_to: Option<ReplyPreview>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<MessageRow> for MessageView {
    fn from(m: MessageRow) -> Self {
        let name = |first: Option<String>, last: Option<String>| {
            crate::domain::accounts::full_name(
                first.as_deref().unwrap_or_default(),
                last.as_deref().unwrap_or_default(),
            )
        };
        let sender = m.sender_id.map(|id| MessageSender {
            id,
            name: name(m.sender_first_name.clone(), m.sender_last_name.clone()),
            avatar: m.sender_avatar.clone(),
        });
        let reply_to = m.reply_to.map(|id| ReplyPreview {
            id,
            content: m
                .reply_content
                .as_deref()
                .unwrap_or_default()
                .chars()
                .take(REPLY_PREVIEW_CHARS)
                .collect(),
            sender_name: name(m.reply_sender_first_name, m.reply_sender_last_name),
        });

        Self {
            id: m.id,
            room_id: m.room_id,
            content: m.content,
            sender,
            message_type: m.message_type,
            file: m.file,
            image: m.image,
            reply_to,
            is_edited: m.is_edited,
            edited_at: m.edited_at,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: ChatRoom,
    pub last_message: Option<MessageView>,
    pub unread_count: i64,
    pub participant_count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ParticipantStatus {
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub role: String,
    pub last_seen_in_room: Option<DateTime<Utc>>,
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub room_type: RoomType,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub participant_ids: Vec<Uuid>,
}

impl CreateRoomRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        match self.room_type {
            RoomType::Direct => Err(ApiError::field(
                "room_type",
                "Use the direct room endpoint for one-to-one chats.",
            )),
            RoomType::Project if self.project_id.is_none() => Err(ApiError::field(
                "project_id",
                "Project rooms must reference a project.",
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MessagesQuery {
    /// Only messages created before this message
    #[serde(default)]
    pub before: Option<Uuid>,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl MessagesQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_MESSAGE_PAGE).clamp(1, 100)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddParticipantRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub role: MemberRole,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveParticipantRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageSearchQuery {
    pub q: String,
    #[serde(default)]
    pub room_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatStats {
    pub unread_messages: i64,
    pub total_rooms: i64,
    pub active_rooms: i64,
}

// ============================================================================
// WebSocket frames
// ============================================================================

/// Frames a client sends over the room socket. A frame without `type` is a
/// message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Message {
        content: String,
        reply_to: Option<Uuid>,
    },
    Typing {
        is_typing: bool,
    },
    ReadMessage {
        message_id: Uuid,
    },
    EditMessage {
        message_id: Uuid,
        content: String,
    },
    /// Recognised JSON that carries nothing actionable
    Ignored,
}

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidJson;

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, InvalidJson> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(|_| InvalidJson)?;
        let str_field = |key: &str| {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
        };
        let uuid_field = |key: &str| {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
        };

        let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or("message");
        let frame = match kind {
            "message" => match str_field("content").filter(|c| !c.is_empty()) {
                Some(content) => Self::Message {
                    content,
                    reply_to: uuid_field("reply_to"),
                },
                None => Self::Ignored,
            },
            "typing" => Self::Typing {
                is_typing: value
                    .get("is_typing")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            },
            "read_message" => match uuid_field("message_id") {
                Some(message_id) => Self::ReadMessage { message_id },
                None => Self::Ignored,
            },
            "edit_message" => match (
                uuid_field("message_id"),
                str_field("content").filter(|c| !c.is_empty()),
            ) {
                (Some(message_id), Some(content)) => Self::EditMessage {
                    message_id,
                    content,
                },
                _ => Self::Ignored,
            },
            _ => Self::Ignored,
        };
        Ok(frame)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Frames the server pushes to room sockets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Message {
        message: MessageView,
    },
    Typing {
        user_id: Uuid,
        user_name: String,
        is_typing: bool,
    },
    UserStatus {
        user_id: Uuid,
        status: PresenceStatus,
    },
    MessageEdited {
        message: MessageView,
    },
}

impl ServerFrame {
    /// Typing and presence frames are not sent back to the user they are
    /// about.
    pub fn echoes_to_origin(&self) -> bool {
        matches!(self, Self::Message { .. } | Self::MessageEdited { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_without_type_is_a_message() {
        let frame = ClientFrame::parse(r#"{"content":"  hello  "}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Message {
                content: "hello".into(),
                reply_to: None
            }
        );
    }

    #[test]
    fn empty_message_is_ignored() {
        let frame = ClientFrame::parse(r#"{"type":"message","content":"   "}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ignored);
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert_eq!(ClientFrame::parse("{not json"), Err(InvalidJson));
    }

    #[test]
    fn typing_and_edit_frames() {
        assert_eq!(
            ClientFrame::parse(r#"{"type":"typing","is_typing":true}"#).unwrap(),
            ClientFrame::Typing { is_typing: true }
        );
        let id = Uuid::new_v4();
        let text = format!(r#"{{"type":"edit_message","message_id":"{}","content":"fixed"}}"#, id);
        assert_eq!(
            ClientFrame::parse(&text).unwrap(),
            ClientFrame::EditMessage {
                message_id: id,
                content: "fixed".into()
            }
        );
        assert_eq!(
            ClientFrame::parse(r#"{"type":"read_message","message_id":"bad"}"#).unwrap(),
            ClientFrame::Ignored
        );
    }

    #[test]
    fn server_frames_are_tagged() {
        let user_id = Uuid::new_v4();
        let frame = ServerFrame::UserStatus {
            user_id,
            status: PresenceStatus::Online,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "user_status");
        assert_eq!(json["status"], "online");
        assert!(!frame.echoes_to_origin());
    }

    #[test]
    fn participant_permissions() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(can_add_participant(None, RoomType::Direct));
        assert!(!can_add_participant(Some(MemberRole::Member), RoomType::Group));
        assert!(can_add_participant(Some(MemberRole::Owner), RoomType::Group));
        assert!(can_remove_participant(Some(MemberRole::Member), me, me));
        assert!(!can_remove_participant(Some(MemberRole::Member), me, other));
        assert!(can_remove_participant(Some(MemberRole::Admin), me, other));
    }

    #[test]
    fn reply_preview_is_truncated() {
        let row = MessageRow {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            sender_id: Some(Uuid::new_v4()),
            content: "re".into(),
            message_type: "text".into(),
            file: None,
            image: None,
            reply_to: Some(Uuid::new_v4()),
            is_edited: false,
            edited_at: None,
            created_at: Utc::now(),
            sender_first_name: Some("Ann".into()),
            sender_last_name: Some("Lee".into()),
            sender_avatar: None,
            reply_content: Some("x".repeat(250)),
            reply_sender_first_name: Some("Bo".into()),
            reply_sender_last_name: None,
        };
        let view = MessageView::from(row);
        assert_eq!(view.sender.as_ref().map(|s| s.name.as_str()), Some("Ann Lee"));
        let reply = view.reply_to.unwrap();
        assert_eq!(reply.content.len(), REPLY_PREVIEW_CHARS);
        assert_eq!(reply.sender_name, "Bo");
    }
}

//! Chat routes
//!
//! Rooms, memberships and messages over REST. Messages posted here are also
//! fanned out to the room's WebSocket connections through the chat hub.

use axum::{
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
    Json,
};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{Created, DataResponse, MessageResponse, NoContent};
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::accounts::full_name;
use crate::domain::chat::*;
use crate::domain::contains_pattern;
use crate::domain::moderation::ContentKind;
use crate::domain::notifications::{NewNotification, NotificationType};
use crate::error::{ApiError, ApiResult};
use crate::routes::upload::MultipartForm;
use crate::services::{moderation, notifications};

const SEARCH_LIMIT: i64 = 50;
const ATTACHMENT_MAX_BYTES: usize = 10 * 1024 * 1024;

// ============================================================================
// Shared with the WebSocket handler and the admin chat tools
// ============================================================================

pub(crate) async fn load_room(db: &PgPool, room_id: Uuid) -> ApiResult<ChatRoom> {
    sqlx::query_as("SELECT * FROM chat_rooms WHERE id = $1")
        .bind(room_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Chat room not found"))
}

pub(crate) async fn membership(
    db: &PgPool,
    room_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Membership>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM chat_room_memberships WHERE room_id = $1 AND user_id = $2")
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(db)
        .await
}

/// The room and the caller's membership; non-participants get 403.
pub(crate) async fn require_participant(
    db: &PgPool,
    room_id: Uuid,
    user_id: Uuid,
) -> ApiResult<(ChatRoom, Membership)> {
    let room = load_room(db, room_id).await?;
    let member = membership(db, room_id, user_id)
        .await?
        .ok_or_else(|| ApiError::forbidden("You are not a participant of this chat"))?;
    Ok((room, member))
}

pub(crate) async fn message_view(db: &PgPool, message_id: Uuid) -> ApiResult<MessageView> {
    let row: MessageRow = sqlx::query_as(&format!("{} WHERE m.id = $1", MESSAGE_SELECT))
        .bind(message_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;
    Ok(row.into())
}

/// A message about to be posted to a room
pub(crate) struct OutgoingMessage {
    pub sender_id: Option<Uuid>,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to: Option<Uuid>,
    pub file: Option<String>,
    pub image: Option<String>,
}

impl OutgoingMessage {
    pub fn text(sender_id: Uuid, content: String, reply_to: Option<Uuid>) -> Self {
        Self {
            sender_id: Some(sender_id),
            content,
            message_type: MessageType::Text,
            reply_to,
            file: None,
            image: None,
        }
    }

    pub fn system(content: String) -> Self {
        Self {
            sender_id: None,
            content,
            message_type: MessageType::System,
            reply_to: None,
            file: None,
            image: None,
        }
    }
}

/// Stores a message, broadcasts it to the room and notifies offline
/// participants.
pub(crate) async fn post_message(
    state: &AppState,
    room: &ChatRoom,
    outgoing: OutgoingMessage,
) -> ApiResult<MessageView> {
    if !room.is_active {
        return Err(ApiError::forbidden("This chat has been blocked"));
    }
    if let Some(reply_to) = outgoing.reply_to {
        let same_room: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM messages WHERE id = $1 AND room_id = $2)",
        )
        .bind(reply_to)
        .bind(room.id)
        .fetch_one(&state.db)
        .await?;
        if !same_room {
            return Err(ApiError::field("reply_to", "Replied message is not in this room."));
        }
    }

    let mut tx = state.db.begin().await?;
    let message_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO messages (id, room_id, sender_id, content, message_type, reply_to, file, image)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(room.id)
    .bind(outgoing.sender_id)
    .bind(&outgoing.content)
    .bind(outgoing.message_type.to_string())
    .bind(outgoing.reply_to)
    .bind(&outgoing.file)
    .bind(&outgoing.image)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE chat_rooms SET updated_at = NOW() WHERE id = $1")
        .bind(room.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let view = message_view(&state.db, message_id).await?;
    state.chat_hub.publish(
        room.id,
        outgoing.sender_id,
        ServerFrame::Message {
            message: view.clone(),
        },
    );

    if let Some(sender_id) = outgoing.sender_id {
        if outgoing.message_type == MessageType::Text {
            moderation::auto_moderate(&state.db, ContentKind::Message, message_id, &outgoing.content)
                .await;
        }
        notify_offline_participants(state, room, sender_id, &view).await?;
    }

    Ok(view)
}

async fn notify_offline_participants(
    state: &AppState,
    room: &ChatRoom,
    sender_id: Uuid,
    message: &MessageView,
) -> Result<(), sqlx::Error> {
    let offline: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT u.id FROM chat_room_memberships m
        JOIN users u ON u.id = m.user_id
        WHERE m.room_id = $1 AND m.user_id <> $2 AND NOT u.is_online AND NOT m.is_muted
        "#,
    )
    .bind(room.id)
    .bind(sender_id)
    .fetch_all(&state.db)
    .await?;

    let sender_name = message
        .sender
        .as_ref()
        .map(|s| s.name.clone())
        .unwrap_or_default();
    let preview: String = match message.message_type.parse::<MessageType>() {
        Ok(MessageType::Image) => "Sent an image".to_string(),
        Ok(MessageType::File) => "Sent a file".to_string(),
        _ => message.content.chars().take(REPLY_PREVIEW_CHARS).collect(),
    };

    for user_id in offline {
        notifications::notify(
            state,
            NewNotification::new(
                user_id,
                NotificationType::NewMessage,
                format!("New message from {}", sender_name),
                preview.clone(),
            )
            .related_to("chat_room", room.id)
            .with_data(serde_json::json!({ "message_id": message.id })),
        )
        .await;
    }
    Ok(())
}

/// Edits the caller's own text message and broadcasts the edit.
pub(crate) async fn edit_message(
    state: &AppState,
    user_id: Uuid,
    message_id: Uuid,
    content: &str,
) -> ApiResult<MessageView> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ApiError::field("content", "This field may not be blank."));
    }
    let view = message_view(&state.db, message_id).await?;
    if view.sender.as_ref().map(|s| s.id) != Some(user_id) {
        return Err(ApiError::forbidden("You can only edit your own messages"));
    }
    if view.message_type != MessageType::Text.to_string() {
        return Err(ApiError::bad_request("Only text messages can be edited"));
    }

    sqlx::query(
        "UPDATE messages SET content = $2, is_edited = TRUE, edited_at = NOW() WHERE id = $1",
    )
    .bind(message_id)
    .bind(content)
    .execute(&state.db)
    .await?;

    let view = message_view(&state.db, message_id).await?;
    state.chat_hub.publish(
        view.room_id,
        Some(user_id),
        ServerFrame::MessageEdited {
            message: view.clone(),
        },
    );
    Ok(view)
}

/// Marks messages read for a user; their own messages are skipped.
pub(crate) async fn mark_read(db: &PgPool, user_id: Uuid, message_ids: &[Uuid]) -> Result<u64, sqlx::Error> {
    if message_ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(
        r#"
        INSERT INTO message_read_status (message_id, user_id)
        SELECT m.id, $2 FROM messages m
        WHERE m.id = ANY($1) AND m.sender_id IS DISTINCT FROM $2
        ON CONFLICT (message_id, user_id) DO NOTHING
        "#,
    )
    .bind(message_ids)
    .bind(user_id)
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn user_name(db: &PgPool, user_id: Uuid) -> Result<String, sqlx::Error> {
    let name: Option<(String, String, String)> =
        sqlx::query_as("SELECT first_name, last_name, email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(db)
            .await?;
    Ok(match name {
        Some((first, last, email)) => {
            let full = full_name(&first, &last);
            if full.is_empty() {
                email
            } else {
                full
            }
        }
        None => String::new(),
    })
}

// ============================================================================
// Rooms
// ============================================================================

#[derive(Debug, FromRow)]
struct RoomListRow {
    #[sqlx(flatten)]
    room: ChatRoom,
    last_message_id: Option<Uuid>,
    unread_count: i64,
    participant_count: i64,
}

async fn room_summaries(db: &PgPool, user_id: Uuid, room_id: Option<Uuid>) -> ApiResult<Vec<RoomSummary>> {
    let rows: Vec<RoomListRow> = sqlx::query_as(
        r#"
        SELECT r.*,
            (SELECT m.id FROM messages m WHERE m.room_id = r.id
             ORDER BY m.created_at DESC LIMIT 1) AS last_message_id,
            (SELECT COUNT(*) FROM messages m
             WHERE m.room_id = r.id AND m.sender_id IS DISTINCT FROM $1
               AND NOT EXISTS (SELECT 1 FROM message_read_status s
                               WHERE s.message_id = m.id AND s.user_id = $1)) AS unread_count,
            (SELECT COUNT(*) FROM chat_room_memberships pm WHERE pm.room_id = r.id) AS participant_count
        FROM chat_rooms r
        JOIN chat_room_memberships cm ON cm.room_id = r.id AND cm.user_id = $1
        WHERE r.is_active = TRUE AND ($2::uuid IS NULL OR r.id = $2)
        ORDER BY r.updated_at DESC
        "#,
    )
    .bind(user_id)
    .bind(room_id)
    .fetch_all(db)
    .await?;

    let last_ids: Vec<Uuid> = rows.iter().filter_map(|r| r.last_message_id).collect();
    let messages: Vec<MessageRow> = sqlx::query_as(&format!("{} WHERE m.id = ANY($1)", MESSAGE_SELECT))
        .bind(&last_ids)
        .fetch_all(db)
        .await?;
    let mut by_id: HashMap<Uuid, MessageView> =
        messages.into_iter().map(|m| (m.id, MessageView::from(m))).collect();

    Ok(rows
        .into_iter()
        .map(|row| RoomSummary {
            last_message: row.last_message_id.and_then(|id| by_id.remove(&id)),
            unread_count: row.unread_count,
            participant_count: row.participant_count,
            room: row.room,
        })
        .collect())
}

/// GET /api/chat/rooms
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<impl IntoResponse> {
    Ok(DataResponse::new(room_summaries(&state.db, auth.user_id, None).await?))
}

/// POST /api/chat/rooms
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<CreateRoomRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    if let Some(project_id) = req.project_id {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM projects WHERE id = $1)")
            .bind(project_id)
            .fetch_one(&state.db)
            .await?;
        if !exists {
            return Err(ApiError::field("project_id", "Project not found."));
        }
    }

    let mut tx = state.db.begin().await?;
    let room: ChatRoom = sqlx::query_as(
        r#"
        INSERT INTO chat_rooms (id, name, room_type, project_id, created_by)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&req.name)
    .bind(req.room_type.to_string())
    .bind(req.project_id)
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO chat_room_memberships (room_id, user_id, role) VALUES ($1, $2, 'owner')")
        .bind(room.id)
        .bind(auth.user_id)
        .execute(&mut *tx)
        .await?;

    let others: Vec<Uuid> = req
        .participant_ids
        .iter()
        .copied()
        .filter(|id| *id != auth.user_id)
        .collect();
    sqlx::query(
        r#"
        INSERT INTO chat_room_memberships (room_id, user_id, role)
        SELECT $1, u.id, 'member' FROM users u WHERE u.id = ANY($2) AND u.is_active
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(room.id)
    .bind(&others)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(room_id = %room.id, user_id = %auth.user_id, room_type = %req.room_type, "Chat room created");
    Ok(Created(DataResponse::new(room)))
}

/// GET /api/chat/rooms/:room_id
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(room_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    require_participant(&state.db, room_id, auth.user_id).await?;
    let summary = room_summaries(&state.db, auth.user_id, Some(room_id))
        .await?
        .pop()
        .ok_or_else(|| ApiError::not_found("Chat room not found"))?;
    Ok(DataResponse::new(summary))
}

/// POST /api/chat/direct/:user_id
pub async fn direct_room(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(other_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    if other_id == auth.user_id {
        return Err(ApiError::bad_request("You cannot start a chat with yourself"));
    }
    let other_active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM users WHERE id = $1")
        .bind(other_id)
        .fetch_optional(&state.db)
        .await?;
    if other_active != Some(true) {
        return Err(ApiError::not_found("User not found"));
    }

    let existing: Option<ChatRoom> = sqlx::query_as(
        r#"
        SELECT r.* FROM chat_rooms r
        WHERE r.room_type = 'direct'
          AND EXISTS (SELECT 1 FROM chat_room_memberships m WHERE m.room_id = r.id AND m.user_id = $1)
          AND EXISTS (SELECT 1 FROM chat_room_memberships m WHERE m.room_id = r.id AND m.user_id = $2)
          AND (SELECT COUNT(*) FROM chat_room_memberships m WHERE m.room_id = r.id) = 2
        LIMIT 1
        "#,
    )
    .bind(auth.user_id)
    .bind(other_id)
    .fetch_optional(&state.db)
    .await?;
    if let Some(room) = existing {
        return Ok(DataResponse::new(room));
    }

    let mut tx = state.db.begin().await?;
    let room: ChatRoom = sqlx::query_as(
        r#"
        INSERT INTO chat_rooms (id, room_type, created_by)
        VALUES ($1, 'direct', $2)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await?;
    sqlx::query(
        r#"
        INSERT INTO chat_room_memberships (room_id, user_id, role)
        VALUES ($1, $2, 'member'), ($1, $3, 'member')
        "#,
    )
    .bind(room.id)
    .bind(auth.user_id)
    .bind(other_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(room_id = %room.id, "Direct chat room created");
    Ok(DataResponse::new(room))
}

// ============================================================================
// Messages
// ============================================================================

/// GET /api/chat/rooms/:room_id/messages
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(room_id): Path<Uuid>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<impl IntoResponse> {
    require_participant(&state.db, room_id, auth.user_id).await?;

    let rows: Vec<MessageRow> = sqlx::query_as(&format!(
        r#"
        {}
        WHERE m.room_id = $1
          AND ($2::uuid IS NULL OR m.created_at < (SELECT created_at FROM messages WHERE id = $2))
        ORDER BY m.created_at DESC
        LIMIT $3
        "#,
        MESSAGE_SELECT
    ))
    .bind(room_id)
    .bind(query.before)
    .bind(query.limit())
    .fetch_all(&state.db)
    .await?;

    let ids: Vec<Uuid> = rows.iter().map(|m| m.id).collect();
    mark_read(&state.db, auth.user_id, &ids).await?;
    sqlx::query("UPDATE chat_room_memberships SET last_seen_at = NOW() WHERE room_id = $1 AND user_id = $2")
        .bind(room_id)
        .bind(auth.user_id)
        .execute(&state.db)
        .await?;

    // Oldest first for display.
    let mut messages: Vec<MessageView> = rows.into_iter().map(Into::into).collect();
    messages.reverse();
    Ok(DataResponse::new(messages))
}

/// POST /api/chat/rooms/:room_id/messages
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(room_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let (room, _) = require_participant(&state.db, room_id, auth.user_id).await?;
    let content = req.content.trim();
    if content.is_empty() {
        return Err(ApiError::field("content", "This field may not be blank."));
    }

    let view = post_message(
        &state,
        &room,
        OutgoingMessage::text(auth.user_id, content.to_string(), req.reply_to),
    )
    .await?;
    Ok(Created(DataResponse::new(view)))
}

async fn message_for_participant(db: &PgPool, message_id: Uuid, user_id: Uuid) -> ApiResult<MessageView> {
    let view = message_view(db, message_id).await?;
    require_participant(db, view.room_id, user_id).await?;
    Ok(view)
}

/// GET /api/chat/messages/:message_id
pub async fn get_message(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(message_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(DataResponse::new(
        message_for_participant(&state.db, message_id, auth.user_id).await?,
    ))
}

/// PATCH /api/chat/messages/:message_id
pub async fn update_message(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(message_id): Path<Uuid>,
    Json(req): Json<UpdateMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    message_for_participant(&state.db, message_id, auth.user_id).await?;
    let view = edit_message(&state, auth.user_id, message_id, &req.content).await?;
    Ok(DataResponse::new(view))
}

/// DELETE /api/chat/messages/:message_id
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(message_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let view = message_for_participant(&state.db, message_id, auth.user_id).await?;
    if view.sender.as_ref().map(|s| s.id) != Some(auth.user_id) {
        return Err(ApiError::forbidden("You can only delete your own messages"));
    }

    sqlx::query("DELETE FROM messages WHERE id = $1")
        .bind(message_id)
        .execute(&state.db)
        .await?;
    for url in view.image.iter().chain(view.file.iter()) {
        if let Err(e) = state.storage.delete(url).await {
            tracing::warn!(message_id = %message_id, error = %e, "Failed to remove message attachment");
        }
    }
    Ok(NoContent)
}

/// POST /api/chat/messages/:message_id/read
pub async fn mark_message_read(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(message_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    message_for_participant(&state.db, message_id, auth.user_id).await?;
    mark_read(&state.db, auth.user_id, &[message_id]).await?;
    Ok(MessageResponse::new("Message marked as read"))
}

async fn upload_attachment(
    state: &AppState,
    user_id: Uuid,
    multipart: Multipart,
    message_type: MessageType,
) -> ApiResult<MessageView> {
    let mut form = MultipartForm::read(multipart).await?;
    let room_id = form
        .text("room_id")
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        .ok_or_else(|| ApiError::field("room_id", "A valid room_id is required."))?;
    let (room, _) = require_participant(&state.db, room_id, user_id).await?;

    let (field, folder) = match message_type {
        MessageType::Image => ("image", "chat/images"),
        _ => ("file", "chat/files"),
    };
    let file = form.take_file(field)?;
    if message_type == MessageType::Image {
        crate::domain::accounts::validate_avatar(file.content_type.as_deref(), file.size())
            .map_err(|_| ApiError::field("image", "Upload a valid image up to 5MB."))?;
    } else if file.size() > ATTACHMENT_MAX_BYTES {
        return Err(ApiError::field("file", "File size cannot exceed 10MB."));
    }
    let content = form
        .text("content")
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| file.file_name.clone());

    let url = state.storage.save(folder, &file.file_name, &file.bytes).await?;
    let (image, file_url) = match message_type {
        MessageType::Image => (Some(url), None),
        _ => (None, Some(url)),
    };

    post_message(
        state,
        &room,
        OutgoingMessage {
            sender_id: Some(user_id),
            content,
            message_type,
            reply_to: None,
            file: file_url,
            image,
        },
    )
    .await
}

/// POST /api/chat/upload/image (multipart `room_id`, `image`, `content`)
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let view = upload_attachment(&state, auth.user_id, multipart, MessageType::Image).await?;
    Ok(Created(DataResponse::new(view)))
}

/// POST /api/chat/upload/file (multipart `room_id`, `file`, `content`)
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let view = upload_attachment(&state, auth.user_id, multipart, MessageType::File).await?;
    Ok(Created(DataResponse::new(view)))
}

// ============================================================================
// Participants
// ============================================================================

/// GET /api/chat/rooms/:room_id/participants
pub async fn list_participants(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(room_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    require_participant(&state.db, room_id, auth.user_id).await?;
    let participants: Vec<ParticipantStatus> = sqlx::query_as(
        r#"
        SELECT u.id AS user_id, u.first_name, u.last_name, u.avatar, u.is_online, u.last_seen,
               m.role, m.last_seen_at AS last_seen_in_room
        FROM chat_room_memberships m
        JOIN users u ON u.id = m.user_id
        WHERE m.room_id = $1
        ORDER BY m.joined_at
        "#,
    )
    .bind(room_id)
    .fetch_all(&state.db)
    .await?;
    Ok(DataResponse::new(participants))
}

/// POST /api/chat/rooms/:room_id/add-participant
pub async fn add_participant(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(room_id): Path<Uuid>,
    Json(req): Json<AddParticipantRequest>,
) -> ApiResult<impl IntoResponse> {
    let (room, actor) = require_participant(&state.db, room_id, auth.user_id).await?;
    if !can_add_participant(Some(actor.role()), room.room_type()) {
        return Err(ApiError::forbidden("Only room admins can add participants"));
    }
    let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM users WHERE id = $1")
        .bind(req.user_id)
        .fetch_optional(&state.db)
        .await?;
    if active != Some(true) {
        return Err(ApiError::field("user_id", "User not found."));
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO chat_room_memberships (room_id, user_id, role)
        VALUES ($1, $2, $3)
        ON CONFLICT (room_id, user_id) DO NOTHING
        "#,
    )
    .bind(room_id)
    .bind(req.user_id)
    .bind(req.role.to_string())
    .execute(&state.db)
    .await?
    .rows_affected();
    if inserted == 0 {
        return Err(ApiError::bad_request("User is already a participant"));
    }

    let name = user_name(&state.db, req.user_id).await?;
    post_message(&state, &room, OutgoingMessage::system(format!("{} joined the chat", name))).await?;

    Ok(MessageResponse::new("Participant added"))
}

/// POST /api/chat/rooms/:room_id/remove-participant
pub async fn remove_participant(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(room_id): Path<Uuid>,
    Json(req): Json<RemoveParticipantRequest>,
) -> ApiResult<impl IntoResponse> {
    let (room, actor) = require_participant(&state.db, room_id, auth.user_id).await?;
    if !can_remove_participant(Some(actor.role()), auth.user_id, req.user_id) {
        return Err(ApiError::forbidden("Only room admins can remove other participants"));
    }

    let removed = sqlx::query("DELETE FROM chat_room_memberships WHERE room_id = $1 AND user_id = $2")
        .bind(room_id)
        .bind(req.user_id)
        .execute(&state.db)
        .await?
        .rows_affected();
    if removed == 0 {
        return Err(ApiError::not_found("Participant not found"));
    }

    let name = user_name(&state.db, req.user_id).await?;
    post_message(&state, &room, OutgoingMessage::system(format!("{} left the chat", name))).await?;

    Ok(MessageResponse::new("Participant removed"))
}

// ============================================================================
// Search and stats
// ============================================================================

/// GET /api/chat/search
pub async fn search_messages(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Query(query): Query<MessageSearchQuery>,
) -> ApiResult<impl IntoResponse> {
    let q = query.q.trim();
    if q.is_empty() {
        return Err(ApiError::field("q", "This field may not be blank."));
    }

    let rows: Vec<MessageRow> = sqlx::query_as(&format!(
        r#"
        {}
        WHERE m.content ILIKE $1
          AND m.room_id IN (SELECT room_id FROM chat_room_memberships WHERE user_id = $2)
          AND ($3::uuid IS NULL OR m.room_id = $3)
        ORDER BY m.created_at DESC
        LIMIT $4
        "#,
        MESSAGE_SELECT
    ))
    .bind(contains_pattern(q))
    .bind(auth.user_id)
    .bind(query.room_id)
    .bind(SEARCH_LIMIT)
    .fetch_all(&state.db)
    .await?;

    let messages: Vec<MessageView> = rows.into_iter().map(Into::into).collect();
    Ok(DataResponse::new(messages))
}

/// GET /api/chat/stats
pub async fn chat_stats(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<impl IntoResponse> {
    let (total_rooms, active_rooms): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*), COUNT(*) FILTER (WHERE r.is_active)
        FROM chat_rooms r
        JOIN chat_room_memberships m ON m.room_id = r.id
        WHERE m.user_id = $1
        "#,
    )
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await?;

    let unread_messages: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM messages msg
        JOIN chat_room_memberships m ON m.room_id = msg.room_id AND m.user_id = $1
        WHERE msg.sender_id IS DISTINCT FROM $1
          AND NOT EXISTS (SELECT 1 FROM message_read_status s
                          WHERE s.message_id = msg.id AND s.user_id = $1)
        "#,
    )
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await?;

    Ok(DataResponse::new(ChatStats {
        unread_messages,
        total_rooms,
        active_rooms,
    }))
}

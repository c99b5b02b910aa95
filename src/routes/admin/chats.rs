//! Chat oversight: listing rooms, blocking them, posting system messages

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::record;
use crate::api::{Created, DataResponse, MessageResponse, NoContent, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireAdmin;
use crate::domain::accounts::UserSummary;
use crate::domain::admin::*;
use crate::domain::contains_pattern;
use crate::domain::chat::{ChatRoom, MessageRow, MessageView, MESSAGE_SELECT};
use crate::error::{ApiError, ApiResult};
use crate::middleware::ClientIp;
use crate::routes::chat::{load_room, post_message, OutgoingMessage};
use crate::services::audit::AuditEntry;
use crate::services::templates;

const RECENT_MESSAGES: i64 = 50;

#[derive(Debug, Serialize)]
pub struct AdminChatDetail {
    pub room: ChatRoom,
    pub participants: Vec<UserSummary>,
    pub messages: Vec<MessageView>,
    pub system_messages: Vec<SystemMessage>,
}

/// GET /admin/chats
pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<AdminChatQuery>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ViewChats)?;

    let search = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(contains_pattern);
    let is_active = filter.is_active();

    const WHERE: &str = r#"
        WHERE ($1::bool IS NULL OR r.is_active = $1)
          AND ($2::text IS NULL OR r.room_type = $2)
          AND ($3::text IS NULL OR r.name ILIKE $3)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM chat_rooms r {}", WHERE))
        .bind(is_active)
        .bind(&filter.room_type)
        .bind(&search)
        .fetch_one(&state.db)
        .await?;

    let rows: Vec<AdminChatRow> = sqlx::query_as(&format!(
        r#"
        SELECT r.id, r.name, r.room_type, r.project_id, r.is_active, r.created_at, r.updated_at,
               (SELECT COUNT(*) FROM chat_room_memberships cm WHERE cm.room_id = r.id) AS participant_count,
               (SELECT COUNT(*) FROM messages m WHERE m.room_id = r.id) AS message_count
        FROM chat_rooms r
        {}
        ORDER BY r.updated_at DESC
        LIMIT $4 OFFSET $5
        "#,
        WHERE
    ))
    .bind(is_active)
    .bind(&filter.room_type)
    .bind(&search)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(Paginated::new(rows, &pagination, total))
}

/// GET /admin/chats/:room_id
pub async fn get_chat(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(room_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ViewChats)?;
    let room = load_room(&state.db, room_id).await?;

    let participants: Vec<UserSummary> = sqlx::query_as(
        r#"
        SELECT u.id, u.email, u.first_name, u.last_name, u.avatar, u.user_type
        FROM chat_room_memberships cm
        JOIN users u ON u.id = cm.user_id
        WHERE cm.room_id = $1
        ORDER BY cm.joined_at
        "#,
    )
    .bind(room_id)
    .fetch_all(&state.db)
    .await?;

    let mut rows: Vec<MessageRow> = sqlx::query_as(&format!(
        "{} WHERE m.room_id = $1 ORDER BY m.created_at DESC LIMIT $2",
        MESSAGE_SELECT
    ))
    .bind(room_id)
    .bind(RECENT_MESSAGES)
    .fetch_all(&state.db)
    .await?;
    rows.reverse();

    let system_messages: Vec<SystemMessage> = sqlx::query_as(
        "SELECT * FROM system_messages WHERE room_id = $1 ORDER BY created_at DESC",
    )
    .bind(room_id)
    .fetch_all(&state.db)
    .await?;

    Ok(DataResponse::new(AdminChatDetail {
        room,
        participants,
        messages: rows.into_iter().map(Into::into).collect(),
        system_messages,
    }))
}

async fn set_active(state: &AppState, room_ids: &[Uuid], active: bool) -> ApiResult<u64> {
    let updated = sqlx::query(
        "UPDATE chat_rooms SET is_active = $2, updated_at = NOW() WHERE id = ANY($1) AND is_active <> $2",
    )
    .bind(room_ids)
    .bind(active)
    .execute(&state.db)
    .await?
    .rows_affected();
    Ok(updated)
}

async fn toggle(
    state: &AppState,
    admin: &RequireAdmin,
    ip: &ClientIp,
    room_id: Uuid,
    action: ChatBlockAction,
) -> ApiResult<&'static str> {
    admin.require(Permission::ModerateChats)?;
    let room = load_room(&state.db, room_id).await?;
    let (active, audit, verb) = match action {
        ChatBlockAction::Block => (false, AdminActionType::Ban, "blocked"),
        ChatBlockAction::Unblock => (true, AdminActionType::Unban, "unblocked"),
    };
    if room.is_active == active {
        return Err(ApiError::bad_request(format!("Chat is already {}", verb)));
    }
    set_active(state, &[room_id], active).await?;

    record(
        state,
        admin,
        ip,
        AuditEntry::new(audit, format!("Chat {} {}", room_id, verb))
            .target("chat_room", room_id)
            .old_values(json!({ "is_active": room.is_active }))
            .new_values(json!({ "is_active": active })),
    )
    .await?;

    tracing::info!(room_id = %room_id, admin_id = %admin.user_id, action = verb, "Chat moderated");
    Ok(verb)
}

/// POST /admin/chats/:room_id/block
pub async fn block_chat(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(room_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    toggle(&state, &admin, &ip, room_id, ChatBlockAction::Block).await?;
    Ok(MessageResponse::new("Chat blocked"))
}

/// POST /admin/chats/:room_id/unblock
pub async fn unblock_chat(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(room_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    toggle(&state, &admin, &ip, room_id, ChatBlockAction::Unblock).await?;
    Ok(MessageResponse::new("Chat unblocked"))
}

/// POST /admin/chats/bulk
pub async fn bulk_action(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<BulkChatRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ModerateChats)?;
    if req.room_ids.is_empty() {
        return Err(ApiError::field("room_ids", "This list may not be empty."));
    }

    let (active, audit, verb) = match req.action {
        ChatBlockAction::Block => (false, AdminActionType::Ban, "blocked"),
        ChatBlockAction::Unblock => (true, AdminActionType::Unban, "unblocked"),
    };
    let processed = set_active(&state, &req.room_ids, active).await? as i64;
    let result = BulkResult {
        processed,
        skipped: req.room_ids.len() as i64 - processed,
    };

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(audit, format!("Bulk {} {} chats", verb, processed))
            .new_values(json!({ "room_ids": req.room_ids, "is_active": active })),
    )
    .await?;

    Ok(DataResponse::new(result))
}

/// POST /admin/chats/:room_id/system-message
///
/// Either a literal message or a rendered template. The message is posted
/// into the room as a system message and also kept in `system_messages`.
pub async fn send_system_message(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(room_id): Path<Uuid>,
    Json(req): Json<SystemMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendSystemMessages)?;
    req.validate()?;
    let room = load_room(&state.db, room_id).await?;

    let content = match req.template_id {
        Some(template_id) => {
            let template = load_template(&state, template_id).await?;
            if !template.is_active {
                return Err(ApiError::bad_request("Template is inactive"));
            }
            templates::render(&template.content, &req.context)
        }
        None => req.message.clone().unwrap_or_default().trim().to_string(),
    };
    if content.trim().is_empty() {
        return Err(ApiError::field("message", "Rendered message is empty."));
    }

    let message = post_message(&state, &room, OutgoingMessage::system(content.clone())).await?;

    let system_message: SystemMessage = sqlx::query_as(
        r#"
        INSERT INTO system_messages (id, room_id, admin_user_id, message, template_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(room_id)
    .bind(admin.user_id)
    .bind(&content)
    .bind(req.template_id)
    .fetch_one(&state.db)
    .await?;

    if let Some(template_id) = req.template_id {
        sqlx::query("UPDATE message_templates SET usage_count = usage_count + 1 WHERE id = $1")
            .bind(template_id)
            .execute(&state.db)
            .await?;
    }

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Create, format!("System message in chat {}", room_id))
            .target("chat_room", room_id)
            .new_values(json!({ "message_id": message.id, "template_id": req.template_id })),
    )
    .await?;

    Ok(Created(system_message))
}

// ============================================================================
// Message templates
// ============================================================================

async fn load_template(state: &AppState, template_id: Uuid) -> ApiResult<MessageTemplate> {
    sqlx::query_as("SELECT * FROM message_templates WHERE id = $1")
        .bind(template_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Message template not found"))
}

/// GET /admin/chats/templates
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendSystemMessages)?;
    let templates: Vec<MessageTemplate> =
        sqlx::query_as("SELECT * FROM message_templates ORDER BY category, name")
            .fetch_all(&state.db)
            .await?;
    Ok(DataResponse::new(templates))
}

/// POST /admin/chats/templates
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<MessageTemplateRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendSystemMessages)?;
    req.validate()?;

    let template: MessageTemplate = sqlx::query_as(
        r#"
        INSERT INTO message_templates (id, name, category, content, available_variables, is_active, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.name.trim())
    .bind(req.category.to_string())
    .bind(&req.content)
    .bind(sqlx::types::Json(&req.available_variables))
    .bind(req.is_active)
    .bind(admin.user_id)
    .fetch_one(&state.db)
    .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Create, format!("Created message template {}", template.name))
            .target("message_template", template.id)
            .new_values(json!({ "name": template.name, "category": template.category })),
    )
    .await?;

    Ok(Created(template))
}

/// PUT /admin/chats/templates/:template_id
pub async fn update_template(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(template_id): Path<Uuid>,
    Json(req): Json<MessageTemplateRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendSystemMessages)?;
    req.validate()?;
    let before = load_template(&state, template_id).await?;

    let template: MessageTemplate = sqlx::query_as(
        r#"
        UPDATE message_templates
        SET name = $2, category = $3, content = $4, available_variables = $5,
            is_active = $6, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(template_id)
    .bind(req.name.trim())
    .bind(req.category.to_string())
    .bind(&req.content)
    .bind(sqlx::types::Json(&req.available_variables))
    .bind(req.is_active)
    .fetch_one(&state.db)
    .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Update, format!("Updated message template {}", template.name))
            .target("message_template", template_id)
            .old_values(json!({ "name": before.name, "content": before.content }))
            .new_values(json!({ "name": template.name, "content": template.content })),
    )
    .await?;

    Ok(DataResponse::new(template))
}

/// DELETE /admin/chats/templates/:template_id
pub async fn delete_template(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(template_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendSystemMessages)?;
    let template = load_template(&state, template_id).await?;

    sqlx::query("DELETE FROM message_templates WHERE id = $1")
        .bind(template_id)
        .execute(&state.db)
        .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Delete, format!("Deleted message template {}", template.name))
            .target("message_template", template_id)
            .old_values(json!({ "name": template.name })),
    )
    .await?;

    Ok(NoContent)
}

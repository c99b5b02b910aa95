//! Email templates and campaigns

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use super::{admin_person, record};
use crate::api::{Created, DataResponse, MessageResponse, NoContent};
use crate::app::AppState;
use crate::auth::RequireAdmin;
use crate::domain::admin::*;
use crate::error::{ApiError, ApiResult};
use crate::middleware::ClientIp;
use crate::services::audience;
use crate::services::audit::AuditEntry;
use crate::services::email::render_template;
use crate::services::jobs::Job;
use crate::services::templates::{self, Person};

const AUDIENCE_SAMPLE: i64 = 10;

// ============================================================================
// Templates
// ============================================================================

async fn load_template(state: &AppState, template_id: Uuid) -> ApiResult<EmailTemplate> {
    sqlx::query_as("SELECT * FROM email_templates WHERE id = $1")
        .bind(template_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Email template not found"))
}

/// GET /admin/email/templates
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageEmailTemplates)?;
    let templates: Vec<EmailTemplate> =
        sqlx::query_as("SELECT * FROM email_templates ORDER BY updated_at DESC")
            .fetch_all(&state.db)
            .await?;
    Ok(DataResponse::new(templates))
}

/// POST /admin/email/templates
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<EmailTemplateRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageEmailTemplates)?;
    req.validate()?;

    let template: EmailTemplate = sqlx::query_as(
        r#"
        INSERT INTO email_templates (id, name, template_type, subject, html_content, text_content, is_active, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.name.trim())
    .bind(req.template_type.to_string())
    .bind(&req.subject)
    .bind(&req.html_content)
    .bind(&req.text_content)
    .bind(req.is_active)
    .bind(admin.user_id)
    .fetch_one(&state.db)
    .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Create, format!("Created email template {}", template.name))
            .target("email_template", template.id)
            .new_values(json!({ "name": template.name, "template_type": template.template_type })),
    )
    .await?;

    Ok(Created(template))
}

/// GET /admin/email/templates/:template_id
pub async fn get_template(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(template_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageEmailTemplates)?;
    Ok(DataResponse::new(load_template(&state, template_id).await?))
}

/// PUT /admin/email/templates/:template_id
pub async fn update_template(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(template_id): Path<Uuid>,
    Json(req): Json<EmailTemplateRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageEmailTemplates)?;
    req.validate()?;
    let before = load_template(&state, template_id).await?;

    let template: EmailTemplate = sqlx::query_as(
        r#"
        UPDATE email_templates
        SET name = $2, template_type = $3, subject = $4, html_content = $5,
            text_content = $6, is_active = $7, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(template_id)
    .bind(req.name.trim())
    .bind(req.template_type.to_string())
    .bind(&req.subject)
    .bind(&req.html_content)
    .bind(&req.text_content)
    .bind(req.is_active)
    .fetch_one(&state.db)
    .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Update, format!("Updated email template {}", template.name))
            .target("email_template", template_id)
            .old_values(json!({ "name": before.name, "subject": before.subject, "is_active": before.is_active }))
            .new_values(json!({ "name": template.name, "subject": template.subject, "is_active": template.is_active })),
    )
    .await?;

    Ok(DataResponse::new(template))
}

/// DELETE /admin/email/templates/:template_id
pub async fn delete_template(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(template_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageEmailTemplates)?;
    let template = load_template(&state, template_id).await?;

    let in_use: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM email_campaigns WHERE template_id = $1)")
            .bind(template_id)
            .fetch_one(&state.db)
            .await?;
    if in_use {
        return Err(ApiError::conflict("Template is used by a campaign"));
    }

    sqlx::query("DELETE FROM email_templates WHERE id = $1")
        .bind(template_id)
        .execute(&state.db)
        .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Delete, format!("Deleted email template {}", template.name))
            .target("email_template", template_id)
            .old_values(json!({ "name": template.name })),
    )
    .await?;

    Ok(NoContent)
}

/// POST /admin/email/templates/:template_id/preview
///
/// Renders the template for the calling admin; the request context
/// overrides the defaults.
pub async fn preview_template(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(template_id): Path<Uuid>,
    body: Option<Json<TemplatePreviewRequest>>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageEmailTemplates)?;
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let template = load_template(&state, template_id).await?;

    let me = admin_person(&admin);
    let mut context = templates::default_context(&state.settings, Utc::now(), Some(me), Some(me));
    context.extend(req.context);

    let rendered = render_template(&template, &admin.email, &context);
    Ok(DataResponse::new(TemplatePreview {
        subject: rendered.subject,
        html_content: rendered.html.unwrap_or_default(),
        text_content: rendered.text,
    }))
}

/// POST /admin/email/templates/validate
pub async fn validate_template(
    admin: RequireAdmin,
    Json(req): Json<ValidateTemplateRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageEmailTemplates)?;
    Ok(DataResponse::new(templates::validate_email_template(&req.html_content)))
}

/// POST /admin/email/templates/:template_id/test
pub async fn send_test_email(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(template_id): Path<Uuid>,
    Json(req): Json<SendTestEmailRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageEmailTemplates)?;
    let to = req.email.trim();
    if !to.contains('@') {
        return Err(ApiError::field("email", "Enter a valid email address."));
    }
    let template = load_template(&state, template_id).await?;

    let me = admin_person(&admin);
    let recipient = Person {
        first_name: "",
        last_name: "",
        email: to,
    };
    let context =
        templates::default_context(&state.settings, Utc::now(), Some(recipient), Some(me));
    let mut email = render_template(&template, to, &context);
    email.subject = format!("[TEST] {}", email.subject);
    state.jobs.enqueue(Job::SendEmail(email));

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::EmailSend, format!("Sent test of template {}", template.name))
            .target("email_template", template_id)
            .new_values(json!({ "to": to })),
    )
    .await?;

    Ok(MessageResponse::new(format!("Test email queued to {}", to)))
}

// ============================================================================
// Campaigns
// ============================================================================

async fn load_campaign(state: &AppState, campaign_id: Uuid) -> ApiResult<EmailCampaign> {
    sqlx::query_as("SELECT * FROM email_campaigns WHERE id = $1")
        .bind(campaign_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Campaign not found"))
}

/// GET /admin/email/campaigns
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendEmailCampaigns)?;
    let campaigns: Vec<EmailCampaign> =
        sqlx::query_as("SELECT * FROM email_campaigns ORDER BY created_at DESC")
            .fetch_all(&state.db)
            .await?;
    Ok(DataResponse::new(campaigns))
}

/// POST /admin/email/campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<CampaignRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendEmailCampaigns)?;
    req.validate()?;
    load_template(&state, req.template_id).await?;

    let campaign: EmailCampaign = sqlx::query_as(
        r#"
        INSERT INTO email_campaigns (id, name, subject, template_id, target_audience, target_user_ids, scheduled_at, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.name.trim())
    .bind(&req.subject)
    .bind(req.template_id)
    .bind(req.target_audience.to_string())
    .bind(sqlx::types::Json(&req.target_user_ids))
    .bind(req.scheduled_at)
    .bind(admin.user_id)
    .fetch_one(&state.db)
    .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Create, format!("Created campaign {}", campaign.name))
            .target("email_campaign", campaign.id)
            .new_values(json!({ "name": campaign.name, "target_audience": campaign.target_audience })),
    )
    .await?;

    Ok(Created(campaign))
}

/// GET /admin/email/campaigns/:campaign_id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(campaign_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendEmailCampaigns)?;
    Ok(DataResponse::new(load_campaign(&state, campaign_id).await?))
}

/// PUT /admin/email/campaigns/:campaign_id
pub async fn update_campaign(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(campaign_id): Path<Uuid>,
    Json(req): Json<CampaignRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendEmailCampaigns)?;
    req.validate()?;
    let before = load_campaign(&state, campaign_id).await?;
    if !before.status().can_edit() {
        return Err(ApiError::bad_request("Sent or sending campaigns cannot be edited"));
    }
    load_template(&state, req.template_id).await?;

    let campaign: EmailCampaign = sqlx::query_as(
        r#"
        UPDATE email_campaigns
        SET name = $2, subject = $3, template_id = $4, target_audience = $5,
            target_user_ids = $6, scheduled_at = $7, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(campaign_id)
    .bind(req.name.trim())
    .bind(&req.subject)
    .bind(req.template_id)
    .bind(req.target_audience.to_string())
    .bind(sqlx::types::Json(&req.target_user_ids))
    .bind(req.scheduled_at)
    .fetch_one(&state.db)
    .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Update, format!("Updated campaign {}", campaign.name))
            .target("email_campaign", campaign_id)
            .old_values(json!({ "name": before.name, "subject": before.subject, "target_audience": before.target_audience }))
            .new_values(json!({ "name": campaign.name, "subject": campaign.subject, "target_audience": campaign.target_audience })),
    )
    .await?;

    Ok(DataResponse::new(campaign))
}

/// DELETE /admin/email/campaigns/:campaign_id
pub async fn delete_campaign(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(campaign_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendEmailCampaigns)?;
    let campaign = load_campaign(&state, campaign_id).await?;
    if !campaign.status().can_delete() {
        return Err(ApiError::bad_request("A campaign that is sending cannot be deleted"));
    }

    if !delete_unsent_campaign(&state.db, campaign_id).await? {
        return Err(ApiError::bad_request("A campaign that is sending cannot be deleted"));
    }

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Delete, format!("Deleted campaign {}", campaign.name))
            .target("email_campaign", campaign_id)
            .old_values(json!({ "name": campaign.name, "status": campaign.status })),
    )
    .await?;

    Ok(NoContent)
}

/// POST /admin/email/campaigns/audience-preview
pub async fn audience_preview(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Json(req): Json<AudiencePreviewRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendEmailCampaigns)?;
    let total_recipients = audience::count(&state.db, req.target_audience, &req.target_user_ids).await?;
    let sample = audience::sample(
        &state.db,
        req.target_audience,
        &req.target_user_ids,
        AUDIENCE_SAMPLE,
    )
    .await?;
    Ok(DataResponse::new(AudiencePreview {
        total_recipients,
        sample,
    }))
}

/// Moves a draft or scheduled campaign to `sending` (queued now) or to
/// `scheduled`. Only the request that wins the status change enqueues it.
async fn start_campaign(
    state: &AppState,
    campaign: &EmailCampaign,
    scheduled_at: Option<DateTime<Utc>>,
) -> ApiResult<DeliveryStatus> {
    if !campaign.status().is_pending() {
        return Err(ApiError::bad_request("Only draft or scheduled campaigns can be sent"));
    }
    let status = match scheduled_at {
        Some(at) if at > Utc::now() => DeliveryStatus::Scheduled,
        Some(_) => return Err(ApiError::field("scheduled_at", "Scheduled time must be in the future.")),
        None => DeliveryStatus::Sending,
    };

    if !claim_campaign(&state.db, campaign.id, status, scheduled_at).await? {
        return Err(ApiError::bad_request("Campaign was already sent"));
    }
    if status == DeliveryStatus::Sending {
        state.jobs.enqueue(Job::SendCampaign {
            campaign_id: campaign.id,
        });
    }
    Ok(status)
}

/// Conditional status change; false when the campaign already left draft
/// or scheduled.
async fn claim_campaign(
    db: &PgPool,
    campaign_id: Uuid,
    status: DeliveryStatus,
    scheduled_at: Option<DateTime<Utc>>,
) -> ApiResult<bool> {
    let claimed = sqlx::query(
        r#"
        UPDATE email_campaigns
        SET status = $2, scheduled_at = COALESCE($3, scheduled_at), updated_at = NOW()
        WHERE id = $1 AND status IN ('draft', 'scheduled')
        "#,
    )
    .bind(campaign_id)
    .bind(status.to_string())
    .bind(scheduled_at)
    .execute(db)
    .await?;
    Ok(claimed.rows_affected() > 0)
}

async fn delete_unsent_campaign(db: &PgPool, campaign_id: Uuid) -> ApiResult<bool> {
    let deleted = sqlx::query("DELETE FROM email_campaigns WHERE id = $1 AND status <> 'sending'")
        .bind(campaign_id)
        .execute(db)
        .await?;
    Ok(deleted.rows_affected() > 0)
}

/// POST /admin/email/campaigns/:campaign_id/send
///
/// Without `scheduled_at` the campaign goes out now; with it the scheduler
/// picks it up when due.
pub async fn send_campaign(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(campaign_id): Path<Uuid>,
    body: Option<Json<SendRequest>>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendEmailCampaigns)?;
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let campaign = load_campaign(&state, campaign_id).await?;
    let status = start_campaign(&state, &campaign, req.scheduled_at).await?;
    let scheduled_at = match status {
        DeliveryStatus::Scheduled => req.scheduled_at,
        _ => campaign.scheduled_at,
    };

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::EmailSend, format!("Campaign {} {}", campaign.name, status))
            .target("email_campaign", campaign_id)
            .old_values(json!({ "status": campaign.status }))
            .new_values(json!({ "status": status, "scheduled_at": scheduled_at })),
    )
    .await?;

    let message = match status {
        DeliveryStatus::Scheduled => "Campaign scheduled",
        _ => "Campaign is being sent",
    };
    Ok(MessageResponse::new(message))
}

/// POST /admin/email/campaigns/bulk-action
pub async fn bulk_action(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<BulkCampaignRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendEmailCampaigns)?;
    if req.ids.is_empty() {
        return Err(ApiError::field("ids", "This list may not be empty."));
    }

    let campaigns: Vec<EmailCampaign> =
        sqlx::query_as("SELECT * FROM email_campaigns WHERE id = ANY($1)")
            .bind(&req.ids)
            .fetch_all(&state.db)
            .await?;

    let mut result = BulkResult::default();
    for campaign in &campaigns {
        let done = match req.action {
            BulkCampaignAction::Send => {
                campaign.status().is_pending()
                    && start_campaign(&state, campaign, None).await.is_ok()
            }
            BulkCampaignAction::Delete => {
                campaign.status().can_delete()
                    && delete_unsent_campaign(&state.db, campaign.id).await?
            }
        };
        if done {
            result.processed += 1;
        } else {
            result.skipped += 1;
        }
    }
    result.skipped += (req.ids.len() - campaigns.len()) as i64;

    let (action, verb) = match req.action {
        BulkCampaignAction::Send => (AdminActionType::EmailSend, "sent"),
        BulkCampaignAction::Delete => (AdminActionType::Delete, "deleted"),
    };
    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(action, format!("Bulk {} {} email campaigns", verb, result.processed))
            .new_values(json!({ "ids": req.ids, "processed": result.processed, "skipped": result.skipped })),
    )
    .await?;

    tracing::info!(processed = result.processed, skipped = result.skipped, "Campaign bulk action");
    Ok(DataResponse::new(result))
}

/// GET /admin/email/campaigns/:campaign_id/statistics
pub async fn campaign_statistics(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(campaign_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendEmailCampaigns)?;
    let campaign = load_campaign(&state, campaign_id).await?;
    Ok(DataResponse::new(CampaignStatistics::from(&campaign)))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn insert_campaign(pool: &PgPool, status: &str) -> Uuid {
        let template_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO email_templates (id, name, template_type, subject, html_content) VALUES ($1, 'Welcome', 'welcome', 'Hi', '<p>Hi</p>')",
        )
        .bind(template_id)
        .execute(pool)
        .await
        .unwrap();

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO email_campaigns (id, name, subject, template_id, status) VALUES ($1, 'Launch', 'News', $2, $3)",
        )
        .bind(id)
        .bind(template_id)
        .bind(status)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn only_one_send_claims_a_campaign(pool: PgPool) {
        let campaign = insert_campaign(&pool, "draft").await;

        let first = claim_campaign(&pool, campaign, DeliveryStatus::Sending, None).await.unwrap();
        let second = claim_campaign(&pool, campaign, DeliveryStatus::Sending, None).await.unwrap();
        assert!(first);
        assert!(!second);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn scheduled_campaign_can_still_be_sent_now(pool: PgPool) {
        let campaign = insert_campaign(&pool, "scheduled").await;
        assert!(claim_campaign(&pool, campaign, DeliveryStatus::Sending, None).await.unwrap());
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn sending_campaign_is_not_deleted(pool: PgPool) {
        let sending = insert_campaign(&pool, "sending").await;
        let sent = insert_campaign(&pool, "sent").await;

        assert!(!delete_unsent_campaign(&pool, sending).await.unwrap());
        assert!(delete_unsent_campaign(&pool, sent).await.unwrap());
    }

    #[test]
    fn bulk_request_parses_snake_case_actions() {
        let req: BulkCampaignRequest = serde_json::from_value(json!({
            "action": "send",
            "ids": [Uuid::nil()],
        }))
        .unwrap();
        assert_eq!(req.action, BulkCampaignAction::Send);
        assert_eq!(req.ids.len(), 1);

        let bad = serde_json::from_value::<BulkCampaignRequest>(json!({ "action": "archive", "ids": [] }));
        assert!(bad.is_err());
    }
}

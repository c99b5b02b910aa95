//! Template-driven emails and email campaign delivery.

use anyhow::{Context as _, Result};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::audience;
use super::jobs::Job;
use super::mailer::OutgoingEmail;
use super::templates::{self, Context, Person};
use crate::app::AppState;
use crate::domain::admin::{DeliveryStatus, EmailCampaign, EmailTemplate, EmailTemplateType};

/// Renders subject and bodies of a template against a context.
pub fn render_template(template: &EmailTemplate, to: &str, context: &Context) -> OutgoingEmail {
    let text = if template.text_content.trim().is_empty() {
        String::new()
    } else {
        templates::render(&template.text_content, context)
    };
    OutgoingEmail {
        to: to.to_string(),
        subject: templates::render(&template.subject, context),
        text,
        html: Some(templates::render(&template.html_content, context)),
    }
}

pub async fn active_template(
    db: &PgPool,
    template_type: EmailTemplateType,
) -> Result<Option<EmailTemplate>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT * FROM email_templates
        WHERE template_type = $1 AND is_active = TRUE
        ORDER BY updated_at DESC
        LIMIT 1
        "#,
    )
    .bind(template_type.to_string())
    .fetch_optional(db)
    .await
}

/// Queues the active template of `template_type` to `user`. Returns false
/// when no such template is configured.
pub async fn send_template_email(
    state: &AppState,
    template_type: EmailTemplateType,
    user: Person<'_>,
    admin: Option<Person<'_>>,
    extra: Context,
) -> Result<bool> {
    let Some(template) = active_template(&state.db, template_type).await? else {
        tracing::warn!(template_type = %template_type, "No active email template");
        return Ok(false);
    };

    let mut context = templates::default_context(&state.settings, Utc::now(), Some(user), admin);
    context.extend(extra);

    state
        .jobs
        .enqueue(Job::SendEmail(render_template(&template, user.email, &context)));
    tracing::info!(template_type = %template_type, to = %user.email, "Template email queued");
    Ok(true)
}

/// Sends an email campaign that has been moved to `sending`.
pub async fn deliver_campaign(state: &AppState, campaign_id: Uuid) -> Result<()> {
    let campaign: Option<EmailCampaign> =
        sqlx::query_as("SELECT * FROM email_campaigns WHERE id = $1 AND status = 'sending'")
            .bind(campaign_id)
            .fetch_optional(&state.db)
            .await?;

    let Some(campaign) = campaign else {
        tracing::debug!(campaign_id = %campaign_id, "Campaign no longer pending");
        return Ok(());
    };

    let template: EmailTemplate = sqlx::query_as("SELECT * FROM email_templates WHERE id = $1")
        .bind(campaign.template_id)
        .fetch_optional(&state.db)
        .await?
        .context("Campaign template was deleted")?;

    let recipients =
        audience::recipients(&state.db, campaign.audience(), &campaign.target_user_ids.0).await?;

    let now = Utc::now();
    let mut sent = 0i32;
    let mut bounced = 0i32;
    for recipient in &recipients {
        let person = Person {
            first_name: &recipient.first_name,
            last_name: &recipient.last_name,
            email: &recipient.email,
        };
        let context = templates::default_context(&state.settings, now, Some(person), None);
        let mut email = render_template(&template, &recipient.email, &context);
        email.subject = templates::render(&campaign.subject, &context);

        match state.mailer.send(&email).await {
            Ok(()) => sent += 1,
            Err(e) => {
                bounced += 1;
                tracing::warn!(
                    campaign_id = %campaign_id,
                    user_id = %recipient.id,
                    error = %e,
                    "Campaign email failed"
                );
            }
        }
    }

    if sent == 0 && bounced > 0 {
        anyhow::bail!("Campaign {} reached no recipients", campaign_id);
    }

    sqlx::query(
        r#"
        UPDATE email_campaigns
        SET status = $2, sent_at = $3, total_recipients = $4, sent_count = $5,
            delivered_count = $5, bounced_count = $6, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(campaign_id)
    .bind(DeliveryStatus::Sent.to_string())
    .bind(Utc::now())
    .bind(recipients.len() as i32)
    .bind(sent)
    .bind(bounced)
    .execute(&state.db)
    .await?;

    tracing::info!(
        campaign_id = %campaign_id,
        recipients = recipients.len(),
        sent = sent,
        bounced = bounced,
        "Campaign sent"
    );
    Ok(())
}

pub async fn mark_campaign_failed(db: &PgPool, campaign_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE email_campaigns SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(campaign_id)
        .bind(DeliveryStatus::Failed.to_string())
        .execute(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> EmailTemplate {
        let now = Utc::now();
        EmailTemplate {
            id: Uuid::new_v4(),
            name: "Ban".into(),
            template_type: EmailTemplateType::UserBanned.to_string(),
            subject: "{{ site_name }}: account suspended".into(),
            html_content: "<p>Hello {{user_name}}, reason: {{ reason }}</p>".into(),
            text_content: String::new(),
            is_active: true,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn renders_subject_and_html() {
        let mut context = Context::new();
        context.insert("site_name".into(), "HandshakeMe".into());
        context.insert("user_name".into(), "Ana".into());
        context.insert("reason".into(), "spam".into());

        let email = render_template(&template(), "ana@example.com", &context);
        assert_eq!(email.to, "ana@example.com");
        assert_eq!(email.subject, "HandshakeMe: account suspended");
        assert_eq!(email.html.as_deref(), Some("<p>Hello Ana, reason: spam</p>"));
        assert!(email.text.is_empty());
    }
}

//! Admin panel API
//!
//! Everything here sits under `/admin` and authenticates with the admin
//! session cookie. Each handler checks its own permission, and every
//! mutating handler records one audit log entry.

pub mod auth;
pub mod banners;
pub mod chats;
pub mod complaints;
pub mod dashboard;
pub mod email;
pub mod moderation;
pub mod push;
pub mod settings;
pub mod users;

use axum::{
    routing::{get, post, put},
    Router,
};
use sqlx::PgConnection;
use std::sync::Arc;

use crate::app::AppState;
use crate::auth::RequireAdmin;
use crate::error::ApiResult;
use crate::middleware::ClientIp;
use crate::services::audit::{self, AuditEntry};
use crate::services::templates::Person;

/// Writes the audit row for a mutating admin action.
pub(crate) async fn record(
    state: &AppState,
    admin: &RequireAdmin,
    ip: &ClientIp,
    entry: AuditEntry,
) -> ApiResult<()> {
    audit::log_admin_action(&state.db, admin.user_id, &ip.0, entry).await?;
    Ok(())
}

/// Same as [`record`], inside the caller's transaction.
pub(crate) async fn record_in(
    conn: &mut PgConnection,
    admin: &RequireAdmin,
    ip: &ClientIp,
    entry: AuditEntry,
) -> ApiResult<()> {
    audit::log_admin_action(conn, admin.user_id, &ip.0, entry).await?;
    Ok(())
}

/// The acting admin as a template person.
pub(crate) fn admin_person(admin: &RequireAdmin) -> Person<'_> {
    Person {
        first_name: &admin.name,
        last_name: "",
        email: &admin.email,
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Session
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/login-logs", get(auth::login_logs))
        // Roles
        .route("/roles", get(auth::list_roles).post(auth::assign_role))
        .route("/roles/:user_id", axum::routing::delete(auth::revoke_role))
        // Dashboard, analytics and audit trail
        .route("/dashboard", get(dashboard::dashboard))
        .route("/analytics", get(dashboard::analytics))
        .route("/audit-logs", get(dashboard::audit_logs))
        // Users
        .route("/users", get(users::list_users))
        .route("/users/:user_id", get(users::get_user).delete(users::delete_user))
        .route("/users/:user_id/ban", post(users::ban_user))
        .route("/users/:user_id/unban", post(users::unban_user))
        // Complaints
        .route("/complaints", get(complaints::list_complaints))
        .route("/complaints/stats", get(complaints::complaint_stats))
        .route("/complaints/bulk-assign", post(complaints::bulk_assign))
        .route("/complaints/:complaint_id", get(complaints::get_complaint))
        .route("/complaints/:complaint_id/decision", post(complaints::decide))
        .route("/complaints/:complaint_id/assign", post(complaints::assign))
        // Moderation queue
        .route("/moderation", get(moderation::list_queue))
        .route("/moderation/bulk-assign", post(moderation::bulk_assign))
        .route("/moderation/scan", post(moderation::detect_suspicious))
        .route("/moderation/:item_id", get(moderation::get_item))
        .route("/moderation/:item_id/assign", post(moderation::assign))
        .route("/moderation/:item_id/approve", post(moderation::approve))
        .route("/moderation/:item_id/reject", post(moderation::reject))
        .route("/moderation/:item_id/needs-review", post(moderation::needs_review))
        // Email templates
        .route(
            "/email/templates",
            get(email::list_templates).post(email::create_template),
        )
        .route("/email/templates/validate", post(email::validate_template))
        .route(
            "/email/templates/:template_id",
            get(email::get_template)
                .put(email::update_template)
                .delete(email::delete_template),
        )
        .route("/email/templates/:template_id/preview", post(email::preview_template))
        .route("/email/templates/:template_id/test", post(email::send_test_email))
        // Email campaigns
        .route(
            "/email/campaigns",
            get(email::list_campaigns).post(email::create_campaign),
        )
        .route("/email/campaigns/audience-preview", post(email::audience_preview))
        .route("/email/campaigns/bulk-action", post(email::bulk_action))
        .route(
            "/email/campaigns/:campaign_id",
            get(email::get_campaign)
                .put(email::update_campaign)
                .delete(email::delete_campaign),
        )
        .route("/email/campaigns/:campaign_id/send", post(email::send_campaign))
        .route("/email/campaigns/:campaign_id/statistics", get(email::campaign_statistics))
        // Push notifications
        .route("/push", get(push::list_notifications).post(push::create_notification))
        .route("/push/analytics", get(push::analytics))
        .route("/push/bulk", post(push::bulk_action))
        .route("/push/templates", get(push::list_templates).post(push::create_template))
        .route(
            "/push/templates/:template_id",
            get(push::get_template)
                .put(push::update_template)
                .delete(push::delete_template),
        )
        .route("/push/templates/:template_id/use", post(push::use_template))
        .route(
            "/push/:notification_id",
            get(push::get_notification)
                .put(push::update_notification)
                .delete(push::delete_notification),
        )
        .route("/push/:notification_id/send", post(push::send_notification))
        .route("/push/:notification_id/preview", get(push::preview))
        .route("/push/:notification_id/test", post(push::test_send))
        // Banners
        .route("/banners", get(banners::list_banners).post(banners::create_banner))
        .route(
            "/banners/:banner_id",
            get(banners::get_banner)
                .put(banners::update_banner)
                .delete(banners::delete_banner),
        )
        // Chats
        .route("/chats", get(chats::list_chats))
        .route("/chats/bulk", post(chats::bulk_action))
        .route(
            "/chats/templates",
            get(chats::list_templates).post(chats::create_template),
        )
        .route(
            "/chats/templates/:template_id",
            put(chats::update_template).delete(chats::delete_template),
        )
        .route("/chats/:room_id", get(chats::get_chat))
        .route("/chats/:room_id/block", post(chats::block_chat))
        .route("/chats/:room_id/unblock", post(chats::unblock_chat))
        .route("/chats/:room_id/system-message", post(chats::send_system_message))
        // System settings
        .route("/settings", get(settings::list_settings).put(settings::upsert_setting))
}

pub mod accounts;
pub mod admin;
pub mod advertisements;
pub mod chat;
pub mod chat_ws;
pub mod contractors;
pub mod health;
pub mod moderation;
pub mod notifications;
pub mod projects;
pub mod reviews;
pub mod upload;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;

use crate::app::AppState;

/// Build the full router: public API, WebSocket, admin panel and health
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", api_router())
        .route("/ws/chat/:room_id", get(chat_ws::chat_socket))
        .nest("/admin", admin::router())
}

fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/auth", auth_routes())
        .nest("/contractors", contractor_routes())
        .nest("/projects", project_routes())
        .nest("/reviews", review_routes())
        .nest("/chat", chat_routes())
        .nest("/notifications", notification_routes())
        .nest("/moderation", moderation_routes())
        // Advertisements and banners
        .route("/ads", get(advertisements::list_active))
        .route("/ads/categories", get(advertisements::list_categories))
        .route("/ads/:ad_id/impression", post(advertisements::track_impression))
        .route("/ads/:ad_id/click", post(advertisements::track_click))
        .route("/banners", get(admin::banners::active_banners))
        .route("/banners/:banner_id/impression", post(admin::banners::track_impression))
        .route("/banners/:banner_id/click", post(admin::banners::track_click))
        // Push engagement
        .route("/push/:notification_id/opened", post(admin::push::track_open))
        .route("/push/:notification_id/clicked", post(admin::push::track_click))
        // Complaints are filed by users and handled in the admin panel
        .route("/complaints", post(admin::complaints::create_complaint))
}

fn auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(accounts::register))
        .route("/login", post(accounts::login))
        .route("/logout", post(accounts::logout))
        .route("/token/refresh", post(accounts::refresh_token))
        .route("/profile", get(accounts::get_profile).patch(accounts::update_profile))
        .route("/profile/stats", get(accounts::profile_stats))
        .route("/profile/avatar", post(accounts::upload_avatar))
        .route("/change-password", post(accounts::change_password))
        .route("/fcm-token", post(accounts::update_fcm_token))
        .route("/addresses", get(accounts::list_addresses).post(accounts::create_address))
        .route(
            "/addresses/:address_id",
            get(accounts::get_address)
                .patch(accounts::update_address)
                .delete(accounts::delete_address),
        )
}

fn contractor_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(contractors::search_contractors))
        .route("/categories", get(contractors::list_categories))
        .route("/skills", get(contractors::list_skills))
        .route("/stats", get(contractors::contractor_stats))
        .route("/recommended", get(contractors::recommended_contractors))
        .route(
            "/profile",
            get(contractors::get_own_profile).patch(contractors::update_own_profile),
        )
        .route(
            "/portfolio",
            get(contractors::list_portfolio).post(contractors::create_portfolio_item),
        )
        .route(
            "/portfolio/:item_id",
            get(contractors::get_portfolio_item)
                .patch(contractors::update_portfolio_item)
                .delete(contractors::delete_portfolio_item),
        )
        .route("/portfolio/:item_id/images", post(contractors::upload_portfolio_image))
        .route(
            "/certifications",
            get(contractors::list_certifications).post(contractors::create_certification),
        )
        .route(
            "/certifications/:certification_id",
            get(contractors::get_certification)
                .put(contractors::update_certification)
                .delete(contractors::delete_certification),
        )
        .route("/:contractor_id", get(contractors::get_contractor))
}

fn project_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(projects::list_projects).post(projects::create_project))
        .route("/stats", get(projects::project_stats))
        .route("/recommended", get(projects::recommended_projects))
        .route(
            "/:project_id",
            get(projects::get_project)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        )
        .route("/:project_id/status", patch(projects::update_status))
        .route("/:project_id/apply", post(projects::apply))
        .route("/:project_id/applications", get(projects::list_applications))
        .route("/:project_id/images", post(projects::upload_image))
        .route(
            "/:project_id/milestones",
            get(projects::list_milestones).post(projects::create_milestone),
        )
        .route(
            "/:project_id/updates",
            get(projects::list_updates).post(projects::create_update),
        )
        .route(
            "/:project_id/documents",
            get(projects::list_documents).post(projects::upload_document),
        )
        .route("/applications/:application_id/accept", post(projects::accept_application))
        .route("/applications/:application_id/reject", post(projects::reject_application))
        .route(
            "/milestones/:milestone_id",
            patch(projects::update_milestone).delete(projects::delete_milestone),
        )
        .route("/documents/:document_id", delete(projects::delete_document))
}

fn review_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(reviews::list_reviews).post(reviews::create_review))
        .route("/stats", get(reviews::review_stats))
        .route("/contractor/:contractor_id", get(reviews::list_contractor_reviews))
        .route("/contractor/:contractor_id/stats", get(reviews::contractor_review_stats))
        .route(
            "/:review_id",
            get(reviews::get_review)
                .patch(reviews::update_review)
                .delete(reviews::delete_review),
        )
        .route("/:review_id/response", post(reviews::respond))
        .route("/:review_id/helpful", post(reviews::vote_helpful))
        .route("/:review_id/images", post(reviews::upload_image))
}

fn chat_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rooms", get(chat::list_rooms).post(chat::create_room))
        .route("/rooms/:room_id", get(chat::get_room))
        .route(
            "/rooms/:room_id/messages",
            get(chat::list_messages).post(chat::send_message),
        )
        .route("/rooms/:room_id/participants", get(chat::list_participants))
        .route("/rooms/:room_id/add-participant", post(chat::add_participant))
        .route("/rooms/:room_id/remove-participant", post(chat::remove_participant))
        .route("/direct/:user_id", post(chat::direct_room))
        .route(
            "/messages/:message_id",
            get(chat::get_message)
                .patch(chat::update_message)
                .delete(chat::delete_message),
        )
        .route("/messages/:message_id/read", post(chat::mark_message_read))
        .route("/upload/image", post(chat::upload_image))
        .route("/upload/file", post(chat::upload_file))
        .route("/search", get(chat::search_messages))
        .route("/stats", get(chat::chat_stats))
}

fn notification_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/mark-all-read", post(notifications::mark_all_read))
        .route("/bulk-read", post(notifications::bulk_mark_read))
        .route("/bulk-delete", post(notifications::bulk_delete))
        .route("/unread-count", get(notifications::unread_count))
        .route("/stats", get(notifications::notification_stats))
        .route(
            "/preferences",
            get(notifications::get_preferences).put(notifications::update_preferences),
        )
        .route(
            "/:notification_id",
            get(notifications::get_notification).delete(notifications::delete_notification),
        )
        .route("/:notification_id/read", post(notifications::mark_read))
}

fn moderation_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reports", post(moderation::create_report))
        .route("/reports/:report_id/resolve", post(moderation::resolve_report))
        .route("/queue/next", get(moderation::next_item))
        .route("/queue/:item_id/assign", post(moderation::assign_item))
        .route("/queue/:item_id/complete", post(moderation::complete_item))
        .route("/queue/:item_id/escalate", post(moderation::escalate_item))
        .route(
            "/warnings",
            get(moderation::my_warnings).post(moderation::issue_warning),
        )
        .route("/warnings/:warning_id/acknowledge", post(moderation::acknowledge_warning))
}

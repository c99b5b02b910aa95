//! Admin panel domain types
//!
//! Staff roles and their permissions, audit and login logs, complaints,
//! outbound communication (email templates, campaigns, push notifications),
//! banners, chat moderation templates and system settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{percentage, round2};
use crate::error::{ApiError, FieldErrors};

// ============================================================================
// Roles and permissions
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdminRoleKind {
    Superadmin,
    Admin,
    Moderator,
    Support,
    Readonly,
}

string_enum!(AdminRoleKind);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewUser,
    ChangeUser,
    BanUser,
    UnbanUser,
    ViewContent,
    ModerateContent,
    ApproveContent,
    RejectContent,
    ViewComplaint,
    ResolveComplaint,
    AssignComplaint,
    ManageEmailTemplates,
    ManageBanners,
    SendNotifications,
    SendPushNotifications,
    SendEmailCampaigns,
    ViewAnalytics,
    ExportAnalytics,
    ViewChats,
    SendSystemMessages,
    ModerateChats,
    ManageSettings,
    ManageRoles,
}

string_enum!(Permission);

impl AdminRoleKind {
    pub fn permissions(self) -> &'static [Permission] {
        use Permission::*;

        match self {
            Self::Superadmin => &[
                ViewUser,
                ChangeUser,
                BanUser,
                UnbanUser,
                ViewContent,
                ModerateContent,
                ApproveContent,
                RejectContent,
                ViewComplaint,
                ResolveComplaint,
                AssignComplaint,
                ManageEmailTemplates,
                ManageBanners,
                SendNotifications,
                SendPushNotifications,
                SendEmailCampaigns,
                ViewAnalytics,
                ExportAnalytics,
                ViewChats,
                SendSystemMessages,
                ModerateChats,
                ManageSettings,
                ManageRoles,
            ],
            Self::Admin => &[
                ViewUser,
                ChangeUser,
                BanUser,
                UnbanUser,
                ViewContent,
                ModerateContent,
                ApproveContent,
                RejectContent,
                ViewComplaint,
                ResolveComplaint,
                AssignComplaint,
                ManageEmailTemplates,
                ManageBanners,
                SendNotifications,
                SendPushNotifications,
                SendEmailCampaigns,
                ViewAnalytics,
                ExportAnalytics,
                ViewChats,
                SendSystemMessages,
                ModerateChats,
            ],
            Self::Moderator => &[
                ViewUser,
                ViewContent,
                ModerateContent,
                ApproveContent,
                RejectContent,
                ViewComplaint,
                ResolveComplaint,
                ViewAnalytics,
                ViewChats,
                SendSystemMessages,
                ModerateChats,
            ],
            Self::Support => &[ViewUser, ViewComplaint, ViewAnalytics, ViewChats],
            Self::Readonly => &[ViewUser, ViewContent, ViewComplaint, ViewAnalytics, ViewChats],
        }
    }
}

/// An inactive role grants nothing.
pub fn has_permission(role: AdminRoleKind, is_active: bool, permission: Permission) -> bool {
    is_active && role.permissions().contains(&permission)
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AdminRole {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AdminRole {
    pub fn kind(&self) -> Option<AdminRoleKind> {
        self.role.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AdminRoleWithUser {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub role: AdminRole,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignRoleRequest {
    pub user_id: Uuid,
    pub role: String,
}

impl AssignRoleRequest {
    pub fn role_kind(&self) -> Result<AdminRoleKind, ApiError> {
        self.role
            .parse()
            .map_err(|_| ApiError::field("role", format!("Unknown role: {}", self.role)))
    }
}

// ============================================================================
// Login and audit logs
// ============================================================================

/// Failed admin logins allowed per IP before lockout
pub const MAX_LOGIN_ATTEMPTS: i64 = 5;
pub const LOGIN_LOCKOUT_SECONDS: u64 = 600;

#[derive(Debug, Clone, Deserialize)]
pub struct AdminLoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AdminLoginLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub email: String,
    pub ip_address: String,
    pub user_agent: String,
    pub success: bool,
    pub failure_reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminMe {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: AdminRoleKind,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdminActionType {
    Create,
    Update,
    Delete,
    Ban,
    Unban,
    Approve,
    Reject,
    Moderate,
    EmailSend,
    SettingsChange,
}

string_enum!(AdminActionType);

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AdminActionLog {
    pub id: Uuid,
    pub admin_user_id: Uuid,
    pub action: String,
    pub description: String,
    pub content_type: Option<String>,
    pub object_id: Option<Uuid>,
    pub old_values: sqlx::types::Json<serde_json::Value>,
    pub new_values: sqlx::types::Json<serde_json::Value>,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuditLogQuery {
    #[serde(default)]
    pub action: Option<AdminActionType>,
    #[serde(default)]
    pub admin_id: Option<Uuid>,
    #[serde(default)]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_to: Option<DateTime<Utc>>,
}

// ============================================================================
// Dashboard and analytics
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserCounts {
    pub total: i64,
    pub active: i64,
    pub new_today: i64,
    pub new_this_week: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmailCounts {
    pub templates_total: i64,
    pub templates_active: i64,
    pub campaigns_total: i64,
    pub campaigns_sent: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DashboardStats {
    pub users: UserCounts,
    pub email: EmailCounts,
    pub pending_complaints: i64,
    pub pending_moderation: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardResponse {
    #[serde(flatten)]
    pub stats: DashboardStats,
    pub recent_actions: Vec<AdminActionLog>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DailyCount {
    pub day: chrono::NaiveDate,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsResponse {
    pub registrations: Vec<DailyCount>,
    pub projects_by_status: BTreeMap<String, i64>,
    pub complaints_by_type: BTreeMap<String, i64>,
}

// ============================================================================
// User administration
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserStatusFilter {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdminUserQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub user_type: Option<String>,
    #[serde(default)]
    pub status: Option<UserStatusFilter>,
}

impl AdminUserQuery {
    pub fn is_active(&self) -> Option<bool> {
        self.status.map(|s| s == UserStatusFilter::Active)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BanRequest {
    #[serde(default)]
    pub reason: String,
}

/// Email a soft-deleted account is renamed to, freeing the original.
pub fn deleted_email(user_id: Uuid, email: &str) -> String {
    format!("deleted_{}_{}", user_id, email)
}

// ============================================================================
// Complaints
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintType {
    Spam,
    Inappropriate,
    Fraud,
    Harassment,
    FakeProfile,
    Other,
}

string_enum!(ComplaintType);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    #[default]
    Pending,
    InReview,
    Resolved,
    Rejected,
}

string_enum!(ComplaintStatus);

impl ComplaintStatus {
    /// Resolved and rejected complaints are closed.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Resolved | Self::Rejected)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Complaint {
    pub id: Uuid,
    pub complainant_id: Uuid,
    pub complaint_type: String,
    pub content_type: String,
    pub object_id: Uuid,
    pub description: String,
    pub evidence: sqlx::types::Json<Vec<String>>,
    pub status: String,
    pub assigned_to: Option<Uuid>,
    pub resolution: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Complaint {
    pub fn status(&self) -> ComplaintStatus {
        self.status.parse().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplaintDetail {
    #[serde(flatten)]
    pub complaint: Complaint,
    pub complainant_email: String,
    pub assigned_to_email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateComplaintRequest {
    pub complaint_type: ComplaintType,
    pub content_type: String,
    pub object_id: Uuid,
    pub description: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

impl CreateComplaintRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.description.trim().is_empty() {
            errors.add("description", "This field may not be blank.");
        }
        if self.content_type.trim().is_empty() {
            errors.add("content_type", "This field may not be blank.");
        }
        errors.into_result()
    }
}

/// `assigned_to` filter: `me`, `unassigned` or an admin id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssigneeFilter {
    Me,
    Unassigned,
    User(Uuid),
}

impl AssigneeFilter {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "me" => Some(Self::Me),
            "unassigned" => Some(Self::Unassigned),
            other => Uuid::parse_str(other).ok().map(Self::User),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ComplaintQuery {
    #[serde(default)]
    pub status: Option<ComplaintStatus>,
    #[serde(default)]
    pub complaint_type: Option<ComplaintType>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ComplaintStats {
    pub total: i64,
    pub pending: i64,
    pub in_review: i64,
    pub resolved: i64,
    pub rejected: i64,
    pub avg_processing_hours: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComplaintDecisionRequest {
    pub status: ComplaintStatus,
    #[serde(default)]
    pub resolution: String,
}

impl ComplaintDecisionRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.status == ComplaintStatus::Pending {
            return Err(ApiError::field(
                "status",
                "Status must be in_review, resolved or rejected.",
            ));
        }
        if self.status.is_closed() && self.resolution.trim().is_empty() {
            return Err(ApiError::field("resolution", "A resolution is required."));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignRequest {
    pub admin_id: Uuid,
}

/// `assignee` is an admin id or `auto`.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkAssignRequest {
    pub ids: Vec<Uuid>,
    pub assignee: String,
}

impl BulkAssignRequest {
    pub fn assignee(&self) -> Result<Option<Uuid>, ApiError> {
        if self.assignee == "auto" {
            return Ok(None);
        }
        Uuid::parse_str(&self.assignee)
            .map(Some)
            .map_err(|_| ApiError::field("assignee", "Expected an admin id or \"auto\"."))
    }
}

/// Spreads `items` over moderators, each time picking the one with the
/// fewest open complaints.
pub fn round_robin_assign(items: &[Uuid], loads: &[(Uuid, i64)]) -> Vec<(Uuid, Uuid)> {
    let mut loads = loads.to_vec();
    let mut assignments = Vec::with_capacity(items.len());
    for item in items {
        let Some(slot) = loads.iter_mut().min_by_key(|(_, load)| *load) else {
            break;
        };
        slot.1 += 1;
        assignments.push((*item, slot.0));
    }
    assignments
}

// ============================================================================
// Moderation queue (admin side)
// ============================================================================

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdminQueueQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModerationDecisionRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkQueueAssignRequest {
    pub ids: Vec<Uuid>,
    pub admin_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ScanSummary {
    pub scanned: i64,
    pub flagged: i64,
}

// ============================================================================
// Email templates and campaigns
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplateType {
    Welcome,
    ProjectApproved,
    ProjectRejected,
    UserBanned,
    ComplaintResolved,
    Newsletter,
    SystemNotification,
}

string_enum!(EmailTemplateType);

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EmailTemplate {
    pub id: Uuid,
    pub name: String,
    pub template_type: String,
    pub subject: String,
    pub html_content: String,
    pub text_content: String,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailTemplateRequest {
    pub name: String,
    pub template_type: EmailTemplateType,
    pub subject: String,
    pub html_content: String,
    #[serde(default)]
    pub text_content: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl EmailTemplateRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.name.trim().is_empty() {
            errors.add("name", "This field may not be blank.");
        }
        if self.subject.trim().is_empty() {
            errors.add("subject", "This field may not be blank.");
        }
        if self.html_content.trim().is_empty() {
            errors.add("html_content", "This field may not be blank.");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TemplatePreviewRequest {
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplatePreview {
    pub subject: String,
    pub html_content: String,
    pub text_content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateTemplateRequest {
    pub html_content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendTestEmailRequest {
    pub email: String,
}

/// Delivery lifecycle shared by email campaigns and push notifications
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Draft,
    Scheduled,
    Sending,
    Sent,
    Failed,
}

string_enum!(DeliveryStatus);

impl DeliveryStatus {
    pub fn can_edit(self) -> bool {
        !matches!(self, Self::Sending | Self::Sent)
    }

    pub fn can_delete(self) -> bool {
        self != Self::Sending
    }

    /// Not yet handed to the delivery worker.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Draft | Self::Scheduled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    #[default]
    All,
    Active,
    Contractors,
    Clients,
    Specific,
}

string_enum!(Audience);

/// Days since last login for the `active` audience
pub const ACTIVE_AUDIENCE_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EmailCampaign {
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    pub template_id: Uuid,
    pub target_audience: String,
    pub target_user_ids: sqlx::types::Json<Vec<Uuid>>,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub delivered_count: i32,
    pub opened_count: i32,
    pub clicked_count: i32,
    pub bounced_count: i32,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailCampaign {
    pub fn status(&self) -> DeliveryStatus {
        self.status.parse().unwrap_or_default()
    }

    pub fn audience(&self) -> Audience {
        self.target_audience.parse().unwrap_or_default()
    }

    pub fn rates(&self) -> DeliveryRates {
        DeliveryRates::new(
            self.total_recipients as i64,
            self.delivered_count as i64,
            self.opened_count as i64,
            self.clicked_count as i64,
            Some(self.bounced_count as i64),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CampaignRequest {
    pub name: String,
    pub subject: String,
    pub template_id: Uuid,
    #[serde(default)]
    pub target_audience: Audience,
    #[serde(default)]
    pub target_user_ids: Vec<Uuid>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl CampaignRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.name.trim().is_empty() {
            errors.add("name", "This field may not be blank.");
        }
        if self.subject.trim().is_empty() {
            errors.add("subject", "This field may not be blank.");
        }
        check_specific_audience(&mut errors, self.target_audience, &self.target_user_ids);
        errors.into_result()
    }
}

fn check_specific_audience(errors: &mut FieldErrors, audience: Audience, users: &[Uuid]) {
    if audience == Audience::Specific && users.is_empty() {
        errors.add("target_user_ids", "Select at least one user.");
    }
}

/// Empty body sends now, a timestamp schedules.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SendRequest {
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudiencePreviewRequest {
    pub target_audience: Audience,
    #[serde(default)]
    pub target_user_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudiencePreview {
    pub total_recipients: i64,
    pub sample: Vec<super::accounts::UserSummary>,
}

/// Delivery funnel percentages, each 0 when its denominator is 0
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct DeliveryRates {
    pub delivery_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounce_rate: Option<f64>,
}

impl DeliveryRates {
    pub fn new(total: i64, delivered: i64, opened: i64, clicked: i64, bounced: Option<i64>) -> Self {
        Self {
            delivery_rate: percentage(delivered, total),
            open_rate: percentage(opened, delivered),
            click_rate: percentage(clicked, opened),
            bounce_rate: bounced.map(|b| percentage(b, total)),
        }
    }

    /// Mean of each rate, rounded to two decimals.
    pub fn average(rates: &[DeliveryRates]) -> Self {
        if rates.is_empty() {
            return Self::default();
        }
        let n = rates.len() as f64;
        let mean = |f: fn(&DeliveryRates) -> f64| round2(rates.iter().map(f).sum::<f64>() / n);
        Self {
            delivery_rate: mean(|r| r.delivery_rate),
            open_rate: mean(|r| r.open_rate),
            click_rate: mean(|r| r.click_rate),
            bounce_rate: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignStatistics {
    pub id: Uuid,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub delivered_count: i32,
    pub opened_count: i32,
    pub clicked_count: i32,
    pub bounced_count: i32,
    #[serde(flatten)]
    pub rates: DeliveryRates,
}

impl From<&EmailCampaign> for CampaignStatistics {
    fn from(c: &EmailCampaign) -> Self {
        Self {
            id: c.id,
            total_recipients: c.total_recipients,
            sent_count: c.sent_count,
            delivered_count: c.delivered_count,
            opened_count: c.opened_count,
            clicked_count: c.clicked_count,
            bounced_count: c.bounced_count,
            rates: c.rates(),
        }
    }
}

// ============================================================================
// Push notifications
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PushNotification {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub target_audience: String,
    pub target_user_ids: sqlx::types::Json<Vec<Uuid>>,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub total_recipients: i32,
    pub delivered_count: i32,
    pub opened_count: i32,
    pub clicked_count: i32,
    pub extra_data: sqlx::types::Json<serde_json::Value>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PushNotification {
    pub fn status(&self) -> DeliveryStatus {
        self.status.parse().unwrap_or_default()
    }

    pub fn audience(&self) -> Audience {
        self.target_audience.parse().unwrap_or_default()
    }

    pub fn rates(&self) -> DeliveryRates {
        DeliveryRates::new(
            self.total_recipients as i64,
            self.delivered_count as i64,
            self.opened_count as i64,
            self.clicked_count as i64,
            None,
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PushNotificationView {
    #[serde(flatten)]
    pub notification: PushNotification,
    #[serde(flatten)]
    pub rates: DeliveryRates,
}

impl From<PushNotification> for PushNotificationView {
    fn from(notification: PushNotification) -> Self {
        let rates = notification.rates();
        Self {
            notification,
            rates,
        }
    }
}

/// Push title and body limits
pub const PUSH_TITLE_MAX: usize = 100;
pub const PUSH_MESSAGE_MAX: usize = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct PushNotificationRequest {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub target_audience: Audience,
    #[serde(default)]
    pub target_user_ids: Vec<Uuid>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extra_data: Option<serde_json::Value>,
}

impl PushNotificationRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.title.trim().is_empty() {
            errors.add("title", "This field may not be blank.");
        } else if self.title.chars().count() > PUSH_TITLE_MAX {
            errors.add("title", format!("Ensure this field has no more than {} characters.", PUSH_TITLE_MAX));
        }
        if self.message.trim().is_empty() {
            errors.add("message", "This field may not be blank.");
        } else if self.message.chars().count() > PUSH_MESSAGE_MAX {
            errors.add(
                "message",
                format!("Ensure this field has no more than {} characters.", PUSH_MESSAGE_MAX),
            );
        }
        check_specific_audience(&mut errors, self.target_audience, &self.target_user_ids);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BulkPushAction {
    Send,
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkPushRequest {
    pub action: BulkPushAction,
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BulkCampaignAction {
    Send,
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkCampaignRequest {
    pub action: BulkCampaignAction,
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct BulkResult {
    pub processed: i64,
    pub skipped: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestPushRequest {
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushAnalytics {
    pub total_notifications: i64,
    pub sent_notifications: i64,
    pub scheduled_notifications: i64,
    pub failed_notifications: i64,
    pub total_recipients: i64,
    pub total_delivered: i64,
    pub average_rates: DeliveryRates,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PushTemplateCategory {
    General,
    Marketing,
    System,
    Reminder,
    Announcement,
}

string_enum!(PushTemplateCategory);

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PushNotificationTemplate {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub title_template: String,
    pub message_template: String,
    pub available_variables: sqlx::types::Json<Vec<String>>,
    pub usage_count: i32,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushTemplateRequest {
    pub name: String,
    pub category: PushTemplateCategory,
    pub title_template: String,
    pub message_template: String,
    #[serde(default)]
    pub available_variables: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl PushTemplateRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.name.trim().is_empty() {
            errors.add("name", "This field may not be blank.");
        }
        if self.title_template.trim().is_empty() {
            errors.add("title_template", "This field may not be blank.");
        }
        if self.message_template.trim().is_empty() {
            errors.add("message_template", "This field may not be blank.");
        }
        errors.into_result()
    }
}

/// Creates a push notification from a template
#[derive(Debug, Clone, Deserialize)]
pub struct UsePushTemplateRequest {
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    #[serde(default)]
    pub target_audience: Audience,
    #[serde(default)]
    pub target_user_ids: Vec<Uuid>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Banners
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BannerSize {
    #[serde(rename = "728x90")]
    Leaderboard,
    #[serde(rename = "300x250")]
    MediumRectangle,
    #[serde(rename = "320x50")]
    MobileBanner,
    #[serde(rename = "300x600")]
    HalfPage,
    #[serde(rename = "970x250")]
    Billboard,
}

string_enum!(BannerSize);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BannerPlacement {
    Home,
    Projects,
    Profiles,
    Search,
    Dashboard,
}

string_enum!(BannerPlacement);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BannerStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Expired,
    Rejected,
}

string_enum!(BannerStatus);

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Banner {
    pub id: Uuid,
    pub title: String,
    pub image: String,
    pub link_url: Option<String>,
    pub alt_text: String,
    pub size: String,
    pub placement: String,
    pub status: String,
    pub priority: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub impressions_count: i64,
    pub clicks_count: i64,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Banner {
    pub fn ctr(&self) -> f64 {
        percentage(self.clicks_count, self.impressions_count)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.end_date
    }

    pub fn is_scheduled(&self, now: DateTime<Utc>) -> bool {
        now < self.start_date
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BannerView {
    #[serde(flatten)]
    pub banner: Banner,
    pub ctr: f64,
}

impl From<Banner> for BannerView {
    fn from(banner: Banner) -> Self {
        let ctr = banner.ctr();
        Self { banner, ctr }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BannerRequest {
    pub title: String,
    pub image: String,
    #[serde(default)]
    pub link_url: Option<String>,
    #[serde(default)]
    pub alt_text: String,
    pub size: BannerSize,
    pub placement: BannerPlacement,
    #[serde(default)]
    pub status: BannerStatus,
    #[serde(default)]
    pub priority: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl BannerRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.title.trim().is_empty() {
            errors.add("title", "This field may not be blank.");
        }
        if self.image.trim().is_empty() {
            errors.add("image", "This field may not be blank.");
        }
        if self.end_date <= self.start_date {
            errors.add("end_date", "End date must be after start date.");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BannerQuery {
    #[serde(default)]
    pub placement: Option<BannerPlacement>,
    #[serde(default)]
    pub status: Option<BannerStatus>,
}

// ============================================================================
// Chat moderation
// ============================================================================

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdminChatQuery {
    /// `active` or `blocked`
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub room_type: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
}

impl AdminChatQuery {
    pub fn is_active(&self) -> Option<bool> {
        match self.status.as_deref() {
            Some("active") => Some(true),
            Some("blocked") => Some(false),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AdminChatRow {
    pub id: Uuid,
    pub name: Option<String>,
    pub room_type: String,
    pub project_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub participant_count: i64,
    pub message_count: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatBlockAction {
    Block,
    Unblock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkChatRequest {
    pub action: ChatBlockAction,
    pub room_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SystemMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub admin_user_id: Uuid,
    pub message: String,
    pub template_id: Option<Uuid>,
    pub is_visible: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemMessageRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub template_id: Option<Uuid>,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl SystemMessageRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let blank = self.message.as_deref().map(|m| m.trim().is_empty()).unwrap_or(true);
        if blank && self.template_id.is_none() {
            return Err(ApiError::field("message", "Provide a message or a template."));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageTemplateCategory {
    Warning,
    Info,
    Moderation,
    Support,
    Announcement,
}

string_enum!(MessageTemplateCategory);

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MessageTemplate {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub content: String,
    pub available_variables: sqlx::types::Json<Vec<String>>,
    pub usage_count: i32,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageTemplateRequest {
    pub name: String,
    pub category: MessageTemplateCategory,
    pub content: String,
    #[serde(default)]
    pub available_variables: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl MessageTemplateRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.name.trim().is_empty() {
            errors.add("name", "This field may not be blank.");
        }
        if self.content.trim().is_empty() {
            errors.add("content", "This field may not be blank.");
        }
        errors.into_result()
    }
}

// ============================================================================
// System settings
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SystemSetting {
    pub id: Uuid,
    pub key: String,
    pub value: String,
    pub description: String,
    pub is_active: bool,
    pub updated_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertSettingRequest {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl UpsertSettingRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let key = self.key.trim();
        let valid = !key.is_empty()
            && key.len() <= 100
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-');
        if valid {
            Ok(())
        } else {
            Err(ApiError::field(
                "key",
                "Keys are 1-100 characters of letters, digits, '_', '.' or '-'.",
            ))
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_deliveries_are_draft_or_scheduled() {
        use DeliveryStatus::*;
        assert!(Draft.is_pending());
        assert!(Scheduled.is_pending());
        for status in [Sending, Sent, Failed] {
            assert!(!status.is_pending());
        }
        assert!(!Sending.can_delete());
    }

    #[test]
    fn superadmin_has_everything() {
        for p in AdminRoleKind::Superadmin.permissions() {
            assert!(has_permission(AdminRoleKind::Superadmin, true, *p));
        }
        assert!(has_permission(AdminRoleKind::Superadmin, true, Permission::ManageRoles));
    }

    #[test]
    fn settings_and_roles_are_superadmin_only() {
        for role in [
            AdminRoleKind::Admin,
            AdminRoleKind::Moderator,
            AdminRoleKind::Support,
            AdminRoleKind::Readonly,
        ] {
            assert!(!has_permission(role, true, Permission::ManageSettings));
            assert!(!has_permission(role, true, Permission::ManageRoles));
        }
    }

    #[test]
    fn role_matrix_samples() {
        assert!(has_permission(AdminRoleKind::Admin, true, Permission::BanUser));
        assert!(!has_permission(AdminRoleKind::Moderator, true, Permission::BanUser));
        assert!(has_permission(AdminRoleKind::Moderator, true, Permission::SendSystemMessages));
        assert!(!has_permission(AdminRoleKind::Support, true, Permission::ViewContent));
        assert!(has_permission(AdminRoleKind::Readonly, true, Permission::ViewContent));
        assert!(!has_permission(AdminRoleKind::Readonly, true, Permission::ResolveComplaint));
    }

    #[test]
    fn inactive_role_grants_nothing() {
        assert!(!has_permission(AdminRoleKind::Superadmin, false, Permission::ViewUser));
    }

    #[test]
    fn unknown_role_is_rejected() {
        let req = AssignRoleRequest {
            user_id: Uuid::new_v4(),
            role: "owner".into(),
        };
        assert!(req.role_kind().is_err());
        let req = AssignRoleRequest {
            user_id: Uuid::new_v4(),
            role: "support".into(),
        };
        assert_eq!(req.role_kind().ok(), Some(AdminRoleKind::Support));
    }

    #[test]
    fn rates_guard_zero_denominators() {
        let rates = DeliveryRates::new(0, 0, 0, 0, Some(0));
        assert_eq!(rates.delivery_rate, 0.0);
        assert_eq!(rates.open_rate, 0.0);
        assert_eq!(rates.click_rate, 0.0);
        assert_eq!(rates.bounce_rate, Some(0.0));

        let rates = DeliveryRates::new(200, 150, 60, 15, Some(10));
        assert_eq!(rates.delivery_rate, 75.0);
        assert_eq!(rates.open_rate, 40.0);
        assert_eq!(rates.click_rate, 25.0);
        assert_eq!(rates.bounce_rate, Some(5.0));
    }

    #[test]
    fn average_rates_round_to_two_places() {
        let a = DeliveryRates::new(3, 1, 1, 1, None);
        let b = DeliveryRates::new(1, 1, 1, 0, None);
        let avg = DeliveryRates::average(&[a, b]);
        assert_eq!(avg.delivery_rate, 66.67);
        assert_eq!(avg.open_rate, 100.0);
        assert_eq!(avg.click_rate, 50.0);
        assert_eq!(DeliveryRates::average(&[]), DeliveryRates::default());
    }

    #[test]
    fn delivery_status_guards() {
        assert!(DeliveryStatus::Draft.can_edit());
        assert!(DeliveryStatus::Scheduled.can_edit());
        assert!(!DeliveryStatus::Sending.can_edit());
        assert!(!DeliveryStatus::Sent.can_edit());
        assert!(DeliveryStatus::Sent.can_delete());
        assert!(!DeliveryStatus::Sending.can_delete());
    }

    #[test]
    fn assignee_filter_parsing() {
        let id = Uuid::new_v4();
        assert_eq!(AssigneeFilter::parse("me"), Some(AssigneeFilter::Me));
        assert_eq!(AssigneeFilter::parse("unassigned"), Some(AssigneeFilter::Unassigned));
        assert_eq!(AssigneeFilter::parse(&id.to_string()), Some(AssigneeFilter::User(id)));
        assert_eq!(AssigneeFilter::parse("bogus"), None);
    }

    #[test]
    fn round_robin_prefers_least_loaded() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let items: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let assigned = round_robin_assign(&items, &[(a, 2), (b, 0)]);
        let owners: Vec<Uuid> = assigned.iter().map(|(_, m)| *m).collect();
        assert_eq!(owners, vec![b, b, a]);
        assert!(round_robin_assign(&items, &[]).is_empty());
    }

    #[test]
    fn complaint_decision_requires_resolution_when_closing() {
        let req = ComplaintDecisionRequest {
            status: ComplaintStatus::Resolved,
            resolution: " ".into(),
        };
        assert!(req.validate().is_err());
        let req = ComplaintDecisionRequest {
            status: ComplaintStatus::InReview,
            resolution: String::new(),
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn banner_ctr_and_window() {
        let now = Utc::now();
        let banner = Banner {
            id: Uuid::new_v4(),
            title: "Spring".into(),
            image: "banners/spring.png".into(),
            link_url: None,
            alt_text: String::new(),
            size: BannerSize::Leaderboard.to_string(),
            placement: BannerPlacement::Home.to_string(),
            status: BannerStatus::Active.to_string(),
            priority: 1,
            start_date: now - chrono::Duration::days(1),
            end_date: now + chrono::Duration::days(1),
            is_active: true,
            impressions_count: 400,
            clicks_count: 10,
            created_by: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(banner.ctr(), 2.5);
        assert!(!banner.is_expired(now));
        assert!(!banner.is_scheduled(now));
        assert_eq!(banner.size, "728x90");
    }

    #[test]
    fn specific_audience_needs_users() {
        let req = PushNotificationRequest {
            title: "Hi".into(),
            message: "Body".into(),
            target_audience: Audience::Specific,
            target_user_ids: vec![],
            scheduled_at: None,
            extra_data: None,
        };
        match req.validate() {
            Err(ApiError::Validation(errors)) => assert!(errors.contains("target_user_ids")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn soft_delete_email_format() {
        let id = Uuid::nil();
        assert_eq!(
            deleted_email(id, "a@b.com"),
            "deleted_00000000-0000-0000-0000-000000000000_a@b.com"
        );
    }
}

//! Moderation domain types
//!
//! Rules, per-object content filters, the review queue, user reports and
//! warnings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{ApiError, FieldErrors};

/// Kinds of objects moderation can point at
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Project,
    Message,
    Review,
    User,
}

string_enum!(ContentKind);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Profanity,
    Spam,
    Inappropriate,
    Copyright,
    PersonalInfo,
    Custom,
}

string_enum!(RuleType);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    #[default]
    Flag,
    AutoReject,
    AutoApprove,
    Quarantine,
}

string_enum!(RuleAction);

impl RuleAction {
    /// The action recorded when a rule with this action fires.
    pub fn recorded_as(self) -> ActionType {
        match self {
            Self::Flag => ActionType::Flagged,
            Self::AutoReject => ActionType::Rejected,
            Self::AutoApprove => ActionType::Approved,
            Self::Quarantine => ActionType::Quarantined,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

string_enum!(RiskLevel);

impl RiskLevel {
    /// Risk from the highest of the profanity, spam and toxicity scores.
    pub fn from_score(max_score: f64) -> Self {
        if max_score >= 0.8 {
            Self::Critical
        } else if max_score >= 0.6 {
            Self::High
        } else if max_score >= 0.3 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn requires_review(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }

    pub fn queue_priority(self) -> QueuePriority {
        match self {
            Self::Critical => QueuePriority::Urgent,
            Self::High => QueuePriority::High,
            Self::Medium => QueuePriority::Normal,
            Self::Low => QueuePriority::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Approved,
    Rejected,
    Flagged,
    Quarantined,
    Deleted,
    Edited,
    WarningIssued,
    UserSuspended,
    UserBanned,
}

string_enum!(ActionType);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueuePriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

string_enum!(QueuePriority);

/// Orders urgent first, low last.
pub const QUEUE_PRIORITY_ORDER_SQL: &str =
    "CASE q.priority WHEN 'urgent' THEN 0 WHEN 'high' THEN 1 WHEN 'normal' THEN 2 ELSE 3 END";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Escalated,
}

string_enum!(QueueStatus);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Spam,
    Harassment,
    Inappropriate,
    Copyright,
    FakeProfile,
    Scam,
    Other,
}

string_enum!(ReportType);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    Pending,
    UnderReview,
    Resolved,
    Dismissed,
}

string_enum!(ReportStatus);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WarningType {
    ContentViolation,
    Spam,
    Harassment,
    InappropriateConduct,
    TermsViolation,
}

string_enum!(WarningType);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WarningSeverity {
    Low,
    Medium,
    High,
    Critical,
}

string_enum!(WarningSeverity);

/// Window over which warnings count toward suspension
pub const WARNING_WINDOW_DAYS: i64 = 30;
pub const SUSPENSION_DAYS: i64 = 7;

/// Two critical or five high warnings in the window suspend the account.
pub fn should_suspend(critical_warnings: i64, high_warnings: i64) -> bool {
    critical_warnings >= 2 || high_warnings >= 5
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ModerationRule {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub rule_type: String,
    pub keywords: sqlx::types::Json<Vec<String>>,
    pub patterns: sqlx::types::Json<Vec<String>>,
    pub confidence_threshold: f64,
    pub action: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ContentFilter {
    pub id: Uuid,
    pub content_type: String,
    pub object_id: Uuid,
    pub profanity_score: f64,
    pub spam_score: f64,
    pub toxicity_score: f64,
    pub sentiment_score: f64,
    pub risk_level: String,
    pub requires_review: bool,
    pub is_approved: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_time: f64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ModerationAction {
    pub id: Uuid,
    pub content_type: String,
    pub object_id: Uuid,
    pub action: String,
    pub reason: String,
    pub moderator_id: Option<Uuid>,
    pub is_automated: bool,
    pub rule_id: Option<Uuid>,
    pub report_id: Option<Uuid>,
    pub metadata: sqlx::types::Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct QueueItem {
    pub id: Uuid,
    pub content_type: String,
    pub object_id: Uuid,
    pub priority: String,
    pub status: String,
    pub assigned_to: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub content_filter_id: Option<Uuid>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ContentReport {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub content_type: String,
    pub object_id: Uuid,
    pub report_type: String,
    pub description: String,
    pub evidence: sqlx::types::Json<Vec<String>>,
    pub status: String,
    pub reviewed_by: Option<Uuid>,
    pub resolution_notes: String,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserWarning {
    pub id: Uuid,
    pub user_id: Uuid,
    pub warning_type: String,
    pub severity: String,
    pub title: String,
    pub message: String,
    pub related_action_id: Option<Uuid>,
    pub is_acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub issued_by: Uuid,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateReportRequest {
    pub content_type: ContentKind,
    pub object_id: Uuid,
    pub report_type: ReportType,
    pub description: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

impl CreateReportRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.description.trim().is_empty() {
            errors.add("description", "This field may not be blank.");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveReportRequest {
    #[serde(default)]
    pub resolution_notes: String,
    /// Dismiss instead of resolving
    #[serde(default)]
    pub dismiss: bool,
    #[serde(default)]
    pub action: Option<ActionType>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteModerationRequest {
    pub action: ActionType,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EscalateRequest {
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueWarningRequest {
    pub user_id: Uuid,
    pub warning_type: WarningType,
    pub severity: WarningSeverity,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub related_action_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarningOutcome {
    pub warning: UserWarning,
    pub user_suspended: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_thresholds() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.29), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.3), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.6), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.8), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(1.0), RiskLevel::Critical);
    }

    #[test]
    fn review_and_priority_follow_risk() {
        assert!(!RiskLevel::Medium.requires_review());
        assert!(RiskLevel::High.requires_review());
        assert_eq!(RiskLevel::Critical.queue_priority(), QueuePriority::Urgent);
        assert_eq!(RiskLevel::High.queue_priority(), QueuePriority::High);
        assert_eq!(RiskLevel::Medium.queue_priority(), QueuePriority::Normal);
        assert_eq!(RiskLevel::Low.queue_priority(), QueuePriority::Low);
    }

    #[test]
    fn rule_actions_map_to_recorded_actions() {
        assert_eq!(RuleAction::Flag.recorded_as(), ActionType::Flagged);
        assert_eq!(RuleAction::AutoReject.recorded_as(), ActionType::Rejected);
        assert_eq!(RuleAction::AutoApprove.recorded_as(), ActionType::Approved);
        assert_eq!(RuleAction::Quarantine.recorded_as(), ActionType::Quarantined);
    }

    #[test]
    fn suspension_thresholds() {
        assert!(!should_suspend(1, 4));
        assert!(should_suspend(2, 0));
        assert!(should_suspend(0, 5));
    }

    #[test]
    fn enum_text_forms() {
        assert_eq!(ActionType::UserSuspended.to_string(), "user_suspended");
        assert_eq!(ContentKind::Message.to_string(), "message");
        assert_eq!("in_progress".parse::<QueueStatus>(), Ok(QueueStatus::InProgress));
    }
}

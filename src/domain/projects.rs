//! Project domain types
//!
//! Project postings, applications, milestones, progress updates and
//! documents, along with the status transition table.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::accounts::{check_max_len, UserSummary};
use crate::error::{ApiError, FieldErrors};

pub const TITLE_MAX_LENGTH: usize = 200;

/// Project status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Draft,
    Published,
    InProgress,
    Completed,
    Cancelled,
}

string_enum!(ProjectStatus);

impl ProjectStatus {
    pub fn allowed_transitions(self) -> &'static [ProjectStatus] {
        use ProjectStatus::*;
        match self {
            Draft => &[Published, Cancelled],
            Published => &[InProgress, Cancelled],
            InProgress => &[Completed, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: ProjectStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Only published projects take new applications or an acceptance.
    pub fn accepts_applications(self) -> bool {
        self == ProjectStatus::Published
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

string_enum!(ProjectPriority);

/// Orders urgent first, low last.
pub const PRIORITY_ORDER_SQL: &str =
    "CASE p.priority WHEN 'urgent' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
}

string_enum!(ApplicationStatus);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Overdue,
}

string_enum!(MilestoneStatus);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Contract,
    Blueprint,
    Permit,
    Invoice,
    Receipt,
    #[default]
    Other,
}

string_enum!(DocumentType);

/// Project entity
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub client_id: Uuid,
    pub contractor_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub category_id: Option<Uuid>,
    pub budget_min: Decimal,
    pub budget_max: Decimal,
    pub status: String,
    pub priority: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub latitude: Option<Decimal>,
    pub longitude: Option<Decimal>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub deadline: Option<NaiveDate>,
    pub progress_percentage: i32,
    pub is_featured: bool,
    pub is_active: bool,
    pub views_count: i32,
    pub applications_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn status(&self) -> ProjectStatus {
        self.status.parse().unwrap_or_default()
    }

    pub fn is_owner(&self, user_id: Uuid) -> bool {
        self.client_id == user_id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectDetailResponse {
    #[serde(flatten)]
    pub project: Project,
    pub client: Option<UserSummary>,
    pub images: Vec<ProjectImage>,
    pub milestones: Vec<ProjectMilestone>,
}

/// Request DTO for creating a project
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectRequest {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    pub budget_min: Decimal,
    pub budget_max: Decimal,
    #[serde(default)]
    pub priority: ProjectPriority,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub latitude: Option<Decimal>,
    #[serde(default)]
    pub longitude: Option<Decimal>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
}

impl CreateProjectRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.title.trim().is_empty() {
            errors.add("title", "This field may not be blank.");
        }
        check_max_len(&mut errors, "title", Some(&self.title), TITLE_MAX_LENGTH);
        if self.description.trim().is_empty() {
            errors.add("description", "This field may not be blank.");
        }
        check_budget(&mut errors, self.budget_min, self.budget_max);
        check_dates(&mut errors, self.start_date, self.end_date);
        errors.into_result()
    }
}

/// Request DTO for updating a project
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateProjectRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub budget_min: Option<Decimal>,
    #[serde(default)]
    pub budget_max: Option<Decimal>,
    #[serde(default)]
    pub priority: Option<ProjectPriority>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
}

impl UpdateProjectRequest {
    pub fn validate(&self, current: &Project) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                errors.add("title", "This field may not be blank.");
            }
            check_max_len(&mut errors, "title", Some(title), TITLE_MAX_LENGTH);
        }
        check_budget(
            &mut errors,
            self.budget_min.unwrap_or(current.budget_min),
            self.budget_max.unwrap_or(current.budget_max),
        );
        check_dates(
            &mut errors,
            self.start_date.or(current.start_date),
            self.end_date.or(current.end_date),
        );
        errors.into_result()
    }
}

fn check_budget(errors: &mut FieldErrors, min: Decimal, max: Decimal) {
    if min < Decimal::ZERO {
        errors.add("budget_min", "Ensure this value is greater than or equal to 0.");
    }
    if max < Decimal::ZERO {
        errors.add("budget_max", "Ensure this value is greater than or equal to 0.");
    }
    if min > max {
        errors.add(
            "budget_max",
            "Maximum budget must be greater than or equal to the minimum budget.",
        );
    }
}

fn check_dates(errors: &mut FieldErrors, start: Option<NaiveDate>, end: Option<NaiveDate>) {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            errors.add("end_date", "End date cannot be before the start date.");
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: ProjectStatus,
}

/// Search filters for project listing
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProjectSearchQuery {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub category: Option<Uuid>,
    /// One or more statuses, comma-separated
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<ProjectPriority>,
    #[serde(default)]
    pub min_budget: Option<Decimal>,
    #[serde(default)]
    pub max_budget: Option<Decimal>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub client: Option<Uuid>,
    #[serde(default)]
    pub contractor: Option<Uuid>,
}

impl ProjectSearchQuery {
    /// Known statuses from the `status` filter; unknown values are dropped.
    pub fn statuses(&self) -> Option<Vec<String>> {
        let raw = self.status.as_deref()?;
        let statuses: Vec<String> = raw
            .split(',')
            .filter_map(|s| s.trim().parse::<ProjectStatus>().ok())
            .map(|s| s.to_string())
            .collect();
        if statuses.is_empty() {
            None
        } else {
            Some(statuses)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStats {
    pub total_projects: i64,
    pub active_projects: i64,
    pub completed_projects: i64,
    pub avg_budget: f64,
    pub total_applications: i64,
    pub avg_applications_per_project: f64,
}

/// Budget window a contractor is recommended projects in: five to thirty
/// eight-hour days at their average hourly rate.
pub fn recommended_budget_window(average_hourly_rate: Decimal) -> (Decimal, Decimal) {
    let daily = average_hourly_rate * Decimal::from(8);
    (daily * Decimal::from(5), daily * Decimal::from(30))
}

// ============================================================================
// Applications
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProjectApplication {
    pub id: Uuid,
    pub project_id: Uuid,
    pub contractor_id: Uuid,
    pub cover_letter: String,
    pub proposed_budget: Decimal,
    pub proposed_timeline: i32,
    pub status: String,
    pub applied_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectApplication {
    pub fn status(&self) -> ApplicationStatus {
        self.status.parse().unwrap_or_default()
    }
}

/// Application joined with the applying contractor's user
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ApplicationWithContractor {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub application: ProjectApplication,
    pub contractor_user_id: Uuid,
    pub contractor_name: String,
    pub contractor_rating: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyRequest {
    pub cover_letter: String,
    pub proposed_budget: Decimal,
    /// Days
    pub proposed_timeline: i32,
}

impl ApplyRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.cover_letter.trim().is_empty() {
            errors.add("cover_letter", "This field may not be blank.");
        }
        if self.proposed_budget < Decimal::ZERO {
            errors.add("proposed_budget", "Ensure this value is greater than or equal to 0.");
        }
        if self.proposed_timeline < 1 {
            errors.add("proposed_timeline", "Ensure this value is greater than or equal to 1.");
        }
        errors.into_result()
    }
}

// ============================================================================
// Images, milestones, updates, documents
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProjectImage {
    pub id: Uuid,
    pub project_id: Uuid,
    pub image: String,
    pub caption: String,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProjectMilestone {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: String,
    pub due_date: NaiveDate,
    pub completion_date: Option<NaiveDate>,
    pub status: String,
    pub payment_percentage: Decimal,
    #[sqlx(rename = "sort_order")]
    pub order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MilestoneRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub payment_percentage: Decimal,
    #[serde(default = "default_order")]
    pub order: i32,
}

fn default_order() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateMilestoneRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: Option<MilestoneStatus>,
    #[serde(default)]
    pub payment_percentage: Option<Decimal>,
    #[serde(default)]
    pub order: Option<i32>,
}

pub fn check_payment_percentage(value: Option<Decimal>) -> Result<(), ApiError> {
    match value {
        Some(p) if p < Decimal::ZERO || p > Decimal::from(100) => Err(ApiError::field(
            "payment_percentage",
            "Payment percentage must be between 0 and 100.",
        )),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProjectUpdate {
    pub id: Uuid,
    pub project_id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    pub progress_percentage: Option<i32>,
    pub is_milestone_update: bool,
    pub milestone_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectUpdateRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub progress_percentage: Option<i32>,
    #[serde(default)]
    pub is_milestone_update: bool,
    #[serde(default)]
    pub milestone_id: Option<Uuid>,
}

impl CreateProjectUpdateRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.title.trim().is_empty() {
            errors.add("title", "This field may not be blank.");
        }
        if self.content.trim().is_empty() {
            errors.add("content", "This field may not be blank.");
        }
        if matches!(self.progress_percentage, Some(p) if !(0..=100).contains(&p)) {
            errors.add(
                "progress_percentage",
                "Progress percentage must be between 0 and 100.",
            );
        }
        errors.into_result()
    }
}

/// Whether reporting `progress` should complete a project in `status`.
pub fn progress_completes(status: ProjectStatus, progress: i32) -> bool {
    progress >= 100 && status == ProjectStatus::InProgress
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProjectDocument {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub document_type: String,
    pub file: String,
    pub description: String,
    pub uploaded_by: Uuid,
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
}

/// Private documents are only visible to the client and the assigned
/// contractor's user.
pub fn can_view_document(
    doc: &ProjectDocument,
    viewer: Uuid,
    client_id: Uuid,
    contractor_user_id: Option<Uuid>,
) -> bool {
    !doc.is_private || viewer == client_id || contractor_user_id == Some(viewer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        use ProjectStatus::*;
        assert!(Draft.can_transition_to(Published));
        assert!(Draft.can_transition_to(Cancelled));
        assert!(!Draft.can_transition_to(InProgress));
        assert!(Published.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(!Published.can_transition_to(Draft));
        assert!(Completed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Completed.can_transition_to(InProgress));
    }

    #[test]
    fn only_published_projects_accept_applications() {
        use ProjectStatus::*;
        assert!(Published.accepts_applications());
        for status in [Draft, InProgress, Completed, Cancelled] {
            assert!(!status.accepts_applications(), "{status} should be closed");
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        assert_eq!(ProjectStatus::InProgress.to_string(), "in_progress");
        assert_eq!("published".parse::<ProjectStatus>(), Ok(ProjectStatus::Published));
        assert!("archived".parse::<ProjectStatus>().is_err());
    }

    #[test]
    fn budget_must_be_ordered() {
        let req = CreateProjectRequest {
            title: "Kitchen remodel".into(),
            description: "Full gut".into(),
            category_id: None,
            budget_min: Decimal::from(5000),
            budget_max: Decimal::from(1000),
            priority: ProjectPriority::High,
            address: String::new(),
            city: "Austin".into(),
            state: "TX".into(),
            postal_code: "78701".into(),
            latitude: None,
            longitude: None,
            start_date: None,
            end_date: None,
            deadline: None,
        };
        match req.validate() {
            Err(ApiError::Validation(errors)) => assert!(errors.contains("budget_max")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn status_filter_accepts_multiple_values() {
        let q = ProjectSearchQuery {
            status: Some("published, in_progress,bogus".into()),
            ..Default::default()
        };
        assert_eq!(
            q.statuses(),
            Some(vec!["published".to_string(), "in_progress".to_string()])
        );
        let q = ProjectSearchQuery {
            status: Some("bogus".into()),
            ..Default::default()
        };
        assert_eq!(q.statuses(), None);
    }

    #[test]
    fn recommended_window_uses_daily_rate() {
        let (min, max) = recommended_budget_window(Decimal::from(50));
        assert_eq!(min, Decimal::from(2000));
        assert_eq!(max, Decimal::from(12000));
    }

    #[test]
    fn progress_completion_only_while_in_progress() {
        assert!(progress_completes(ProjectStatus::InProgress, 100));
        assert!(!progress_completes(ProjectStatus::InProgress, 99));
        assert!(!progress_completes(ProjectStatus::Published, 100));
    }

    #[test]
    fn update_progress_bounds() {
        let req = CreateProjectUpdateRequest {
            title: "Week 2".into(),
            content: "Framing done".into(),
            progress_percentage: Some(120),
            is_milestone_update: false,
            milestone_id: None,
        };
        assert!(req.validate().is_err());
        assert!(check_payment_percentage(Some(Decimal::from(101))).is_err());
        assert!(check_payment_percentage(Some(Decimal::from(25))).is_ok());
    }

    #[test]
    fn private_documents_visibility() {
        let client = Uuid::new_v4();
        let contractor = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let doc = ProjectDocument {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            title: "Contract".into(),
            document_type: DocumentType::Contract.to_string(),
            file: "project_documents/contract.pdf".into(),
            description: String::new(),
            uploaded_by: client,
            is_private: true,
            created_at: Utc::now(),
        };
        assert!(can_view_document(&doc, client, client, Some(contractor)));
        assert!(can_view_document(&doc, contractor, client, Some(contractor)));
        assert!(!can_view_document(&doc, stranger, client, Some(contractor)));
        assert!(!can_view_document(&doc, stranger, client, None));
    }
}

//! Content moderation
//!
//! Scores content, applies the active rules, keeps the review queue and
//! handles reports and user warnings.

pub mod scoring;

use chrono::{Duration, Utc};
use regex::RegexBuilder;
use serde_json::json;
use sqlx::PgPool;
use std::time::Instant;
use uuid::Uuid;

use crate::domain::moderation::{
    should_suspend, ActionType, ContentFilter, ContentKind, ContentReport, CreateReportRequest,
    IssueWarningRequest, ModerationAction, ModerationRule, QueueItem, QueuePriority, QueueStatus,
    ReportStatus, ResolveReportRequest, RiskLevel, RuleAction, RuleType, UserWarning,
    WarningOutcome, WarningSeverity, QUEUE_PRIORITY_ORDER_SQL, SUSPENSION_DAYS,
    WARNING_WINDOW_DAYS,
};
use crate::error::{ApiError, ApiResult};
use scoring::ContentScores;

/// Recent content scanned by a suspicious-content sweep
pub const RESCAN_WINDOW_DAYS: i64 = 7;

// ============================================================================
// Rule evaluation
// ============================================================================

/// Whether `rule` fires for `text` with the given scores.
pub fn rule_matches(rule: &ModerationRule, text: &str, scores: &ContentScores) -> bool {
    let Ok(rule_type) = rule.rule_type.parse::<RuleType>() else {
        return false;
    };

    match rule_type {
        RuleType::Profanity => scores.profanity >= rule.confidence_threshold,
        RuleType::Spam => scores.spam >= rule.confidence_threshold,
        RuleType::Inappropriate => scores.toxicity >= rule.confidence_threshold,
        RuleType::Custom => {
            let lower = text.to_lowercase();
            if rule
                .keywords
                .0
                .iter()
                .any(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
            {
                return true;
            }
            rule.patterns.0.iter().any(|pattern| {
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(re) => re.is_match(text),
                    Err(e) => {
                        tracing::warn!(rule_id = %rule.id, pattern = %pattern, error = %e, "Invalid rule pattern");
                        false
                    }
                }
            })
        }
        RuleType::Copyright | RuleType::PersonalInfo => false,
    }
}

/// Outcome of scoring plus rule application, before anything is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub scores: ContentScores,
    pub risk_level: RiskLevel,
    pub requires_review: bool,
    pub is_approved: bool,
    /// Rules that fired, in evaluation order
    pub fired: Vec<FiredRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FiredRule {
    pub rule_id: Uuid,
    pub name: String,
    pub action: RuleAction,
}

pub fn evaluate(text: &str, scores: ContentScores, rules: &[ModerationRule]) -> Verdict {
    let risk_level = RiskLevel::from_score(scores.max_risk_signal());
    let mut verdict = Verdict {
        scores,
        risk_level,
        requires_review: risk_level.requires_review(),
        is_approved: !risk_level.requires_review(),
        fired: Vec::new(),
    };

    for rule in rules.iter().filter(|r| r.is_active) {
        if !rule_matches(rule, text, &scores) {
            continue;
        }
        let action = rule.action.parse().unwrap_or_default();
        match action {
            RuleAction::AutoReject | RuleAction::Quarantine => {
                verdict.is_approved = false;
                verdict.requires_review = true;
            }
            RuleAction::Flag => verdict.requires_review = true,
            RuleAction::AutoApprove => {}
        }
        verdict.fired.push(FiredRule {
            rule_id: rule.id,
            name: rule.name.clone(),
            action,
        });
    }

    verdict
}

// ============================================================================
// Actions
// ============================================================================

pub struct NewAction {
    pub kind: ContentKind,
    pub object_id: Uuid,
    pub action: ActionType,
    pub reason: String,
    pub moderator_id: Option<Uuid>,
    pub is_automated: bool,
    pub rule_id: Option<Uuid>,
    pub report_id: Option<Uuid>,
    pub metadata: serde_json::Value,
}

impl NewAction {
    pub fn manual(kind: ContentKind, object_id: Uuid, action: ActionType, reason: String, moderator_id: Uuid) -> Self {
        Self {
            kind,
            object_id,
            action,
            reason,
            moderator_id: Some(moderator_id),
            is_automated: false,
            rule_id: None,
            report_id: None,
            metadata: json!({}),
        }
    }
}

pub async fn record_action(db: &PgPool, new: NewAction) -> Result<ModerationAction, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO moderation_actions
            (id, content_type, object_id, action, reason, moderator_id, is_automated, rule_id, report_id, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.kind.to_string())
    .bind(new.object_id)
    .bind(new.action.to_string())
    .bind(&new.reason)
    .bind(new.moderator_id)
    .bind(new.is_automated)
    .bind(new.rule_id)
    .bind(new.report_id)
    .bind(sqlx::types::Json(&new.metadata))
    .fetch_one(db)
    .await
}

pub async fn history(db: &PgPool, kind: ContentKind, object_id: Uuid) -> Result<Vec<ModerationAction>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT * FROM moderation_actions
        WHERE content_type = $1 AND object_id = $2
        ORDER BY created_at DESC
        "#,
    )
    .bind(kind.to_string())
    .bind(object_id)
    .fetch_all(db)
    .await
}

// ============================================================================
// Analysis
// ============================================================================

/// Scores `text` for the object and stores the result. An object already
/// processed keeps its stored filter.
pub async fn analyze_content(
    db: &PgPool,
    kind: ContentKind,
    object_id: Uuid,
    text: &str,
) -> Result<ContentFilter, sqlx::Error> {
    analyze(db, kind, object_id, text, false).await
}

async fn analyze(
    db: &PgPool,
    kind: ContentKind,
    object_id: Uuid,
    text: &str,
    force: bool,
) -> Result<ContentFilter, sqlx::Error> {
    if !force {
        let existing: Option<ContentFilter> = sqlx::query_as(
            "SELECT * FROM content_filters WHERE content_type = $1 AND object_id = $2 AND processed_at IS NOT NULL",
        )
        .bind(kind.to_string())
        .bind(object_id)
        .fetch_optional(db)
        .await?;
        if let Some(filter) = existing {
            return Ok(filter);
        }
    }

    let started = Instant::now();
    let rules: Vec<ModerationRule> =
        sqlx::query_as("SELECT * FROM moderation_rules WHERE is_active = TRUE ORDER BY created_at")
            .fetch_all(db)
            .await?;
    let verdict = evaluate(text, scoring::pipeline().score(text), &rules);

    let filter: ContentFilter = sqlx::query_as(
        r#"
        INSERT INTO content_filters
            (id, content_type, object_id, profanity_score, spam_score, toxicity_score, sentiment_score,
             risk_level, requires_review, is_approved, processed_at, processing_time)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), $11)
        ON CONFLICT (content_type, object_id) DO UPDATE SET
            profanity_score = EXCLUDED.profanity_score,
            spam_score = EXCLUDED.spam_score,
            toxicity_score = EXCLUDED.toxicity_score,
            sentiment_score = EXCLUDED.sentiment_score,
            risk_level = EXCLUDED.risk_level,
            requires_review = EXCLUDED.requires_review,
            is_approved = EXCLUDED.is_approved,
            processed_at = EXCLUDED.processed_at,
            processing_time = EXCLUDED.processing_time
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(kind.to_string())
    .bind(object_id)
    .bind(verdict.scores.profanity)
    .bind(verdict.scores.spam)
    .bind(verdict.scores.toxicity)
    .bind(verdict.scores.sentiment)
    .bind(verdict.risk_level.to_string())
    .bind(verdict.requires_review)
    .bind(verdict.is_approved)
    .bind(started.elapsed().as_secs_f64())
    .fetch_one(db)
    .await?;

    for fired in &verdict.fired {
        record_action(
            db,
            NewAction {
                kind,
                object_id,
                action: fired.action.recorded_as(),
                reason: format!("Triggered rule: {}", fired.name),
                moderator_id: None,
                is_automated: true,
                rule_id: Some(fired.rule_id),
                report_id: None,
                metadata: json!({ "rule_id": fired.rule_id }),
            },
        )
        .await?;
    }

    if filter.requires_review {
        enqueue_for_review(db, kind, object_id, verdict.risk_level.queue_priority(), Some(filter.id)).await?;
    }

    tracing::info!(
        content_type = %kind,
        object_id = %object_id,
        risk_level = %verdict.risk_level,
        rules_fired = verdict.fired.len(),
        requires_review = filter.requires_review,
        "Content analyzed"
    );

    Ok(filter)
}

/// Best-effort analysis run after content is created.
pub async fn auto_moderate(db: &PgPool, kind: ContentKind, object_id: Uuid, text: &str) {
    if let Err(e) = analyze_content(db, kind, object_id, text).await {
        tracing::error!(content_type = %kind, object_id = %object_id, error = %e, "Auto-moderation failed");
    }
}

/// The text moderation scores for an object, if it still exists.
pub async fn content_text(db: &PgPool, kind: ContentKind, object_id: Uuid) -> Result<Option<String>, sqlx::Error> {
    let sql = match kind {
        ContentKind::Project => "SELECT title || ' ' || description FROM projects WHERE id = $1",
        ContentKind::Message => "SELECT content FROM messages WHERE id = $1",
        ContentKind::Review => "SELECT title || ' ' || comment FROM reviews WHERE id = $1",
        ContentKind::User => "SELECT bio FROM users WHERE id = $1",
    };
    sqlx::query_scalar(sql).bind(object_id).fetch_optional(db).await
}

/// Takes rejected content out of circulation.
pub async fn deactivate_content(db: &PgPool, kind: ContentKind, object_id: Uuid) -> Result<bool, sqlx::Error> {
    let sql = match kind {
        ContentKind::Project => "UPDATE projects SET is_active = FALSE, updated_at = NOW() WHERE id = $1",
        ContentKind::Review => "UPDATE reviews SET is_public = FALSE, updated_at = NOW() WHERE id = $1",
        ContentKind::User => "UPDATE users SET is_active = FALSE WHERE id = $1",
        // messages have no visibility flag
        ContentKind::Message => "DELETE FROM messages WHERE id = $1",
    };
    let result = sqlx::query(sql).bind(object_id).execute(db).await?;
    tracing::info!(content_type = %kind, object_id = %object_id, "Content deactivated");
    Ok(result.rows_affected() > 0)
}

/// Forces a fresh analysis of recent projects, messages and reviews.
/// Returns (scanned, flagged).
pub async fn rescan_recent(db: &PgPool) -> Result<(u64, u64), sqlx::Error> {
    let since = Utc::now() - Duration::days(RESCAN_WINDOW_DAYS);
    let sources = [
        (ContentKind::Project, "SELECT id, title || ' ' || description FROM projects WHERE created_at >= $1 AND is_active = TRUE"),
        (ContentKind::Message, "SELECT id, content FROM messages WHERE created_at >= $1"),
        (ContentKind::Review, "SELECT id, title || ' ' || comment FROM reviews WHERE created_at >= $1"),
    ];

    let mut scanned = 0u64;
    let mut flagged = 0u64;
    for (kind, sql) in sources {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(sql).bind(since).fetch_all(db).await?;
        for (id, text) in rows {
            let filter = analyze(db, kind, id, &text, true).await?;
            scanned += 1;
            if filter.requires_review {
                flagged += 1;
            }
        }
    }

    tracing::info!(scanned = scanned, flagged = flagged, "Suspicious content scan finished");
    Ok((scanned, flagged))
}

// ============================================================================
// Queue
// ============================================================================

/// Get-or-create the queue item of an object. A completed item is reopened.
pub async fn enqueue_for_review(
    db: &PgPool,
    kind: ContentKind,
    object_id: Uuid,
    priority: QueuePriority,
    content_filter_id: Option<Uuid>,
) -> Result<QueueItem, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO moderation_queue (id, content_type, object_id, priority, status, content_filter_id)
        VALUES ($1, $2, $3, $4, 'pending', $5)
        ON CONFLICT (content_type, object_id) DO UPDATE SET
            content_filter_id = COALESCE(moderation_queue.content_filter_id, EXCLUDED.content_filter_id),
            status = CASE WHEN moderation_queue.status = 'completed' THEN 'pending' ELSE moderation_queue.status END,
            priority = CASE WHEN moderation_queue.status = 'completed' THEN EXCLUDED.priority ELSE moderation_queue.priority END,
            completed_at = CASE WHEN moderation_queue.status = 'completed' THEN NULL ELSE moderation_queue.completed_at END,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(kind.to_string())
    .bind(object_id)
    .bind(priority.to_string())
    .bind(content_filter_id)
    .fetch_one(db)
    .await
}

pub async fn get_queue_item(db: &PgPool, item_id: Uuid) -> ApiResult<QueueItem> {
    sqlx::query_as("SELECT * FROM moderation_queue WHERE id = $1")
        .bind(item_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Queue item not found"))
}

pub async fn assign_queue_item(db: &PgPool, item_id: Uuid, moderator_id: Uuid) -> ApiResult<QueueItem> {
    let item = get_queue_item(db, item_id).await?;
    if item.status == QueueStatus::Completed.to_string() {
        return Err(ApiError::bad_request("Queue item is already completed"));
    }

    let item: QueueItem = sqlx::query_as(
        r#"
        UPDATE moderation_queue
        SET assigned_to = $2, assigned_at = NOW(), status = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(item_id)
    .bind(moderator_id)
    .bind(QueueStatus::InProgress.to_string())
    .fetch_one(db)
    .await?;

    tracing::info!(queue_item_id = %item_id, moderator_id = %moderator_id, "Queue item assigned");
    Ok(item)
}

/// Records the decision, closes the item and settles its content filter.
pub async fn complete_moderation(
    db: &PgPool,
    item_id: Uuid,
    moderator_id: Uuid,
    action: ActionType,
    reason: &str,
) -> ApiResult<QueueItem> {
    let item = get_queue_item(db, item_id).await?;
    if item.status == QueueStatus::Completed.to_string() {
        return Err(ApiError::bad_request("Queue item is already completed"));
    }
    let kind: ContentKind = item
        .content_type
        .parse()
        .map_err(|e: String| ApiError::internal(e))?;

    record_action(
        db,
        NewAction::manual(kind, item.object_id, action, reason.to_string(), moderator_id),
    )
    .await?;

    let item: QueueItem = sqlx::query_as(
        r#"
        UPDATE moderation_queue
        SET status = $2, completed_at = NOW(), updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(item_id)
    .bind(QueueStatus::Completed.to_string())
    .fetch_one(db)
    .await?;

    if let Some(filter_id) = item.content_filter_id {
        sqlx::query("UPDATE content_filters SET is_approved = $2, requires_review = FALSE WHERE id = $1")
            .bind(filter_id)
            .bind(action == ActionType::Approved)
            .execute(db)
            .await?;
    }

    tracing::info!(
        queue_item_id = %item_id,
        moderator_id = %moderator_id,
        action = %action,
        "Moderation completed"
    );
    Ok(item)
}

pub async fn escalate(db: &PgPool, item_id: Uuid, notes: &str) -> ApiResult<QueueItem> {
    let item = get_queue_item(db, item_id).await?;
    if item.status == QueueStatus::Completed.to_string() {
        return Err(ApiError::bad_request("Queue item is already completed"));
    }

    let item: QueueItem = sqlx::query_as(
        r#"
        UPDATE moderation_queue
        SET status = $2,
            notes = CASE WHEN $3 = '' THEN notes WHEN notes = '' THEN $3 ELSE notes || E'\n' || $3 END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(item_id)
    .bind(QueueStatus::Escalated.to_string())
    .bind(notes.trim())
    .fetch_one(db)
    .await?;

    tracing::info!(queue_item_id = %item_id, "Queue item escalated");
    Ok(item)
}

/// Oldest pending item of the highest priority.
pub async fn next_item(db: &PgPool) -> Result<Option<QueueItem>, sqlx::Error> {
    let sql = format!(
        "SELECT q.* FROM moderation_queue q WHERE q.status = 'pending' ORDER BY {}, q.created_at ASC LIMIT 1",
        QUEUE_PRIORITY_ORDER_SQL
    );
    sqlx::query_as(&sql).fetch_optional(db).await
}

// ============================================================================
// Reports
// ============================================================================

pub async fn create_report(db: &PgPool, reporter_id: Uuid, req: &CreateReportRequest) -> ApiResult<ContentReport> {
    req.validate()?;
    if content_text(db, req.content_type, req.object_id).await?.is_none() {
        return Err(ApiError::not_found("Reported content not found"));
    }

    let report: ContentReport = sqlx::query_as(
        r#"
        INSERT INTO content_reports (id, reporter_id, content_type, object_id, report_type, description, evidence, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(reporter_id)
    .bind(req.content_type.to_string())
    .bind(req.object_id)
    .bind(req.report_type.to_string())
    .bind(req.description.trim())
    .bind(sqlx::types::Json(&req.evidence))
    .bind(ReportStatus::Pending.to_string())
    .fetch_one(db)
    .await?;

    enqueue_for_review(db, req.content_type, req.object_id, QueuePriority::High, None).await?;

    tracing::info!(
        report_id = %report.id,
        reporter_id = %reporter_id,
        content_type = %req.content_type,
        object_id = %req.object_id,
        "Content reported"
    );
    Ok(report)
}

pub async fn resolve_report(
    db: &PgPool,
    report_id: Uuid,
    moderator_id: Uuid,
    req: &ResolveReportRequest,
) -> ApiResult<ContentReport> {
    let report: ContentReport = sqlx::query_as("SELECT * FROM content_reports WHERE id = $1")
        .bind(report_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Report not found"))?;

    let current: ReportStatus = report.status.parse().unwrap_or_default();
    if matches!(current, ReportStatus::Resolved | ReportStatus::Dismissed) {
        return Err(ApiError::bad_request("Report is already closed"));
    }

    let status = if req.dismiss {
        ReportStatus::Dismissed
    } else {
        ReportStatus::Resolved
    };

    let report: ContentReport = sqlx::query_as(
        r#"
        UPDATE content_reports
        SET status = $2, reviewed_by = $3, resolution_notes = $4, resolved_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(report_id)
    .bind(status.to_string())
    .bind(moderator_id)
    .bind(&req.resolution_notes)
    .fetch_one(db)
    .await?;

    if let Some(action) = req.action {
        let kind: ContentKind = report
            .content_type
            .parse()
            .map_err(|e: String| ApiError::internal(e))?;
        let mut new = NewAction::manual(
            kind,
            report.object_id,
            action,
            format!("Report resolution: {}", req.resolution_notes),
            moderator_id,
        );
        new.report_id = Some(report.id);
        record_action(db, new).await?;
    }

    tracing::info!(report_id = %report_id, moderator_id = %moderator_id, status = %status, "Report closed");
    Ok(report)
}

// ============================================================================
// Warnings
// ============================================================================

/// Stores a warning and suspends the user when recent warnings cross the
/// threshold.
pub async fn issue_warning(db: &PgPool, issued_by: Uuid, req: &IssueWarningRequest) -> ApiResult<WarningOutcome> {
    if req.title.trim().is_empty() || req.message.trim().is_empty() {
        return Err(ApiError::bad_request("Title and message are required"));
    }

    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
        .bind(req.user_id)
        .fetch_optional(db)
        .await?;
    if exists.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    let warning: UserWarning = sqlx::query_as(
        r#"
        INSERT INTO user_warnings (id, user_id, warning_type, severity, title, message, related_action_id, issued_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.user_id)
    .bind(req.warning_type.to_string())
    .bind(req.severity.to_string())
    .bind(req.title.trim())
    .bind(req.message.trim())
    .bind(req.related_action_id)
    .bind(issued_by)
    .fetch_one(db)
    .await?;

    record_action(
        db,
        NewAction::manual(
            ContentKind::User,
            req.user_id,
            ActionType::WarningIssued,
            warning.title.clone(),
            issued_by,
        ),
    )
    .await?;

    tracing::info!(
        user_id = %req.user_id,
        warning_id = %warning.id,
        severity = %req.severity,
        "Warning issued"
    );

    let user_suspended = check_suspension(db, req.user_id).await?;
    Ok(WarningOutcome {
        warning,
        user_suspended,
    })
}

async fn check_suspension(db: &PgPool, user_id: Uuid) -> Result<bool, sqlx::Error> {
    let since = Utc::now() - Duration::days(WARNING_WINDOW_DAYS);
    let (critical, high): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FILTER (WHERE severity = $2),
               COUNT(*) FILTER (WHERE severity = $3)
        FROM user_warnings
        WHERE user_id = $1 AND created_at >= $4
        "#,
    )
    .bind(user_id)
    .bind(WarningSeverity::Critical.to_string())
    .bind(WarningSeverity::High.to_string())
    .bind(since)
    .fetch_one(db)
    .await?;

    if !should_suspend(critical, high) {
        return Ok(false);
    }

    let result = sqlx::query("UPDATE users SET is_active = FALSE WHERE id = $1 AND is_active = TRUE")
        .bind(user_id)
        .execute(db)
        .await?;
    if result.rows_affected() == 0 {
        return Ok(false);
    }

    record_action(
        db,
        NewAction {
            kind: ContentKind::User,
            object_id: user_id,
            action: ActionType::UserSuspended,
            reason: "Multiple policy violations".to_string(),
            moderator_id: None,
            is_automated: true,
            rule_id: None,
            report_id: None,
            metadata: json!({ "suspension_days": SUSPENSION_DAYS }),
        },
    )
    .await?;

    tracing::warn!(
        user_id = %user_id,
        critical_warnings = critical,
        high_warnings = high,
        "User suspended"
    );
    Ok(true)
}

pub async fn acknowledge_warning(db: &PgPool, user_id: Uuid, warning_id: Uuid) -> ApiResult<UserWarning> {
    sqlx::query_as(
        r#"
        UPDATE user_warnings
        SET is_acknowledged = TRUE, acknowledged_at = COALESCE(acknowledged_at, NOW())
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(warning_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| ApiError::not_found("Warning not found"))
}

pub async fn list_warnings(db: &PgPool, user_id: Uuid) -> Result<Vec<UserWarning>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM user_warnings WHERE user_id = $1 ORDER BY created_at DESC")
        .bind(user_id)
        .fetch_all(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::types::Json;

    fn rule(rule_type: RuleType, action: RuleAction, threshold: f64) -> ModerationRule {
        ModerationRule {
            id: Uuid::new_v4(),
            name: format!("{} rule", rule_type),
            description: String::new(),
            rule_type: rule_type.to_string(),
            keywords: Json(vec![]),
            patterns: Json(vec![]),
            confidence_threshold: threshold,
            action: action.to_string(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn scores(profanity: f64, spam: f64, toxicity: f64) -> ContentScores {
        ContentScores {
            profanity,
            spam,
            toxicity,
            sentiment: 0.0,
        }
    }

    #[test]
    fn score_rules_compare_against_threshold() {
        let r = rule(RuleType::Spam, RuleAction::Flag, 0.4);
        assert!(rule_matches(&r, "", &scores(0.0, 0.4, 0.0)));
        assert!(!rule_matches(&r, "", &scores(1.0, 0.2, 1.0)));

        let r = rule(RuleType::Inappropriate, RuleAction::Flag, 0.5);
        assert!(rule_matches(&r, "", &scores(0.0, 0.0, 0.9)));
    }

    #[test]
    fn custom_rules_match_keywords_and_patterns() {
        let mut r = rule(RuleType::Custom, RuleAction::Flag, 0.8);
        r.keywords = Json(vec!["Venmo".into()]);
        assert!(rule_matches(&r, "pay me on venmo", &ContentScores::default()));
        assert!(!rule_matches(&r, "pay through the site", &ContentScores::default()));

        r.keywords = Json(vec![]);
        r.patterns = Json(vec![r"\d{3}-\d{4}".into(), "(".into()]);
        assert!(rule_matches(&r, "call 555-1234", &ContentScores::default()));
        assert!(!rule_matches(&r, "call me", &ContentScores::default()));

        r.patterns = Json(vec!["WHATSAPP".into()]);
        assert!(rule_matches(&r, "text me on WhatsApp", &ContentScores::default()));
    }

    #[test]
    fn unsupported_rule_types_never_fire() {
        let r = rule(RuleType::Copyright, RuleAction::AutoReject, 0.0);
        assert!(!rule_matches(&r, "anything", &scores(1.0, 1.0, 1.0)));
    }

    #[test]
    fn clean_content_is_approved() {
        let verdict = evaluate("Fix my fence", scores(0.0, 0.0, 0.0), &[]);
        assert_eq!(verdict.risk_level, RiskLevel::Low);
        assert!(verdict.is_approved);
        assert!(!verdict.requires_review);
        assert!(verdict.fired.is_empty());
    }

    #[test]
    fn high_risk_needs_review() {
        let verdict = evaluate("x", scores(0.0, 0.6, 0.0), &[]);
        assert_eq!(verdict.risk_level, RiskLevel::High);
        assert!(verdict.requires_review);
        assert!(!verdict.is_approved);
    }

    #[test]
    fn rule_actions_adjust_the_verdict() {
        let flag = rule(RuleType::Profanity, RuleAction::Flag, 0.1);
        let verdict = evaluate("x", scores(0.2, 0.0, 0.0), &[flag]);
        assert!(verdict.requires_review);
        assert!(verdict.is_approved);
        assert_eq!(verdict.fired.len(), 1);
        assert_eq!(verdict.fired[0].action, RuleAction::Flag);

        let reject = rule(RuleType::Profanity, RuleAction::AutoReject, 0.1);
        let verdict = evaluate("x", scores(0.2, 0.0, 0.0), &[reject]);
        assert!(verdict.requires_review);
        assert!(!verdict.is_approved);

        let approve = rule(RuleType::Profanity, RuleAction::AutoApprove, 0.1);
        let verdict = evaluate("x", scores(0.2, 0.0, 0.0), &[approve]);
        assert!(!verdict.requires_review);
        assert!(verdict.is_approved);
        assert_eq!(verdict.fired[0].action.recorded_as(), ActionType::Approved);
    }

    #[test]
    fn inactive_rules_are_skipped() {
        let mut r = rule(RuleType::Profanity, RuleAction::Quarantine, 0.0);
        r.is_active = false;
        let verdict = evaluate("x", scores(0.0, 0.0, 0.0), &[r]);
        assert!(verdict.fired.is_empty());
    }
}

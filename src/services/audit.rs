//! Admin audit trail.

use serde_json::Value;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::domain::admin::AdminActionType;

/// One admin action about to be recorded
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: AdminActionType,
    pub description: String,
    pub target: Option<(String, Uuid)>,
    pub old_values: Value,
    pub new_values: Value,
}

impl AuditEntry {
    pub fn new(action: AdminActionType, description: impl Into<String>) -> Self {
        Self {
            action,
            description: description.into(),
            target: None,
            old_values: Value::Object(Default::default()),
            new_values: Value::Object(Default::default()),
        }
    }

    pub fn target(mut self, content_type: &str, object_id: Uuid) -> Self {
        self.target = Some((content_type.to_string(), object_id));
        self
    }

    pub fn old_values(mut self, values: Value) -> Self {
        self.old_values = values;
        self
    }

    pub fn new_values(mut self, values: Value) -> Self {
        self.new_values = values;
        self
    }
}

/// Inserts the log row through `db`, which may be the pool or an open
/// transaction.
pub async fn log_admin_action<'e, E>(
    db: E,
    admin_user_id: Uuid,
    ip_address: &str,
    entry: AuditEntry,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let (content_type, object_id) = match &entry.target {
        Some((kind, id)) => (Some(kind.as_str()), Some(*id)),
        None => (None, None),
    };

    sqlx::query(
        r#"
        INSERT INTO admin_action_logs
            (id, admin_user_id, action, description, content_type, object_id, old_values, new_values, ip_address)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(admin_user_id)
    .bind(entry.action.to_string())
    .bind(&entry.description)
    .bind(content_type)
    .bind(object_id)
    .bind(sqlx::types::Json(&entry.old_values))
    .bind(sqlx::types::Json(&entry.new_values))
    .bind(ip_address)
    .execute(db)
    .await?;

    tracing::info!(
        admin_user_id = %admin_user_id,
        action = %entry.action,
        object_id = ?object_id,
        "Admin action recorded"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_fills_target_and_values() {
        let id = Uuid::new_v4();
        let entry = AuditEntry::new(AdminActionType::Ban, "Banned user")
            .target("user", id)
            .old_values(json!({"is_active": true}))
            .new_values(json!({"is_active": false}));

        assert_eq!(entry.target, Some(("user".to_string(), id)));
        assert_eq!(entry.old_values["is_active"], true);
        assert_eq!(entry.new_values["is_active"], false);
    }

    #[test]
    fn values_default_to_empty_objects() {
        let entry = AuditEntry::new(AdminActionType::Update, "x");
        assert_eq!(entry.old_values, json!({}));
        assert!(entry.target.is_none());
    }
}

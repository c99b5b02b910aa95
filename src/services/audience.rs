//! Recipient selection for campaigns and broadcast push notifications.

use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::domain::accounts::{full_name, UserSummary};
use crate::domain::admin::{Audience, ACTIVE_AUDIENCE_DAYS};

#[derive(Debug, Clone, FromRow)]
pub struct Recipient {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub fcm_token: Option<String>,
}

impl Recipient {
    pub fn display_name(&self) -> String {
        let name = full_name(&self.first_name, &self.last_name);
        if name.is_empty() {
            self.email.clone()
        } else {
            name
        }
    }
}

/// Query parameters an audience narrows active users by
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudienceFilter {
    pub user_type: Option<&'static str>,
    pub recent_login_days: Option<i32>,
    pub user_ids: Option<Vec<Uuid>>,
}

impl AudienceFilter {
    pub fn new(audience: Audience, specific: &[Uuid]) -> Self {
        match audience {
            Audience::All => Self::default(),
            Audience::Active => Self {
                recent_login_days: Some(ACTIVE_AUDIENCE_DAYS as i32),
                ..Self::default()
            },
            Audience::Contractors => Self {
                user_type: Some("contractor"),
                ..Self::default()
            },
            Audience::Clients => Self {
                user_type: Some("client"),
                ..Self::default()
            },
            Audience::Specific => Self {
                user_ids: Some(specific.to_vec()),
                ..Self::default()
            },
        }
    }
}

const AUDIENCE_WHERE: &str = r#"
    u.is_active = TRUE
    AND ($1::text IS NULL OR u.user_type = $1)
    AND ($2::int IS NULL OR u.last_login >= NOW() - make_interval(days => $2))
    AND ($3::uuid[] IS NULL OR u.id = ANY($3))
"#;

/// Every active user in the audience.
pub async fn recipients(
    db: &PgPool,
    audience: Audience,
    specific: &[Uuid],
) -> Result<Vec<Recipient>, sqlx::Error> {
    let filter = AudienceFilter::new(audience, specific);
    let sql = format!(
        "SELECT u.id, u.email, u.first_name, u.last_name, u.fcm_token FROM users u WHERE {} ORDER BY u.date_joined",
        AUDIENCE_WHERE
    );

    sqlx::query_as(&sql)
        .bind(filter.user_type)
        .bind(filter.recent_login_days)
        .bind(filter.user_ids)
        .fetch_all(db)
        .await
}

pub async fn count(db: &PgPool, audience: Audience, specific: &[Uuid]) -> Result<i64, sqlx::Error> {
    let filter = AudienceFilter::new(audience, specific);
    let sql = format!("SELECT COUNT(*) FROM users u WHERE {}", AUDIENCE_WHERE);

    sqlx::query_scalar(&sql)
        .bind(filter.user_type)
        .bind(filter.recent_login_days)
        .bind(filter.user_ids)
        .fetch_one(db)
        .await
}

/// Newest members of an audience, for previews.
pub async fn sample(
    db: &PgPool,
    audience: Audience,
    specific: &[Uuid],
    limit: i64,
) -> Result<Vec<UserSummary>, sqlx::Error> {
    let filter = AudienceFilter::new(audience, specific);
    let sql = format!(
        "SELECT u.id, u.email, u.first_name, u.last_name, u.avatar, u.user_type FROM users u WHERE {} ORDER BY u.date_joined DESC LIMIT $4",
        AUDIENCE_WHERE
    );

    sqlx::query_as(&sql)
        .bind(filter.user_type)
        .bind(filter.recent_login_days)
        .bind(filter.user_ids)
        .bind(limit)
        .fetch_all(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_filters() {
        assert_eq!(AudienceFilter::new(Audience::All, &[]), AudienceFilter::default());
        assert_eq!(
            AudienceFilter::new(Audience::Active, &[]).recent_login_days,
            Some(30)
        );
        assert_eq!(
            AudienceFilter::new(Audience::Contractors, &[]).user_type,
            Some("contractor")
        );
        assert_eq!(AudienceFilter::new(Audience::Clients, &[]).user_type, Some("client"));

        let id = Uuid::new_v4();
        assert_eq!(
            AudienceFilter::new(Audience::Specific, &[id]).user_ids,
            Some(vec![id])
        );
    }

    #[test]
    fn specific_ids_are_ignored_for_broad_audiences() {
        let id = Uuid::new_v4();
        assert_eq!(AudienceFilter::new(Audience::All, &[id]).user_ids, None);
    }

    #[test]
    fn recipient_name_falls_back_to_email() {
        let r = Recipient {
            id: Uuid::new_v4(),
            email: "x@example.com".into(),
            first_name: String::new(),
            last_name: String::new(),
            fcm_token: None,
        };
        assert_eq!(r.display_name(), "x@example.com");
    }
}

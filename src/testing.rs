//! Row fixtures for database-backed tests
//!
//! Those tests run against a scratch database created by `#[sqlx::test]`
//! and are ignored unless `DATABASE_URL` points at a Postgres server:
//! `cargo test -- --ignored`.

use sqlx::PgPool;
use uuid::Uuid;

pub async fn insert_user(pool: &PgPool, user_type: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (id, email, password_hash, first_name, user_type) VALUES ($1, $2, 'x', 'Test', $3)",
    )
    .bind(id)
    .bind(format!("{}@example.com", id))
    .bind(user_type)
    .execute(pool)
    .await
    .unwrap();
    id
}

/// A contractor user with a profile; returns (user id, profile id).
pub async fn insert_contractor(pool: &PgPool) -> (Uuid, Uuid) {
    let user_id = insert_user(pool, "contractor").await;
    let profile_id = Uuid::new_v4();
    sqlx::query("INSERT INTO contractor_profiles (id, user_id) VALUES ($1, $2)")
        .bind(profile_id)
        .bind(user_id)
        .execute(pool)
        .await
        .unwrap();
    (user_id, profile_id)
}

pub async fn insert_project(pool: &PgPool, client_id: Uuid, status: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO projects (id, client_id, title, description, budget_min, budget_max, status)
        VALUES ($1, $2, 'Kitchen remodel', 'Replace cabinets', 1000, 2000, $3)
        "#,
    )
    .bind(id)
    .bind(client_id)
    .bind(status)
    .execute(pool)
    .await
    .unwrap();
    id
}

pub async fn insert_application(pool: &PgPool, project_id: Uuid, contractor_id: Uuid) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO project_applications
            (id, project_id, contractor_id, cover_letter, proposed_budget, proposed_timeline)
        VALUES ($1, $2, $3, 'I can do this', 1500, 14)
        "#,
    )
    .bind(id)
    .bind(project_id)
    .bind(contractor_id)
    .execute(pool)
    .await
    .unwrap();
    id
}

pub async fn status_of(pool: &PgPool, table: &str, id: Uuid) -> String {
    sqlx::query_scalar(&format!("SELECT status FROM {} WHERE id = $1", table))
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

//! FCM push delivery.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use super::audience;
use crate::app::AppState;
use crate::config::Settings;
use crate::domain::admin::{DeliveryStatus, PushNotification};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The recipient has no device token; counted as delivered.
    Simulated,
}

#[derive(Debug, Deserialize)]
struct FcmResponse {
    #[serde(default)]
    success: i64,
    #[serde(default)]
    failure: i64,
    #[serde(default)]
    results: Vec<FcmResult>,
}

#[derive(Debug, Deserialize)]
struct FcmResult {
    #[serde(default)]
    error: Option<String>,
}

/// FCM legacy HTTP client
#[derive(Clone)]
pub struct PushClient {
    http: reqwest::Client,
    url: String,
    server_key: Option<String>,
}

impl PushClient {
    pub fn new(url: &str, server_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build push HTTP client")?;

        Ok(Self {
            http,
            url: url.to_string(),
            server_key,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        if settings.fcm_server_key.is_none() {
            tracing::warn!("FCM_SERVER_KEY not set, pushes to devices will fail");
        }
        Self::new(
            &settings.fcm_url,
            settings.fcm_server_key.clone(),
            Duration::from_secs(10),
        )
    }

    /// Sends one notification to a device token.
    #[tracing::instrument(skip(self, token, body, data))]
    pub async fn send(
        &self,
        token: Option<&str>,
        title: &str,
        body: &str,
        data: &serde_json::Value,
    ) -> Result<PushOutcome> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            tracing::debug!("No FCM token, simulating delivery");
            return Ok(PushOutcome::Simulated);
        };
        let server_key = self
            .server_key
            .as_deref()
            .context("FCM server key is not configured")?;

        let response = self
            .http
            .post(&self.url)
            .header("Authorization", format!("key={}", server_key))
            .json(&json!({
                "to": token,
                "notification": { "title": title, "body": body },
                "data": data,
            }))
            .send()
            .await
            .context("FCM request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("FCM returned {}", status);
        }

        let parsed: FcmResponse = response.json().await.context("Invalid FCM response")?;
        if parsed.success == 0 && parsed.failure > 0 {
            let reason = parsed
                .results
                .into_iter()
                .find_map(|r| r.error)
                .unwrap_or_else(|| "unknown".to_string());
            anyhow::bail!("FCM rejected the message: {}", reason);
        }

        Ok(PushOutcome::Delivered)
    }
}

/// Sends a broadcast push notification that has been moved to `sending`.
pub async fn deliver_push_notification(state: &AppState, notification_id: Uuid) -> Result<()> {
    let notification: Option<PushNotification> =
        sqlx::query_as("SELECT * FROM push_notifications WHERE id = $1 AND status = 'sending'")
            .bind(notification_id)
            .fetch_optional(&state.db)
            .await?;

    let Some(notification) = notification else {
        tracing::debug!(notification_id = %notification_id, "Push notification no longer pending");
        return Ok(());
    };

    let recipients =
        audience::recipients(&state.db, notification.audience(), &notification.target_user_ids.0)
            .await?;

    let mut delivered = 0i32;
    let mut failed = 0i32;
    for recipient in &recipients {
        match state
            .push
            .send(
                recipient.fcm_token.as_deref(),
                &notification.title,
                &notification.message,
                &notification.extra_data.0,
            )
            .await
        {
            Ok(_) => delivered += 1,
            Err(e) => {
                failed += 1;
                tracing::warn!(
                    notification_id = %notification_id,
                    user_id = %recipient.id,
                    error = %e,
                    "Push delivery failed"
                );
            }
        }
    }

    if delivered == 0 && failed > 0 {
        anyhow::bail!("Push notification {} reached no recipients", notification_id);
    }

    sqlx::query(
        r#"
        UPDATE push_notifications
        SET status = $2, sent_at = $3, total_recipients = $4, delivered_count = $5, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(notification_id)
    .bind(DeliveryStatus::Sent.to_string())
    .bind(Utc::now())
    .bind(recipients.len() as i32)
    .bind(delivered)
    .execute(&state.db)
    .await?;

    tracing::info!(
        notification_id = %notification_id,
        recipients = recipients.len(),
        delivered = delivered,
        failed = failed,
        "Push notification sent"
    );
    Ok(())
}

pub async fn mark_push_failed(db: &PgPool, notification_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE push_notifications SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(notification_id)
        .bind(DeliveryStatus::Failed.to_string())
        .execute(db)
        .await?;
    Ok(())
}

/// Pushes a single in-app notification to its user's device.
pub async fn send_to_user(
    state: &AppState,
    user_id: Uuid,
    title: &str,
    body: &str,
    data: &serde_json::Value,
) -> Result<PushOutcome> {
    let token: Option<Option<String>> =
        sqlx::query_scalar("SELECT fcm_token FROM users WHERE id = $1 AND is_active = TRUE")
            .bind(user_id)
            .fetch_optional(&state.db)
            .await?;

    match token {
        Some(token) => state.push.send(token.as_deref(), title, body, data).await,
        None => Ok(PushOutcome::Simulated),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer, key: Option<&str>) -> PushClient {
        PushClient::new(
            &server.url("/fcm/send"),
            key.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn sends_fcm_payload_with_server_key() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/fcm/send")
                    .header("Authorization", "key=secret")
                    .json_body(json!({
                        "to": "device-1",
                        "notification": { "title": "Hello", "body": "World" },
                        "data": { "kind": "test" },
                    }));
                then.status(200)
                    .json_body(json!({ "success": 1, "failure": 0, "results": [{}] }));
            })
            .await;

        let outcome = client(&server, Some("secret"))
            .send(Some("device-1"), "Hello", "World", &json!({ "kind": "test" }))
            .await
            .unwrap();

        assert_eq!(outcome, PushOutcome::Delivered);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_token_is_simulated_without_a_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/fcm/send");
                then.status(200);
            })
            .await;

        let outcome = client(&server, Some("secret"))
            .send(None, "Hello", "World", &json!({}))
            .await
            .unwrap();

        assert_eq!(outcome, PushOutcome::Simulated);
        mock.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn missing_server_key_fails() {
        let server = MockServer::start_async().await;
        let result = client(&server, None)
            .send(Some("device-1"), "Hello", "World", &json!({}))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejected_message_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/fcm/send");
                then.status(200).json_body(json!({
                    "success": 0,
                    "failure": 1,
                    "results": [{ "error": "NotRegistered" }],
                }));
            })
            .await;

        let err = client(&server, Some("secret"))
            .send(Some("stale"), "Hello", "World", &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("NotRegistered"));
    }

    #[tokio::test]
    async fn server_errors_fail() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/fcm/send");
                then.status(503);
            })
            .await;

        assert!(client(&server, Some("secret"))
            .send(Some("device-1"), "Hello", "World", &json!({}))
            .await
            .is_err());
    }
}

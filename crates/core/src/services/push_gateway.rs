//! Push gateway (FCM HTTP v1).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};
use wakeup_common::config::PushConfig;
use wakeup_common::{AppError, AppResult};

/// FCM error codes meaning the address will never be deliverable again.
const INVALID_TOKEN_CODES: [&str; 5] = [
    "UNREGISTERED",
    "INVALID_ARGUMENT",
    "NOT_FOUND",
    "registration-token-not-registered",
    "invalid-registration-token",
];

/// Whether a push failure code marks the address as permanently invalid.
#[must_use]
pub fn is_invalid_token_code(code: &str) -> bool {
    INVALID_TOKEN_CODES
        .iter()
        .any(|known| known.eq_ignore_ascii_case(code) || code.ends_with(known))
}

/// Delivery hints for Android devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndroidHints {
    /// Deliver with high priority.
    pub high_priority: bool,
    /// Drop the message if it cannot be delivered within this window.
    pub ttl: Duration,
}

/// Delivery hints for Apple devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApnsHints {
    /// `apns-priority` header value.
    pub priority: u8,
    /// `apns-expiration` header value (UNIX seconds).
    pub expiration: i64,
    /// Sound played on delivery.
    pub sound: String,
}

/// One data-only message fanned out to many device addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastMessage {
    pub tokens: Vec<String>,
    pub data: BTreeMap<String, String>,
    pub android: AndroidHints,
    pub apns: ApnsHints,
}

/// Outcome of a single address within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered { message_id: String },
    Failed { code: String, message: String },
}

/// Per-address result, in the order of [`MulticastMessage::tokens`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResponse {
    pub token: String,
    pub outcome: SendOutcome,
}

impl SendResponse {
    #[must_use]
    pub fn delivered(token: &str, message_id: impl Into<String>) -> Self {
        Self {
            token: token.to_string(),
            outcome: SendOutcome::Delivered {
                message_id: message_id.into(),
            },
        }
    }

    #[must_use]
    pub fn failed(token: &str, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            token: token.to_string(),
            outcome: SendOutcome::Failed {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, SendOutcome::Delivered { .. })
    }
}

/// Result of one multicast call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResponse {
    pub responses: Vec<SendResponse>,
}

impl BatchResponse {
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.responses.iter().filter(|r| r.is_success()).count()
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.responses.len() - self.success_count()
    }
}

/// Transport that delivers a multicast message.
///
/// An `Err` means the whole batch failed; per-address failures are
/// reported inside the [`BatchResponse`].
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send_multicast(&self, message: &MulticastMessage) -> AppResult<BatchResponse>;
}

/// Source of the OAuth2 bearer token.
#[derive(Debug, Clone)]
enum AccessToken {
    /// Fixed value from configuration; stops working once it expires.
    Static(String),
    /// File rewritten by an external refresher.
    File(PathBuf),
}

impl AccessToken {
    async fn current(&self) -> AppResult<String> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::File(path) => {
                let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                    AppError::Push(format!(
                        "Failed to read FCM access token from {}: {e}",
                        path.display()
                    ))
                })?;
                let token = raw.trim();
                if token.is_empty() {
                    return Err(AppError::Push(format!(
                        "FCM access token file {} is empty",
                        path.display()
                    )));
                }
                Ok(token.to_string())
            }
        }
    }
}

/// FCM HTTP v1 gateway.
///
/// The v1 API has no multicast endpoint, so a batch is sent as concurrent
/// single-address requests. The bearer token is resolved once per batch.
#[derive(Clone)]
pub struct FcmGateway {
    http_client: Arc<reqwest::Client>,
    send_url: String,
    access_token: AccessToken,
}

impl FcmGateway {
    pub fn new(config: &PushConfig) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Push(format!("Failed to create HTTP client: {e}")))?;

        let access_token = match &config.access_token_file {
            Some(path) => AccessToken::File(PathBuf::from(path)),
            None => {
                if config.access_token.is_empty() {
                    warn!("FCM access token is empty; pushes will be rejected");
                }
                AccessToken::Static(config.access_token.clone())
            }
        };

        Ok(Self {
            http_client: Arc::new(http_client),
            send_url: format!(
                "{}/v1/projects/{}/messages:send",
                config.endpoint.trim_end_matches('/'),
                config.project_id
            ),
            access_token,
        })
    }

    async fn send_one(
        &self,
        bearer: &str,
        token: &str,
        message: &MulticastMessage,
    ) -> Result<SendResponse, StatusCode> {
        let response = match self
            .http_client
            .post(&self.send_url)
            .bearer_auth(bearer)
            .json(&build_request_body(token, message))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "FCM request failed");
                return Ok(SendResponse::failed(token, "UNAVAILABLE", e.to_string()));
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(status);
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            let name = serde_json::from_str::<FcmSendResponse>(&body)
                .map(|r| r.name)
                .unwrap_or_default();
            return Ok(SendResponse::delivered(token, name));
        }

        let (code, message) = parse_error_body(&body)
            .unwrap_or_else(|| (status.as_str().to_string(), body.clone()));
        Ok(SendResponse::failed(token, code, message))
    }
}

#[async_trait]
impl PushGateway for FcmGateway {
    async fn send_multicast(&self, message: &MulticastMessage) -> AppResult<BatchResponse> {
        let bearer = self.access_token.current().await?;
        let results = join_all(
            message
                .tokens
                .iter()
                .map(|token| self.send_one(&bearer, token, message)),
        )
        .await;

        let mut responses = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(response) => responses.push(response),
                Err(status) => {
                    return Err(AppError::Push(format!("FCM rejected credentials: {status}")));
                }
            }
        }

        let batch = BatchResponse { responses };
        debug!(
            success = batch.success_count(),
            failure = batch.failure_count(),
            "FCM batch sent"
        );
        Ok(batch)
    }
}

#[derive(Deserialize)]
struct FcmSendResponse {
    name: String,
}

#[derive(Deserialize)]
struct FcmErrorEnvelope {
    error: FcmError,
}

#[derive(Deserialize)]
struct FcmError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<Value>,
}

/// Extract `(code, message)` from an FCM error body, preferring the
/// FCM-specific `errorCode` over the generic status.
fn parse_error_body(body: &str) -> Option<(String, String)> {
    let envelope: FcmErrorEnvelope = serde_json::from_str(body).ok()?;
    let error = envelope.error;
    let code = error
        .details
        .iter()
        .find_map(|d| d.get("errorCode").and_then(Value::as_str))
        .map_or(error.status, str::to_string);
    Some((code, error.message))
}

/// Data-only v1 request for one address.
fn build_request_body(token: &str, message: &MulticastMessage) -> Value {
    let android_priority = if message.android.high_priority {
        "HIGH"
    } else {
        "NORMAL"
    };

    json!({
        "message": {
            "token": token,
            "data": message.data,
            "android": {
                "priority": android_priority,
                "ttl": format!("{}s", message.android.ttl.as_secs()),
            },
            "apns": {
                "headers": {
                    "apns-priority": message.apns.priority.to_string(),
                    "apns-expiration": message.apns.expiration.to_string(),
                },
                "payload": {
                    "aps": { "sound": message.apns.sound },
                },
            },
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn message() -> MulticastMessage {
        MulticastMessage {
            tokens: vec!["t1".to_string()],
            data: BTreeMap::from([("type".to_string(), "PRE_ALERT".to_string())]),
            android: AndroidHints {
                high_priority: true,
                ttl: Duration::from_secs(300),
            },
            apns: ApnsHints {
                priority: 10,
                expiration: 1_741_132_800,
                sound: "default".to_string(),
            },
        }
    }

    #[test]
    fn test_request_body_is_data_only() {
        let body = build_request_body("t1", &message());
        let msg = &body["message"];

        assert_eq!(msg["token"], "t1");
        assert_eq!(msg["data"]["type"], "PRE_ALERT");
        assert!(msg.get("notification").is_none());
        assert_eq!(msg["android"]["priority"], "HIGH");
        assert_eq!(msg["android"]["ttl"], "300s");
        assert_eq!(msg["apns"]["headers"]["apns-priority"], "10");
        assert_eq!(msg["apns"]["headers"]["apns-expiration"], "1741132800");
        assert_eq!(msg["apns"]["payload"]["aps"]["sound"], "default");
    }

    #[test]
    fn test_parse_error_prefers_fcm_error_code() {
        let body = r#"{
            "error": {
                "code": 404,
                "message": "Requested entity was not found.",
                "status": "NOT_FOUND",
                "details": [{
                    "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                    "errorCode": "UNREGISTERED"
                }]
            }
        }"#;

        let (code, message) = parse_error_body(body).unwrap();
        assert_eq!(code, "UNREGISTERED");
        assert_eq!(message, "Requested entity was not found.");
    }

    #[test]
    fn test_parse_error_falls_back_to_status() {
        let body = r#"{"error": {"code": 503, "message": "busy", "status": "UNAVAILABLE"}}"#;
        assert_eq!(
            parse_error_body(body).unwrap(),
            ("UNAVAILABLE".to_string(), "busy".to_string())
        );
        assert!(parse_error_body("<html>").is_none());
    }

    #[test]
    fn test_invalid_token_codes() {
        assert!(is_invalid_token_code("UNREGISTERED"));
        assert!(is_invalid_token_code("INVALID_ARGUMENT"));
        assert!(is_invalid_token_code("messaging/registration-token-not-registered"));
        assert!(is_invalid_token_code("messaging/invalid-registration-token"));
        assert!(!is_invalid_token_code("UNAVAILABLE"));
        assert!(!is_invalid_token_code("QUOTA_EXCEEDED"));
    }

    #[test]
    fn test_fcm_send_url() {
        let gateway = FcmGateway::new(&PushConfig {
            project_id: "wakeup-dev".to_string(),
            access_token: "token".to_string(),
            access_token_file: None,
            endpoint: "https://fcm.googleapis.com/".to_string(),
            android_ttl_secs: 300,
            apns_expiration_secs: 300,
            timeout_secs: 10,
        })
        .unwrap();

        assert_eq!(
            gateway.send_url,
            "https://fcm.googleapis.com/v1/projects/wakeup-dev/messages:send"
        );
    }

    #[tokio::test]
    async fn test_access_token_file_is_read_per_batch() {
        let path = std::env::temp_dir().join(format!("wakeup-fcm-token-{}", std::process::id()));
        std::fs::write(&path, "first\n").unwrap();
        let gateway = FcmGateway::new(&PushConfig {
            project_id: "wakeup-dev".to_string(),
            access_token: "ignored".to_string(),
            access_token_file: Some(path.display().to_string()),
            endpoint: "https://fcm.googleapis.com".to_string(),
            android_ttl_secs: 300,
            apns_expiration_secs: 300,
            timeout_secs: 10,
        })
        .unwrap();

        assert_eq!(gateway.access_token.current().await.unwrap(), "first");
        std::fs::write(&path, "refreshed").unwrap();
        assert_eq!(gateway.access_token.current().await.unwrap(), "refreshed");

        std::fs::write(&path, "  \n").unwrap();
        assert!(matches!(gateway.access_token.current().await, Err(AppError::Push(_))));
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(gateway.access_token.current().await, Err(AppError::Push(_))));
    }

    #[test]
    fn test_batch_counts() {
        let batch = BatchResponse {
            responses: vec![
                SendResponse::delivered("a", "m1"),
                SendResponse::failed("b", "UNREGISTERED", "gone"),
            ],
        };
        assert_eq!(batch.success_count(), 1);
        assert_eq!(batch.failure_count(), 1);
    }
}

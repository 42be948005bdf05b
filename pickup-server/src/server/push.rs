use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::config::AppConfig;

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Refresh the cached OAuth token this long before it actually expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Why a notification did not reach the device. Never surfaced as a request error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryFailure {
    #[error("invalid registration token")]
    InvalidRegistration,
    #[error("device token is no longer registered")]
    Unregistered,
    #[error("child has no device token")]
    MissingDeviceToken,
    #[error("push notifications are disabled")]
    Disabled,
    #[error("{0}")]
    Unknown(String),
}

impl DeliveryFailure {
    /// The stored device token will never work again and should be dropped.
    pub fn is_stale_token(&self) -> bool {
        matches!(
            self,
            DeliveryFailure::InvalidRegistration | DeliveryFailure::Unregistered
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Sent { message_id: String },
    Failed(DeliveryFailure),
}

#[derive(Clone)]
pub struct PushService {
    inner: Arc<PushServiceInner>,
}

struct PushServiceInner {
    client: reqwest::Client,
    send_url: String,
    credentials: Credentials,
}

enum Credentials {
    Static(String),
    ServiceAccount {
        client_email: String,
        token_uri: String,
        key: EncodingKey,
        cached: Mutex<Option<CachedToken>>,
    },
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    #[serde(default)]
    project_id: Option<String>,
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

impl PushService {
    /// `None` means push is disabled; callers report `DeliveryFailure::Disabled`.
    pub fn from_config(cfg: &AppConfig) -> Option<Self> {
        let push_cfg = cfg.push.as_ref()?;
        if !push_cfg.enabled {
            return None;
        }

        let account = match push_cfg.service_account_base64.as_deref() {
            Some(encoded) if !encoded.trim().is_empty() => match decode_service_account(encoded) {
                Ok(sa) => Some(sa),
                Err(err) => {
                    warn!(error = %err, "push: unusable service account; disabling push service");
                    return None;
                }
            },
            _ => None,
        };

        let project_id = push_cfg
            .project_id
            .clone()
            .or_else(|| account.as_ref().and_then(|sa| sa.project_id.clone()));
        let send_url = match (&push_cfg.endpoint, project_id) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Some(project)) => format!(
                "https://fcm.googleapis.com/v1/projects/{}/messages:send",
                project
            ),
            (None, None) => {
                warn!("push: no project_id or endpoint; disabling push service");
                return None;
            }
        };

        let credentials = match (push_cfg.access_token.as_deref(), account) {
            (Some(token), _) if !token.trim().is_empty() => Credentials::Static(token.to_string()),
            (_, Some(sa)) => {
                let key = match EncodingKey::from_rsa_pem(sa.private_key.as_bytes()) {
                    Ok(k) => k,
                    Err(err) => {
                        warn!(error = %err, "push: invalid service account key; disabling push service");
                        return None;
                    }
                };
                Credentials::ServiceAccount {
                    client_email: sa.client_email,
                    token_uri: sa
                        .token_uri
                        .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
                    key,
                    cached: Mutex::new(None),
                }
            }
            _ => {
                warn!("push: no credentials configured; disabling push service");
                return None;
            }
        };

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(push_cfg.timeout_secs.max(1)))
            .build()
        {
            Ok(c) => c,
            Err(err) => {
                warn!(error = %err, "push: failed to build HTTP client; disabling push service");
                return None;
            }
        };

        Some(Self {
            inner: Arc::new(PushServiceInner {
                client,
                send_url,
                credentials,
            }),
        })
    }

    /// Sends one notification. Every failure is classified and returned.
    pub async fn send(&self, device_token: &str, title: &str, body: &str) -> DeliveryResult {
        match self.inner.send(device_token, title, body).await {
            Ok(message_id) => {
                info!(message_id = %message_id, "push: delivered");
                DeliveryResult::Sent { message_id }
            }
            Err(failure) => {
                warn!(reason = %failure, "push: send failed");
                DeliveryResult::Failed(failure)
            }
        }
    }
}

impl PushServiceInner {
    async fn send(
        &self,
        device_token: &str,
        title: &str,
        body: &str,
    ) -> Result<String, DeliveryFailure> {
        let access_token = self.access_token().await?;
        let message = fcm_message(device_token, title, body);

        let resp = self
            .client
            .post(&self.send_url)
            .bearer_auth(access_token)
            .json(&message)
            .send()
            .await
            .map_err(|e| DeliveryFailure::Unknown(format!("transport error: {}", e)))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_error(status, &text));
        }
        let message_id = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.get("name").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        Ok(message_id)
    }

    async fn access_token(&self) -> Result<String, DeliveryFailure> {
        match &self.credentials {
            Credentials::Static(token) => Ok(token.clone()),
            Credentials::ServiceAccount {
                client_email,
                token_uri,
                key,
                cached,
            } => {
                let mut guard = cached.lock().await;
                if let Some(tok) = guard.as_ref()
                    && Instant::now() < tok.refresh_at
                {
                    return Ok(tok.access_token.clone());
                }
                let fresh = self.exchange_assertion(client_email, token_uri, key).await?;
                let access_token = fresh.access_token.clone();
                *guard = refresh_deadline(Instant::now(), fresh.expires_in).map(|refresh_at| {
                    CachedToken {
                        access_token: fresh.access_token,
                        refresh_at,
                    }
                });
                Ok(access_token)
            }
        }
    }

    async fn exchange_assertion(
        &self,
        client_email: &str,
        token_uri: &str,
        key: &EncodingKey,
    ) -> Result<TokenResponse, DeliveryFailure> {
        let iat = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: client_email,
            scope: FCM_SCOPE,
            aud: token_uri,
            iat,
            exp: iat + 3600,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, key)
            .map_err(|e| DeliveryFailure::Unknown(format!("assertion signing failed: {}", e)))?;
        let params = [
            ("grant_type", JWT_BEARER_GRANT),
            ("assertion", assertion.as_str()),
        ];

        let resp = self
            .client
            .post(token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| DeliveryFailure::Unknown(format!("token exchange failed: {}", e)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DeliveryFailure::Unknown(format!(
                "token exchange rejected: {}",
                status
            )));
        }
        resp.json::<TokenResponse>()
            .await
            .map_err(|e| DeliveryFailure::Unknown(format!("token response unreadable: {}", e)))
    }
}

/// When a token valid for `expires_in` seconds should be refreshed; `None`
/// when that instant is not representable.
fn refresh_deadline(now: Instant, expires_in: u64) -> Option<Instant> {
    now.checked_add(Duration::from_secs(expires_in).saturating_sub(TOKEN_REFRESH_MARGIN))
}

fn decode_service_account(encoded: &str) -> Result<ServiceAccountKey, String> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("base64: {}", e))?;
    serde_json::from_slice(&raw).map_err(|e| format!("json: {}", e))
}

fn fcm_message(device_token: &str, title: &str, body: &str) -> Value {
    json!({
        "message": {
            "token": device_token,
            "notification": { "title": title, "body": body },
            "data": { "title": title, "body": body },
            "android": { "priority": "high" },
            "apns": { "payload": { "aps": { "content-available": 1 } } }
        }
    })
}

/// Maps an FCM v1 error response onto a delivery failure. The FCM-specific
/// `errorCode` in `details` wins over the generic `status`.
pub fn classify_error(status: StatusCode, body: &str) -> DeliveryFailure {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let fcm_code = error
        .and_then(|e| e.get("details"))
        .and_then(Value::as_array)
        .and_then(|details| {
            details
                .iter()
                .find_map(|d| d.get("errorCode").and_then(Value::as_str))
        });
    let generic = error.and_then(|e| e.get("status")).and_then(Value::as_str);

    match fcm_code.or(generic) {
        Some("UNREGISTERED") => DeliveryFailure::Unregistered,
        Some("INVALID_ARGUMENT") | Some("SENDER_ID_MISMATCH") => {
            DeliveryFailure::InvalidRegistration
        }
        code => {
            let message = error
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("no details");
            DeliveryFailure::Unknown(format!(
                "{} {}: {}",
                status.as_u16(),
                code.unwrap_or("UNKNOWN"),
                message
            ))
        }
    }
}

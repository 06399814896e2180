//! # ERP API Client
//!
//! Issues authenticated form-encoded requests against the ERP's bulk API and
//! classifies every outcome for the transition rule.
//!
//! ## Session Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ERP Session Flow                                 │
//! │                                                                         │
//! │  send(request)                                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  cached session valid? ──yes──► attach sessionKey                      │
//! │       │ no                                                              │
//! │       ▼                                                                 │
//! │  verifyUser(username, password)                                        │
//! │       │  records[0].sessionKey + sessionLength                         │
//! │       ▼                                                                 │
//! │  cache key, expiry = now + sessionLength − 30 s margin                 │
//! │                                                                         │
//! │  The margin means a key is refreshed shortly BEFORE the ERP would      │
//! │  reject it, so long-running drains never race the expiry.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Outcome Classification
//! - HTTP 429                    → [`ApiOutcome::RateLimited`]
//! - application error code 1002 → [`ApiOutcome::QuotaExceeded`]
//! - any other non-"ok" status   → [`ApiOutcome::Failed`]
//! - transport failure           → [`SyncError::Transport`]

use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use storelink_core::RequestParams;

use crate::config::ErpConfig;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{ApiResponse, RemoteRequest, HOURLY_QUOTA_ERROR_CODE};
use storelink_core::schedule::StageOutcome;

// =============================================================================
// Constants
// =============================================================================

/// Margin subtracted from the granted session lifetime. A key is considered
/// expired this many seconds before the ERP would actually reject it.
pub const SESSION_EXPIRY_MARGIN_SECS: u64 = 30;

/// The ERP's request budget; requests taking longer are failures anyway.
pub const REQUEST_TIMEOUT_SECS: u64 = 45;

// =============================================================================
// Session Cache
// =============================================================================

/// A cached session credential.
#[derive(Debug, Clone)]
struct Session {
    key: String,
    expires_at: Instant,
}

impl Session {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

// =============================================================================
// API Outcome
// =============================================================================

/// Classified result of one remote call.
#[derive(Debug)]
pub enum ApiOutcome {
    /// Envelope-level success. Batch items may still have failed
    /// individually; callers correlate per-item statuses.
    Ok(ApiResponse),

    /// HTTP 429: over the 30-second request window.
    RateLimited,

    /// Application error code 1002: hourly quota spent.
    QuotaExceeded,

    /// Any other application-level failure.
    Failed {
        error_code: Option<i64>,
        message: String,
    },
}

impl ApiOutcome {
    /// Splits the outcome into a usable response or the stage outcome the
    /// sequencer should see. This is what makes the transition rule uniform:
    /// every stage ends a recoverable call the same way.
    pub fn into_response(self) -> Result<ApiResponse, StageOutcome> {
        match self {
            ApiOutcome::Ok(response) => Ok(response),
            ApiOutcome::RateLimited => Err(StageOutcome::RateLimited),
            ApiOutcome::QuotaExceeded => Err(StageOutcome::QuotaExceeded),
            ApiOutcome::Failed { message, .. } => Err(StageOutcome::Failed(message)),
        }
    }
}

// =============================================================================
// ERP Client
// =============================================================================

/// Authenticated client for the ERP bulk API.
pub struct ErpClient {
    http: reqwest::Client,
    config: ErpConfig,
    session: RwLock<Option<Session>>,
}

impl ErpClient {
    /// Creates a new client. No network traffic happens until the first
    /// request.
    pub fn new(config: ErpConfig) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(ErpClient {
            http,
            config,
            session: RwLock::new(None),
        })
    }

    /// Sends one payload and classifies the outcome.
    ///
    /// Every call is logged before dispatch and summarized after. A valid
    /// session credential is attached, re-authenticating transparently when
    /// the cached one is absent or within its expiry margin.
    pub async fn send(&self, request: &RemoteRequest) -> SyncResult<ApiOutcome> {
        info!(endpoint = %self.config.endpoint(), "Sending {}", request.describe());

        let session_key = self.session_key().await?;

        let mut fields = vec![
            ("clientCode".to_string(), self.config.client_code.clone()),
            ("sessionKey".to_string(), session_key),
        ];
        fields.extend(request.form_fields());

        let outcome = self.post(&fields).await?;

        match &outcome {
            ApiOutcome::Ok(response) => {
                debug!(
                    records = response.records.len(),
                    items = response.requests.len(),
                    "ERP call succeeded"
                );
            }
            ApiOutcome::RateLimited => warn!("ERP rate limit hit (HTTP 429)"),
            ApiOutcome::QuotaExceeded => warn!("ERP hourly quota exceeded (code 1002)"),
            ApiOutcome::Failed {
                error_code,
                message,
            } => warn!(?error_code, message = %message, "ERP call failed"),
        }

        Ok(outcome)
    }

    /// Posts form fields and classifies the HTTP/application outcome.
    async fn post(&self, fields: &[(String, String)]) -> SyncResult<ApiOutcome> {
        let response = self
            .http
            .post(self.config.endpoint())
            .form(fields)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Ok(ApiOutcome::RateLimited);
        }

        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let api_response: ApiResponse = serde_json::from_str(&body)
            .map_err(|e| SyncError::InvalidResponse(format!("{e}: {body}")))?;

        if api_response.is_ok() {
            return Ok(ApiOutcome::Ok(api_response));
        }

        match api_response.status.error_code {
            Some(HOURLY_QUOTA_ERROR_CODE) => Ok(ApiOutcome::QuotaExceeded),
            error_code => Ok(ApiOutcome::Failed {
                error_code,
                message: api_response.status.describe_error(),
            }),
        }
    }

    // =========================================================================
    // Session Management
    // =========================================================================

    /// Returns a valid session key, authenticating if needed.
    async fn session_key(&self) -> SyncResult<String> {
        // Fast path: cached key still inside its margin
        {
            let guard = self.session.read().await;
            if let Some(session) = guard.as_ref() {
                if session.is_valid() {
                    return Ok(session.key.clone());
                }
            }
        }

        let mut guard = self.session.write().await;

        // Double-check after acquiring the write lock
        if let Some(session) = guard.as_ref() {
            if session.is_valid() {
                return Ok(session.key.clone());
            }
        }

        let session = self.authenticate().await?;
        let key = session.key.clone();
        *guard = Some(session);

        Ok(key)
    }

    /// Exchanges the configured credentials for a session key.
    async fn authenticate(&self) -> SyncResult<Session> {
        info!(username = %self.config.username, "Authenticating against ERP");

        let mut params = RequestParams::new();
        params.set("username", self.config.username.clone());
        params.set("password", self.config.password.clone());

        let request = RemoteRequest::single("verifyUser", params);
        let mut fields = vec![("clientCode".to_string(), self.config.client_code.clone())];
        fields.extend(request.form_fields());

        let response = match self.post(&fields).await? {
            ApiOutcome::Ok(response) => response,
            ApiOutcome::RateLimited => {
                return Err(SyncError::AuthFailed("rate limited (HTTP 429)".into()))
            }
            ApiOutcome::QuotaExceeded => {
                return Err(SyncError::AuthFailed("hourly quota exceeded".into()))
            }
            ApiOutcome::Failed { message, .. } => return Err(SyncError::AuthFailed(message)),
        };

        let record = response
            .first_record()
            .ok_or_else(|| SyncError::AuthFailed("verifyUser returned no records".into()))?;

        let key = record["sessionKey"]
            .as_str()
            .ok_or_else(|| SyncError::AuthFailed("verifyUser returned no session key".into()))?
            .to_string();

        let lifetime_secs = record["sessionLength"].as_u64().unwrap_or(3600);
        let usable = lifetime_secs.saturating_sub(SESSION_EXPIRY_MARGIN_SECS);
        let expires_at = Instant::now() + Duration::from_secs(usable);

        info!(lifetime_secs, "ERP session established");

        Ok(Session { key, expires_at })
    }

    /// Drops the cached session; the next call re-authenticates.
    pub async fn invalidate_session(&self) {
        *self.session.write().await = None;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_session_validity_window() {
        let expired = Session {
            key: "k".into(),
            expires_at: Instant::now(),
        };
        assert!(!expired.is_valid());

        let live = Session {
            key: "k".into(),
            expires_at: Instant::now() + Duration::from_secs(60),
        };
        assert!(live.is_valid());
    }

    fn client_for(server: &MockServer) -> ErpClient {
        ErpClient::new(ErpConfig {
            client_code: "123456".into(),
            username: "bridge".into(),
            password: "secret".into(),
            api_url: Some(format!("{}/api/", server.uri())),
        })
        .unwrap()
    }

    async fn mount_auth(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_string_contains("verifyUser"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"responseStatus": "ok"},
                "records": [{"sessionKey": "sess-1", "sessionLength": 3600}]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_session_reused_across_calls() {
        let server = MockServer::start().await;
        mount_auth(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_string_contains("getCurrencies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"responseStatus": "ok"},
                "records": [{"code": "EUR"}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let request = RemoteRequest::single("getCurrencies", RequestParams::new());

        for _ in 0..3 {
            let outcome = client.send(&request).await.unwrap();
            assert!(matches!(outcome, ApiOutcome::Ok(_)));
        }

        // 1 verifyUser + 3 data calls
        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 4);
        let auth_calls = received
            .iter()
            .filter(|r| String::from_utf8_lossy(&r.body).contains("verifyUser"))
            .count();
        assert_eq!(auth_calls, 1);
    }

    #[tokio::test]
    async fn test_http_429_is_rate_limited() {
        let server = MockServer::start().await;
        mount_auth(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_string_contains("getProducts"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let outcome = client
            .send(&RemoteRequest::single("getProducts", RequestParams::new()))
            .await
            .unwrap();

        assert!(matches!(outcome, ApiOutcome::RateLimited));
    }

    #[tokio::test]
    async fn test_error_1002_is_quota_exceeded() {
        let server = MockServer::start().await;
        mount_auth(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_string_contains("getProducts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"responseStatus": "error", "errorCode": 1002},
                "records": []
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let outcome = client
            .send(&RemoteRequest::single("getProducts", RequestParams::new()))
            .await
            .unwrap();

        assert!(matches!(outcome, ApiOutcome::QuotaExceeded));
    }

    #[tokio::test]
    async fn test_other_error_codes_fail_with_context() {
        let server = MockServer::start().await;
        mount_auth(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_string_contains("saveProduct"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"responseStatus": "error", "errorCode": 1011, "errorField": "groupID"},
                "records": []
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let outcome = client
            .send(&RemoteRequest::single("saveProduct", RequestParams::new()))
            .await
            .unwrap();

        match outcome {
            ApiOutcome::Failed {
                error_code,
                message,
            } => {
                assert_eq!(error_code, Some(1011));
                assert!(message.contains("1011"));
                assert!(message.contains("groupID"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_auth_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_string_contains("verifyUser"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"responseStatus": "error", "errorCode": 1051},
                "records": []
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .send(&RemoteRequest::single("getProducts", RequestParams::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::AuthFailed(_)));
    }
}

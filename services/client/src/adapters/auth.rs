//! services/client/src/adapters/auth.rs
//!
//! Credential store backed by the hosted identity provider's REST API.
//!
//! This adapter is the only owner of the access token. The API client reads it
//! through [`CredentialProvider`] and rotates it only via `refresh`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use rand::RngCore;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use study_assistant_core::domain::{AuthSession, AuthUser};
use study_assistant_core::ports::{CredentialProvider, PortError, PortResult};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Lifetime assumed when the provider reports neither `expires_at` nor `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Query parameter on the redirect target that names the sign-in flow.
pub const FLOW_STATE_PARAM: &str = "state";

/// Sign-in flows not completed within this window are forgotten.
const PENDING_FLOW_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Identity provider request failed: {0}")]
    Http(String),
    #[error("Identity provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("No authenticated session")]
    NotSignedIn,
    #[error("No pending sign-in flow matches this callback")]
    MissingVerifier,
    #[error("Invalid identity provider URL: {0}")]
    InvalidUrl(String),
}

impl From<AuthError> for PortError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Rejected { status: 400 | 401 | 403, .. } | AuthError::NotSignedIn => {
                PortError::Unauthorized
            }
            other => PortError::Unexpected(other.to_string()),
        }
    }
}

/// One PKCE round: the secret verifier, its S256 challenge, and the state
/// that identifies the flow when the browser comes back.
struct PkceChallenge {
    verifier: String,
    challenge: String,
    state: String,
}

impl PkceChallenge {
    fn generate() -> Self {
        let verifier = random_token::<32>();
        Self {
            challenge: code_challenge(&verifier),
            verifier,
            state: random_token::<16>(),
        }
    }
}

fn random_token<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `BASE64URL(SHA256(verifier))`, as sent with `code_challenge_method=s256`.
pub(crate) fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

struct PendingFlow {
    verifier: String,
    started: Instant,
}

/// The token grant returned by every successful sign-in, exchange, or refresh.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> AuthSession {
        let expires_at = self
            .expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(|| {
                now + chrono::Duration::seconds(
                    self.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
                )
            });
        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

pub struct SupabaseAuth {
    http: reqwest::Client,
    auth_url: String,
    anon_key: String,
    session: RwLock<Option<AuthSession>>,
    /// Verifiers of started redirect sign-ins, keyed by flow state.
    pending_flows: Mutex<HashMap<String, PendingFlow>>,
}

impl SupabaseAuth {
    pub fn new(
        project_url: &Url,
        anon_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Http(e.to_string()))?;

        Ok(Self {
            http,
            auth_url: format!("{}/auth/v1", project_url.as_str().trim_end_matches('/')),
            anon_key: anon_key.into(),
            session: RwLock::new(None),
            pending_flows: Mutex::new(HashMap::new()),
        })
    }

    pub async fn current_session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    pub async fn current_user(&self) -> Option<AuthUser> {
        self.session.read().await.as_ref().map(|s| s.user.clone())
    }

    /// Replaces the stored session, e.g. with one restored by the caller.
    pub async fn set_session(&self, session: Option<AuthSession>) {
        *self.session.write().await = session;
    }

    #[instrument(skip(self, password))]
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, AuthError> {
        let session = self
            .grant("password", json!({ "email": email, "password": password }))
            .await?;
        info!(user_id = %session.user.id, "Signed in");
        Ok(session)
    }

    /// Exchanges the stored refresh token for a new session.
    #[instrument(skip(self))]
    pub async fn refresh_session(&self) -> Result<AuthSession, AuthError> {
        let refresh_token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.refresh_token.clone())
            .ok_or(AuthError::NotSignedIn)?;

        let session = self
            .grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await?;
        debug!(expires_at = %session.expires_at, "Session refreshed");
        Ok(session)
    }

    /// Starts a redirect sign-in with `provider`.
    ///
    /// The browser comes back to `redirect_to` with the flow's state appended
    /// as [`FLOW_STATE_PARAM`]; pass both it and the code to
    /// [`exchange_code_for_session`](Self::exchange_code_for_session).
    pub async fn authorize_url(&self, provider: &str, redirect_to: &Url) -> Result<Url, AuthError> {
        let pkce = PkceChallenge::generate();

        let mut callback = redirect_to.clone();
        callback
            .query_pairs_mut()
            .append_pair(FLOW_STATE_PARAM, &pkce.state);

        let mut url = Url::parse(&format!("{}/authorize", self.auth_url))
            .map_err(|e| AuthError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", callback.as_str())
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "s256");

        let mut pending = self.pending_flows.lock().await;
        pending.retain(|_, flow| flow.started.elapsed() < PENDING_FLOW_TTL);
        pending.insert(
            pkce.state,
            PendingFlow {
                verifier: pkce.verifier,
                started: Instant::now(),
            },
        );
        debug!(pending = pending.len(), "Sign-in flow started");
        Ok(url)
    }

    /// Completes the redirect sign-in identified by `state` by trading the
    /// authorization code for a session. Each flow can be completed once.
    #[instrument(skip(self, code, state))]
    pub async fn exchange_code_for_session(
        &self,
        code: &str,
        state: &str,
    ) -> Result<AuthSession, AuthError> {
        let verifier = self
            .pending_flows
            .lock()
            .await
            .remove(state)
            .filter(|flow| flow.started.elapsed() < PENDING_FLOW_TTL)
            .map(|flow| flow.verifier)
            .ok_or(AuthError::MissingVerifier)?;

        let session = self
            .grant("pkce", json!({ "auth_code": code, "code_verifier": verifier }))
            .await?;
        info!(user_id = %session.user.id, "Authorization code exchanged");
        Ok(session)
    }

    /// Signs out remotely and always clears the local session.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };

        let response = self
            .http
            .post(format!("{}/logout", self.auth_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = %status, "Remote sign-out failed; local session already cleared");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        info!("Signed out");
        Ok(())
    }

    /// Posts a token grant and stores the resulting session.
    async fn grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<AuthSession, AuthError> {
        let response = self
            .http
            .post(format!("{}/token", self.auth_url))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Http(format!("Malformed token response: {}", e)))?;
        let session = tokens.into_session(Utc::now());
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }
}

/// Pulls the human-readable part out of an identity provider error body.
fn error_message(status: StatusCode, body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error_description: Option<String>,
        msg: Option<String>,
        error: Option<String>,
    }

    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error_description.or(b.msg).or(b.error))
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.to_string()
            } else {
                body.to_string()
            }
        })
}

#[async_trait]
impl CredentialProvider for SupabaseAuth {
    async fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .filter(|s| !s.is_expired(Utc::now()))
            .map(|s| s.access_token.clone())
    }

    async fn refresh(&self) -> PortResult<Option<String>> {
        match self.refresh_session().await {
            Ok(session) => Ok(Some(session.access_token)),
            Err(AuthError::NotSignedIn) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const USER_ID: &str = "0b6f1b7a-4f0e-4a5d-8d0e-2c9e2b1f3a44";

    fn token_body(access: &str, refresh: &str, expires_in: i64) -> serde_json::Value {
        json!({
            "access_token": access,
            "token_type": "bearer",
            "expires_in": expires_in,
            "refresh_token": refresh,
            "user": { "id": USER_ID, "email": "learner@example.com" }
        })
    }

    async fn auth_for(server: &MockServer) -> SupabaseAuth {
        let url = Url::parse(&server.uri()).unwrap();
        SupabaseAuth::new(&url, "anon-key", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_password_sign_in_stores_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("apikey", "anon-key"))
            .and(body_json(json!({ "email": "learner@example.com", "password": "pw" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a1", "r1", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        let auth = auth_for(&server).await;
        let session = auth.sign_in_with_password("learner@example.com", "pw").await.unwrap();
        assert_eq!(session.user.id.to_string(), USER_ID);
        assert_eq!(auth.access_token().await.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn test_rejected_sign_in_reports_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let auth = auth_for(&server).await;
        let err = auth.sign_in_with_password("a@b.c", "bad").await.unwrap_err();
        match err {
            AuthError::Rejected { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid login credentials");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(auth.access_token().await.is_none());
    }

    #[tokio::test]
    async fn test_expired_session_has_no_access_token() {
        let server = MockServer::start().await;
        let auth = auth_for(&server).await;
        auth.set_session(Some(AuthSession {
            access_token: "stale".to_string(),
            refresh_token: "r1".to_string(),
            expires_at: Utc::now() - chrono::Duration::seconds(1),
            user: AuthUser { id: Uuid::new_v4(), email: None },
        }))
        .await;

        assert!(auth.access_token().await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .and(body_json(json!({ "refresh_token": "r1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a2", "r2", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        let auth = auth_for(&server).await;
        auth.set_session(Some(AuthSession {
            access_token: "a1".to_string(),
            refresh_token: "r1".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(60),
            user: AuthUser { id: Uuid::new_v4(), email: None },
        }))
        .await;

        assert_eq!(auth.refresh().await.unwrap().as_deref(), Some("a2"));
        assert_eq!(auth.access_token().await.as_deref(), Some("a2"));
        assert_eq!(auth.current_session().await.unwrap().refresh_token, "r2");
    }

    #[tokio::test]
    async fn test_refresh_without_session_yields_no_token() {
        let server = MockServer::start().await;
        let auth = auth_for(&server).await;
        assert_eq!(auth.refresh().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_rejection_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "msg": "Invalid Refresh Token" })))
            .mount(&server)
            .await;

        let auth = auth_for(&server).await;
        auth.set_session(Some(AuthSession {
            access_token: "a1".to_string(),
            refresh_token: "revoked".to_string(),
            expires_at: Utc::now(),
            user: AuthUser { id: Uuid::new_v4(), email: None },
        }))
        .await;

        assert!(matches!(auth.refresh().await, Err(PortError::Unauthorized)));
    }

    fn query(url: &Url, key: &str) -> String {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[test]
    fn test_code_challenge_matches_rfc_7636_example() {
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[tokio::test]
    async fn test_pkce_flow_exchanges_code_with_its_own_verifier() {
        let server = MockServer::start().await;
        let auth = auth_for(&server).await;
        let callback = Url::parse("http://localhost:3000/auth/callback?next=%2Fhome").unwrap();

        let url = auth.authorize_url("google", &callback).await.unwrap();
        assert_eq!(query(&url, "provider"), "google");
        assert_eq!(query(&url, "code_challenge_method"), "s256");
        let redirect_to = Url::parse(&query(&url, "redirect_to")).unwrap();
        assert_eq!(query(&redirect_to, "next"), "/home");
        let state = query(&redirect_to, FLOW_STATE_PARAM);

        let verifier = auth.pending_flows.lock().await[&state].verifier.clone();
        assert_eq!(verifier.len(), 43);
        assert_eq!(query(&url, "code_challenge"), code_challenge(&verifier));

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "pkce"))
            .and(body_json(json!({ "auth_code": "code-123", "code_verifier": verifier })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a1", "r1", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        auth.exchange_code_for_session("code-123", &state).await.unwrap();
        assert_eq!(auth.access_token().await.as_deref(), Some("a1"));

        // Each flow completes once.
        assert!(matches!(
            auth.exchange_code_for_session("code-123", &state).await,
            Err(AuthError::MissingVerifier)
        ));
    }

    #[tokio::test]
    async fn test_overlapping_flows_keep_separate_verifiers() {
        let server = MockServer::start().await;
        let auth = auth_for(&server).await;
        let callback = Url::parse("http://localhost:3000/auth/callback").unwrap();

        let first = auth.authorize_url("github", &callback).await.unwrap();
        let second = auth.authorize_url("github", &callback).await.unwrap();
        let first_state = query(&Url::parse(&query(&first, "redirect_to")).unwrap(), FLOW_STATE_PARAM);
        let second_state = query(&Url::parse(&query(&second, "redirect_to")).unwrap(), FLOW_STATE_PARAM);
        assert_ne!(first_state, second_state);
        assert_ne!(query(&first, "code_challenge"), query(&second, "code_challenge"));

        let pending = auth.pending_flows.lock().await;
        assert_eq!(pending.len(), 2);
        assert_eq!(query(&first, "code_challenge"), code_challenge(&pending[&first_state].verifier));
        assert_eq!(query(&second, "code_challenge"), code_challenge(&pending[&second_state].verifier));
    }

    #[tokio::test]
    async fn test_unknown_flow_state_is_rejected() {
        let server = MockServer::start().await;
        let auth = auth_for(&server).await;
        assert!(matches!(
            auth.exchange_code_for_session("code-123", "never-issued").await,
            Err(AuthError::MissingVerifier)
        ));
    }

    #[tokio::test]
    async fn test_sign_out_clears_session_even_when_remote_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("Authorization", "Bearer a1"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let auth = auth_for(&server).await;
        auth.set_session(Some(AuthSession {
            access_token: "a1".to_string(),
            refresh_token: "r1".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(60),
            user: AuthUser { id: Uuid::new_v4(), email: None },
        }))
        .await;

        assert!(auth.sign_out().await.is_err());
        assert!(auth.current_session().await.is_none());
    }
}

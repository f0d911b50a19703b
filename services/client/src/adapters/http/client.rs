//! services/client/src/adapters/http/client.rs
//!
//! The single point of egress for calls to the application backend.
//!
//! Every request passes through two interceptors:
//! - outbound: attaches `Authorization: Bearer <token>` when the credential
//!   provider holds a current access token, and nothing otherwise;
//! - inbound: on a 401, refreshes the token once and re-issues the original
//!   request once with the new token. Every other outcome is returned as-is.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use study_assistant_core::ports::CredentialProvider;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use url::Url;

use super::error::ApiError;

/// Configuration for the API client.
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL every request path is appended to (e.g., "https://api.example.com/v1").
    pub base_url: String,
    /// Default timeout for a single HTTP exchange.
    pub timeout: Duration,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: crate::config::DEFAULT_BACKEND_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    /// Added to the request after the interceptor has run.
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A fully prepared request, kept so it can be re-issued after a token refresh.
struct OutgoingRequest {
    method: Method,
    url: String,
    body: Option<Value>,
    headers: Vec<(String, String)>,
    timeout: Duration,
}

/// Authenticated JSON client for the application backend.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    credentials: Arc<dyn CredentialProvider>,
    /// Serializes token refreshes so concurrent 401s share one.
    refresh_lock: Mutex<()>,
}

impl ApiClient {
    /// Create a new API client.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Config` if the base URL does not parse or the HTTP
    /// client cannot be built.
    pub fn new(
        config: ApiClientConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ApiError> {
        Url::parse(&config.base_url).map_err(|e| {
            ApiError::Config(format!("Invalid base URL '{}': {}", config.base_url, e))
        })?;

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ApiError::Config(format!("Failed to build HTTP client: {}", e)))?;

        debug!(base_url = %config.base_url, "API client initialized");

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
            credentials,
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self, options), fields(path = %path))]
    pub async fn get<R: DeserializeOwned>(
        &self,
        path: &str,
        options: Option<RequestOptions>,
    ) -> Result<R, ApiError> {
        self.execute(self.prepare(Method::GET, path, None, options))
            .await
    }

    #[instrument(skip(self, body, options), fields(path = %path))]
    pub async fn post<B, R>(
        &self,
        path: &str,
        body: Option<&B>,
        options: Option<RequestOptions>,
    ) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = Self::encode_body(body)?;
        self.execute(self.prepare(Method::POST, path, body, options))
            .await
    }

    #[instrument(skip(self, body, options), fields(path = %path))]
    pub async fn put<B, R>(
        &self,
        path: &str,
        body: Option<&B>,
        options: Option<RequestOptions>,
    ) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = Self::encode_body(body)?;
        self.execute(self.prepare(Method::PUT, path, body, options))
            .await
    }

    #[instrument(skip(self, body, options), fields(path = %path))]
    pub async fn patch<B, R>(
        &self,
        path: &str,
        body: Option<&B>,
        options: Option<RequestOptions>,
    ) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = Self::encode_body(body)?;
        self.execute(self.prepare(Method::PATCH, path, body, options))
            .await
    }

    #[instrument(skip(self, options), fields(path = %path))]
    pub async fn delete<R: DeserializeOwned>(
        &self,
        path: &str,
        options: Option<RequestOptions>,
    ) -> Result<R, ApiError> {
        self.execute(self.prepare(Method::DELETE, path, None, options))
            .await
    }

    fn encode_body<B: Serialize + ?Sized>(body: Option<&B>) -> Result<Option<Value>, ApiError> {
        body.map(serde_json::to_value)
            .transpose()
            .map_err(|e| ApiError::Serialize(e.to_string()))
    }

    fn prepare(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: Option<RequestOptions>,
    ) -> OutgoingRequest {
        let options = options.unwrap_or_default();
        OutgoingRequest {
            method,
            url: format!("{}{}", self.base_url, path),
            body,
            headers: options.headers,
            timeout: options.timeout.unwrap_or(self.timeout),
        }
    }

    async fn execute<R: DeserializeOwned>(&self, request: OutgoingRequest) -> Result<R, ApiError> {
        // Outbound interceptor.
        let token = self.credentials.access_token().await;
        if token.is_none() {
            debug!(url = %request.url, "No access token available, sending unauthenticated");
        }
        let response = self.dispatch(&request, token.as_deref()).await?;

        // Inbound interceptor. The retry budget is one.
        let response = if response.status() == StatusCode::UNAUTHORIZED {
            match self.refreshed_token(token.as_deref()).await {
                Some(new_token) => {
                    debug!(url = %request.url, "Retrying request with refreshed token");
                    self.dispatch(&request, Some(&new_token)).await?
                }
                None => response,
            }
        } else {
            response
        };

        Self::decode(response, &request.url).await
    }

    async fn dispatch(
        &self,
        request: &OutgoingRequest,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .timeout(request.timeout)
            .header(ACCEPT, "application/json");

        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, url = %request.url, "Sending request");
        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout {
                    url: request.url.clone(),
                    timeout: request.timeout,
                }
            } else if e.is_builder() {
                ApiError::Config(format!("Invalid request to {}: {}", request.url, e))
            } else {
                ApiError::Network(e.to_string())
            }
        })
    }

    /// Obtains a token to retry with after `rejected` was answered with 401.
    ///
    /// Returns `None` when the refresh failed or produced no token, in which case
    /// the original 401 is surfaced to the caller.
    async fn refreshed_token(&self, rejected: Option<&str>) -> Option<String> {
        let _guard = self.refresh_lock.lock().await;

        // Another request may have rotated the token while this one waited.
        if let Some(current) = self.credentials.access_token().await {
            if rejected != Some(current.as_str()) {
                debug!("Access token already rotated by a concurrent refresh");
                return Some(current);
            }
        }

        match self.credentials.refresh().await {
            Ok(Some(token)) => Some(token),
            Ok(None) => {
                warn!("Token refresh completed without an access token");
                None
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                None
            }
        }
    }

    async fn decode<R: DeserializeOwned>(response: Response, url: &str) -> Result<R, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Network(format!("Failed to read response body: {}", e)))?;

        // 204/205 and other empty bodies decode from `null`, so `()` and `Option<T>` work.
        if status == StatusCode::NO_CONTENT
            || status == StatusCode::RESET_CONTENT
            || bytes.is_empty()
        {
            return serde_json::from_value(Value::Null).map_err(|_| {
                ApiError::Decode(format!(
                    "{} returned an empty body ({}), which cannot be decoded into the expected type",
                    url,
                    status.as_u16()
                ))
            });
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::Decode(format!("Failed to parse response from {}: {}", url, e)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde::Deserialize;
    use study_assistant_core::ports::{PortError, PortResult};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    use super::*;

    /// Credential provider whose refresh rotates `current` to `refreshed`.
    struct FakeCredentials {
        current: std::sync::Mutex<Option<String>>,
        refreshed: Option<String>,
        refresh_fails: bool,
        refresh_calls: AtomicUsize,
    }

    impl FakeCredentials {
        fn new(current: Option<&str>, refreshed: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                current: std::sync::Mutex::new(current.map(str::to_string)),
                refreshed: refreshed.map(str::to_string),
                refresh_fails: false,
                refresh_calls: AtomicUsize::new(0),
            })
        }

        fn failing(current: &str) -> Arc<Self> {
            Arc::new(Self {
                current: std::sync::Mutex::new(Some(current.to_string())),
                refreshed: None,
                refresh_fails: true,
                refresh_calls: AtomicUsize::new(0),
            })
        }

        fn refresh_calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialProvider for FakeCredentials {
        async fn access_token(&self) -> Option<String> {
            self.current.lock().unwrap().clone()
        }

        async fn refresh(&self) -> PortResult<Option<String>> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            // Give concurrent callers a chance to queue up behind the refresh.
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.refresh_fails {
                return Err(PortError::Unauthorized);
            }
            *self.current.lock().unwrap() = self.refreshed.clone();
            Ok(self.refreshed.clone())
        }
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestResponse {
        message: String,
    }

    #[derive(Debug, Serialize)]
    struct TestRequest {
        data: String,
    }

    fn client_for(server: &MockServer, credentials: Arc<FakeCredentials>) -> ApiClient {
        let config = ApiClientConfig {
            base_url: server.uri(),
            ..Default::default()
        };
        ApiClient::new(config, credentials).unwrap()
    }

    fn ok_body(message: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(TestResponse {
            message: message.to_string(),
        })
    }

    #[tokio::test]
    async fn test_attaches_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/test"))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(ok_body("success"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, FakeCredentials::new(Some("test-token"), None));
        let result: TestResponse = client.get("/test", None).await.unwrap();
        assert_eq!(result.message, "success");
    }

    #[tokio::test]
    async fn test_no_token_sends_no_authorization_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/public"))
            .respond_with(|req: &Request| {
                if req.headers.contains_key("authorization") {
                    ResponseTemplate::new(400)
                } else {
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({ "message": "anon" }))
                }
            })
            .mount(&server)
            .await;

        let client = client_for(&server, FakeCredentials::new(None, None));
        let result: TestResponse = client.get("/public", None).await.unwrap();
        assert_eq!(result.message, "anon");
    }

    #[tokio::test]
    async fn test_401_refreshes_and_retries_once_with_new_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .and(header("Authorization", "Bearer old-token"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .and(header("Authorization", "Bearer new-token"))
            .respond_with(ok_body("fresh"))
            .expect(1)
            .mount(&server)
            .await;

        let credentials = FakeCredentials::new(Some("old-token"), Some("new-token"));
        let client = client_for(&server, credentials.clone());

        let result: TestResponse = client.get("/data", None).await.unwrap();
        assert_eq!(result.message, "fresh");
        assert_eq!(credentials.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_failure_is_returned_without_second_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let credentials = FakeCredentials::new(Some("old-token"), Some("new-token"));
        let client = client_for(&server, credentials.clone());

        let err = client.get::<TestResponse>("/data", None).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(credentials.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_returns_original_401_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/create"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
            .expect(1)
            .mount(&server)
            .await;

        let credentials = FakeCredentials::failing("old-token");
        let client = client_for(&server, credentials.clone());

        let request = TestRequest { data: "x".to_string() };
        let err = client
            .post::<_, TestResponse>("/create", Some(&request), None)
            .await
            .unwrap_err();
        match err {
            ApiError::Status { status, body, .. } => {
                assert_eq!(status, 401);
                assert_eq!(body, "expired");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(credentials.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_without_token_returns_original_401() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let credentials = FakeCredentials::new(Some("old-token"), None);
        let client = client_for(&server, credentials.clone());

        let err = client.get::<TestResponse>("/data", None).await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_retry_replays_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/item"))
            .and(header("Authorization", "Bearer old-token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/item"))
            .and(header("Authorization", "Bearer new-token"))
            .and(body_json(serde_json::json!({ "data": "payload" })))
            .respond_with(ok_body("updated"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, FakeCredentials::new(Some("old-token"), Some("new-token")));
        let request = TestRequest { data: "payload".to_string() };
        let result: TestResponse = client.put("/item", Some(&request), None).await.unwrap();
        assert_eq!(result.message, "updated");
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Authorization", "Bearer old-token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("Authorization", "Bearer new-token"))
            .respond_with(ok_body("ok"))
            .expect(3)
            .mount(&server)
            .await;

        let credentials = FakeCredentials::new(Some("old-token"), Some("new-token"));
        let client = client_for(&server, credentials.clone());

        let (a, b, c) = tokio::join!(
            client.get::<TestResponse>("/a", None),
            client.get::<TestResponse>("/b", None),
            client.get::<TestResponse>("/c", None),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(credentials.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_other_failures_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/error"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal server error"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/forbidden"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let credentials = FakeCredentials::new(Some("test-token"), Some("new-token"));
        let client = client_for(&server, credentials.clone());

        let err = client.get::<TestResponse>("/error", None).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        let err = client.get::<TestResponse>("/forbidden", None).await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(credentials.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_204_decodes_into_unit() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/things"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = client_for(&server, FakeCredentials::new(Some("t"), None));
        let result: Result<(), ApiError> = client.delete("/things", None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/thing"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = client_for(&server, FakeCredentials::new(Some("t"), None));
        let err = client
            .patch::<_, TestResponse>("/thing", Some(&serde_json::json!({})), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[tokio::test]
    async fn test_per_call_overrides() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .and(header("x-request-source", "test"))
            .respond_with(ok_body("late").set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = client_for(&server, FakeCredentials::new(Some("t"), None));
        let options = RequestOptions::default()
            .timeout(Duration::from_millis(50))
            .header("x-request-source", "test");
        let err = client.get::<TestResponse>("/slow", Some(options)).await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_network_failure_is_surfaced() {
        let client = ApiClient::new(
            ApiClientConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                timeout: Duration::from_secs(2),
            },
            FakeCredentials::new(Some("t"), None),
        )
        .unwrap();

        let err = client.get::<TestResponse>("/x", None).await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_) | ApiError::Timeout { .. }));
    }

    #[test]
    fn test_invalid_base_url_is_a_config_error() {
        let result = ApiClient::new(
            ApiClientConfig {
                base_url: "not a url".to_string(),
                timeout: Duration::from_secs(1),
            },
            FakeCredentials::new(None, None),
        );
        assert!(matches!(result, Err(ApiError::Config(_))));
    }
}

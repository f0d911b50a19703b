//! services/client/src/adapters/records.rs
//!
//! Reads of the hosted session and output tables through the backend's REST
//! table interface. Row-level security on the backend scopes every query to
//! the signed-in user.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use study_assistant_core::domain::{Output, Session};
use study_assistant_core::ports::{CredentialProvider, PortError, PortResult, RecordStore};
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

pub struct PostgrestStore {
    http: reqwest::Client,
    rest_url: String,
    anon_key: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl PostgrestStore {
    pub fn new(
        project_url: &Url,
        anon_key: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> PortResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PortError::Unexpected(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            rest_url: format!("{}/rest/v1", project_url.as_str().trim_end_matches('/')),
            anon_key: anon_key.into(),
            credentials,
        })
    }

    /// Runs a select against `table` with the given query parameters.
    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> PortResult<Vec<T>> {
        // Signed-out reads fall back to the anon key, which row-level security restricts.
        let bearer = self
            .credentials
            .access_token()
            .await
            .unwrap_or_else(|| self.anon_key.clone());

        let url = format!("{}/{}", self.rest_url, table);
        debug!(url = %url, "Selecting rows");

        let response = self
            .http
            .get(&url)
            .query(query)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PortError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Unexpected(format!(
                "{} returned status {}: {}",
                url, status, body
            )));
        }

        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| PortError::Unexpected(format!("Malformed rows from {}: {}", url, e)))
    }
}

#[async_trait]
impl RecordStore for PostgrestStore {
    #[instrument(skip(self))]
    async fn list_sessions(&self, user_id: Uuid, limit: usize) -> PortResult<Vec<Session>> {
        self.select(
            "sessions",
            &[
                ("select", "*".to_string()),
                ("user_id", format!("eq.{}", user_id)),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        self.select::<Session>(
            "sessions",
            &[
                ("select", "*".to_string()),
                ("id", format!("eq.{}", session_id)),
                ("limit", "1".to_string()),
            ],
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| PortError::NotFound(format!("Session {}", session_id)))
    }

    #[instrument(skip(self))]
    async fn get_output(&self, session_id: Uuid) -> PortResult<Option<Output>> {
        Ok(self
            .select::<Output>(
                "outputs",
                &[
                    ("select", "*".to_string()),
                    ("session_id", format!("eq.{}", session_id)),
                    ("order", "updated_at.desc".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?
            .into_iter()
            .next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticToken(Option<&'static str>);

    #[async_trait]
    impl CredentialProvider for StaticToken {
        async fn access_token(&self) -> Option<String> {
            self.0.map(str::to_string)
        }

        async fn refresh(&self) -> PortResult<Option<String>> {
            Ok(None)
        }
    }

    fn session_row(id: Uuid, user_id: Uuid) -> serde_json::Value {
        json!({
            "id": id,
            "user_id": user_id,
            "title": "Biology notes",
            "source": "pdf",
            "status": "completed",
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:05:00Z",
            "input_meta": { "fileName": "bio.pdf" }
        })
    }

    fn store_for(server: &MockServer, token: Option<&'static str>) -> PostgrestStore {
        PostgrestStore::new(
            &Url::parse(&server.uri()).unwrap(),
            "anon-key",
            Arc::new(StaticToken(token)),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_sessions_queries_newest_first_for_user() {
        let server = MockServer::start().await;
        let user_id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path("/rest/v1/sessions"))
            .and(query_param("user_id", format!("eq.{}", user_id).as_str()))
            .and(query_param("order", "created_at.desc"))
            .and(query_param("limit", "10"))
            .and(header("apikey", "anon-key"))
            .and(header("Authorization", "Bearer user-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                session_row(Uuid::new_v4(), user_id),
                session_row(Uuid::new_v4(), user_id)
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server, Some("user-token"));
        let sessions = store.list_sessions(user_id, 10).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].input_meta.file_name.as_deref(), Some("bio.pdf"));
    }

    #[tokio::test]
    async fn test_missing_session_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let store = store_for(&server, Some("user-token"));
        let result = store.get_session(Uuid::new_v4()).await;
        assert!(matches!(result, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_absent_output_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/outputs"))
            .and(header("Authorization", "Bearer anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server, None);
        assert_eq!(store.get_output(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_port_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/sessions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = store_for(&server, Some("expired"));
        let result = store.list_sessions(Uuid::new_v4(), 10).await;
        assert!(matches!(result, Err(PortError::Unauthorized)));
    }
}

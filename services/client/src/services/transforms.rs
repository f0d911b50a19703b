//! services/client/src/services/transforms.rs
//!
//! Typed wrappers for the transform endpoints of the backend API.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use study_assistant_core::domain::{ApiResponse, Transform, TransformType};
use uuid::Uuid;

use crate::adapters::http::{ApiClient, ApiError};

#[derive(Debug, Serialize)]
struct GenerateTransformRequest {
    #[serde(rename = "type")]
    transform_type: TransformType,
}

/// Transform generation and retrieval for one session at a time.
#[derive(Clone)]
pub struct TransformsService {
    client: Arc<ApiClient>,
}

impl TransformsService {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    fn transforms_path(session_id: Uuid) -> String {
        format!("/transform/sessions/{}/transforms", session_id)
    }

    /// Requests generation of a quiz for the session.
    pub async fn generate_quiz(&self, session_id: Uuid) -> Result<ApiResponse<Transform>, ApiError> {
        self.generate_transform(session_id, TransformType::Quiz).await
    }

    pub async fn generate_transform(
        &self,
        session_id: Uuid,
        transform_type: TransformType,
    ) -> Result<ApiResponse<Transform>, ApiError> {
        let body = GenerateTransformRequest { transform_type };
        self.client
            .post(&Self::transforms_path(session_id), Some(&body), None)
            .await
    }

    pub async fn list_transforms(
        &self,
        session_id: Uuid,
    ) -> Result<ApiResponse<Vec<Transform>>, ApiError> {
        self.client.get(&Self::transforms_path(session_id), None).await
    }

    pub async fn get_transform(
        &self,
        session_id: Uuid,
        transform_id: Uuid,
    ) -> Result<ApiResponse<Transform>, ApiError> {
        let path = format!("{}/{}", Self::transforms_path(session_id), transform_id);
        self.client.get(&path, None).await
    }

    /// Fetches the quiz already generated for the session, if any.
    pub async fn get_quiz(&self, session_id: Uuid) -> Result<ApiResponse<Transform>, ApiError> {
        let path = format!("/transform/sessions/{}/quiz", session_id);
        self.client.get(&path, None).await
    }

    /// Processing status of the session's transforms. The shape is backend-defined.
    pub async fn get_status(&self, session_id: Uuid) -> Result<ApiResponse<Value>, ApiError> {
        let path = format!("/transform/sessions/{}/status", session_id);
        self.client.get(&path, None).await
    }

    pub async fn clear_transforms(&self, session_id: Uuid) -> Result<ApiResponse<Value>, ApiError> {
        self.client
            .delete(&Self::transforms_path(session_id), None)
            .await
    }
}

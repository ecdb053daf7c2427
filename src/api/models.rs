//! Request and response models for the HTTP surface.
//!
//! Completion payloads are kept as raw JSON: the gateway only reads `model` and `stream`
//! and forwards everything else untouched.

use crate::core::error::AppError;
use crate::services::AdvertisedModel;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inbound completion call.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub payload: Value,
    pub model: String,
    pub stream: bool,
}

impl ProxyRequest {
    /// Parse a request body. The body must be a JSON object with a string `model`.
    pub fn from_bytes(body: &[u8]) -> Result<Self, AppError> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))?;
        Self::from_value(payload)
    }

    pub fn from_value(payload: Value) -> Result<Self, AppError> {
        let object = payload
            .as_object()
            .ok_or_else(|| AppError::BadRequest("Request body must be a JSON object".into()))?;
        let model = object
            .get("model")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::BadRequest("`model` must be a string".into()))?
            .to_string();
        let stream = object.get("stream").and_then(Value::as_bool).unwrap_or(false);

        Ok(Self {
            payload,
            model,
            stream,
        })
    }
}

/// Model information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl From<&AdvertisedModel> for ModelInfo {
    fn from(model: &AdvertisedModel) -> Self {
        Self {
            id: model.id.clone(),
            object: model.object.to_string(),
            created: model.created,
            owned_by: model.owned_by.clone(),
        }
    }
}

/// List of available models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

impl ModelList {
    pub fn new(models: &[AdvertisedModel]) -> Self {
        Self {
            object: "list".to_string(),
            data: models.iter().map(ModelInfo::from).collect(),
        }
    }
}

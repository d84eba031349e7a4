//! Service types and request parameter validation.
//!
//! A submission names its service type as a string. The string is resolved
//! to a closed [`ServiceType`] at validation time, so unknown types never
//! reach a backend.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::workflows;

/// Longest prompt text accepted.
pub const MAX_TEXT_LEN: usize = 4096;

/// The generation services the relay offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// Prompt text to image.
    Text2Img,
    /// Prompt text plus a source image to image.
    Img2Img,
}

impl ServiceType {
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        match name {
            "text2img" => Ok(Self::Text2Img),
            "img2img" => Ok(Self::Img2Img),
            other => Err(CoreError::Validation(format!(
                "Unknown service type '{other}'. Must be one of: text2img, img2img"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text2Img => "text2img",
            Self::Img2Img => "img2img",
        }
    }

    /// Whether jobs of this type need an input artifact pushed first.
    pub fn needs_input(self) -> bool {
        matches!(self, Self::Img2Img)
    }

    /// Validate raw request parameters for this service type.
    ///
    /// - `text`: required non-empty string for every type.
    /// - `negative_text`: optional string.
    /// - `seed`: optional non-negative integer.
    /// - `image`: required base64 string for `img2img`, decoded here.
    pub fn validate_params(self, params: &serde_json::Value) -> Result<JobParams, CoreError> {
        let obj = params
            .as_object()
            .ok_or_else(|| CoreError::Validation("params must be a JSON object".into()))?;

        let text = match obj.get("text") {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.clone(),
            _ => {
                return Err(CoreError::Validation(
                    "params.text is required and must be a non-empty string".into(),
                ))
            }
        };
        if text.len() > MAX_TEXT_LEN {
            return Err(CoreError::Validation(format!(
                "params.text must not exceed {MAX_TEXT_LEN} bytes"
            )));
        }

        let negative_text = match obj.get("negative_text") {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(_) => {
                return Err(CoreError::Validation(
                    "params.negative_text must be a string".into(),
                ))
            }
        };

        let seed = match obj.get("seed") {
            None | Some(serde_json::Value::Null) => None,
            Some(v) => Some(v.as_u64().ok_or_else(|| {
                CoreError::Validation("params.seed must be a non-negative integer".into())
            })?),
        };

        let image = if self.needs_input() {
            Some(decode_image(obj.get("image"))?)
        } else {
            None
        };

        Ok(JobParams {
            service: self,
            text,
            negative_text,
            seed,
            image,
        })
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn decode_image(value: Option<&serde_json::Value>) -> Result<Vec<u8>, CoreError> {
    let encoded = match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s,
        _ => {
            return Err(CoreError::Validation(
                "params.image is required for img2img and must be a base64 string".into(),
            ))
        }
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| CoreError::Validation(format!("params.image is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(CoreError::Validation("params.image decodes to zero bytes".into()));
    }
    Ok(bytes)
}

/// Parameters that passed validation for a specific service type.
#[derive(Debug, Clone)]
pub struct JobParams {
    pub service: ServiceType,
    pub text: String,
    pub negative_text: String,
    pub seed: Option<u64>,
    /// Decoded input image bytes (`img2img` only).
    pub image: Option<Vec<u8>>,
}

impl JobParams {
    /// Bind these parameters into the backend workflow for the service.
    ///
    /// `input_path` is the backend-local path of the pushed input image and
    /// must be present exactly when the service needs one. `default_seed`
    /// is used when the request did not pin a seed.
    pub fn bind(
        &self,
        input_path: Option<&str>,
        default_seed: u64,
    ) -> Result<serde_json::Value, CoreError> {
        let seed = self.seed.unwrap_or(default_seed);
        match (self.service, input_path) {
            (ServiceType::Text2Img, None) => Ok(workflows::text2img(
                &self.text,
                &self.negative_text,
                seed,
            )),
            (ServiceType::Img2Img, Some(path)) => Ok(workflows::img2img(
                &self.text,
                &self.negative_text,
                path,
                seed,
            )),
            (ServiceType::Text2Img, Some(_)) => Err(CoreError::Internal(
                "text2img does not take an input image".into(),
            )),
            (ServiceType::Img2Img, None) => Err(CoreError::Internal(
                "img2img requires an input image path".into(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

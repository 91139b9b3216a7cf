//! Request/response contract with the inference service.
//!
//! Frames are JSON objects; image payloads travel as base64 strings. Each
//! request carries a correlation identifier in `request_id` which the service
//! echoes on the matching result.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::raster::{Bitmap, ImageFormat};

/// Fixed generation parameters sent with every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Blend of source image vs. generated content (0.0..=1.0).
    pub strength: f64,
    /// Determinism control; `None` lets the service pick.
    pub seed: Option<u64>,
    /// Prompt adherence strength.
    pub guidance_scale: f64,
    /// Quality/latency tradeoff.
    pub num_inference_steps: u32,
    /// Content filtering toggle.
    pub enable_safety_checks: bool,
    pub negative_prompt: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            strength: 0.9,
            seed: Some(42),
            guidance_scale: 1.0,
            num_inference_steps: 3,
            enable_safety_checks: false,
            negative_prompt: None,
        }
    }
}

/// One generation request. Immutable once built.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub request_id: String,
    pub prompt: String,
    #[serde(with = "base64_bytes")]
    pub image: Vec<u8>,
    pub strength: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub seed: Option<u64>,
    pub guidance_scale: f64,
    pub num_inference_steps: u32,
    pub enable_safety_checks: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl InferenceRequest {
    pub fn new(
        request_id: impl Into<String>,
        prompt: impl Into<String>,
        bitmap: &Bitmap,
        params: &GenerationParams,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            prompt: prompt.into(),
            image: bitmap.bytes.to_vec(),
            strength: params.strength,
            negative_prompt: params.negative_prompt.clone(),
            seed: params.seed,
            guidance_scale: params.guidance_scale,
            num_inference_steps: params.num_inference_steps,
            enable_safety_checks: params.enable_safety_checks,
            width: Some(bitmap.width),
            height: Some(bitmap.height),
        }
    }
}

impl std::fmt::Debug for InferenceRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceRequest")
            .field("request_id", &self.request_id)
            .field("prompt", &self.prompt)
            .field("image_bytes", &self.image.len())
            .field("strength", &self.strength)
            .field("seed", &self.seed)
            .finish()
    }
}

/// Service-reported metadata, passed through uninterpreted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultMetadata {
    pub timings: HashMap<String, f64>,
    pub seed: Option<u64>,
    pub num_inference_steps: Option<u32>,
    pub nsfw_content_detected: Vec<bool>,
}

/// One result frame from the service.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub request_id: String,
    #[serde(default, with = "base64_bytes_opt", skip_serializing_if = "Option::is_none")]
    pub image: Option<Vec<u8>>,
    #[serde(default)]
    pub timings: HashMap<String, f64>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub num_inference_steps: Option<u32>,
    #[serde(default)]
    pub nsfw_content_detected: Vec<bool>,
    /// Set when the service reported a failure for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InferenceResult {
    /// A result carrying the failure marker.
    pub fn failed(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            image: None,
            timings: HashMap::new(),
            seed: None,
            num_inference_steps: None,
            nsfw_content_detected: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// A successful result with an image payload.
    pub fn with_image(request_id: impl Into<String>, image: Vec<u8>) -> Self {
        Self {
            request_id: request_id.into(),
            image: Some(image),
            timings: HashMap::new(),
            seed: None,
            num_inference_steps: None,
            nsfw_content_detected: Vec::new(),
            error: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some() || self.image.as_ref().is_none_or(|bytes| bytes.is_empty())
    }

    pub fn metadata(&self) -> ResultMetadata {
        ResultMetadata {
            timings: self.timings.clone(),
            seed: self.seed,
            num_inference_steps: self.num_inference_steps,
            nsfw_content_detected: self.nsfw_content_detected.clone(),
        }
    }

    /// The payload as a bitmap, or `None` when the result carries no image.
    pub fn bitmap(&self, width: u32, height: u32) -> Option<Bitmap> {
        if self.error.is_some() {
            return None;
        }
        let bytes = self.image.as_ref().filter(|b| !b.is_empty())?;
        Some(Bitmap::new(width, height, ImageFormat::Jpeg, bytes.as_slice()))
    }
}

impl std::fmt::Debug for InferenceResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceResult")
            .field("request_id", &self.request_id)
            .field("image_bytes", &self.image.as_ref().map(Vec::len))
            .field("seed", &self.seed)
            .field("error", &self.error)
            .finish()
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Result(InferenceResult),
    /// Service-level error; tied to a request when the service says which.
    ServiceError {
        request_id: Option<String>,
        message: String,
    },
}

/// JSON frame codec.
pub struct Codec;

impl Codec {
    pub fn encode_request(request: &InferenceRequest) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(request).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn decode_request(bytes: &[u8]) -> Result<InferenceRequest, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::MalformedMessage(e.to_string()))
    }

    pub fn encode_result(result: &InferenceResult) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(result).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode a frame that must be a result; service errors are rejected.
    pub fn decode_result(bytes: &[u8]) -> Result<InferenceResult, ProtocolError> {
        match Self::decode_inbound(bytes)? {
            Inbound::Result(result) => Ok(result),
            Inbound::ServiceError { message, .. } => Err(ProtocolError::MalformedMessage(
                format!("expected a result, got service error: {message}"),
            )),
        }
    }

    /// Decode an inbound frame.
    ///
    /// Frames whose `type` field ends in `error` are service errors; anything
    /// else must parse as an [`InferenceResult`].
    pub fn decode_inbound(bytes: &[u8]) -> Result<Inbound, ProtocolError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::MalformedMessage(e.to_string()))?;

        let is_error = value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|kind| kind.ends_with("error"));

        if is_error {
            let request_id = value
                .get("request_id")
                .and_then(Value::as_str)
                .map(str::to_string);
            let message = value
                .get("reason")
                .or_else(|| value.get("error"))
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "unspecified service error".to_string());
            return Ok(Inbound::ServiceError {
                request_id,
                message,
            });
        }

        serde_json::from_value(value)
            .map(Inbound::Result)
            .map_err(|e| ProtocolError::MalformedMessage(e.to_string()))
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_opt {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&BASE64.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        encoded
            .map(|s| BASE64.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

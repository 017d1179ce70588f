//! Inbound detection messages from the remote detector.
//!
//! The detector sends one JSON object per recognized plate:
//!
//! ```json
//! { "text": "LG83A98", "plateImage": "<base64 jpeg>", "carImage": "<base64 jpeg>",
//!   "detectionScore": 0.91, "recognitionScore": 0.77 }
//! ```
//!
//! Older detector builds send `detection` instead of `text`. A message with
//! neither is a "nothing found" marker.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;

/// One recognized plate candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    /// Recognized plate text, exactly as the detector produced it
    pub text: String,
    pub detection_score: Option<f64>,
    pub recognition_score: Option<f64>,
    /// Decoded JPEG crop of the plate
    pub plate_image: Option<Vec<u8>>,
    /// Decoded JPEG crop of the vehicle
    pub car_image: Option<Vec<u8>>,
}

impl DetectionEvent {
    /// Event carrying only a text, with no scores or images.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            detection_score: None,
            recognition_score: None,
            plate_image: None,
            car_image: None,
        }
    }
}

/// Wire shape of a detector message. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDetectionMessage {
    #[serde(default)]
    detection: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    plate_image: Option<String>,
    #[serde(default)]
    car_image: Option<String>,
    #[serde(default)]
    detection_score: Option<f64>,
    #[serde(default)]
    recognition_score: Option<f64>,
}

/// Reasons an inbound message is rejected.
#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("invalid base64 in {field}: {source}")]
    InvalidImage {
        field: &'static str,
        source: base64::DecodeError,
    },

    #[error("unexpected binary message ({0} bytes)")]
    UnexpectedBinary(usize),
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn decode_image(
    field: &'static str,
    encoded: Option<String>,
) -> Result<Option<Vec<u8>>, EventParseError> {
    match encoded {
        Some(data) if !data.is_empty() => STANDARD
            .decode(data.as_bytes())
            .map(Some)
            .map_err(|source| EventParseError::InvalidImage { field, source }),
        _ => Ok(None),
    }
}

/// Parse one text message.
///
/// Returns `Ok(None)` for a no-detection marker (no non-empty `detection` or
/// `text` field) and `Err` for anything that is not a well-formed message.
pub fn parse_detection(message: &str) -> Result<Option<DetectionEvent>, EventParseError> {
    let value: serde_json::Value = serde_json::from_str(message)?;
    if !value.is_object() {
        return Err(EventParseError::NotAnObject(json_kind(&value)));
    }
    let raw: RawDetectionMessage = serde_json::from_value(value)?;

    let text = raw
        .detection
        .filter(|t| !t.trim().is_empty())
        .or(raw.text.filter(|t| !t.trim().is_empty()));
    let Some(text) = text else {
        return Ok(None);
    };

    Ok(Some(DetectionEvent {
        text,
        detection_score: raw.detection_score,
        recognition_score: raw.recognition_score,
        plate_image: decode_image("plateImage", raw.plate_image)?,
        car_image: decode_image("carImage", raw.car_image)?,
    }))
}

//! Stream Codec Module
//!
//! JSON encoding and decoding for the bar stream.
//!
//! Alpaca sends every frame as a JSON array of message objects, each tagged
//! by a `T` field. Decoding is isolated per element: one malformed element
//! is reported in [`DecodedFrame::rejected`] and the rest of the frame is
//! still delivered.

use crate::domain::bar::Bar;
use crate::infrastructure::alpaca::messages::{
    BarMessage, ErrorMessage, FeedMessage, SubscriptionMessage, SuccessMessage,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown message type.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Result of decoding one frame.
#[derive(Debug, Default)]
pub struct DecodedFrame {
    /// Elements that decoded successfully, in frame order.
    pub messages: Vec<FeedMessage>,
    /// Elements that failed to decode.
    pub rejected: Vec<CodecError>,
}

/// JSON codec for the bar stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a JSON text frame.
    ///
    /// Accepts an array of message objects or a single object.
    ///
    /// # Errors
    ///
    /// Returns an error only if the frame as a whole is not JSON or is
    /// neither an array nor an object. Per-element failures are collected in
    /// [`DecodedFrame::rejected`].
    pub fn decode(&self, text: &str) -> Result<DecodedFrame, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())?;

        let elements = match value {
            serde_json::Value::Array(items) => items,
            serde_json::Value::Object(_) => vec![value],
            other => {
                let shown: String = other.to_string().chars().take(50).collect();
                return Err(CodecError::InvalidFormat(format!(
                    "expected JSON array or object, got: {shown}"
                )));
            }
        };

        let mut frame = DecodedFrame {
            messages: Vec::with_capacity(elements.len()),
            rejected: Vec::new(),
        };

        for element in elements {
            match Self::decode_element(element) {
                Ok(message) => frame.messages.push(message),
                Err(e) => frame.rejected.push(e),
            }
        }

        Ok(frame)
    }

    fn decode_element(value: serde_json::Value) -> Result<FeedMessage, CodecError> {
        if !value.is_object() {
            return Err(CodecError::InvalidFormat(format!(
                "expected message object, got: {value}"
            )));
        }

        let msg_type = value.get("T").and_then(|v| v.as_str());
        let looks_like_bar = value.get("S").is_some() || value.get("symbol").is_some();

        match msg_type {
            Some("success") => Ok(FeedMessage::Success(serde_json::from_value::<SuccessMessage>(value)?)),
            Some("error") => Ok(FeedMessage::Error(serde_json::from_value::<ErrorMessage>(value)?)),
            Some("subscription") => Ok(FeedMessage::Subscription(
                serde_json::from_value::<SubscriptionMessage>(value)?,
            )),
            Some("b" | "u") => Ok(FeedMessage::Bar(serde_json::from_value::<BarMessage>(value)?)),
            None if looks_like_bar => Ok(FeedMessage::Bar(serde_json::from_value::<BarMessage>(value)?)),
            Some(other) => Err(CodecError::UnknownMessageType(other.to_string())),
            None => Err(CodecError::InvalidFormat("missing message type".to_string())),
        }
    }

    /// Encode a value to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }

    /// Encode bars as one frame in the live feed's wire shape.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_bars(&self, bars: &[Bar]) -> Result<String, CodecError> {
        let messages: Vec<BarMessage> = bars.iter().map(BarMessage::from).collect();
        self.encode(&messages)
    }
}

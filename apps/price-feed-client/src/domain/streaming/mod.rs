//! Feed Message Types
//!
//! The `{type, data}` envelope that crosses the channel in both directions,
//! the category vocabulary used for dispatch, and the price/sentiment records
//! carried in `data`.
//!
//! # Wire Format (JSON)
//! ```json
//! {"type": "price_update", "data": [{"symbol": "BTC", "price": "64250.12"}]}
//! {"type": "heartbeat", "data": null}
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Categories
// =============================================================================

/// Dispatch category for inbound messages and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    /// Server greeting after the channel opens.
    Connected,
    /// Price updates.
    Price,
    /// Sentiment updates.
    Sentiment,
    /// Heartbeat acknowledgment.
    Heartbeat,
    /// Server-reported error.
    Error,
    /// Well-formed envelope with a `type` outside the known vocabulary.
    Unrecognized,
    /// Payload that failed envelope validation. Diagnostics only.
    ParseError,
}

impl MessageCategory {
    /// Classify a wire `type` string.
    #[must_use]
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "connected" => Self::Connected,
            "price_update" | "prices" => Self::Price,
            "sentiment_update" | "sentiment" => Self::Sentiment,
            "heartbeat" | "heartbeat_ack" | "pong" => Self::Heartbeat,
            "error" => Self::Error,
            _ => Self::Unrecognized,
        }
    }

    /// Label used for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Price => "price",
            Self::Sentiment => "sentiment",
            Self::Heartbeat => "heartbeat",
            Self::Error => "error",
            Self::Unrecognized => "unrecognized",
            Self::ParseError => "parse_error",
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// A validated inbound envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Raw wire type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload; `null` when absent.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl InboundMessage {
    /// Build a message from parts.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Diagnostic envelope for a payload that failed validation.
    #[must_use]
    pub fn parse_error(error: &str, raw: &str) -> Self {
        const MAX_RAW: usize = 256;
        let excerpt: String = raw.chars().take(MAX_RAW).collect();
        Self::new(
            "parse_error",
            serde_json::json!({ "error": error, "raw": excerpt }),
        )
    }

    /// Dispatch category derived from the wire type.
    ///
    /// Never [`MessageCategory::ParseError`]: that category is reserved for
    /// diagnostics the router builds locally, so a server cannot spoof it.
    #[must_use]
    pub fn category(&self) -> MessageCategory {
        MessageCategory::from_wire(&self.kind)
    }

    /// Decode `data` as price records.
    ///
    /// Accepts either a single record or an array of records.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` does not match the record schema.
    pub fn price_records(&self) -> Result<Vec<PriceRecord>, serde_json::Error> {
        if self.data.is_array() {
            serde_json::from_value(self.data.clone())
        } else {
            serde_json::from_value(self.data.clone()).map(|record| vec![record])
        }
    }

    /// Server error text, if this is an `error` message.
    #[must_use]
    pub fn error_text(&self) -> Option<String> {
        if self.category() != MessageCategory::Error {
            return None;
        }
        match &self.data {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(map) => map
                .get("message")
                .or_else(|| map.get("msg"))
                .and_then(|v| v.as_str())
                .map(str::to_owned),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// A single price/sentiment record.
///
/// Shared by `price_update` payloads and the fallback snapshot document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Asset symbol.
    pub symbol: String,
    /// Last price.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// 24h change in percent.
    #[serde(default, alias = "change24h", alias = "change")]
    pub change_24h: Option<Decimal>,
    /// Sentiment score, when provided.
    #[serde(default)]
    pub sentiment: Option<f64>,
    /// Source timestamp.
    #[serde(default, alias = "timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Outbound
// =============================================================================

/// Messages the client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Liveness check.
    Heartbeat,
    /// Ask the server to push a fresh snapshot.
    #[serde(alias = "refresh")]
    RefreshRequest,
}

// =============================================================================
// Tests
// =============================================================================

//! Message Router
//!
//! Decodes inbound frames and dispatches them to the subscriber registry by
//! category. Decode failures become a single `ParseError` diagnostic; they
//! never reach business subscribers and never affect the connection.

use crate::application::ports::InboundFrame;
use crate::domain::streaming::{InboundMessage, MessageCategory};
use crate::domain::subscription::{PublishReport, SharedRegistry};
use crate::infrastructure::metrics;

use super::codec::JsonCodec;

/// Result of routing one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Category the frame was dispatched to.
    pub category: MessageCategory,
    /// Delivery summary.
    pub report: PublishReport,
}

/// Validates, classifies, and dispatches inbound frames.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    codec: JsonCodec,
    registry: SharedRegistry,
}

impl MessageRouter {
    /// Create a router publishing into `registry`.
    #[must_use]
    pub const fn new(registry: SharedRegistry) -> Self {
        Self {
            codec: JsonCodec::new(),
            registry,
        }
    }

    /// Route one inbound frame.
    pub fn handle(&self, frame: &InboundFrame) -> RouteOutcome {
        let message = match self.codec.decode_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                let raw = match frame {
                    InboundFrame::Text(text) => text.clone(),
                    InboundFrame::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                };
                tracing::warn!(error = %e, "Dropping malformed inbound payload");
                metrics::record_parse_error();
                let diagnostic = InboundMessage::parse_error(&e.to_string(), &raw);
                return self.dispatch(MessageCategory::ParseError, &diagnostic);
            }
        };

        self.route(&message)
    }

    /// Route an already-decoded message.
    pub fn route(&self, message: &InboundMessage) -> RouteOutcome {
        let category = message.category();

        match category {
            MessageCategory::Unrecognized => {
                tracing::warn!(kind = %message.kind, "Unrecognized message type");
            }
            MessageCategory::Error => {
                tracing::warn!(
                    error = message.error_text().as_deref().unwrap_or("unspecified"),
                    "Feed reported an error"
                );
            }
            _ => {
                tracing::trace!(kind = %message.kind, category = category.as_str(), "Routing message");
            }
        }

        metrics::record_message_received(category);
        self.dispatch(category, message)
    }

    fn dispatch(&self, category: MessageCategory, message: &InboundMessage) -> RouteOutcome {
        let report = self.registry.publish(category, message);
        RouteOutcome { category, report }
    }
}

//! WebSocket Transport
//!
//! `Connector` adapter over `tokio-tungstenite`. Control frames are handled
//! here: pings are answered by tungstenite itself, pongs are dropped, and a
//! close frame ends the stream with [`TransportError::Closed`].

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::application::ports::{ChannelParts, Connector, InboundFrame, TransportError};

/// Opens WebSocket channels.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<ChannelParts, TransportError> {
        tracing::debug!(url, "Opening WebSocket");

        let (ws_stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| map_ws_error(&e))
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));

        let stream = read.filter_map(|msg| future::ready(translate(msg)));

        Ok(ChannelParts {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// Translate one tungstenite item into a channel item. `None` drops it.
fn translate(
    msg: Result<Message, tungstenite::Error>,
) -> Option<Result<InboundFrame, TransportError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(InboundFrame::Text(text.as_str().to_owned()))),
        Ok(Message::Binary(bytes)) => Some(Ok(InboundFrame::Binary(bytes.to_vec()))),
        Ok(Message::Close(frame)) => {
            let reason = frame.map_or_else(
                || "close frame".to_string(),
                |f| format!("{} {}", u16::from(f.code), f.reason.as_str()),
            );
            tracing::info!(reason = %reason, "Server sent close frame");
            Some(Err(TransportError::Closed(reason)))
        }
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(Err(map_ws_error(&e))),
    }
}

fn map_ws_error(e: &tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed(e.to_string())
        }
        _ => TransportError::Protocol(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    use super::*;

    #[test]
    fn text_and_binary_pass_through() {
        assert_eq!(
            translate(Ok(Message::Text("hi".into()))),
            Some(Ok(InboundFrame::Text("hi".to_string())))
        );
        assert_eq!(
            translate(Ok(Message::Binary(vec![1u8, 2].into()))),
            Some(Ok(InboundFrame::Binary(vec![1, 2])))
        );
    }

    #[test]
    fn control_frames_are_dropped() {
        assert_eq!(translate(Ok(Message::Ping(Vec::<u8>::new().into()))), None);
        assert_eq!(translate(Ok(Message::Pong(Vec::<u8>::new().into()))), None);
    }

    #[test]
    fn close_frame_ends_channel() {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "bye".into(),
        };
        assert!(matches!(
            translate(Ok(Message::Close(Some(frame)))),
            Some(Err(TransportError::Closed(reason))) if reason.contains("bye")
        ));
        assert!(matches!(
            translate(Ok(Message::Close(None))),
            Some(Err(TransportError::Closed(_)))
        ));
    }

    #[test]
    fn closed_errors_map_to_closed() {
        assert!(matches!(
            translate(Err(tungstenite::Error::ConnectionClosed)),
            Some(Err(TransportError::Closed(_)))
        ));
        assert!(matches!(
            map_ws_error(&tungstenite::Error::Io(std::io::Error::other("reset"))),
            TransportError::Protocol(_)
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_connect_failed() {
        let err = TungsteniteConnector::new()
            .connect("ws://127.0.0.1:1/feed")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectFailed(_)));
    }
}

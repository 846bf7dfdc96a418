//! Streaming transport: one persistent push subscription per topic.
//!
//! The connection manager only needs "open a topic, then read text frames
//! until the stream ends or errors". [`CaseTransport`] is that seam;
//! [`WsTransport`] implements it over WebSocket (`/ws/{topic}`).

use std::future::Future;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Url;
use tokio_tungstenite::tungstenite::Message;

use crate::channel::Topic;

/// Text frames of one live subscription. Ends when the server closes.
pub type PushStream = BoxStream<'static, Result<String, TransportError>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid push endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Cannot open subscription: {0}")]
    Connect(String),
    #[error("Subscription stream failed: {0}")]
    Stream(String),
}

/// Opens push subscriptions.
pub trait CaseTransport: Send + Sync + 'static {
    fn connect(
        &self,
        topic: &Topic,
    ) -> impl Future<Output = Result<PushStream, TransportError>> + Send;
}

/// WebSocket transport rooted at a `ws://` or `wss://` base URL.
#[derive(Debug, Clone)]
pub struct WsTransport {
    base_url: Url,
}

impl WsTransport {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let base_url = Url::parse(trimmed)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{trimmed:?}: {e}")))?;
        if !matches!(base_url.scheme(), "ws" | "wss") || base_url.cannot_be_a_base() {
            return Err(TransportError::InvalidEndpoint(format!(
                "expected a ws:// or wss:// URL, got {trimmed}"
            )));
        }
        Ok(Self { base_url })
    }

    /// `base/ws/{topic}`, with the topic percent-encoded as one segment.
    pub fn topic_url(&self, topic: &Topic) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidEndpoint(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["ws", topic.as_str()]);
        Ok(url)
    }
}

impl CaseTransport for WsTransport {
    async fn connect(&self, topic: &Topic) -> Result<PushStream, TransportError> {
        let url = self.topic_url(topic)?;
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(%topic, url = %url, "WebSocket handshake complete");

        let frames = socket.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                // Binary frames are decoded leniently; bad payloads are
                // rejected later by the push decoder, not by the transport.
                Ok(Message::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "Server closed subscription");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Stream(e.to_string()))),
            }
        });
        Ok(frames.boxed())
    }
}

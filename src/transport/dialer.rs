//! Opening the underlying stream.
//!
//! A [`Dialer`] turns an endpoint into a [`FrameStream`] of text frames.
//! The default [`WebSocketDialer`] uses `tokio-tungstenite`; tests and
//! embedders can plug in any other framed transport.
//!
//! # Frame Mapping
//!
//! | WebSocket message | Stream item |
//! |-------------------|-------------|
//! | Text | `Ok(text)` |
//! | Binary, Ping, Pong | skipped |
//! | Close | `Err(Error::ConnectionClosed)` |
//! | receive error | `Err(Error::WebSocket)` |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ClientId;

// ============================================================================
// Types
// ============================================================================

/// Stream of inbound text frames.
///
/// The stream ends (or yields an error) when the transport drops.
pub type FrameStream = BoxStream<'static, Result<String>>;

// ============================================================================
// Dialer
// ============================================================================

/// Opens one framed stream for an endpoint.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Connects to `endpoint` and returns its inbound frames.
    ///
    /// # Errors
    ///
    /// Any error is treated as a transport failure and triggers a
    /// reconnect with backoff.
    async fn dial(&self, endpoint: &str) -> Result<FrameStream>;
}

// ============================================================================
// WebSocketDialer
// ============================================================================

/// Default dialer over WebSocket (`ws://` or `wss://`).
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketDialer;

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(&self, endpoint: &str) -> Result<FrameStream> {
        let (ws_stream, _response) = connect_async(endpoint)
            .await
            .map_err(|e| Error::connection(format!("Failed to connect to {endpoint}: {e}")))?;

        debug!(endpoint, "WebSocket connected");

        let frames = ws_stream.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket closed by remote");
                    Some(Err(Error::ConnectionClosed))
                }
                Ok(Message::Binary(_)) => {
                    trace!("Ignoring binary frame");
                    None
                }
                // Ping/Pong are answered by tungstenite
                Ok(_) => None,
                Err(e) => Some(Err(Error::WebSocket(e))),
            }
        });

        Ok(frames.boxed())
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Endpoint helpers.
pub struct Endpoint;

impl Endpoint {
    /// Validates an endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL does not parse or its scheme
    /// is not `ws`/`wss`.
    pub fn validate(endpoint: &str) -> Result<Url> {
        let url = Url::parse(endpoint)
            .map_err(|e| Error::config(format!("Invalid endpoint '{endpoint}': {e}")))?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(Error::config(format!(
                "Endpoint scheme must be ws or wss, got '{other}'"
            ))),
        }
    }

    /// Builds the per-client endpoint by appending `clientId`.
    ///
    /// The remote end keys the stream (and any state it buffers for an
    /// offline client) by this identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `base` is not a valid ws/wss URL.
    pub fn for_client(base: &str, client_id: &ClientId) -> Result<String> {
        let mut url = Self::validate(base)?;
        url.query_pairs_mut()
            .append_pair("clientId", &client_id.to_string());
        Ok(url.into())
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Transport abstraction for the live channel.
//!
//! The reconnection manager is generic over [`Connector`] so tests can drive
//! it with a scripted in-memory transport while production uses
//! tokio-tungstenite over TCP/TLS.

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

/// Close code reported when the connection drops without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection refused: {0}")]
    Refused(String),
}

/// Inbound transport events, normalized so the manager sees the same shape
/// from every implementation.
#[derive(Debug)]
pub enum TransportEvent {
    /// A UTF-8 text frame carrying a serialized push payload.
    Frame(String),
    /// The transport is gone. 1000 means a deliberate normal closure;
    /// anything else feeds the reconnection policy.
    Closed { code: u16 },
}

/// One live bidirectional connection.
pub trait Transport: Send {
    fn send(&mut self, text: String) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;
    fn next_event(&mut self) -> impl std::future::Future<Output = TransportEvent> + Send;
    fn close(&mut self, code: u16) -> impl std::future::Future<Output = ()> + Send;
}

/// Opens transports. The manager holds exactly one connector and never has
/// more than one connect in flight.
pub trait Connector: Send + 'static {
    type Transport: Transport;
    fn connect(
        &mut self,
        url: &Url,
    ) -> impl std::future::Future<Output = Result<Self::Transport, TransportError>> + Send;
}

/// Production connector: tokio-tungstenite over TCP (or TLS when the URL
/// scheme is wss, mirroring a secure page origin).
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

pub struct WsTransport {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&mut self, url: &Url) -> Result<WsTransport, TransportError> {
        let (inner, _response) = connect_async(url.as_str()).await?;
        Ok(WsTransport { inner })
    }
}

impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.inner.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Frame(text),
                Some(Ok(Message::Close(frame))) => {
                    let code = frame
                        .map(|f| u16::from(f.code))
                        .unwrap_or(ABNORMAL_CLOSURE);
                    return TransportEvent::Closed { code };
                }
                // tungstenite answers pings internally; binary frames carry
                // nothing on this channel.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Transport read error");
                    return TransportEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                    };
                }
                None => {
                    return TransportEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                    }
                }
            }
        }
    }

    async fn close(&mut self, code: u16) {
        let _ = self
            .inner
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: "".into(),
            })))
            .await;
        let _ = self.inner.close(None).await;
    }
}

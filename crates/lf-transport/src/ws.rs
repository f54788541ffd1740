//! tokio-tungstenite implementation of the transport contract.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::Error as WsError;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::{ConnectError, Connector, ReceiveError, SendError, TransportSession};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens TLS (or plain, for `ws://`) WebSocket connections.
///
/// No deadline of its own; the protocol session bounds the whole connect.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        uri: &str,
        subprotocol: &str,
    ) -> Result<Box<dyn TransportSession>, ConnectError> {
        let mut request = uri
            .into_client_request()
            .map_err(|e| ConnectError::InvalidRequest(e.to_string()))?;
        let protocol = HeaderValue::from_str(subprotocol)
            .map_err(|e| ConnectError::InvalidRequest(format!("subprotocol: {e}")))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocol);

        let (stream, response) = connect_async(request).await.map_err(map_connect_error)?;
        let accepted = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        if accepted != Some(subprotocol) {
            warn!(requested = subprotocol, ?accepted, "server did not echo websocket subprotocol");
        }
        debug!(status = response.status().as_u16(), "websocket open");

        Ok(Box::new(WsSession {
            stream,
            closed: false,
        }))
    }
}

fn map_connect_error(err: WsError) -> ConnectError {
    match err {
        WsError::Http(response) => {
            let body = response
                .body()
                .as_ref()
                .filter(|b| !b.is_empty())
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            ConnectError::Rejected {
                status: response.status().as_u16(),
                body,
            }
        }
        WsError::Url(e) => ConnectError::InvalidRequest(e.to_string()),
        other => ConnectError::Io(other.to_string()),
    }
}

struct WsSession {
    stream: Stream,
    closed: bool,
}

#[async_trait]
impl TransportSession for WsSession {
    async fn send(&mut self, text: String) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| match e {
                WsError::ConnectionClosed | WsError::AlreadyClosed => SendError::Closed,
                other => SendError::Io(other.to_string()),
            })
    }

    async fn receive(&mut self) -> Option<Result<String, ReceiveError>> {
        if self.closed {
            return None;
        }
        loop {
            match self.stream.next().await {
                None => {
                    self.closed = true;
                    return None;
                }
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        debug!("dropping non-utf8 binary frame");
                        continue;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "peer closed websocket");
                    // tungstenite queues the close reply on read; flush it.
                    let _ = self.stream.close(None).await;
                    self.closed = true;
                    return None;
                }
                // Pings are answered by tungstenite itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    self.closed = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.closed = true;
                    return Some(Err(ReceiveError::Io(e.to_string())));
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "websocket close");
        }
    }
}

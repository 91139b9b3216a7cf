//! WebSocket transport to a realtime inference application.
//!
//! Each connection runs one pump task that moves frames between the
//! socket and the kernel's duplex channels until either side closes.

use futures::future::{BoxFuture, FutureExt};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, WebSocketStream};
use tracing::{debug, info, warn};

use live_canvas_kernel::error::ConnectError;
use live_canvas_kernel::transport::{Duplex, OutboundFrame, RemoteEnd, Transport, TransportEvent};

/// Host used when the endpoint is a bare application id.
pub const DEFAULT_REALTIME_HOST: &str = "wss://fal.run";

/// Transport over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connection_key: String,
    capacity: usize,
}

impl WebSocketTransport {
    pub fn new(connection_key: impl Into<String>) -> Self {
        Self {
            connection_key: connection_key.into(),
            capacity: 64,
        }
    }

    /// Socket URL for an endpoint.
    ///
    /// `ws://` and `wss://` endpoints are used as given; anything else is an
    /// application id on the default realtime host. The connection key is
    /// appended as a query parameter when set.
    pub fn url(&self, endpoint: &str) -> String {
        let base = if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
            endpoint.to_string()
        } else {
            format!(
                "{}/{}/realtime",
                DEFAULT_REALTIME_HOST,
                endpoint.trim_matches('/')
            )
        };
        if self.connection_key.is_empty() {
            return base;
        }
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{base}{separator}connection_key={}", self.connection_key)
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self, endpoint: &str) -> BoxFuture<'static, Result<Duplex, ConnectError>> {
        let url = self.url(endpoint);
        let capacity = self.capacity;
        async move {
            let (ws, response) =
                connect_async(url.as_str())
                    .await
                    .map_err(|e| ConnectError::Refused {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    })?;
            info!(url = %url, status = %response.status(), "WebSocket connected");

            let (duplex, remote) = Duplex::pair(capacity);
            tokio::spawn(pump(ws, remote));
            Ok(duplex)
        }
        .boxed()
    }
}

/// Shuttle frames until the socket or the client goes away.
async fn pump<S>(ws: WebSocketStream<S>, remote: RemoteEnd)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let RemoteEnd { mut frames, events } = remote;

    loop {
        tokio::select! {
            outbound = frames.recv() => match outbound {
                Some(OutboundFrame { bytes, ack }) => {
                    match sink.send(Message::Binary(bytes)).await {
                        Ok(()) => ack.transmitted(),
                        Err(e) => {
                            warn!(error = %e, "WebSocket send failed");
                            ack.failed(e.to_string());
                            let _ = events.send(TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                }
                None => {
                    // Client dropped its sender: close politely.
                    debug!("Closing WebSocket");
                    let _ = sink.close().await;
                    break;
                }
            },
            inbound = stream.next() => {
                let event = match inbound {
                    Some(Ok(Message::Binary(bytes))) => TransportEvent::Frame(bytes),
                    Some(Ok(Message::Text(text))) => TransportEvent::Frame(text.into_bytes()),
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = events.send(TransportEvent::Closed).await;
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }
    }
}

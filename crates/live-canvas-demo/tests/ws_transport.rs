//! WebSocket transport against a local echo server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

use live_canvas_demo::ws_transport::WebSocketTransport;
use live_canvas_kernel::connection::ConnectionManager;
use live_canvas_kernel::error::{ConnectError, SendError};
use live_canvas_kernel::protocol::{Codec, GenerationParams, InferenceRequest, InferenceResult};
use live_canvas_kernel::raster::{Bitmap, ImageFormat};

/// Accept connections and answer each request with its own image.
async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    let Message::Binary(bytes) = message else {
                        continue;
                    };
                    let request = Codec::decode_request(&bytes).unwrap();
                    let result =
                        InferenceResult::with_image(request.request_id.clone(), request.image);
                    let reply = Codec::encode_result(&result).unwrap();
                    if ws.send(Message::Binary(reply)).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

fn request(id: &str) -> InferenceRequest {
    let bitmap = Bitmap::new(4, 4, ImageFormat::Jpeg, vec![9, 8, 7]);
    InferenceRequest::new(id, "a lighthouse", &bitmap, &GenerationParams::default())
}

#[tokio::test]
async fn test_result_round_trips_over_websocket() {
    let addr = spawn_echo_server().await;
    let manager = ConnectionManager::new(
        format!("ws://{addr}"),
        Arc::new(WebSocketTransport::new("")),
        2,
    );

    let (tx, rx) = oneshot::channel();
    manager.subscribe(
        "req-1",
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    );
    manager.send(&request("req-1")).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.request_id, "req-1");
    assert_eq!(result.image, Some(vec![9, 8, 7]));
    assert_eq!(manager.connect_attempts(), 1);
    assert_eq!(manager.subscriber_count(), 0);

    manager.close();
}

#[tokio::test]
async fn test_unreachable_endpoint_is_refused() {
    // Bind and drop to get a port nothing listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let manager = ConnectionManager::new(
        format!("ws://{addr}"),
        Arc::new(WebSocketTransport::new("")),
        1,
    );

    let err = manager.send(&request("req-2")).await.unwrap_err();
    assert!(matches!(
        err,
        SendError::Connect(ConnectError::Refused { .. })
    ));
}

//! Offline stand-in for the inference service.
//!
//! Answers every request with the image it was sent, after a configurable
//! latency plus random jitter, so the loop can be exercised without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use rand::Rng;
use tracing::{debug, warn};

use live_canvas_kernel::error::ConnectError;
use live_canvas_kernel::protocol::{Codec, InferenceRequest, InferenceResult};
use live_canvas_kernel::transport::{Duplex, OutboundFrame, RemoteEnd, Transport, TransportEvent};

/// In-process echo service.
#[derive(Debug, Clone)]
pub struct LoopbackService {
    latency: Duration,
    jitter: Duration,
    served: Arc<AtomicU64>,
}

impl LoopbackService {
    pub fn new(latency: Duration, jitter: Duration) -> Self {
        Self {
            latency,
            jitter,
            served: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Requests answered so far, across all connections.
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }

    fn delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.latency;
        }
        self.latency + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    fn answer(request: &InferenceRequest, delay: Duration) -> InferenceResult {
        let mut result =
            InferenceResult::with_image(request.request_id.clone(), request.image.clone());
        result.seed = request.seed;
        result.num_inference_steps = Some(request.num_inference_steps);
        result.nsfw_content_detected = vec![false];
        result.timings = HashMap::from([("inference".to_string(), delay.as_secs_f64())]);
        result
    }
}

impl Transport for LoopbackService {
    fn connect(&self, endpoint: &str) -> BoxFuture<'static, Result<Duplex, ConnectError>> {
        let service = self.clone();
        let endpoint = endpoint.to_string();
        async move {
            let (duplex, remote) = Duplex::pair(64);
            debug!(endpoint = %endpoint, "Loopback connection open");
            tokio::spawn(service.serve(remote));
            Ok(duplex)
        }
        .boxed()
    }
}

impl LoopbackService {
    async fn serve(self, remote: RemoteEnd) {
        let RemoteEnd { mut frames, events } = remote;
        while let Some(OutboundFrame { bytes, ack }) = frames.recv().await {
            ack.transmitted();
            let request = match Codec::decode_request(&bytes) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "Loopback received malformed request");
                    continue;
                }
            };

            let delay = self.delay();
            let events = events.clone();
            let served = self.served.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let result = Self::answer(&request, delay);
                match Codec::encode_result(&result) {
                    Ok(bytes) => {
                        served.fetch_add(1, Ordering::SeqCst);
                        let _ = events.send(TransportEvent::Frame(bytes)).await;
                    }
                    Err(e) => warn!(error = %e, "Loopback could not encode result"),
                }
            });
        }
        let _ = events.send(TransportEvent::Closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use live_canvas_kernel::protocol::GenerationParams;
    use live_canvas_kernel::raster::{Bitmap, ImageFormat};

    #[tokio::test]
    async fn test_echoes_submitted_image() {
        let service = LoopbackService::new(Duration::from_millis(5), Duration::ZERO);
        let Duplex {
            outbound,
            mut inbound,
        } = service.connect("loopback").await.unwrap();

        let bitmap = Bitmap::new(2, 2, ImageFormat::Jpeg, vec![1, 2, 3, 4]);
        let request = InferenceRequest::new("r1", "a cat", &bitmap, &GenerationParams::default());
        let (frame, ack) = OutboundFrame::new(Codec::encode_request(&request).unwrap());
        outbound.send(frame).await.unwrap();
        assert_eq!(ack.await.unwrap(), Ok(()));

        let Some(TransportEvent::Frame(bytes)) = inbound.recv().await else {
            panic!("expected a result frame");
        };
        let result = Codec::decode_result(&bytes).unwrap();
        assert_eq!(result.request_id, "r1");
        assert_eq!(result.image, Some(vec![1, 2, 3, 4]));
        assert_eq!(result.seed, Some(42));
        assert_eq!(service.served(), 1);
    }

    #[tokio::test]
    async fn test_dropping_client_closes_connection() {
        let service = LoopbackService::new(Duration::ZERO, Duration::ZERO);
        let Duplex {
            outbound,
            mut inbound,
        } = service.connect("loopback").await.unwrap();

        drop(outbound);
        assert_eq!(inbound.recv().await, Some(TransportEvent::Closed));
    }
}

//! Shared fakes for integration tests: an in-memory canvas, a counting
//! rasterizer and a scripted inference service behind an in-process transport.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use live_canvas_kernel::canvas::{CanvasSurface, RegionImage};
use live_canvas_kernel::error::{ConnectError, RasterizeError};
use live_canvas_kernel::protocol::{Codec, InferenceRequest, InferenceResult};
use live_canvas_kernel::raster::{Bitmap, ImageFormat, RasterPlan, Rasterizer, Rgba, VectorImage};
use live_canvas_kernel::region::{Rect, RegionId};
use live_canvas_kernel::snapshot::{Fingerprint, SnapshotSource};
use live_canvas_kernel::transport::{
    Duplex, OutboundFrame, RemoteEnd, Transport, TransportEvent,
};

/// Test helper to create a region ID from a name
pub fn region(name: &str) -> RegionId {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes())
}

#[derive(Debug, Clone)]
struct MockRegion {
    bounds: Rect,
    label: String,
    content: u64,
    renderable: bool,
}

/// In-memory canvas playing both the snapshot source and the apply surface.
#[derive(Default)]
pub struct MockCanvas {
    regions: Mutex<HashMap<RegionId, MockRegion>>,
    applied: Mutex<Vec<(RegionId, RegionImage)>>,
}

impl MockCanvas {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, id: RegionId, label: &str) {
        self.regions.lock().unwrap().insert(
            id,
            MockRegion {
                bounds: Rect::new(0.0, 0.0, 256.0, 256.0),
                label: label.to_string(),
                content: 0,
                renderable: true,
            },
        );
    }

    pub fn set_label(&self, id: RegionId, label: &str) {
        if let Some(region) = self.regions.lock().unwrap().get_mut(&id) {
            region.label = label.to_string();
        }
    }

    /// Simulate a drawing change underneath the region.
    pub fn draw(&self, id: RegionId) {
        if let Some(region) = self.regions.lock().unwrap().get_mut(&id) {
            region.content += 1;
        }
    }

    pub fn resize(&self, id: RegionId, bounds: Rect) {
        if let Some(region) = self.regions.lock().unwrap().get_mut(&id) {
            region.bounds = bounds;
        }
    }

    pub fn set_renderable(&self, id: RegionId, renderable: bool) {
        if let Some(region) = self.regions.lock().unwrap().get_mut(&id) {
            region.renderable = renderable;
        }
    }

    pub fn remove(&self, id: RegionId) {
        self.regions.lock().unwrap().remove(&id);
    }

    pub fn applied(&self) -> Vec<(RegionId, RegionImage)> {
        self.applied.lock().unwrap().clone()
    }

    pub fn applied_for(&self, id: RegionId) -> Vec<RegionImage> {
        self.applied()
            .into_iter()
            .filter(|(rid, _)| *rid == id)
            .map(|(_, image)| image)
            .collect()
    }

    /// Payload of the most recent generated image applied to `id`, as text.
    pub fn last_payload(&self, id: RegionId) -> Option<String> {
        self.applied_for(id).into_iter().rev().find_map(|image| match image {
            RegionImage::Generated { bitmap, .. } => {
                Some(String::from_utf8_lossy(&bitmap.bytes).into_owned())
            }
            RegionImage::Placeholder => None,
        })
    }
}

impl SnapshotSource for MockCanvas {
    fn list_regions(&self) -> Vec<RegionId> {
        self.regions.lock().unwrap().keys().copied().collect()
    }

    fn region_bounds(&self, id: RegionId) -> Option<Rect> {
        self.regions.lock().unwrap().get(&id).map(|r| r.bounds)
    }

    fn overlapping_fingerprint(&self, id: RegionId) -> Fingerprint {
        let content = self
            .regions
            .lock()
            .unwrap()
            .get(&id)
            .map(|r| r.content)
            .unwrap_or_default();
        Fingerprint::of_unordered([content])
    }

    fn label(&self, id: RegionId) -> String {
        self.regions
            .lock()
            .unwrap()
            .get(&id)
            .map(|r| r.label.clone())
            .unwrap_or_default()
    }

    fn render_region(&self, id: RegionId) -> Option<VectorImage> {
        let regions = self.regions.lock().unwrap();
        let region = regions.get(&id).filter(|r| r.renderable)?;
        Some(VectorImage {
            bounds: region.bounds,
            background: Rgba::WHITE,
            layers: Vec::new(),
        })
    }
}

impl CanvasSurface for MockCanvas {
    fn apply_image(&self, id: RegionId, image: RegionImage) {
        self.applied.lock().unwrap().push((id, image));
    }
}

/// Rasterizer that counts calls and can be told to fail.
#[derive(Default)]
pub struct CountingRasterizer {
    calls: AtomicUsize,
    fail: AtomicBool,
    plans: Mutex<Vec<RasterPlan>>,
}

impl CountingRasterizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn plans(&self) -> Vec<RasterPlan> {
        self.plans.lock().unwrap().clone()
    }
}

impl Rasterizer for CountingRasterizer {
    fn name(&self) -> &str {
        "counting"
    }

    fn rasterize(
        &self,
        _image: VectorImage,
        plan: RasterPlan,
    ) -> BoxFuture<'static, Result<Bitmap, RasterizeError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.plans.lock().unwrap().push(plan);
        let fail = self.fail.load(Ordering::SeqCst);
        async move {
            if fail {
                return Err(RasterizeError::Environment("no display".to_string()));
            }
            Ok(Bitmap::new(
                plan.width,
                plan.height,
                ImageFormat::Jpeg,
                b"raster".to_vec(),
            ))
        }
        .boxed()
    }
}

/// What the scripted service does with a request.
pub enum Response {
    /// Reply with this result after the delay.
    After(Duration, InferenceResult),
    /// Never reply.
    Ignore,
}

type Responder = dyn Fn(&InferenceRequest) -> Response + Send + Sync;

struct ServiceState {
    connects: AtomicUsize,
    connect_delay: Duration,
    /// Connections numbered up to this one are handed out already closed.
    broken_connections: AtomicUsize,
    /// Connections numbered up to this one accept frames but never read them.
    stalled_connections: AtomicUsize,
    stalled: Mutex<Vec<RemoteEnd>>,
    refuse: AtomicBool,
    requests: Mutex<Vec<InferenceRequest>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    responder: Box<Responder>,
}

/// In-process inference service reachable through [`Transport`].
#[derive(Clone)]
pub struct MockService {
    state: Arc<ServiceState>,
}

impl MockService {
    /// Echo service: the result image is the request prompt. Prompts
    /// starting with "slow" are answered after 300ms, others after 5ms.
    pub fn echo() -> Self {
        Self::with_responder(Duration::from_millis(20), |request| {
            let delay = if request.prompt.starts_with("slow") {
                Duration::from_millis(300)
            } else {
                Duration::from_millis(5)
            };
            Response::After(
                delay,
                InferenceResult::with_image(
                    request.request_id.clone(),
                    request.prompt.clone().into_bytes(),
                ),
            )
        })
    }

    pub fn with_responder<F>(connect_delay: Duration, responder: F) -> Self
    where
        F: Fn(&InferenceRequest) -> Response + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(ServiceState {
                connects: AtomicUsize::new(0),
                connect_delay,
                broken_connections: AtomicUsize::new(0),
                stalled_connections: AtomicUsize::new(0),
                stalled: Mutex::new(Vec::new()),
                refuse: AtomicBool::new(false),
                requests: Mutex::new(Vec::new()),
                events: Mutex::new(None),
                responder: Box::new(responder),
            }),
        }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn break_first_connections(&self, count: usize) {
        self.state.broken_connections.store(count, Ordering::SeqCst);
    }

    pub fn stall_first_connections(&self, count: usize) {
        self.state.stalled_connections.store(count, Ordering::SeqCst);
    }

    /// Frames sitting unread on stalled connections.
    pub fn stalled_frames(&self) -> usize {
        self.state
            .stalled
            .lock()
            .unwrap()
            .iter()
            .map(|remote| remote.frames.len())
            .sum()
    }

    /// Close every stalled connection, discarding the frames it buffered.
    pub async fn drop_stalled(&self) {
        let stalled: Vec<_> = self.state.stalled.lock().unwrap().drain(..).collect();
        for remote in stalled {
            let _ = remote.events.send(TransportEvent::Closed).await;
        }
    }

    pub fn set_refusing(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Push a raw event to the client on the current connection.
    pub async fn inject(&self, event: TransportEvent) {
        let events = self.state.events.lock().unwrap().clone();
        if let Some(events) = events {
            let _ = events.send(event).await;
        }
    }
}

impl Transport for MockService {
    fn connect(&self, endpoint: &str) -> BoxFuture<'static, Result<Duplex, ConnectError>> {
        let state = self.state.clone();
        let endpoint = endpoint.to_string();
        async move {
            let number = state.connects.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(state.connect_delay).await;

            if state.refuse.load(Ordering::SeqCst) {
                return Err(ConnectError::Refused {
                    endpoint,
                    reason: "service unavailable".to_string(),
                });
            }

            let (duplex, remote) = Duplex::pair(64);
            if number <= state.broken_connections.load(Ordering::SeqCst) {
                drop(remote);
                return Ok(duplex);
            }
            if number <= state.stalled_connections.load(Ordering::SeqCst) {
                state.stalled.lock().unwrap().push(remote);
                return Ok(duplex);
            }

            *state.events.lock().unwrap() = Some(remote.events.clone());
            tokio::spawn(serve(state, remote));
            Ok(duplex)
        }
        .boxed()
    }
}

async fn serve(state: Arc<ServiceState>, mut remote: RemoteEnd) {
    while let Some(OutboundFrame { bytes, ack }) = remote.frames.recv().await {
        ack.transmitted();
        let Ok(request) = Codec::decode_request(&bytes) else {
            continue;
        };
        state.requests.lock().unwrap().push(request.clone());

        if let Response::After(delay, result) = (state.responder)(&request) {
            let events = remote.events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Ok(bytes) = Codec::encode_result(&result) {
                    let _ = events.send(TransportEvent::Frame(bytes)).await;
                }
            });
        }
    }
}

/// Distinct correlation ids seen by the service.
pub fn distinct_ids(requests: &[InferenceRequest]) -> HashSet<String> {
    requests.iter().map(|r| r.request_id.clone()).collect()
}

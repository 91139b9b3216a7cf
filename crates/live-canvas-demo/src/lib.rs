//! Live Canvas Demo: concrete collaborators for the live canvas kernel
//!
//! - [`scene::SceneCanvas`]: in-memory shapes and frames
//! - [`raster::ImageRasterizer`]: pixel rendering with the `image` crate
//! - [`ws_transport::WebSocketTransport`]: realtime WebSocket connection
//! - [`loopback::LoopbackService`]: offline echo service

pub mod loopback;
pub mod raster;
pub mod scene;
pub mod session;
pub mod ws_transport;

pub use loopback::LoopbackService;
pub use raster::ImageRasterizer;
pub use scene::{SceneCanvas, Shape, ShapeKind};
pub use session::{run_session, run_session_on, SessionOptions, SessionReport};
pub use ws_transport::WebSocketTransport;

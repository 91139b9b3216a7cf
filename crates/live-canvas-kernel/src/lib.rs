//! Live Canvas Kernel: continuous AI regeneration of canvas regions
//!
//! Every tick, each region's overlapping content is fingerprinted. Changed
//! regions are rasterized and sent over one shared, lazily opened connection
//! to an image-to-image inference service. Per-region iteration counters make
//! sure a late result never overwrites a newer one, and results for deleted
//! regions are discarded.

pub mod actors;
pub mod canvas;
pub mod config;
pub mod connection;
pub mod error;
pub mod kernel;
pub mod messages;
pub mod protocol;
pub mod raster;
pub mod region;
pub mod snapshot;
pub mod transport;

pub use canvas::{CanvasSurface, RegionImage};
pub use config::LiveConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{ConfigError, ConnectError, ProtocolError, RasterizeError, SendError};
pub use kernel::{LiveUpdateBuilder, LiveUpdateLoop};
pub use protocol::{Codec, GenerationParams, InferenceRequest, InferenceResult};
pub use raster::{Bitmap, ImageFormat, RasterPlan, Rasterizer, VectorImage, VectorLayer};
pub use region::{Iteration, IterationTracker, RegionId, Rect};
pub use snapshot::{ChangeDetector, Fingerprint, Snapshot, SnapshotSource};
pub use transport::{Duplex, FrameAck, OutboundFrame, RemoteEnd, Transport, TransportEvent};

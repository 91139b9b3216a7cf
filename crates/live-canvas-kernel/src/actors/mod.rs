//! Acton-reactive actors for the live update loop.
//!
//! Spawned work reports back to the coordinator by message, so every
//! staleness check runs on the coordinator's mailbox:
//!
//! ```text
//! TickDriver ──Tick──▶ LiveUpdateCoordinator
//!                        ├─ RasterizeFinished ◀── rasterizer task
//!                        ├─ InferenceArrived  ◀── ConnectionManager subscriber
//!                        ├─ SendFailed        ◀── send task
//!                        └─ TickComplete / RegionUpdated / WorkDropped (broadcast)
//!                                                  └─▶ LoopObserver ─▶ mpsc
//! ```

mod coordinator;
mod observer;
mod tick_driver;

pub use coordinator::{LiveUpdateCoordinator, LiveUpdateState};
pub use observer::{LoopEvent, LoopObserver, LoopObserverState};
pub use tick_driver::{TickDriver, TickDriverHandle};

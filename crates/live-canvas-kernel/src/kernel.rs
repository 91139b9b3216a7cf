//! The live update loop: wiring, startup and teardown.
//!
//! ## Usage
//!
//! ```ignore
//! use live_canvas_kernel::{LiveConfig, LiveUpdateBuilder};
//! use acton_reactive::prelude::*;
//!
//! let mut runtime = ActonApp::launch_async().await;
//!
//! let mut live = LiveUpdateBuilder::new(config, source, rasterizer, canvas)
//!     .with_transport(transport)
//!     .spawn(&mut runtime)
//!     .await?;
//!
//! live.start_ticking();
//! // ... canvas edits happen ...
//! live.stop().await;
//! runtime.shutdown_all().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use acton_reactive::prelude::*;
use anyhow::{bail, Context};
use tracing::info;

use crate::actors::{LiveUpdateCoordinator, TickDriver, TickDriverHandle};
use crate::canvas::CanvasSurface;
use crate::config::LiveConfig;
use crate::connection::ConnectionManager;
use crate::messages::Tick;
use crate::raster::Rasterizer;
use crate::snapshot::SnapshotSource;
use crate::transport::Transport;

/// Builder for a running live update loop.
pub struct LiveUpdateBuilder {
    config: LiveConfig,
    source: Arc<dyn SnapshotSource>,
    rasterizer: Arc<dyn Rasterizer>,
    canvas: Arc<dyn CanvasSurface>,
    transport: Option<Arc<dyn Transport>>,
    connection: Option<ConnectionManager>,
}

impl LiveUpdateBuilder {
    pub fn new(
        config: LiveConfig,
        source: Arc<dyn SnapshotSource>,
        rasterizer: Arc<dyn Rasterizer>,
        canvas: Arc<dyn CanvasSurface>,
    ) -> Self {
        Self {
            config,
            source,
            rasterizer,
            canvas,
            transport: None,
            connection: None,
        }
    }

    /// Connect to `config.endpoint` through this transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Share an existing connection instead of creating one.
    pub fn with_connection(mut self, connection: ConnectionManager) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Validate the configuration and spawn the coordinator.
    ///
    /// No connection is opened until the first request is sent.
    pub async fn spawn(self, runtime: &mut ActorRuntime) -> anyhow::Result<LiveUpdateLoop> {
        self.config
            .validate()
            .context("Invalid live update configuration")?;

        let connection = match (self.connection, self.transport) {
            (Some(connection), _) => connection,
            (None, Some(transport)) => ConnectionManager::new(
                self.config.endpoint.clone(),
                transport,
                self.config.connection.max_send_attempts,
            ),
            (None, None) => bail!("LiveUpdateBuilder needs a transport or a connection"),
        };

        let tick_interval = Duration::from_millis(self.config.tick_interval_ms);
        info!(
            endpoint = %connection.endpoint(),
            tick_interval_ms = self.config.tick_interval_ms,
            rasterizer = self.rasterizer.name(),
            "Spawning live update loop"
        );

        let coordinator = LiveUpdateCoordinator::new(
            self.config,
            self.source,
            self.rasterizer,
            self.canvas,
            connection.clone(),
        )
        .spawn(runtime)
        .await;

        Ok(LiveUpdateLoop {
            coordinator,
            connection,
            tick_interval,
            ticks: None,
        })
    }
}

/// A spawned live update loop.
pub struct LiveUpdateLoop {
    coordinator: ActorHandle,
    connection: ConnectionManager,
    tick_interval: Duration,
    ticks: Option<TickDriverHandle>,
}

impl LiveUpdateLoop {
    pub fn coordinator(&self) -> &ActorHandle {
        &self.coordinator
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Start the fixed-cadence tick driver. Does nothing if already ticking.
    pub fn start_ticking(&mut self) {
        if self.ticks.is_none() {
            let driver = TickDriver::new(self.coordinator.clone(), self.tick_interval);
            self.ticks = Some(driver.start());
        }
    }

    /// Send a single tick by hand.
    pub async fn tick(&self, now_ms: u64) {
        self.coordinator.send(Tick { now_ms }).await;
    }

    /// Stop ticking and close the connection.
    ///
    /// Returns the number of ticks the driver sent. Results still in flight
    /// are discarded.
    pub async fn stop(mut self) -> u64 {
        let sent = match self.ticks.take() {
            Some(ticks) => ticks.stop().await,
            None => 0,
        };
        self.connection.close();
        info!(ticks = sent, "Live update loop stopped");
        sent
    }
}

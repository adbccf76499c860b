//! Async driver owning the crossfade timer.
//!
//! The driver is the single owner of a [`CrossfadeController`]. Year (or
//! LOD) requests and tile-arrival signals arrive as commands on a channel;
//! the current view state is published on a `watch` channel for the
//! rendering layer.
//!
//! ```text
//! UI ──Request──┐
//!               ├──► mpsc ──► CrossfadeDriver ──► watch<CrossfadeState> ──► renderer
//! TileLoader ───┘                 │
//!    (Arrival)                    └── sleep_until(fade deadline)
//! ```

use std::fmt::Debug;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::controller::{
    Arrival, CrossfadeConfig, CrossfadeController, CrossfadeState, FadeTimer,
};

/// Channel capacity for crossfade commands.
pub const DEFAULT_COMMAND_CAPACITY: usize = 256;

/// Commands accepted by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossfadeCommand<K> {
    /// Display a new layer.
    Request(K),
    /// A tile-arrival signal from the loader.
    Arrival(Arrival<K>),
    /// Start the fade without waiting for coverage.
    TriggerFade,
}

/// Handle used by producers and the renderer.
#[derive(Debug, Clone)]
pub struct CrossfadeHandle<K> {
    commands: mpsc::Sender<CrossfadeCommand<K>>,
    state: watch::Receiver<CrossfadeState<K>>,
}

impl<K: Copy + PartialEq + Debug + Send + Sync + 'static> CrossfadeHandle<K> {
    /// Requests a layer change. Returns `false` if the driver has stopped.
    pub async fn request(&self, key: K) -> bool {
        self.commands
            .send(CrossfadeCommand::Request(key))
            .await
            .is_ok()
    }

    /// Forwards an arrival signal. Returns `false` if the driver has stopped.
    pub async fn arrival(&self, arrival: Arrival<K>) -> bool {
        self.commands
            .send(CrossfadeCommand::Arrival(arrival))
            .await
            .is_ok()
    }

    /// Starts the fade explicitly.
    pub async fn trigger_fade(&self) -> bool {
        self.commands
            .send(CrossfadeCommand::TriggerFade)
            .await
            .is_ok()
    }

    /// Sender for wiring other producers (e.g. the tile loader bridge).
    pub fn sender(&self) -> mpsc::Sender<CrossfadeCommand<K>> {
        self.commands.clone()
    }

    /// The latest published state.
    pub fn state(&self) -> CrossfadeState<K> {
        *self.state.borrow()
    }

    /// A receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<CrossfadeState<K>> {
        self.state.clone()
    }
}

/// Owns the controller and its fade timer.
pub struct CrossfadeDriver<K> {
    controller: CrossfadeController<K>,
    commands: mpsc::Receiver<CrossfadeCommand<K>>,
    state: watch::Sender<CrossfadeState<K>>,
}

impl<K: Copy + PartialEq + Debug + Send + Sync + 'static> CrossfadeDriver<K> {
    /// Creates a driver idling on `initial` and its handle.
    pub fn new(initial: K, config: CrossfadeConfig) -> (Self, CrossfadeHandle<K>) {
        let controller = CrossfadeController::with_initial(initial, config);
        let (command_tx, command_rx) = mpsc::channel(DEFAULT_COMMAND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(controller.state());

        let driver = Self {
            controller,
            commands: command_rx,
            state: state_tx,
        };
        let handle = CrossfadeHandle {
            commands: command_tx,
            state: state_rx,
        };
        (driver, handle)
    }

    /// Spawns the driver on the current runtime.
    pub fn spawn(
        initial: K,
        config: CrossfadeConfig,
        shutdown: CancellationToken,
    ) -> CrossfadeHandle<K> {
        let (driver, handle) = Self::new(initial, config);
        tokio::spawn(driver.run(shutdown));
        handle
    }

    /// Runs until shutdown or until every handle is dropped.
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let timer = self.controller.pending_timer();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = wait_for(timer) => {
                    if let Some(timer) = timer {
                        if self.controller.complete(timer.generation) {
                            self.publish();
                        }
                    }
                }
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if self.apply(command) {
                        self.publish();
                    }
                }
            }
        }
        debug!("Crossfade driver stopped");
    }

    fn apply(&mut self, command: CrossfadeCommand<K>) -> bool {
        let now = Instant::now();
        match command {
            CrossfadeCommand::Request(key) => self.controller.request(key),
            CrossfadeCommand::Arrival(arrival) => {
                let before = self.controller.state();
                self.controller.on_arrival(arrival, now);
                before != self.controller.state()
            }
            CrossfadeCommand::TriggerFade => self.controller.trigger_fade(now).is_some(),
        }
    }

    fn publish(&self) {
        self.state.send_replace(self.controller.state());
    }
}

async fn wait_for(timer: Option<FadeTimer>) {
    match timer {
        Some(timer) => sleep_until(timer.deadline).await,
        None => std::future::pending().await,
    }
}

//! Tile-arrival gated crossfade state machine.
//!
//! # State Machine
//!
//! ```text
//!           request(new)              ViewportCovered / trigger     fade deadline
//!   Idle ----------------> Transitioning -----------------> FadingIn -----------> Idle
//!    ^                        |    ^                            |
//!    | request(previous)      |    |   request(other)           |
//!    +------------------------+    +----------------------------+
//! ```
//!
//! While `Transitioning` the previous layer stays fully opaque and the new
//! layer is transparent. Only a confirmed viewport-covering arrival (or an
//! explicit trigger) starts the fade, so the old layer never disappears
//! before the new one has data.
//!
//! The controller is synchronous and owns no timer. Starting a fade hands
//! out a [`FadeTimer`] tagged with a generation; a timer from a superseded
//! transition is rejected by [`CrossfadeController::complete`].

use std::fmt::Debug;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Default fade-in duration for the incoming layer.
pub const DEFAULT_FADE_IN: Duration = Duration::from_millis(300);

/// Default fade-out duration for the outgoing layer.
pub const DEFAULT_FADE_OUT: Duration = Duration::from_millis(600);

/// Fade timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossfadeConfig {
    /// Duration of the incoming layer's opacity ramp.
    pub fade_in: Duration,
    /// Duration of the outgoing layer's opacity ramp.
    pub fade_out: Duration,
}

impl CrossfadeConfig {
    pub fn new(fade_in: Duration, fade_out: Duration) -> Self {
        Self { fade_in, fade_out }
    }

    /// Time after which both ramps have finished.
    pub fn completion_delay(&self) -> Duration {
        self.fade_in.max(self.fade_out)
    }
}

impl Default for CrossfadeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_FADE_IN, DEFAULT_FADE_OUT)
    }
}

/// Phase of the crossfade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossfadePhase {
    Idle,
    Transitioning,
    FadingIn,
}

/// An arrival signal for a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival<K> {
    /// At least one tile of the layer has arrived.
    Tile(K),
    /// Every tile covering the viewport has resolved.
    ViewportCovered(K),
    /// The layer's archive cannot be read; nothing more will arrive.
    Unavailable(K),
}

impl<K: Copy> Arrival<K> {
    pub fn key(&self) -> K {
        match *self {
            Arrival::Tile(k) | Arrival::ViewportCovered(k) | Arrival::Unavailable(k) => k,
        }
    }
}

/// A pending fade-completion deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeTimer {
    pub generation: u64,
    pub deadline: Instant,
}

/// Point-in-time view of the crossfade for the rendering layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CrossfadeState<K> {
    pub phase: CrossfadePhase,
    pub current: Option<K>,
    pub previous: Option<K>,
    pub current_opacity: f32,
    pub previous_opacity: f32,
    /// Ramp duration the renderer should apply to the current layer.
    pub current_transition: Duration,
    /// Ramp duration the renderer should apply to the previous layer.
    pub previous_transition: Duration,
    pub new_layer_ready: bool,
    pub new_layer_has_tile: bool,
    /// The current layer reported its data as unavailable.
    pub current_unavailable: bool,
}

/// Crossfade state machine over layer keys of type `K`.
#[derive(Debug)]
pub struct CrossfadeController<K> {
    config: CrossfadeConfig,
    phase: CrossfadePhase,
    current: Option<K>,
    previous: Option<K>,
    new_layer_ready: bool,
    new_layer_has_tile: bool,
    unavailable: bool,
    generation: u64,
    pending: Option<FadeTimer>,
}

impl<K: Copy + PartialEq + Debug> CrossfadeController<K> {
    /// Creates a controller with nothing displayed.
    pub fn new(config: CrossfadeConfig) -> Self {
        Self {
            config,
            phase: CrossfadePhase::Idle,
            current: None,
            previous: None,
            new_layer_ready: false,
            new_layer_has_tile: false,
            unavailable: false,
            generation: 0,
            pending: None,
        }
    }

    /// Creates a controller idling on `initial`.
    pub fn with_initial(initial: K, config: CrossfadeConfig) -> Self {
        let mut controller = Self::new(config);
        controller.current = Some(initial);
        controller
    }

    pub fn config(&self) -> &CrossfadeConfig {
        &self.config
    }

    pub fn phase(&self) -> CrossfadePhase {
        self.phase
    }

    pub fn current(&self) -> Option<K> {
        self.current
    }

    pub fn previous(&self) -> Option<K> {
        self.previous
    }

    /// The fade-completion timer the owner must schedule, if any.
    pub fn pending_timer(&self) -> Option<FadeTimer> {
        self.pending
    }

    /// Requests that `key` become the displayed layer.
    ///
    /// Returns `true` if the state changed. Any pending fade timer is
    /// invalidated.
    pub fn request(&mut self, key: K) -> bool {
        if self.current == Some(key) {
            return false;
        }

        let Some(current) = self.current else {
            // First layer: nothing to fade from.
            self.current = Some(key);
            self.reset_flags();
            return true;
        };

        self.generation += 1;
        self.pending = None;

        if self.phase == CrossfadePhase::Transitioning && self.previous == Some(key) {
            debug!(layer = ?key, "Crossfade: returned to visible layer, back to idle");
            self.current = Some(key);
            self.previous = None;
            self.phase = CrossfadePhase::Idle;
            self.reset_flags();
            return true;
        }

        // The layer that is actually on screen becomes the one to fade out.
        let visible = match self.phase {
            CrossfadePhase::Idle | CrossfadePhase::FadingIn => current,
            CrossfadePhase::Transitioning => self.previous.unwrap_or(current),
        };

        debug!(from = ?visible, to = ?key, generation = self.generation, "Crossfade: transitioning");
        self.previous = Some(visible);
        self.current = Some(key);
        self.phase = CrossfadePhase::Transitioning;
        self.reset_flags();
        true
    }

    /// Feeds an arrival signal. Signals for other layers are ignored.
    ///
    /// Returns the timer to schedule when the signal started the fade.
    pub fn on_arrival(&mut self, arrival: Arrival<K>, now: Instant) -> Option<FadeTimer> {
        if self.current != Some(arrival.key()) {
            trace!(layer = ?arrival.key(), "Crossfade: ignoring arrival for stale layer");
            return None;
        }

        match arrival {
            Arrival::Tile(_) => {
                self.new_layer_has_tile = true;
                None
            }
            Arrival::ViewportCovered(_) => {
                self.new_layer_has_tile = true;
                self.trigger_fade(now)
            }
            Arrival::Unavailable(_) => {
                self.unavailable = true;
                self.trigger_fade(now)
            }
        }
    }

    /// Starts the fade to the current layer.
    ///
    /// Only valid while `Transitioning`; repeated calls are no-ops.
    pub fn trigger_fade(&mut self, now: Instant) -> Option<FadeTimer> {
        if self.phase != CrossfadePhase::Transitioning {
            return None;
        }

        let timer = FadeTimer {
            generation: self.generation,
            deadline: now + self.config.completion_delay(),
        };
        debug!(layer = ?self.current, generation = timer.generation, "Crossfade: fading in");
        self.phase = CrossfadePhase::FadingIn;
        self.new_layer_ready = true;
        self.pending = Some(timer);
        Some(timer)
    }

    /// Completes the fade for `generation`.
    ///
    /// Returns `false` for timers of superseded transitions.
    pub fn complete(&mut self, generation: u64) -> bool {
        match self.pending {
            Some(timer)
                if timer.generation == generation && self.phase == CrossfadePhase::FadingIn =>
            {
                debug!(layer = ?self.current, "Crossfade: complete");
                self.pending = None;
                self.previous = None;
                self.phase = CrossfadePhase::Idle;
                true
            }
            _ => false,
        }
    }

    /// Completes the fade if its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(timer) if now >= timer.deadline => self.complete(timer.generation),
            _ => false,
        }
    }

    /// Snapshot for the renderer.
    pub fn state(&self) -> CrossfadeState<K> {
        let (current_opacity, previous_opacity) = match (self.phase, self.current) {
            (_, None) => (0.0, 0.0),
            (CrossfadePhase::Transitioning, _) => (0.0, 1.0),
            (CrossfadePhase::Idle | CrossfadePhase::FadingIn, _) => (1.0, 0.0),
        };
        let (current_transition, previous_transition) = match self.phase {
            CrossfadePhase::FadingIn => (self.config.fade_in, self.config.fade_out),
            _ => (Duration::ZERO, Duration::ZERO),
        };

        CrossfadeState {
            phase: self.phase,
            current: self.current,
            previous: self.previous,
            current_opacity,
            previous_opacity,
            current_transition,
            previous_transition,
            new_layer_ready: self.new_layer_ready,
            new_layer_has_tile: self.new_layer_has_tile,
            current_unavailable: self.unavailable,
        }
    }

    fn reset_flags(&mut self) {
        self.new_layer_ready = false;
        self.new_layer_has_tile = false;
        self.unavailable = false;
    }
}

//! Frame clock, observer motion and the per-frame scheduler.

use std::{fmt, sync::Arc, time::Duration};

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    assets::AssetLoader, audio::SoundEngine, scene::SceneGraph, AppConfig, ContentWorker,
    FrameReport, GlyphBuilder, PendingStore, Result, StreamWindowManager, VoicePool,
};

#[derive(Debug, Default, Clone)]
pub struct PlaybackClock {
    pub time_seconds: f64,
}

impl PlaybackClock {
    pub fn reset(&mut self) {
        self.time_seconds = 0.0;
    }

    pub fn advance(&mut self, delta: f32) {
        self.time_seconds = (self.time_seconds + f64::from(delta)).max(0.0);
    }
}

/// Listener pose sampled once per frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ObserverState {
    pub position: Vec3,
    pub velocity: Vec3,
}

impl ObserverState {
    /// Coordinate along the forward axis (`+Y`).
    pub fn forward(&self) -> f32 {
        self.position.y
    }
}

/// Camera / listener motion controller.
pub trait Observer {
    fn position(&self) -> Vec3;
    fn velocity(&self) -> Vec3;
    fn advance(&mut self, dt: f32);

    fn state(&self) -> ObserverState {
        ObserverState {
            position: self.position(),
            velocity: self.velocity(),
        }
    }
}

/// Observer flying at constant velocity.
#[derive(Debug, Clone)]
pub struct LinearObserver {
    position: Vec3,
    velocity: Vec3,
}

impl LinearObserver {
    pub fn new(position: Vec3, velocity: Vec3) -> Self {
        Self { position, velocity }
    }

    /// Starts at the origin, moving forward at `speed` units per second.
    pub fn forward(speed: f32) -> Self {
        Self::new(Vec3::ZERO, Vec3::Y * speed)
    }
}

impl Observer for LinearObserver {
    fn position(&self) -> Vec3 {
        self.position
    }

    fn velocity(&self) -> Vec3 {
        self.velocity
    }

    fn advance(&mut self, dt: f32) {
        self.position += self.velocity * dt;
    }
}

/// Outcome of [`FrameScheduler::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub frames: u64,
    pub worker_joined: bool,
    pub voices_released: usize,
}

/// Per-frame driver of the streaming pipeline.
pub struct FrameScheduler<S, E, O> {
    manager: StreamWindowManager<S, E>,
    observer: O,
    clock: PlaybackClock,
    worker: Option<ContentWorker>,
    frames: u64,
    prewarmed: bool,
}

impl<S: SceneGraph, E: SoundEngine, O: Observer> FrameScheduler<S, E, O> {
    pub fn new(manager: StreamWindowManager<S, E>, observer: O) -> Self {
        Self {
            manager,
            observer,
            clock: PlaybackClock::default(),
            worker: None,
            frames: 0,
            prewarmed: false,
        }
    }

    pub fn with_worker(mut self, worker: ContentWorker) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Validates `config`, preloads the voice pool, starts the drum loop when
    /// enabled, and starts the content worker with a [`GlyphBuilder`].
    pub fn launch(
        config: AppConfig,
        scene: S,
        engine: E,
        observer: O,
        assets: Arc<dyn AssetLoader>,
    ) -> Result<Self> {
        let config = config.validated()?;
        let pool = VoicePool::configure(engine, &config.audio.category_counts(), config.stream.seed)?;
        let pending = PendingStore::new();
        let builder = GlyphBuilder::new(assets, &config.stream, &config.audio);
        let worker = ContentWorker::spawn(
            Box::new(builder),
            pending.clone(),
            Duration::from_millis(config.worker.poll_interval_ms),
        )?;
        let mut manager = StreamWindowManager::new(&config, scene, pool, pending, worker.queue());
        if config.audio.drum.enabled {
            if let Err(err) = manager.start_drum() {
                warn!(error = %err, "drum loop unavailable");
            }
        }

        Ok(Self::new(manager, observer).with_worker(worker))
    }

    /// Advances one frame of `dt` seconds.
    ///
    /// The first tick pre-warms the whole ahead window. The observer moves
    /// after the stream has been reconciled against its current pose.
    pub fn tick(&mut self, dt: f32) -> FrameReport {
        self.clock.advance(dt);
        let observer = self.observer.state();
        if !self.prewarmed {
            self.manager.prewarm(&observer);
            self.prewarmed = true;
        }

        let report = self.manager.frame(self.clock.time_seconds, dt, &observer);
        self.observer.advance(dt);
        self.frames += 1;

        debug!(
            frame = self.frames,
            forward = observer.forward(),
            live = report.live,
            pending = report.pending,
            queued = report.queued,
            promoted = report.promoted,
            requested = report.requested,
            evicted = report.evicted,
            "frame"
        );
        report
    }

    /// Stops the worker within `timeout`, stops the drum, and force-releases
    /// every voice.
    /// Never blocks past the timeout, even if the worker hangs.
    pub fn shutdown(mut self, timeout: Duration) -> ShutdownReport {
        let worker_joined = self
            .worker
            .take()
            .map(|worker| worker.shutdown(timeout))
            .unwrap_or(true);
        let voices_released = self.manager.release_audio();

        info!(
            frames = self.frames,
            worker_joined, voices_released, "frame scheduler shut down"
        );
        ShutdownReport {
            frames: self.frames,
            worker_joined,
            voices_released,
        }
    }

    pub fn now(&self) -> f64 {
        self.clock.time_seconds
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn manager(&self) -> &StreamWindowManager<S, E> {
        &self.manager
    }

    pub fn worker(&self) -> Option<&ContentWorker> {
        self.worker.as_ref()
    }
}

impl<S, E, O> fmt::Debug for FrameScheduler<S, E, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("manager", &self.manager)
            .field("clock", &self.clock)
            .field("frames", &self.frames)
            .finish()
    }
}

//! Live window of content around the moving observer.
//!
//! Every grid key is in exactly one of three states between frames: live,
//! pending-or-in-flight (requested but not yet promoted), or neither. Each
//! frame moves keys between those states in bounded batches so that a slow
//! worker or a burst of content never stalls the frame loop.

use std::{
    collections::{HashMap, HashSet},
    f32::consts::TAU,
    fmt,
};

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{
    audio::{DrumLoop, SoundEngine, SpatialParams},
    config::{AppConfig, AudioConfig, StreamConfig},
    content::{is_occupied, layer_rotation, world_position},
    scene::SceneGraph,
    timeline::ObserverState,
    BuildRequest, ContentKey, ContentRecord, EmissionKey, EmissionRegistry, PendingStore,
    RequestQueue, Result, StreamError, VoicePool,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Live,
    PendingOrInFlight,
    Neither,
}

/// Work done by one call to [`StreamWindowManager::frame`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameReport {
    pub promoted: usize,
    pub evicted: usize,
    pub requested: usize,
    pub failed: usize,
    pub reclaimed: usize,
    pub emissions_started: usize,
    pub emissions_skipped: usize,
    pub live: usize,
    pub in_flight: usize,
    pub pending: usize,
    pub queued: usize,
}

pub struct StreamWindowManager<S, E> {
    stream: StreamConfig,
    audio: AudioConfig,
    scene: S,
    pool: VoicePool<E>,
    registry: EmissionRegistry,
    pending: PendingStore,
    queue: RequestQueue,
    live: HashMap<ContentKey, ContentRecord>,
    in_flight: HashSet<ContentKey>,
    rejected: HashSet<ContentKey>,
    rotation: f32,
    drum: Option<DrumLoop>,
}

impl<S: SceneGraph, E: SoundEngine> StreamWindowManager<S, E> {
    /// `config` is expected to have passed [`AppConfig::validated`].
    pub fn new(
        config: &AppConfig,
        scene: S,
        pool: VoicePool<E>,
        pending: PendingStore,
        queue: RequestQueue,
    ) -> Self {
        Self {
            stream: config.stream.clone(),
            audio: config.audio.clone(),
            scene,
            pool,
            registry: EmissionRegistry::new(),
            pending,
            queue,
            live: HashMap::new(),
            in_flight: HashSet::new(),
            rejected: HashSet::new(),
            rotation: 0.0,
            drum: None,
        }
    }

    /// Starts the listener drum loop. Calling it again keeps the running
    /// loop.
    pub fn start_drum(&mut self) -> Result<()> {
        if self.drum.is_none() {
            self.drum = Some(DrumLoop::start(self.pool.engine_mut(), &self.audio.drum)?);
        }
        Ok(())
    }

    /// Runs one frame: turn the slices, promote, evict, request, then audio
    /// reconciliation.
    pub fn frame(&mut self, now: f64, dt: f32, observer: &ObserverState) -> FrameReport {
        self.rotation = (self.rotation + self.stream.rotation_speed * dt).rem_euclid(TAU);
        self.rotate_live(dt);

        let mut report = FrameReport {
            failed: self.absorb_failures(),
            ..Default::default()
        };
        let (promoted, started, skipped) = self.promote(now, observer);
        report.promoted = promoted;
        report.emissions_started += started;
        report.emissions_skipped += skipped;
        report.evicted = self.evict(observer.forward());
        report.requested = self.request(observer.forward(), self.stream.max_requests_per_frame);
        report.reclaimed = self.registry.sweep_finished(&mut self.pool);

        let (started, skipped) = self.retrigger(now, observer);
        report.emissions_started += started;
        report.emissions_skipped += skipped;

        let engine = self.pool.engine_mut();
        engine.set_listener(observer.position, observer.velocity);
        if let Some(drum) = self.drum.as_mut() {
            drum.update(engine, &self.audio.drum, observer.velocity.length());
        }
        engine.update(dt);

        report.live = self.live.len();
        report.in_flight = self.in_flight.len();
        report.pending = self.pending.size().unwrap_or_default();
        report.queued = self.queue.depth();
        report
    }

    /// Requests the whole ahead window at once, ignoring the per-frame cap.
    pub fn prewarm(&mut self, observer: &ObserverState) -> usize {
        let requested = self.request(observer.forward(), usize::MAX);
        debug!(requested, "pre-warmed content window");
        requested
    }

    /// Stops the drum and force-releases every voice still bound.
    pub fn release_audio(&mut self) -> usize {
        if let Some(drum) = self.drum.take() {
            drum.stop(self.pool.engine_mut());
        }
        self.registry.release_all(&mut self.pool)
    }

    /// A key with a built record waiting counts as pending even after it
    /// stopped being tracked as in flight.
    pub fn key_state(&self, key: &ContentKey) -> KeyState {
        if self.live.contains_key(key) {
            KeyState::Live
        } else if self.in_flight.contains(key) || self.pending.contains(key).unwrap_or(false) {
            KeyState::PendingOrInFlight
        } else {
            KeyState::Neither
        }
    }

    pub fn live_keys(&self) -> impl Iterator<Item = &ContentKey> {
        self.live.keys()
    }

    pub fn live_record(&self, key: &ContentKey) -> Option<&ContentRecord> {
        self.live.get(key)
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn pool(&self) -> &VoicePool<E> {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut VoicePool<E> {
        &mut self.pool
    }

    pub fn registry(&self) -> &EmissionRegistry {
        &self.registry
    }

    pub fn pending(&self) -> &PendingStore {
        &self.pending
    }

    pub fn drum(&self) -> Option<&DrumLoop> {
        self.drum.as_ref()
    }

    /// Current global slice rotation in radians.
    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    fn layer_position(&self, forward: i32) -> f32 {
        forward as f32 * self.stream.layer_spacing
    }

    fn trailing_bound(&self, observer_forward: f32) -> f32 {
        observer_forward - self.stream.behind_window
    }

    fn slice_position(&self, key: ContentKey, forward_position: f32) -> Vec3 {
        world_position(key, forward_position, layer_rotation(key.forward) + self.rotation)
    }

    /// Moves every live unit to its slice's current rotation and keeps the
    /// bound voices on it, with the displacement as Doppler velocity.
    fn rotate_live(&mut self, dt: f32) {
        let rotation = self.rotation;
        for record in self.live.values_mut() {
            let key = record.key;
            let position = world_position(key, record.position.y, layer_rotation(key.forward) + rotation);
            record.velocity = if dt > 0.0 {
                (position - record.position) / dt
            } else {
                Vec3::ZERO
            };
            record.place(position);
            if let Some(handle) = record.visual() {
                self.scene.set_position(handle, position);
            }
            for emission in self.registry.bindings_for(key) {
                self.pool.move_voice(emission.voice, position, record.velocity);
            }
        }
    }

    /// True while the emitter holds a loop or a sound that is still playing.
    fn is_sounding(&self, key: ContentKey) -> bool {
        self.registry.bindings_for(key).iter().any(|emission| {
            self.registry
                .binding(emission)
                .map(|binding| binding.looping)
                .unwrap_or(false)
                || self.pool.is_playing(emission.voice)
        })
    }

    fn absorb_failures(&mut self) -> usize {
        let failures = match self.pending.take_failures() {
            Ok(failures) => failures,
            Err(err) => {
                warn!(error = %err, "could not read build failures");
                return 0;
            }
        };
        for key in &failures {
            if self.in_flight.remove(key) {
                self.rejected.insert(*key);
            }
        }
        failures.len()
    }

    fn promote(&mut self, now: f64, observer: &ObserverState) -> (usize, usize, usize) {
        let promotion_distance = self.stream.promotion_distance;
        let trailing = self.trailing_bound(observer.forward());
        let batch = self.pending.take_ready_batch(
            self.stream.max_promotions_per_frame,
            |_, record| {
                record.position.y >= trailing
                    && record.position.distance(observer.position) <= promotion_distance
            },
        );
        let batch = match batch {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, "skipping promotion");
                return (0, 0, 0);
            }
        };

        let (mut promoted, mut started, mut skipped) = (0, 0, 0);
        for mut record in batch {
            let key = record.key;
            self.in_flight.remove(&key);
            if self.live.contains_key(&key) {
                trace!(%key, "dropping duplicate build of live content");
                continue;
            }
            let position = self.slice_position(key, record.position.y);
            record.place(position);
            if let Err(err) = record.attach(&mut self.scene) {
                warn!(%key, error = %err, "could not attach content");
                continue;
            }
            self.live.insert(key, record);
            promoted += 1;

            match self.trigger(key, now, observer) {
                Ok(Some(_)) => started += 1,
                Ok(None) => {}
                Err(StreamError::ResourceExhausted { category }) => {
                    trace!(%key, %category, "no voice free, skipping emission");
                    skipped += 1;
                }
                Err(err) => debug!(%key, error = %err, "emission not started"),
            }
        }
        (promoted, started, skipped)
    }

    fn evict(&mut self, observer_forward: f32) -> usize {
        let trailing = self.trailing_bound(observer_forward);

        let mut stale: Vec<ContentKey> = self
            .live
            .iter()
            .filter(|(_, record)| record.position.y < trailing)
            .map(|(key, _)| *key)
            .collect();
        stale.sort_by_key(ContentKey::promotion_order);
        stale.truncate(self.stream.max_evictions_per_frame);

        for key in &stale {
            if let Some(mut record) = self.live.remove(key) {
                record.detach(&mut self.scene);
                let released = self.registry.unbind_all(*key, &mut self.pool);
                trace!(%key, released, "evicted content");
            }
        }

        // Requests that fell behind never need to be promoted.
        let spacing = self.stream.layer_spacing;
        let behind = |key: &ContentKey| (key.forward as f32 * spacing) < trailing;
        self.in_flight.retain(|key| !behind(key));
        self.rejected.retain(|key| !behind(key));
        if let Err(err) = self.pending.discard_where(behind) {
            warn!(error = %err, "could not discard stale pending content");
        }

        stale.len()
    }

    fn request(&mut self, observer_forward: f32, cap: usize) -> usize {
        let spacing = self.stream.layer_spacing;
        let first = (observer_forward / spacing).ceil() as i32;
        let last = ((observer_forward + self.stream.ahead_window) / spacing).floor() as i32;
        let radius = self.stream.grid_radius;
        let pending = match self.pending.keys() {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "skipping requests");
                return 0;
            }
        };

        let mut requested = 0;
        for forward in first..=last {
            let rotation = layer_rotation(forward) + self.rotation;
            for x in -radius..=radius {
                for z in -radius..=radius {
                    if requested >= cap {
                        return requested;
                    }
                    let key = ContentKey::new(x, z, forward);
                    if !is_occupied(self.stream.seed, self.stream.density, radius, key)
                        || self.live.contains_key(&key)
                        || self.in_flight.contains(&key)
                        || self.rejected.contains(&key)
                        || pending.contains(&key)
                    {
                        continue;
                    }

                    let request = BuildRequest {
                        key,
                        forward_position: self.layer_position(forward),
                        rotation,
                    };
                    if let Err(err) = self.queue.enqueue(request) {
                        warn!(error = %err, "could not queue content build");
                        return requested;
                    }
                    self.in_flight.insert(key);
                    requested += 1;
                }
            }
        }
        requested
    }

    fn retrigger(&mut self, now: f64, observer: &ObserverState) -> (usize, usize) {
        let radius = self.audio.audible_radius;
        let cooldown = self.audio.cooldown_seconds;
        let mut due: Vec<ContentKey> = self
            .live
            .values()
            .filter(|record| {
                record.cooldown_elapsed(now, cooldown)
                    && record.position.distance(observer.position) <= radius
            })
            .map(|record| record.key)
            .collect();
        due.sort_by_key(ContentKey::promotion_order);

        let (mut started, mut skipped) = (0, 0);
        for key in due {
            match self.trigger(key, now, observer) {
                Ok(Some(_)) => started += 1,
                Ok(None) => {}
                Err(StreamError::ResourceExhausted { .. }) => skipped += 1,
                Err(err) => debug!(%key, error = %err, "emission not started"),
            }
        }
        (started, skipped)
    }

    /// Distance-gated trigger policy. `Ok(None)` means the unit is out of
    /// range, still cooling down, or still sounding.
    fn trigger(
        &mut self,
        key: ContentKey,
        now: f64,
        observer: &ObserverState,
    ) -> Result<Option<EmissionKey>> {
        if self.is_sounding(key) {
            return Ok(None);
        }
        let record = self
            .live
            .get_mut(&key)
            .ok_or_else(|| StreamError::StaleReference(format!("emitter {key}")))?;

        let distance = record.position.distance(observer.position);
        if distance > self.audio.audible_radius
            || !record.cooldown_elapsed(now, self.audio.cooldown_seconds)
        {
            return Ok(None);
        }

        let category = record.voice.category.clone();
        let params = SpatialParams {
            looping: self.audio.looping,
            volume: record.voice.volume,
            play_rate: record.voice.play_rate,
            min_distance: self.audio.min_distance,
            max_distance: self.audio.audible_radius,
            drop_off: self.audio.drop_off,
            velocity: record.velocity,
        };
        let voice = self
            .pool
            .allocate(&category, key, record.position, &params)
            .ok_or_else(|| StreamError::ResourceExhausted {
                category: category.clone(),
            })?;

        let emission = match self
            .registry
            .bind(&self.pool, key, category, voice, self.audio.looping)
        {
            Ok(emission) => emission,
            Err(err) => {
                self.pool.release(voice);
                return Err(err);
            }
        };
        self.pool.play(voice);
        self.registry.mark_started(&emission);
        record.last_emission = Some(now);
        trace!(%key, distance, ?voice, "emission started");
        Ok(Some(emission))
    }
}

impl<S, E> fmt::Debug for StreamWindowManager<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamWindowManager")
            .field("live", &self.live.len())
            .field("in_flight", &self.in_flight.len())
            .field("rejected", &self.rejected.len())
            .field("emissions", &self.registry.len())
            .field("drum", &self.drum.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::Vec3;

    use super::*;
    use crate::{
        audio::SimulatedSoundEngine, request_queue, scene::HeadlessScene, Category,
        ContentBuilder, GlyphBuilder, MeshLibrary, RequestReceiver, SlotState, WorkerStats,
    };

    type Manager = StreamWindowManager<HeadlessScene, SimulatedSoundEngine>;

    struct Harness {
        manager: Manager,
        receiver: RequestReceiver,
        builder: Box<dyn ContentBuilder>,
        stats: WorkerStats,
        config: AppConfig,
    }

    impl Harness {
        fn new(config: AppConfig) -> Self {
            let builder = GlyphBuilder::new(
                Arc::new(MeshLibrary::with_glyphs()),
                &config.stream,
                &config.audio,
            );
            Self::with_builder(config, Box::new(builder))
        }

        fn with_builder(config: AppConfig, builder: Box<dyn ContentBuilder>) -> Self {
            let config = config.validated().unwrap();
            let pool = VoicePool::configure(
                SimulatedSoundEngine::new(),
                &config.audio.category_counts(),
                config.stream.seed,
            )
            .unwrap();
            let (queue, receiver) = request_queue();
            let manager =
                StreamWindowManager::new(&config, HeadlessScene::new(), pool, PendingStore::new(), queue);
            Self {
                manager,
                receiver,
                builder,
                stats: WorkerStats::default(),
                config,
            }
        }

        /// One frame followed by the worker draining its queue.
        fn step(&mut self, now: f64, observer: &ObserverState) -> FrameReport {
            self.step_by(now, 1.0 / 60.0, observer)
        }

        fn step_by(&mut self, now: f64, dt: f32, observer: &ObserverState) -> FrameReport {
            let report = self.manager.frame(now, dt, observer);
            self.drain();
            report
        }

        fn drain(&mut self) -> usize {
            self.receiver
                .process_queued(self.builder.as_ref(), self.manager.pending(), &self.stats)
        }

        fn expected_keys(&self, observer_forward: f32) -> HashSet<ContentKey> {
            let stream = &self.config.stream;
            let first = (observer_forward / stream.layer_spacing).ceil() as i32;
            let last = ((observer_forward + stream.ahead_window) / stream.layer_spacing).floor() as i32;
            let radius = stream.grid_radius;
            let mut keys = HashSet::new();
            for forward in first..=last {
                for x in -radius..=radius {
                    for z in -radius..=radius {
                        let key = ContentKey::new(x, z, forward);
                        if is_occupied(stream.seed, stream.density, radius, key) {
                            keys.insert(key);
                        }
                    }
                }
            }
            keys
        }
    }

    fn at(forward: f32) -> ObserverState {
        ObserverState {
            position: Vec3::new(0.0, forward, 0.0),
            velocity: Vec3::ZERO,
        }
    }

    fn single_lane(voices: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.stream.grid_radius = 0;
        config.stream.density = 1.0;
        config.audio.voices = [("circle".to_string(), voices)].into_iter().collect();
        config
    }

    fn assert_states_disjoint(manager: &Manager) {
        for key in manager.live_keys() {
            assert!(!manager.in_flight.contains(key), "{key} is live and in flight");
            assert!(!manager.pending().contains(key).unwrap(), "{key} is live and pending");
        }
        for emission in manager.registry().keys() {
            assert!(manager.live.contains_key(&emission.emitter));
            assert_eq!(
                manager.pool().slot(emission.voice).unwrap().state,
                SlotState::Bound(emission.clone())
            );
        }
    }

    #[test]
    fn converges_to_window_for_stationary_observer() {
        let mut harness = Harness::new(AppConfig::default());
        let observer = at(0.0);

        for frame in 0..60 {
            harness.step(frame as f64 / 60.0, &observer);
            assert_states_disjoint(&harness.manager);
        }

        let live: HashSet<ContentKey> = harness.manager.live_keys().copied().collect();
        assert_eq!(live, harness.expected_keys(0.0));
        assert_eq!(harness.manager.in_flight_len(), 0);
        assert_eq!(harness.manager.scene().node_count(), live.len());
    }

    #[test]
    fn requests_respect_per_frame_cap() {
        let mut config = AppConfig::default();
        config.stream.max_requests_per_frame = 7;
        let mut harness = Harness::new(config);

        let report = harness.manager.frame(0.0, 0.0, &at(0.0));
        assert_eq!(report.requested, 7);
        assert_eq!(harness.manager.in_flight_len(), 7);

        let report = harness.manager.frame(0.0, 0.0, &at(0.0));
        assert_eq!(report.requested, 7);
        assert_eq!(harness.manager.in_flight_len(), 14);
    }

    #[test]
    fn promotes_in_ascending_forward_order() {
        let mut config = single_lane(4);
        config.stream.max_promotions_per_frame = 2;
        config.stream.max_requests_per_frame = 0;
        let mut harness = Harness::new(config);

        for forward in [7, 3, 5] {
            let key = ContentKey::new(0, 0, forward);
            let record = harness
                .builder
                .build(&BuildRequest {
                    key,
                    forward_position: forward as f32 * 8.0,
                    rotation: 0.0,
                })
                .unwrap();
            harness.manager.pending().put(key, record).unwrap();
        }

        let report = harness.manager.frame(0.0, 0.0, &at(0.0));
        assert_eq!(report.promoted, 2);
        assert_eq!(harness.manager.key_state(&ContentKey::new(0, 0, 3)), KeyState::Live);
        assert_eq!(harness.manager.key_state(&ContentKey::new(0, 0, 5)), KeyState::Live);
        assert!(harness.manager.pending().contains(&ContentKey::new(0, 0, 7)).unwrap());
    }

    #[test]
    fn far_content_stays_pending() {
        let mut config = single_lane(4);
        config.stream.promotion_distance = 10.0;
        let mut harness = Harness::new(config);

        for frame in 0..5 {
            harness.step(frame as f64, &at(0.0));
        }

        let mut live: Vec<i32> = harness.manager.live_keys().map(|key| key.forward).collect();
        live.sort_unstable();
        assert_eq!(live, vec![0, 1]);
        assert_eq!(
            harness.manager.key_state(&ContentKey::new(0, 0, 4)),
            KeyState::PendingOrInFlight
        );
        assert!(harness.manager.pending().contains(&ContentKey::new(0, 0, 4)).unwrap());
    }

    #[test]
    fn eviction_releases_bound_voices() {
        let mut harness = Harness::new(single_lane(2));
        let circle = Category::new("circle");

        for frame in 0..4 {
            harness.step(frame as f64, &at(0.0));
        }
        assert_eq!(harness.manager.live_len(), 5);
        assert_eq!(harness.manager.pool().count_available(&circle), 0);
        assert_eq!(harness.manager.registry().len(), 2);

        let report = harness.step(10.0, &at(200.0));
        assert_eq!(report.evicted, 5);
        assert_eq!(harness.manager.live_len(), 0);
        assert_eq!(harness.manager.scene().node_count(), 0);
        assert!(harness.manager.registry().is_empty());
        assert_eq!(harness.manager.pool().count_available(&circle), 2);
        assert_eq!(harness.manager.pool().engine().playing_count(), 0);
    }

    #[test]
    fn eviction_respects_per_frame_cap() {
        let mut config = single_lane(1);
        config.stream.max_evictions_per_frame = 2;
        let mut harness = Harness::new(config);
        for frame in 0..4 {
            harness.step(frame as f64, &at(0.0));
        }

        assert_eq!(harness.step(10.0, &at(200.0)).evicted, 2);
        assert_eq!(harness.manager.live_len(), 3);
        assert_eq!(harness.step(10.1, &at(200.0)).evicted, 2);
        assert_eq!(harness.step(10.2, &at(200.0)).evicted, 1);
    }

    #[test]
    fn moving_observer_keeps_states_disjoint() {
        let mut config = AppConfig::default();
        config.stream.max_evictions_per_frame = 64;
        let mut harness = Harness::new(config);

        for frame in 0..240 {
            let forward = frame as f32 * 0.5;
            harness.step(frame as f64 / 60.0, &at(forward));
            assert_states_disjoint(&harness.manager);

            let trailing = forward - harness.config.stream.behind_window;
            for key in harness.manager.live_keys() {
                let y = harness.manager.live_record(key).unwrap().position.y;
                assert!(y >= trailing - harness.config.stream.layer_spacing);
            }
        }
        assert!(harness.manager.live_len() > 0);
    }

    struct FailingLayer {
        inner: GlyphBuilder,
        forward: i32,
    }

    impl ContentBuilder for FailingLayer {
        fn build(&self, request: &BuildRequest) -> Result<ContentRecord> {
            if request.key.forward == self.forward {
                return Err(StreamError::build(request.key, "corrupt mesh"));
            }
            self.inner.build(request)
        }
    }

    #[test]
    fn failed_builds_are_not_requested_again() {
        let config = single_lane(4);
        let inner = GlyphBuilder::new(
            Arc::new(MeshLibrary::with_glyphs()),
            &config.stream,
            &config.audio,
        );
        let mut harness =
            Harness::with_builder(config, Box::new(FailingLayer { inner, forward: 2 }));

        let mut failed = 0;
        let mut requested = 0;
        for frame in 0..6 {
            let report = harness.step(frame as f64, &at(0.0));
            failed += report.failed;
            requested += report.requested;
        }

        assert_eq!(failed, 1);
        assert_eq!(requested, 5);
        assert_eq!(harness.manager.live_len(), 4);
        assert_eq!(harness.manager.key_state(&ContentKey::new(0, 0, 2)), KeyState::Neither);
    }

    #[test]
    fn one_shots_retrigger_after_cooldown() {
        let mut config = single_lane(4);
        config.stream.ahead_window = 8.0;
        config.audio.looping = false;
        config.audio.cooldown_seconds = 1.0;
        let mut harness = Harness::new(config);
        let observer = at(0.0);

        let mut started = 0;
        let mut now = 0.0;
        while now < 3.5 {
            started += harness.step_by(now, 0.25, &observer).emissions_started;
            assert!(harness.manager.registry().len() <= 2);
            now += 0.25;
        }

        // Both units fire on promotion at 0.25; their two-second one-shots
        // are reclaimed at 2.25 and fire again once, well past the cooldown.
        assert_eq!(started, 4);
        let key = ContentKey::new(0, 0, 0);
        assert_eq!(harness.manager.live_record(&key).unwrap().last_emission, Some(2.25));
    }

    #[test]
    fn out_of_range_content_stays_silent() {
        let mut config = single_lane(4);
        config.audio.audible_radius = 4.0;
        let mut harness = Harness::new(config);

        for frame in 0..4 {
            harness.step(frame as f64, &at(0.0));
        }

        assert_eq!(harness.manager.live_len(), 5);
        assert_eq!(harness.manager.registry().len(), 1);
        let emission = harness.manager.registry().keys().next().unwrap();
        assert_eq!(emission.emitter, ContentKey::new(0, 0, 0));
    }

    #[test]
    fn release_audio_frees_every_voice() {
        let mut harness = Harness::new(single_lane(3));
        for frame in 0..3 {
            harness.step(frame as f64, &at(0.0));
        }
        assert_eq!(harness.manager.registry().len(), 3);

        assert_eq!(harness.manager.release_audio(), 3);
        assert_eq!(
            harness.manager.pool().count_available(&Category::new("circle")),
            3
        );
        assert_eq!(harness.manager.pool().engine().playing_count(), 0);
    }

    #[test]
    fn looping_units_hold_a_single_voice() {
        let mut config = single_lane(10);
        config.audio.cooldown_seconds = 1.0;
        let mut harness = Harness::new(config);
        let observer = at(0.0);

        let mut now = 0.0;
        while now < 6.0 {
            harness.step_by(now, 0.25, &observer);
            now += 0.25;
        }

        let registry = harness.manager.registry();
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.loop_count(), 5);
        for key in harness.manager.live_keys() {
            assert_eq!(registry.bindings_for(*key).len(), 1, "{key}");
        }
        assert_eq!(
            harness.manager.pool().count_available(&Category::new("circle")),
            5
        );
    }

    #[test]
    fn live_content_turns_with_its_slice() {
        let mut config = AppConfig::default();
        config.stream.grid_radius = 1;
        config.stream.density = 1.0;
        config.stream.rotation_speed = 1.0;
        config.audio.voices = [("circle".to_string(), 10)].into_iter().collect();
        let mut harness = Harness::new(config);
        let observer = at(0.0);
        let key = ContentKey::new(1, 0, 0);

        harness.step_by(0.0, 0.5, &observer);
        harness.step_by(0.5, 0.5, &observer);
        let before = harness.manager.live_record(&key).unwrap().position;
        harness.step_by(1.0, 0.5, &observer);

        let record = harness.manager.live_record(&key).unwrap();
        let position = record.position;
        assert!(position.distance(before) > 0.1);
        assert_eq!(position.y, before.y);
        assert!(((position.x * position.x + position.z * position.z).sqrt() - 1.0).abs() < 1e-4);
        // One radian per second on a unit circle.
        assert!((record.velocity.length() - 1.0).abs() < 0.05, "{}", record.velocity);

        let node = harness
            .manager
            .scene()
            .node(record.visual().unwrap())
            .unwrap();
        assert_eq!(node.position, position);

        let emission = harness.manager.registry().bindings_for(key)[0].clone();
        let handle = harness.manager.pool().slot(emission.voice).unwrap().handle;
        let engine = harness.manager.pool().engine();
        assert_eq!(engine.emitter_position(handle), Some(position));
        assert_eq!(engine.params(handle).unwrap().velocity, record.velocity);
    }

    #[test]
    fn stale_builds_stay_pending_until_discarded() {
        let mut harness = Harness::new(single_lane(4));
        let stale = ContentKey::new(0, 0, 0);

        harness.manager.frame(0.0, 0.0, &at(0.0));
        harness.manager.frame(0.1, 0.0, &at(200.0));
        assert_eq!(harness.drain(), 10);

        assert!(harness.manager.pending().contains(&stale).unwrap());
        assert_eq!(harness.manager.key_state(&stale), KeyState::PendingOrInFlight);

        harness.manager.frame(0.2, 0.0, &at(200.0));
        assert!(!harness.manager.pending().contains(&stale).unwrap());
        assert_eq!(harness.manager.key_state(&stale), KeyState::Neither);
        assert_eq!(harness.manager.live_len(), 5);
        assert_states_disjoint(&harness.manager);
    }

    #[test]
    fn keys_already_pending_are_not_requested() {
        let mut config = single_lane(4);
        config.stream.max_promotions_per_frame = 0;
        let mut harness = Harness::new(config);
        let key = ContentKey::new(0, 0, 0);
        let record = harness
            .builder
            .build(&BuildRequest {
                key,
                forward_position: 0.0,
                rotation: 0.0,
            })
            .unwrap();
        harness.manager.pending().put(key, record).unwrap();

        let report = harness.manager.frame(0.0, 0.0, &at(0.0));

        assert_eq!(report.requested, 4);
        assert_eq!(harness.manager.key_state(&key), KeyState::PendingOrInFlight);
    }

    #[test]
    fn drum_follows_observer_speed_until_released() {
        let mut harness = Harness::new(single_lane(2));
        harness.manager.start_drum().unwrap();
        harness.manager.start_drum().unwrap();
        let handle = harness.manager.drum().unwrap().handle();

        let flying = ObserverState {
            position: Vec3::ZERO,
            velocity: Vec3::new(0.0, 20.0, 0.0),
        };
        for frame in 0..60 {
            harness.step(frame as f64 / 60.0, &flying);
        }

        let max_rate = harness.config.audio.drum.max_rate;
        let rate = harness.manager.drum().unwrap().rate();
        assert!((rate - max_rate).abs() < 1e-3, "rate {rate}");
        assert!(harness.manager.pool().engine().is_playing(handle));

        harness.manager.release_audio();
        assert!(harness.manager.drum().is_none());
        assert!(!harness.manager.pool().engine().is_playing(handle));
    }
}

//! Sound engine seam, the listener-attached drum loop, and a simulated
//! engine for headless runs.

use std::collections::HashMap;

use glam::Vec3;
use tracing::info;

use crate::{config::DrumConfig, Category, ContentKey, Result};

/// Opaque handle to one preloaded sound instance inside a [`SoundEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundHandle(pub u64);

/// Spatial playback parameters applied when a voice is bound to an emitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialParams {
    pub looping: bool,
    pub volume: f32,
    pub play_rate: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub drop_off: f32,
    /// Emitter velocity used for Doppler shift.
    pub velocity: Vec3,
}

impl Default for SpatialParams {
    fn default() -> Self {
        Self {
            looping: false,
            volume: 1.0,
            play_rate: 1.0,
            min_distance: 0.1,
            max_distance: 50.0,
            drop_off: 2.0,
            velocity: Vec3::ZERO,
        }
    }
}

/// Low-level, handle-based sound engine consumed by the voice pool.
///
/// A sound that was never attached to an emitter plays at the listener.
pub trait SoundEngine {
    /// Preloads one instance of the sound backing `category`.
    fn load(&mut self, category: &Category) -> Result<SoundHandle>;
    fn configure_spatial(&mut self, handle: SoundHandle, params: &SpatialParams);
    /// Pins the sound to an emitter so it follows the emitter's position.
    fn attach(&mut self, handle: SoundHandle, emitter: ContentKey, position: Vec3);
    /// Moves an attached sound along with its emitter.
    fn move_emitter(&mut self, handle: SoundHandle, position: Vec3, velocity: Vec3);
    fn detach(&mut self, handle: SoundHandle);
    fn set_play_rate(&mut self, handle: SoundHandle, rate: f32);
    fn play(&mut self, handle: SoundHandle);
    fn stop(&mut self, handle: SoundHandle);
    fn is_playing(&self, handle: SoundHandle) -> bool;
    /// Updates the listener used for attenuation and Doppler.
    fn set_listener(&mut self, position: Vec3, velocity: Vec3);
    fn update(&mut self, dt: f32);
}

#[derive(Debug, Clone)]
struct SimulatedSound {
    category: Category,
    params: SpatialParams,
    emitter: Option<(ContentKey, Vec3)>,
    playing: bool,
    remaining: f32,
    plays: u32,
}

/// In-memory sound engine used by the headless runner and the tests.
///
/// Non-looping sounds stop on their own once `sound_duration` seconds of
/// simulated time have passed through [`SoundEngine::update`].
#[derive(Debug)]
pub struct SimulatedSoundEngine {
    sounds: HashMap<SoundHandle, SimulatedSound>,
    next_handle: u64,
    sound_duration: f32,
    listener: (Vec3, Vec3),
}

impl SimulatedSoundEngine {
    pub fn new() -> Self {
        Self::with_sound_duration(2.0)
    }

    pub fn with_sound_duration(sound_duration: f32) -> Self {
        Self {
            sounds: HashMap::new(),
            next_handle: 1,
            sound_duration,
            listener: (Vec3::ZERO, Vec3::ZERO),
        }
    }

    /// Ends playback immediately, as if the sample had run out.
    pub fn finish(&mut self, handle: SoundHandle) {
        if let Some(sound) = self.sounds.get_mut(&handle) {
            sound.playing = false;
        }
    }

    pub fn loaded(&self) -> usize {
        self.sounds.len()
    }

    pub fn playing_count(&self) -> usize {
        self.sounds.values().filter(|sound| sound.playing).count()
    }

    pub fn play_count(&self, handle: SoundHandle) -> u32 {
        self.sounds.get(&handle).map(|sound| sound.plays).unwrap_or(0)
    }

    pub fn params(&self, handle: SoundHandle) -> Option<SpatialParams> {
        self.sounds.get(&handle).map(|sound| sound.params)
    }

    pub fn emitter(&self, handle: SoundHandle) -> Option<ContentKey> {
        self.sounds
            .get(&handle)
            .and_then(|sound| sound.emitter.map(|(key, _)| key))
    }

    pub fn emitter_position(&self, handle: SoundHandle) -> Option<Vec3> {
        self.sounds
            .get(&handle)
            .and_then(|sound| sound.emitter.map(|(_, position)| position))
    }

    pub fn category(&self, handle: SoundHandle) -> Option<&Category> {
        self.sounds.get(&handle).map(|sound| &sound.category)
    }

    pub fn listener(&self) -> (Vec3, Vec3) {
        self.listener
    }
}

impl Default for SimulatedSoundEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundEngine for SimulatedSoundEngine {
    fn load(&mut self, category: &Category) -> Result<SoundHandle> {
        let handle = SoundHandle(self.next_handle);
        self.next_handle += 1;
        self.sounds.insert(
            handle,
            SimulatedSound {
                category: category.clone(),
                params: SpatialParams::default(),
                emitter: None,
                playing: false,
                remaining: 0.0,
                plays: 0,
            },
        );
        Ok(handle)
    }

    fn configure_spatial(&mut self, handle: SoundHandle, params: &SpatialParams) {
        if let Some(sound) = self.sounds.get_mut(&handle) {
            sound.params = *params;
        }
    }

    fn attach(&mut self, handle: SoundHandle, emitter: ContentKey, position: Vec3) {
        if let Some(sound) = self.sounds.get_mut(&handle) {
            sound.emitter = Some((emitter, position));
        }
    }

    fn move_emitter(&mut self, handle: SoundHandle, position: Vec3, velocity: Vec3) {
        if let Some(sound) = self.sounds.get_mut(&handle) {
            if let Some((_, current)) = sound.emitter.as_mut() {
                *current = position;
            }
            sound.params.velocity = velocity;
        }
    }

    fn detach(&mut self, handle: SoundHandle) {
        if let Some(sound) = self.sounds.get_mut(&handle) {
            sound.emitter = None;
        }
    }

    fn set_play_rate(&mut self, handle: SoundHandle, rate: f32) {
        if let Some(sound) = self.sounds.get_mut(&handle) {
            sound.params.play_rate = rate;
        }
    }

    fn play(&mut self, handle: SoundHandle) {
        let duration = self.sound_duration;
        if let Some(sound) = self.sounds.get_mut(&handle) {
            sound.playing = true;
            sound.remaining = duration;
            sound.plays += 1;
        }
    }

    fn stop(&mut self, handle: SoundHandle) {
        if let Some(sound) = self.sounds.get_mut(&handle) {
            sound.playing = false;
        }
    }

    fn is_playing(&self, handle: SoundHandle) -> bool {
        self.sounds
            .get(&handle)
            .map(|sound| sound.playing)
            .unwrap_or(false)
    }

    fn set_listener(&mut self, position: Vec3, velocity: Vec3) {
        self.listener = (position, velocity);
    }

    fn update(&mut self, dt: f32) {
        for sound in self.sounds.values_mut() {
            if sound.playing && !sound.params.looping {
                sound.remaining -= dt;
                if sound.remaining <= 0.0 {
                    sound.playing = false;
                }
            }
        }
    }
}

/// Play rate the drum eases towards for a listener moving at `speed`.
///
/// Speeds inside `[min_speed, max_speed]` map linearly onto
/// `[min_rate, max_rate]`; the result moves `smoothing` of the way from
/// `current` to that target.
pub fn drum_rate(config: &DrumConfig, speed: f32, current: f32) -> f32 {
    let span = (config.max_speed - config.min_speed).max(f32::EPSILON);
    let normalized = ((speed - config.min_speed) / span).clamp(0.0, 1.0);
    let target = config.min_rate + (config.max_rate - config.min_rate) * normalized;
    current + (target - current) * config.smoothing
}

/// Looping drum that plays at the listener and speeds up with it.
#[derive(Debug)]
pub struct DrumLoop {
    handle: SoundHandle,
    rate: f32,
}

impl DrumLoop {
    pub fn start<E: SoundEngine>(engine: &mut E, config: &DrumConfig) -> Result<Self> {
        let handle = engine.load(&Category::new(&config.category))?;
        engine.configure_spatial(
            handle,
            &SpatialParams {
                looping: true,
                volume: config.volume,
                ..Default::default()
            },
        );
        engine.play(handle);
        info!(category = %config.category, "drum loop started");
        Ok(Self { handle, rate: 1.0 })
    }

    pub fn update<E: SoundEngine>(&mut self, engine: &mut E, config: &DrumConfig, speed: f32) -> f32 {
        self.rate = drum_rate(config, speed, self.rate);
        engine.set_play_rate(self.handle, self.rate);
        self.rate
    }

    pub fn stop<E: SoundEngine>(self, engine: &mut E) {
        engine.stop(self.handle);
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn handle(&self) -> SoundHandle {
        self.handle
    }
}

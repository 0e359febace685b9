//! Content units of the tunnel and the pure build step that produces them.
//!
//! The forward axis is world `+Y`. A [`ContentKey`] addresses one lateral
//! cell `(x, z)` on one forward layer; the layer's world coordinate is
//! `forward * layer_spacing`. Every random choice made here is derived from
//! the stream seed and the key, so rebuilding a key always yields the same
//! unit.

use std::{f32::consts::FRAC_PI_2, f32::consts::TAU, fmt, sync::Arc};

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use crate::{
    assets::AssetLoader,
    config::{AudioConfig, StreamConfig},
    scene::{Renderable, SceneGraph, VisualHandle},
    Category, Result, StreamError,
};

const GLYPHS: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";
const GLYPH_SCALE: f32 = 0.08;
const RED: [f32; 3] = [1.0, 0.2, 0.1];
const BLUE: [f32; 3] = [0.1, 0.3, 1.0];

const SALT_INCLUSION: u64 = 1;
const SALT_BUILD: u64 = 2;

/// Grid address of one content unit: two lateral coordinates and a forward
/// layer index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey {
    pub x: i32,
    pub z: i32,
    pub forward: i32,
}

impl ContentKey {
    pub const fn new(x: i32, z: i32, forward: i32) -> Self {
        Self { x, z, forward }
    }

    /// Ordering used for promotion: forward layer first, then lateral.
    pub fn promotion_order(&self) -> (i32, i32, i32) {
        (self.forward, self.x, self.z)
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.z, self.forward)
    }
}

/// One queued build job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildRequest {
    pub key: ContentKey,
    /// World coordinate of the key's layer along the forward axis.
    pub forward_position: f32,
    /// Rotation of the layer around the forward axis, in radians.
    pub rotation: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Palette {
    Red,
    Blue,
}

impl Palette {
    fn rgb(self) -> [f32; 3] {
        match self {
            Palette::Red => RED,
            Palette::Blue => BLUE,
        }
    }
}

/// Per-unit animation values. Opaque to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationParams {
    pub brightness: f32,
    pub flicker_speed: f32,
    pub flicker_phase: f32,
    pub hue_shift: f32,
    pub pulse_speed: f32,
    pub pulse_phase: f32,
}

/// How a content unit sounds once a voice is bound to it.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceTraits {
    pub category: Category,
    pub play_rate: f32,
    pub volume: f32,
}

/// A built content unit, owned by whichever stage currently holds it.
///
/// The visual handle is present exactly while the record is live.
#[derive(Debug, Clone)]
pub struct ContentRecord {
    pub key: ContentKey,
    pub glyph: char,
    pub palette: Palette,
    pub position: Vec3,
    pub velocity: Vec3,
    pub animation: AnimationParams,
    pub voice: VoiceTraits,
    pub last_emission: Option<f64>,
    renderable: Option<Renderable>,
    visual: Option<VisualHandle>,
}

impl ContentRecord {
    pub fn visual(&self) -> Option<VisualHandle> {
        self.visual
    }

    pub fn is_live(&self) -> bool {
        self.visual.is_some()
    }

    pub fn renderable(&self) -> Option<&Renderable> {
        self.renderable.as_ref()
    }

    /// True once more than `cooldown` seconds have passed since the last
    /// emission, or if the unit never emitted.
    pub fn cooldown_elapsed(&self, now: f64, cooldown: f64) -> bool {
        self.last_emission
            .map(|last| now - last > cooldown)
            .unwrap_or(true)
    }

    /// Moves the unit before it is attached; live units are moved through
    /// the scene graph as well.
    pub(crate) fn place(&mut self, position: Vec3) {
        self.position = position;
        if let Some(renderable) = self.renderable.as_mut() {
            renderable.position = position;
        }
    }

    pub(crate) fn attach<S: SceneGraph>(&mut self, scene: &mut S) -> Result<VisualHandle> {
        let renderable = self
            .renderable
            .take()
            .ok_or_else(|| StreamError::StaleReference(format!("renderable of {}", self.key)))?;
        let handle = scene.attach(renderable);
        self.visual = Some(handle);
        Ok(handle)
    }

    pub(crate) fn detach<S: SceneGraph>(&mut self, scene: &mut S) {
        if let Some(handle) = self.visual.take() {
            scene.detach(handle);
        }
    }
}

/// Builds render-ready records off the main loop.
pub trait ContentBuilder: Send {
    fn build(&self, request: &BuildRequest) -> Result<ContentRecord>;
}

/// Default builder: one glyph mesh per content unit.
pub struct GlyphBuilder {
    assets: Arc<dyn AssetLoader>,
    categories: Vec<Category>,
    scale: Vec<f32>,
    base_frequency: f32,
    volume_range: [f32; 2],
    seed: u64,
}

impl GlyphBuilder {
    pub fn new(assets: Arc<dyn AssetLoader>, stream: &StreamConfig, audio: &AudioConfig) -> Self {
        Self {
            assets,
            categories: audio.categories(),
            scale: audio.scale.clone(),
            base_frequency: audio.base_frequency,
            volume_range: audio.volume_range,
            seed: stream.seed,
        }
    }
}

impl fmt::Debug for GlyphBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlyphBuilder")
            .field("categories", &self.categories)
            .field("seed", &self.seed)
            .finish()
    }
}

impl ContentBuilder for GlyphBuilder {
    fn build(&self, request: &BuildRequest) -> Result<ContentRecord> {
        let key = request.key;
        if !request.rotation.is_finite() || !request.forward_position.is_finite() {
            return Err(StreamError::build(key, "non-finite layer placement"));
        }
        if self.categories.is_empty() || self.scale.is_empty() {
            return Err(StreamError::build(key, "no sound categories or scale"));
        }

        let position = world_position(key, request.forward_position, request.rotation);
        let mut rng = keyed_rng(self.seed, key, SALT_BUILD);

        let glyph_index = rng.random_range(0..GLYPHS.len());
        let glyph = GLYPHS[glyph_index] as char;
        let palette = if rng.random_bool(0.5) {
            Palette::Red
        } else {
            Palette::Blue
        };
        let animation = AnimationParams {
            brightness: rng.random_range(0.8..=1.5),
            flicker_speed: rng.random_range(3.0..=8.0),
            flicker_phase: rng.random_range(0.0..TAU),
            hue_shift: rng.random_range(-0.2..=0.2),
            pulse_speed: rng.random_range(1.0..=4.0),
            pulse_phase: rng.random_range(0.0..TAU),
        };
        let [low, high] = self.volume_range;
        let voice = VoiceTraits {
            category: self.categories[glyph_index % self.categories.len()].clone(),
            play_rate: self.scale[glyph_index % self.scale.len()] / self.base_frequency,
            volume: rng.random_range(low..=high),
        };

        let mut renderable = self.assets.load(&glyph.to_string());
        let [r, g, b] = palette.rgb();
        let brightness = animation.brightness;
        renderable.position = position;
        renderable.scale = GLYPH_SCALE;
        renderable.color = [r * brightness, g * brightness, b * brightness, 1.0];

        Ok(ContentRecord {
            key,
            glyph,
            palette,
            position,
            velocity: Vec3::ZERO,
            animation,
            voice,
            last_emission: None,
            renderable: Some(renderable),
            visual: None,
        })
    }
}

/// Rotates the key's lateral cell around the forward axis.
pub fn world_position(key: ContentKey, forward_position: f32, rotation: f32) -> Vec3 {
    let (sin, cos) = rotation.sin_cos();
    let (x, z) = (key.x as f32, key.z as f32);
    Vec3::new(x * cos - z * sin, forward_position, x * sin + z * cos)
}

/// Base rotation of a layer; consecutive layers turn by a quarter.
pub fn layer_rotation(forward: i32) -> f32 {
    forward.rem_euclid(4) as f32 * FRAC_PI_2
}

/// Decides whether a grid position holds content at all.
///
/// Positions outside the circular footprint never do; inside it, a roll
/// seeded by the key keeps the outcome stable across frames.
pub fn is_occupied(seed: u64, density: f32, radius: i32, key: ContentKey) -> bool {
    let (x, z) = (key.x as f32, key.z as f32);
    if (x * x + z * z).sqrt() > radius as f32 {
        return false;
    }
    keyed_rng(seed, key, SALT_INCLUSION).random::<f32>() < density
}

fn keyed_rng(seed: u64, key: ContentKey, salt: u64) -> Pcg32 {
    let mut state = seed ^ salt.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    for value in [key.x, key.z, key.forward] {
        state = (state ^ u64::from(value as u32)).wrapping_mul(0x0000_0100_0000_01b3);
        state = state.rotate_left(29);
    }
    Pcg32::seed_from_u64(state)
}

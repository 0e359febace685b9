//! JSON configuration of the stream, the audio layer and the worker.

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::{Category, Result, StreamError};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub audio: AudioConfig,
    pub worker: WorkerConfig,
}

impl AppConfig {
    /// Parses a JSON document. Missing fields fall back to their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Runs the start-up checks and clamps the window parameters.
    ///
    /// Windows narrower than one layer make the stream request and evict the
    /// same layer on alternate frames, so both are raised to `layer_spacing`.
    pub fn validated(mut self) -> Result<Self> {
        let stream = &mut self.stream;
        if !(stream.layer_spacing > 0.0) {
            return Err(StreamError::config("layer_spacing must be positive"));
        }
        if stream.grid_radius < 0 {
            return Err(StreamError::config("grid_radius must not be negative"));
        }
        if !(0.0..=1.0).contains(&stream.density) {
            return Err(StreamError::config("density must lie within [0, 1]"));
        }
        if !(stream.promotion_distance > 0.0) {
            return Err(StreamError::config("promotion_distance must be positive"));
        }
        if stream.ahead_window < stream.layer_spacing {
            tracing::warn!(
                ahead_window = stream.ahead_window,
                layer_spacing = stream.layer_spacing,
                "ahead window narrower than one layer, clamping"
            );
            stream.ahead_window = stream.layer_spacing;
        }
        if stream.behind_window < stream.layer_spacing {
            tracing::warn!(
                behind_window = stream.behind_window,
                layer_spacing = stream.layer_spacing,
                "behind window narrower than one layer, clamping"
            );
            stream.behind_window = stream.layer_spacing;
        }

        let audio = &self.audio;
        if audio.voices.is_empty() {
            return Err(StreamError::config("at least one voice category is required"));
        }
        if let Some((name, _)) = audio.voices.iter().find(|(_, count)| **count == 0) {
            return Err(StreamError::config(format!(
                "voice category `{name}` has zero instances"
            )));
        }
        if !(audio.audible_radius > 0.0) {
            return Err(StreamError::config("audible_radius must be positive"));
        }
        if audio.cooldown_seconds < 0.0 {
            return Err(StreamError::config("cooldown_seconds must not be negative"));
        }
        if audio.scale.is_empty() || !(audio.base_frequency > 0.0) {
            return Err(StreamError::config(
                "a non-empty scale and a positive base_frequency are required",
            ));
        }
        let [low, high] = audio.volume_range;
        if !(0.0..=high).contains(&low) {
            return Err(StreamError::config("volume_range must be ordered and non-negative"));
        }
        let drum = &audio.drum;
        if drum.enabled {
            if !(drum.max_speed > drum.min_speed) || !(drum.min_rate > 0.0) || drum.max_rate < drum.min_rate {
                return Err(StreamError::config("drum speed and rate ranges must be ordered and positive"));
            }
            if !(drum.smoothing > 0.0 && drum.smoothing <= 1.0) {
                return Err(StreamError::config("drum smoothing must lie within (0, 1]"));
            }
        }

        Ok(self)
    }
}

/// Window geometry and per-frame work caps of the content stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub ahead_window: f32,
    pub behind_window: f32,
    pub grid_radius: i32,
    pub layer_spacing: f32,
    /// Probability that a lateral position inside the radius holds content.
    pub density: f32,
    /// Built content further than this from the observer stays pending.
    pub promotion_distance: f32,
    pub max_requests_per_frame: usize,
    pub max_promotions_per_frame: usize,
    pub max_evictions_per_frame: usize,
    /// Global slice rotation speed in radians per second.
    pub rotation_speed: f32,
    pub seed: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ahead_window: 32.0,
            behind_window: 8.0,
            grid_radius: 6,
            layer_spacing: 8.0,
            density: 0.4,
            promotion_distance: 75.0,
            max_requests_per_frame: 25,
            max_promotions_per_frame: 25,
            max_evictions_per_frame: 8,
            rotation_speed: 0.125,
            seed: 0x5eed_cafe,
        }
    }
}

/// Configuration specific to the spatial audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Preloaded instance count per category.
    pub voices: BTreeMap<String, usize>,
    pub audible_radius: f32,
    pub cooldown_seconds: f64,
    pub looping: bool,
    pub min_distance: f32,
    pub drop_off: f32,
    pub volume_range: [f32; 2],
    pub base_frequency: f32,
    /// Note frequencies in Hz, indexed by glyph.
    pub scale: Vec<f32>,
    pub drum: DrumConfig,
}

impl AudioConfig {
    pub fn categories(&self) -> Vec<Category> {
        self.voices.keys().map(Category::new).collect()
    }

    pub fn category_counts(&self) -> BTreeMap<Category, usize> {
        self.voices
            .iter()
            .map(|(name, count)| (Category::new(name), *count))
            .collect()
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        let voices = ["circle", "square", "triangle", "noise", "click"]
            .into_iter()
            .map(|name| (name.to_string(), 10))
            .collect();

        Self {
            voices,
            audible_radius: 50.0,
            cooldown_seconds: 16.0,
            looping: true,
            min_distance: 0.1,
            drop_off: 2.0,
            volume_range: [0.3, 0.8],
            base_frequency: 220.0,
            // C major pentatonic from C3 to A5.
            scale: vec![
                130.81, 146.83, 164.81, 196.00, 220.00, 261.63, 293.66, 329.63, 392.00, 440.00,
                523.25, 587.33, 659.25, 783.99, 880.00,
            ],
            drum: DrumConfig::default(),
        }
    }
}

/// Looping drum played at the listener, its rate driven by listener speed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrumConfig {
    pub enabled: bool,
    pub category: String,
    pub volume: f32,
    pub min_speed: f32,
    pub max_speed: f32,
    pub min_rate: f32,
    pub max_rate: f32,
    /// Fraction of the gap to the target rate closed each frame.
    pub smoothing: f32,
}

impl Default for DrumConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            category: "drum".to_string(),
            volume: 0.1,
            min_speed: 0.2,
            max_speed: 10.0,
            min_rate: 0.5,
            max_rate: 3.5,
            smoothing: 0.2,
        }
    }
}

/// Background worker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            shutdown_timeout_ms: 6_000,
        }
    }
}

//! Glyph meshes keyed by symbol, with a fallback for unknown keys.

use std::collections::HashMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::scene::Renderable;

/// Mesh key returned when a symbolic key has no registered mesh.
pub const FALLBACK_MESH: &str = "fallback-cube";

/// Resolves symbolic keys to renderables. Shared with the content worker,
/// so implementations must be thread-safe.
pub trait AssetLoader: Send + Sync {
    /// Never fails: unknown keys resolve to a deterministic fallback shape.
    fn load(&self, key: &str) -> Renderable;
}

/// Descriptor for a glyph mesh that can be loaded at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshAsset {
    pub key: String,
    pub path: String,
    #[serde(default = "default_scale")]
    pub scale: f32,
}

fn default_scale() -> f32 {
    1.0
}

/// Registry of the meshes content units can reference.
#[derive(Debug, Default)]
pub struct MeshLibrary {
    meshes: HashMap<String, MeshAsset>,
}

impl MeshLibrary {
    pub fn new() -> Self {
        Self {
            meshes: HashMap::new(),
        }
    }

    /// Library with one mesh per lowercase glyph, laid out as `glyphs/<c>.bam`.
    pub fn with_glyphs() -> Self {
        let mut library = Self::new();
        for glyph in 'a'..='z' {
            library.register(MeshAsset {
                key: glyph.to_string(),
                path: format!("glyphs/{glyph}.bam"),
                scale: 1.0,
            });
        }
        library
    }

    pub fn register(&mut self, asset: MeshAsset) {
        self.meshes.insert(asset.key.clone(), asset);
    }

    pub fn mesh(&self, key: &str) -> Option<&MeshAsset> {
        self.meshes.get(key)
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

impl AssetLoader for MeshLibrary {
    fn load(&self, key: &str) -> Renderable {
        match self.meshes.get(key) {
            Some(asset) => Renderable {
                mesh: asset.path.clone(),
                fallback: false,
                position: Vec3::ZERO,
                scale: asset.scale,
                color: [1.0; 4],
            },
            None => {
                tracing::trace!(key, "no mesh registered, using fallback");
                Renderable {
                    mesh: FALLBACK_MESH.to_string(),
                    fallback: true,
                    position: Vec3::ZERO,
                    scale: 1.0,
                    color: [1.0; 4],
                }
            }
        }
    }
}

//! Scene-graph seam for live content and an in-memory implementation.

use std::collections::HashMap;

use glam::Vec3;

/// Render-ready payload produced off the main loop and handed to the scene
/// graph on promotion.
#[derive(Debug, Clone, PartialEq)]
pub struct Renderable {
    pub mesh: String,
    /// Set when the loader had no mesh for the requested key.
    pub fallback: bool,
    pub position: Vec3,
    pub scale: f32,
    pub color: [f32; 4],
}

/// Opaque handle of a node attached to the live scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VisualHandle(pub u64);

/// Renderer / scene-graph sink.
pub trait SceneGraph {
    fn attach(&mut self, renderable: Renderable) -> VisualHandle;
    fn detach(&mut self, handle: VisualHandle);
    fn set_position(&mut self, handle: VisualHandle, position: Vec3);
}

/// Scene graph that keeps attached nodes in memory and draws nothing. Used
/// by the headless runner and the tests.
#[derive(Debug, Default)]
pub struct HeadlessScene {
    nodes: HashMap<VisualHandle, Renderable>,
    next_handle: u64,
    attached_total: u64,
}

impl HeadlessScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of attach calls over the scene's lifetime.
    pub fn attached_total(&self) -> u64 {
        self.attached_total
    }

    pub fn node(&self, handle: VisualHandle) -> Option<&Renderable> {
        self.nodes.get(&handle)
    }
}

impl SceneGraph for HeadlessScene {
    fn attach(&mut self, renderable: Renderable) -> VisualHandle {
        self.next_handle += 1;
        self.attached_total += 1;
        let handle = VisualHandle(self.next_handle);
        self.nodes.insert(handle, renderable);
        handle
    }

    fn detach(&mut self, handle: VisualHandle) {
        if self.nodes.remove(&handle).is_none() {
            tracing::trace!(?handle, "detach of unknown node");
        }
    }

    fn set_position(&mut self, handle: VisualHandle, position: Vec3) {
        if let Some(node) = self.nodes.get_mut(&handle) {
            node.position = position;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderable() -> Renderable {
        Renderable {
            mesh: "a".to_string(),
            fallback: false,
            position: Vec3::ZERO,
            scale: 1.0,
            color: [1.0; 4],
        }
    }

    #[test]
    fn attach_move_detach() {
        let mut scene = HeadlessScene::new();
        let handle = scene.attach(renderable());
        scene.set_position(handle, Vec3::new(1.0, 2.0, 3.0));

        assert_eq!(scene.node(handle).unwrap().position, Vec3::new(1.0, 2.0, 3.0));

        scene.detach(handle);
        scene.detach(handle);
        assert_eq!(scene.node_count(), 0);
        assert_eq!(scene.attached_total(), 1);
    }
}

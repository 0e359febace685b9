//! Core library for the Starfield Stream tunnel.
//!
//! The crate owns the two pieces of the experience that coordinate work
//! across threads and scarce resources: the streaming content pipeline that
//! keeps a window of procedurally built content alive around a moving
//! observer, and the spatial voice pool that sonifies it. The renderer, the
//! mesh loader, the camera and the sound engine are collaborators reached
//! through the traits in [`scene`], [`assets`], [`timeline`] and [`audio`].
//!
//! Data flows from the [`FrameScheduler`] into the [`StreamWindowManager`],
//! through the request queue to the [`ContentWorker`], back through the
//! [`PendingStore`], and on promotion into the [`VoicePool`] and
//! [`EmissionRegistry`].

pub mod assets;
pub mod audio;
pub mod config;
pub mod content;
pub mod emission;
pub mod error;
pub mod pending;
pub mod scene;
pub mod stream;
pub mod timeline;
pub mod voice;
pub mod worker;

pub use assets::{AssetLoader, MeshAsset, MeshLibrary};
pub use audio::{DrumLoop, SimulatedSoundEngine, SoundEngine, SoundHandle, SpatialParams};
pub use config::{AppConfig, AudioConfig, DrumConfig, StreamConfig, WorkerConfig};
pub use content::{BuildRequest, ContentBuilder, ContentKey, ContentRecord, GlyphBuilder};
pub use emission::{EmissionBinding, EmissionKey, EmissionRegistry};
pub use error::{Result, StreamError};
pub use pending::PendingStore;
pub use scene::{HeadlessScene, Renderable, SceneGraph, VisualHandle};
pub use stream::{FrameReport, KeyState, StreamWindowManager};
pub use timeline::{
    FrameScheduler, LinearObserver, Observer, ObserverState, PlaybackClock, ShutdownReport,
};
pub use voice::{Category, SlotState, VoiceId, VoicePool, VoiceSlot};
pub use worker::{request_queue, ContentWorker, RequestQueue, RequestReceiver, WorkerStats};

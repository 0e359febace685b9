//! Fixed inventory of preloaded sound instances, partitioned by category.

use std::{collections::BTreeMap, fmt};

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use crate::{
    audio::{SoundEngine, SoundHandle, SpatialParams},
    ContentKey, EmissionKey, Result, StreamError,
};

/// Symbolic sound category, e.g. `circle` or `noise`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Category(String);

impl Category {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one preloaded voice; stable for the life of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Available,
    Bound(EmissionKey),
}

#[derive(Debug, Clone)]
pub struct VoiceSlot {
    pub id: VoiceId,
    pub category: Category,
    pub handle: SoundHandle,
    pub state: SlotState,
}

/// Preloaded voices and their Available/Bound bookkeeping.
///
/// Slots are created once in [`VoicePool::configure`]; afterwards only
/// [`VoicePool::allocate`] and [`VoicePool::release`] move a slot between
/// states. The pool owns the sound engine so that engine side effects only
/// happen at those two boundaries (plus playback control driven by the
/// emission registry).
pub struct VoicePool<E> {
    engine: E,
    slots: Vec<VoiceSlot>,
    available: BTreeMap<Category, Vec<VoiceId>>,
    rng: Pcg32,
}

impl<E: SoundEngine> VoicePool<E> {
    /// Preloads `count` instances for every category.
    pub fn configure(mut engine: E, categories: &BTreeMap<Category, usize>, seed: u64) -> Result<Self> {
        if categories.is_empty() {
            return Err(StreamError::config("voice pool needs at least one category"));
        }

        let mut slots = Vec::new();
        let mut available = BTreeMap::new();
        for (category, count) in categories {
            if *count == 0 {
                return Err(StreamError::config(format!(
                    "voice category `{category}` has zero instances"
                )));
            }
            let mut ids = Vec::with_capacity(*count);
            for _ in 0..*count {
                let id = VoiceId(slots.len() as u32);
                let handle = engine.load(category)?;
                slots.push(VoiceSlot {
                    id,
                    category: category.clone(),
                    handle,
                    state: SlotState::Available,
                });
                ids.push(id);
            }
            available.insert(category.clone(), ids);
        }

        tracing::info!(
            categories = categories.len(),
            voices = slots.len(),
            "voice pool configured"
        );

        Ok(Self {
            engine,
            slots,
            available,
            rng: Pcg32::seed_from_u64(seed),
        })
    }

    /// Binds a random available voice of `category` to `emitter`.
    ///
    /// Returns `None` when every voice of the category is in use; callers
    /// skip the emission. Never blocks.
    pub fn allocate(
        &mut self,
        category: &Category,
        emitter: ContentKey,
        position: Vec3,
        params: &SpatialParams,
    ) -> Option<VoiceId> {
        let ids = self.available.get_mut(category)?;
        if ids.is_empty() {
            tracing::trace!(%category, "no available voice for layering");
            return None;
        }
        let index = self.rng.random_range(0..ids.len());
        let id = ids.swap_remove(index);

        let slot = &mut self.slots[id.0 as usize];
        slot.state = SlotState::Bound(EmissionKey::new(emitter, category.clone(), id));
        self.engine.configure_spatial(slot.handle, params);
        self.engine.attach(slot.handle, emitter, position);
        Some(id)
    }

    /// Returns a voice to its category. Releasing an available or unknown
    /// voice does nothing and returns `false`.
    pub fn release(&mut self, id: VoiceId) -> bool {
        let Some(slot) = self.slots.get_mut(id.0 as usize) else {
            return false;
        };
        if slot.state == SlotState::Available {
            return false;
        }

        if self.engine.is_playing(slot.handle) {
            self.engine.stop(slot.handle);
        }
        self.engine.detach(slot.handle);
        slot.state = SlotState::Available;
        self.available
            .entry(slot.category.clone())
            .or_default()
            .push(id);
        true
    }

    pub fn count_available(&self, category: &Category) -> usize {
        self.available.get(category).map(Vec::len).unwrap_or(0)
    }

    pub fn available_counts(&self) -> BTreeMap<Category, usize> {
        self.available
            .iter()
            .map(|(category, ids)| (category.clone(), ids.len()))
            .collect()
    }

    /// Configured instance count for `category`.
    pub fn capacity(&self, category: &Category) -> usize {
        self.slots
            .iter()
            .filter(|slot| &slot.category == category)
            .count()
    }

    pub fn slot(&self, id: VoiceId) -> Option<&VoiceSlot> {
        self.slots.get(id.0 as usize)
    }

    pub fn slots(&self) -> &[VoiceSlot] {
        &self.slots
    }

    pub fn bound_key(&self, id: VoiceId) -> Option<&EmissionKey> {
        match &self.slot(id)?.state {
            SlotState::Bound(key) => Some(key),
            SlotState::Available => None,
        }
    }

    /// Keeps a bound voice on its moving emitter. Available voices are left
    /// alone.
    pub(crate) fn move_voice(&mut self, id: VoiceId, position: Vec3, velocity: Vec3) {
        if let Some(slot) = self.slots.get(id.0 as usize) {
            if matches!(slot.state, SlotState::Bound(_)) {
                self.engine.move_emitter(slot.handle, position, velocity);
            }
        }
    }

    pub(crate) fn play(&mut self, id: VoiceId) {
        if let Some(slot) = self.slots.get(id.0 as usize) {
            self.engine.play(slot.handle);
        }
    }

    pub(crate) fn is_playing(&self, id: VoiceId) -> bool {
        self.slot(id)
            .map(|slot| self.engine.is_playing(slot.handle))
            .unwrap_or(false)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }
}

impl<E> fmt::Debug for VoicePool<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoicePool")
            .field("slots", &self.slots.len())
            .field(
                "available",
                &self.available.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SimulatedSoundEngine;

    fn categories(entries: &[(&str, usize)]) -> BTreeMap<Category, usize> {
        entries
            .iter()
            .map(|(name, count)| (Category::new(name), *count))
            .collect()
    }

    fn pool(entries: &[(&str, usize)]) -> VoicePool<SimulatedSoundEngine> {
        VoicePool::configure(SimulatedSoundEngine::new(), &categories(entries), 11).unwrap()
    }

    fn bound_count(pool: &VoicePool<SimulatedSoundEngine>, category: &Category) -> usize {
        pool.slots()
            .iter()
            .filter(|slot| &slot.category == category && slot.state != SlotState::Available)
            .count()
    }

    #[test]
    fn rejects_zero_instance_category() {
        let err = VoicePool::configure(
            SimulatedSoundEngine::new(),
            &categories(&[("circle", 2), ("noise", 0)]),
            1,
        )
        .unwrap_err();
        assert!(matches!(err, StreamError::Config(_)));
    }

    #[test]
    fn allocation_is_bounded_and_non_blocking() {
        let mut pool = pool(&[("click", 2)]);
        let click = Category::new("click");
        let params = SpatialParams::default();

        let a = pool.allocate(&click, ContentKey::new(0, 0, 1), Vec3::ZERO, &params);
        let b = pool.allocate(&click, ContentKey::new(1, 0, 1), Vec3::ZERO, &params);
        let c = pool.allocate(&click, ContentKey::new(2, 0, 1), Vec3::ZERO, &params);

        assert!(a.is_some() && b.is_some());
        assert_ne!(a, b);
        assert!(c.is_none());
        assert_eq!(pool.count_available(&click), 0);
        assert!(pool
            .allocate(&Category::new("unknown"), ContentKey::new(0, 0, 0), Vec3::ZERO, &params)
            .is_none());
    }

    #[test]
    fn slot_total_is_constant_across_allocate_and_release() {
        let mut pool = pool(&[("circle", 4), ("square", 3)]);
        let circle = Category::new("circle");
        let params = SpatialParams::default();
        let mut held = Vec::new();

        for step in 0..20 {
            if step % 3 == 2 {
                if let Some(id) = held.pop() {
                    pool.release(id);
                }
            } else if let Some(id) =
                pool.allocate(&circle, ContentKey::new(step, 0, 0), Vec3::ZERO, &params)
            {
                held.push(id);
            }
            assert_eq!(
                pool.count_available(&circle) + bound_count(&pool, &circle),
                pool.capacity(&circle)
            );
        }
        assert_eq!(pool.capacity(&circle), 4);
        assert_eq!(pool.count_available(&Category::new("square")), 3);
    }

    #[test]
    fn release_is_idempotent_and_stops_playback() {
        let mut pool = pool(&[("noise", 1)]);
        let noise = Category::new("noise");
        let emitter = ContentKey::new(3, 3, 3);
        let id = pool
            .allocate(&noise, emitter, Vec3::ONE, &SpatialParams::default())
            .unwrap();
        let handle = pool.slot(id).unwrap().handle;

        assert_eq!(pool.engine().emitter(handle), Some(emitter));
        pool.play(id);
        assert!(pool.is_playing(id));

        assert!(pool.release(id));
        assert!(!pool.engine().is_playing(handle));
        assert_eq!(pool.engine().emitter(handle), None);
        assert!(!pool.release(id));
        assert!(!pool.release(VoiceId(99)));
        assert_eq!(pool.count_available(&noise), 1);
    }

    #[test]
    fn only_bound_voices_follow_their_emitter() {
        let mut pool = pool(&[("circle", 1)]);
        let circle = Category::new("circle");
        let id = pool
            .allocate(&circle, ContentKey::new(1, 0, 0), Vec3::ZERO, &SpatialParams::default())
            .unwrap();
        let handle = pool.slot(id).unwrap().handle;

        pool.move_voice(id, Vec3::Y, Vec3::X);
        assert_eq!(pool.engine().emitter_position(handle), Some(Vec3::Y));
        assert_eq!(pool.engine().params(handle).unwrap().velocity, Vec3::X);

        pool.release(id);
        pool.move_voice(id, Vec3::Z, Vec3::Z);
        assert_eq!(pool.engine().params(handle).unwrap().velocity, Vec3::X);
    }
}

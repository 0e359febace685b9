//! Bookkeeping for live voice bindings.
//!
//! The registry and the [`VoicePool`] are updated by the same call whenever a
//! binding is created or destroyed, so every key here refers to a slot that
//! the pool reports as bound to that key. Operations on unknown keys or
//! emitters are no-ops: by the time audio bookkeeping runs, the emitting
//! content unit may already be gone.

use std::collections::{HashMap, HashSet};

use crate::{
    audio::{SoundEngine, SoundHandle},
    voice::{Category, VoiceId, VoicePool},
    ContentKey, Result, StreamError,
};

/// Identity of one live binding: emitter, category, and voice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmissionKey {
    pub emitter: ContentKey,
    pub category: Category,
    pub voice: VoiceId,
}

impl EmissionKey {
    pub fn new(emitter: ContentKey, category: Category, voice: VoiceId) -> Self {
        Self {
            emitter,
            category,
            voice,
        }
    }
}

/// State of one binding. The emitter is referenced only by key, so a
/// binding never keeps its content unit alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmissionBinding {
    pub looping: bool,
    pub started: bool,
    pub handle: SoundHandle,
}

#[derive(Debug, Default)]
pub struct EmissionRegistry {
    bindings: HashMap<EmissionKey, EmissionBinding>,
    by_emitter: HashMap<ContentKey, Vec<EmissionKey>>,
    loops: HashSet<EmissionKey>,
}

impl EmissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a binding for a voice the pool has just allocated to
    /// `emitter`. Fails with [`StreamError::StaleReference`] if the pool does
    /// not hold the voice bound to exactly this key.
    pub fn bind<E: SoundEngine>(
        &mut self,
        pool: &VoicePool<E>,
        emitter: ContentKey,
        category: Category,
        voice: VoiceId,
        looping: bool,
    ) -> Result<EmissionKey> {
        let key = EmissionKey::new(emitter, category, voice);
        if pool.bound_key(voice) != Some(&key) || self.bindings.contains_key(&key) {
            return Err(StreamError::StaleReference(format!(
                "voice {voice:?} for emitter {emitter}"
            )));
        }
        let handle = pool
            .slot(voice)
            .map(|slot| slot.handle)
            .ok_or_else(|| StreamError::StaleReference(format!("voice {voice:?}")))?;

        self.bindings.insert(
            key.clone(),
            EmissionBinding {
                looping,
                started: false,
                handle,
            },
        );
        self.by_emitter.entry(emitter).or_default().push(key.clone());
        if looping {
            self.loops.insert(key.clone());
        }
        Ok(key)
    }

    /// Flags the binding as playing. Returns `false` for unknown keys.
    pub fn mark_started(&mut self, key: &EmissionKey) -> bool {
        match self.bindings.get_mut(key) {
            Some(binding) => {
                binding.started = true;
                true
            }
            None => false,
        }
    }

    /// Removes the binding and hands its voice back to the pool.
    pub fn unbind<E: SoundEngine>(&mut self, key: &EmissionKey, pool: &mut VoicePool<E>) -> bool {
        if self.bindings.remove(key).is_none() {
            return false;
        }
        self.loops.remove(key);
        if let Some(keys) = self.by_emitter.get_mut(&key.emitter) {
            keys.retain(|candidate| candidate != key);
            if keys.is_empty() {
                self.by_emitter.remove(&key.emitter);
            }
        }
        pool.release(key.voice);
        true
    }

    /// Tears down every binding owned by `emitter`; returns how many.
    pub fn unbind_all<E: SoundEngine>(&mut self, emitter: ContentKey, pool: &mut VoicePool<E>) -> usize {
        let Some(keys) = self.by_emitter.remove(&emitter) else {
            return 0;
        };
        for key in &keys {
            self.bindings.remove(key);
            self.loops.remove(key);
            pool.release(key.voice);
        }
        keys.len()
    }

    /// Reclaims started, non-looping bindings whose sound has stopped.
    pub fn sweep_finished<E: SoundEngine>(&mut self, pool: &mut VoicePool<E>) -> usize {
        let finished: Vec<EmissionKey> = self
            .bindings
            .iter()
            .filter(|(key, binding)| {
                binding.started && !binding.looping && !pool.is_playing(key.voice)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &finished {
            self.unbind(key, pool);
        }
        finished.len()
    }

    /// Force-stops and releases every binding, looping or not.
    pub fn release_all<E: SoundEngine>(&mut self, pool: &mut VoicePool<E>) -> usize {
        let keys: Vec<EmissionKey> = self.bindings.keys().cloned().collect();
        for key in &keys {
            self.unbind(key, pool);
        }
        keys.len()
    }

    pub fn binding(&self, key: &EmissionKey) -> Result<&EmissionBinding> {
        self.bindings
            .get(key)
            .ok_or_else(|| StreamError::StaleReference(format!("emission {key:?}")))
    }

    pub fn bindings_for(&self, emitter: ContentKey) -> &[EmissionKey] {
        self.by_emitter
            .get(&emitter)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &EmissionKey> {
        self.bindings.keys()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn loop_count(&self) -> usize {
        self.loops.len()
    }
}

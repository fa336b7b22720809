//! Bind groups keyed by the generations of the resources they borrow.
//!
//! A bind group is rebuilt whenever any resource it references has been
//! replaced, for example after a buffer grew or the targets were resized.

use std::collections::HashMap;
use std::hash::Hash;

/// Identifies one cached bind group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindGroupId {
    Scene,
    Voxel,
    GBufferOut,
    ShadowOut,
    LightingIo,
    DebugOut,
    OverlayIn,
    ParticlesIn,
    /// Reduction into the given Hi-Z level.
    HiZ(u32),
    Blit,
    Resolve,
    Gizmo,
}

struct Entry<T> {
    key: Vec<u64>,
    value: T,
}

/// Values rebuilt whenever their generation key changes.
pub struct GenerationCache<K, T> {
    entries: HashMap<K, Entry<T>>,
    rebuilds: u64,
}

impl<K: Eq + Hash, T> Default for GenerationCache<K, T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            rebuilds: 0,
        }
    }
}

impl<K: Eq + Hash, T> GenerationCache<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `id` was built from exactly `key`. Returns true if `build` ran.
    pub fn ensure(&mut self, id: K, key: &[u64], build: impl FnOnce() -> T) -> bool {
        if self.entries.get(&id).is_some_and(|e| e.key == key) {
            return false;
        }
        self.entries.insert(
            id,
            Entry {
                key: key.to_vec(),
                value: build(),
            },
        );
        self.rebuilds += 1;
        true
    }

    pub fn get(&self, id: &K) -> Option<&T> {
        self.entries.get(id).map(|e| &e.value)
    }

    pub fn is_current(&self, id: &K, key: &[u64]) -> bool {
        self.entries.get(id).is_some_and(|e| e.key == key)
    }

    /// Drop entries that no longer apply, e.g. Hi-Z levels after a resize.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.entries.retain(|k, _| keep(k));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of builds so far.
    pub const fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}

pub type BindGroupCache = GenerationCache<BindGroupId, wgpu::BindGroup>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebuilds_only_on_generation_change() {
        let mut cache: GenerationCache<BindGroupId, String> = GenerationCache::new();
        assert!(cache.ensure(BindGroupId::Voxel, &[1, 2, 3], || "a".into()));
        assert!(!cache.ensure(BindGroupId::Voxel, &[1, 2, 3], || "b".into()));
        assert_eq!(cache.get(&BindGroupId::Voxel).map(String::as_str), Some("a"));

        // The bricks buffer grew.
        assert!(!cache.is_current(&BindGroupId::Voxel, &[1, 7, 3]));
        assert!(cache.ensure(BindGroupId::Voxel, &[1, 7, 3], || "c".into()));
        assert_eq!(cache.get(&BindGroupId::Voxel).map(String::as_str), Some("c"));
        assert_eq!(cache.rebuilds(), 2);
    }

    #[test]
    fn entries_are_independent() {
        let mut cache: GenerationCache<BindGroupId, u32> = GenerationCache::new();
        cache.ensure(BindGroupId::HiZ(0), &[5], || 0);
        cache.ensure(BindGroupId::HiZ(1), &[5], || 1);
        cache.ensure(BindGroupId::Scene, &[9], || 2);
        assert_eq!(cache.len(), 3);

        cache.retain(|id| !matches!(id, BindGroupId::HiZ(level) if *level >= 1));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&BindGroupId::HiZ(1)).is_none());
        assert!(cache.is_current(&BindGroupId::Scene, &[9]));
    }
}

//! Path cache: a fixed-capacity `(dev, ino) -> path` memo with LRU eviction
//! and lstat-validated hits.
//!
//! §3.2 / §4.6: entries may be stale (the cache never guarantees the
//! filesystem hasn't moved the object since); validity is only verified at
//! lookup time against a fresh `lstat`.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

/// Reference path-cache capacity.
pub const CACHE_ENTRIES: usize = 4096;

#[derive(Clone)]
struct Slot {
    dev: u32,
    ino: u32,
    path: PathBuf,
    /// Monotonic LRU stamp. 0 means the slot is empty.
    use_stamp: u64,
}

impl Slot {
    const EMPTY: Slot = Slot { dev: 0, ino: 0, path: PathBuf::new(), use_stamp: 0 };
}

/// Fixed-size LRU path cache.
pub struct PathCache {
    slots: Vec<Slot>,
    next_stamp: u64,
    /// Observability counters (§4.7): total lookups attempted and hits.
    uses: u64,
    hits: u64,
}

impl PathCache {
    pub fn new(capacity: usize) -> Self {
        Self { slots: vec![Slot::EMPTY; capacity.max(1)], next_stamp: 1, uses: 0, hits: 0 }
    }

    fn bump_stamp(&mut self) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        stamp
    }

    /// §4.6 `lookup`: scan for a matching `(dev, ino)`, validate with a
    /// fresh `lstat`, and on success bump its LRU stamp and return the
    /// stored path plus the stat observed during validation.
    pub fn lookup(&mut self, dev: u32, ino: u32) -> Option<(PathBuf, std::fs::Metadata)> {
        self.uses += 1;

        let index = self.slots.iter().position(|s| s.use_stamp != 0 && s.dev == dev && s.ino == ino)?;

        let path = self.slots[index].path.clone();
        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.dev() as u32 == dev && meta.ino() as u32 == ino => {
                let stamp = self.bump_stamp();
                self.slots[index].use_stamp = stamp;
                self.hits += 1;
                trace!(dev, ino, ?path, "path cache hit");
                Some((path, meta))
            }
            _ => {
                debug!(dev, ino, ?path, "path cache entry stale, invalidating");
                self.slots[index] = Slot::EMPTY;
                None
            }
        }
    }

    /// §4.6 `add`: overwrite an existing entry for `(dev, ino)`, otherwise
    /// claim an empty slot, otherwise evict the slot with the smallest
    /// `use_stamp` among occupied slots (§9 open question: a plain min-scan,
    /// not the reference's `best = -1` off-by-one).
    pub fn add(&mut self, dev: u32, ino: u32, path: &Path) {
        let stamp = self.bump_stamp();

        if let Some(index) = self.slots.iter().position(|s| s.use_stamp != 0 && s.dev == dev && s.ino == ino) {
            self.slots[index] = Slot { dev, ino, path: path.to_path_buf(), use_stamp: stamp };
            return;
        }

        if let Some(index) = self.slots.iter().position(|s| s.use_stamp == 0) {
            self.slots[index] = Slot { dev, ino, path: path.to_path_buf(), use_stamp: stamp };
            return;
        }

        let evict = self
            .slots
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.use_stamp)
            .map(|(index, _)| index)
            .expect("capacity is at least 1");

        debug!(evicted_dev = self.slots[evict].dev, evicted_ino = self.slots[evict].ino, "path cache evicting");
        self.slots[evict] = Slot { dev, ino, path: path.to_path_buf(), use_stamp: stamp };
    }

    /// §4.6 `invalidate`: zero a slot, including its `use_stamp`.
    #[allow(dead_code)]
    pub fn invalidate(&mut self, dev: u32, ino: u32) {
        if let Some(index) = self.slots.iter().position(|s| s.use_stamp != 0 && s.dev == dev && s.ino == ino) {
            self.slots[index] = Slot::EMPTY;
        }
    }

    pub fn uses(&self) -> u64 {
        self.uses
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_lookup_without_filesystem_misses_on_stale_path() {
        // A path that doesn't exist always fails the lstat-validation step.
        let mut cache = PathCache::new(4);
        cache.add(1, 10, Path::new("/nonexistent/for/cache/test"));
        assert!(cache.lookup(1, 10).is_none());
    }

    #[test]
    fn lru_evicts_minimum_use_among_occupied_slots() {
        let mut cache = PathCache::new(4);
        // Fill the cache with real, distinct tempfiles so lookups can
        // validate if ever exercised; we only inspect eviction order here.
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<_> = (0..4)
            .map(|i| {
                let p = dir.path().join(format!("f{i}"));
                std::fs::write(&p, b"x").unwrap();
                p
            })
            .collect();

        for (i, path) in paths.iter().enumerate() {
            cache.add(1, 100 + i as u32, path);
        }
        // Stamps are now 1,2,3,4 for ino 100..103 respectively.
        assert_eq!(cache.slots.iter().filter(|s| s.use_stamp != 0).count(), 4);

        let fifth = dir.path().join("f4");
        std::fs::write(&fifth, b"x").unwrap();
        cache.add(1, 104, &fifth);

        // The slot with use_stamp==1 (dev=1,ino=100) must have been evicted.
        assert!(!cache.slots.iter().any(|s| s.use_stamp != 0 && s.ino == 100));
        assert!(cache.slots.iter().any(|s| s.use_stamp != 0 && s.ino == 104));
    }

    #[test]
    fn add_overwrites_existing_entry_for_same_key() {
        let mut cache = PathCache::new(4);
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"x").unwrap();
        std::fs::write(&b, b"x").unwrap();

        cache.add(1, 1, &a);
        cache.add(1, 1, &b);

        assert_eq!(cache.slots.iter().filter(|s| s.use_stamp != 0).count(), 1);
    }

    #[test]
    fn counters_track_uses_and_hits() {
        let mut cache = PathCache::new(4);
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f");
        std::fs::write(&p, b"x").unwrap();
        let meta = std::fs::symlink_metadata(&p).unwrap();
        use std::os::unix::fs::MetadataExt as _;
        cache.add(meta.dev() as u32, meta.ino() as u32, &p);

        cache.lookup(meta.dev() as u32, meta.ino() as u32);
        cache.lookup(meta.dev() as u32, meta.ino() as u32);

        assert_eq!(cache.uses(), 2);
        assert_eq!(cache.hits(), 2);
    }
}

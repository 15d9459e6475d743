use std::{fmt, sync::Arc};

use indexmap::{map::Entry, IndexMap};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::frame::Frame;
use crate::errors::FrameError;

/// Name under which a frame lives in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameKey(String);

impl FrameKey {
    /// Wraps a key name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// `<prefix>_<uuid>`, unique per call.
    #[must_use]
    pub fn unique(prefix: &str) -> Self {
        Self(format!("{prefix}_{}", Uuid::new_v4().simple()))
    }

    /// Key name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared key/value store for frames.
#[derive(Default)]
pub struct FrameStore {
    frames: RwLock<IndexMap<FrameKey, Arc<Frame>>>,
}

impl fmt::Debug for FrameStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameStore")
            .field("keys", &self.keys())
            .finish()
    }
}

impl FrameStore {
    /// Inserts or replaces a frame, returning the previous one.
    pub fn put(&self, key: FrameKey, frame: Frame) -> Option<Arc<Frame>> {
        self.frames.write().insert(key, Arc::new(frame))
    }

    /// Inserts a frame only if `key` is free.
    pub fn insert_new(&self, key: FrameKey, frame: Frame) -> Result<(), FrameError> {
        match self.frames.write().entry(key) {
            Entry::Occupied(entry) => Err(FrameError::KeyInUse(entry.key().to_string())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(frame));
                Ok(())
            }
        }
    }

    /// Fetches a frame.
    #[must_use]
    pub fn get(&self, key: &FrameKey) -> Option<Arc<Frame>> {
        self.frames.read().get(key).cloned()
    }

    /// Removes a frame.
    pub fn remove(&self, key: &FrameKey) -> Option<Arc<Frame>> {
        self.frames.write().shift_remove(key)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &FrameKey) -> bool {
        self.frames.read().contains_key(key)
    }

    /// Stored frame count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.read().len()
    }

    /// Whether the store holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.read().is_empty()
    }

    /// Keys in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<FrameKey> {
        self.frames.read().keys().cloned().collect()
    }

    /// Opens a scope; frames put through it are removed when it drops.
    #[must_use]
    pub const fn scope(&self) -> Scope<'_> {
        Scope {
            store: self,
            tracked: Vec::new(),
        }
    }
}

/// Tracks keys created during one operation and removes them on drop,
/// including when the operation bails out early with an error.
#[derive(Debug)]
pub struct Scope<'a> {
    store: &'a FrameStore,
    tracked: Vec<FrameKey>,
}

impl Scope<'_> {
    /// Stores `frame` under a free `key` and tracks the key. An occupied key
    /// is left alone and never tracked, so its owner keeps the frame.
    pub fn put(&mut self, key: FrameKey, frame: Frame) -> Result<FrameKey, FrameError> {
        self.store.insert_new(key.clone(), frame)?;
        self.tracked.push(key.clone());
        Ok(key)
    }

    /// Keys that will be removed on drop.
    #[must_use]
    pub fn tracked(&self) -> &[FrameKey] {
        &self.tracked
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        for key in self.tracked.drain(..) {
            self.store.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Dataset, LabeledPoint};

    fn frame() -> Frame {
        Frame::from_dataset(&Dataset::new(vec![LabeledPoint::new(vec![1.0], 0.0)])).unwrap()
    }

    #[test]
    fn put_get_remove() {
        let store = FrameStore::default();
        let key = FrameKey::new("train");
        assert!(store.put(key.clone(), frame()).is_none());
        assert!(store.contains(&key));
        assert_eq!(store.get(&key).unwrap().num_rows(), 1);
        assert!(store.put(key.clone(), frame()).is_some());
        assert_eq!(store.len(), 1);
        assert!(store.remove(&key).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn scope_releases_tracked_keys() {
        let store = FrameStore::default();
        let outside = FrameKey::new("outside");
        store.put(outside.clone(), frame());
        {
            let mut scope = store.scope();
            let a = scope.put(FrameKey::unique("a"), frame()).unwrap();
            let b = scope.put(FrameKey::unique("b"), frame()).unwrap();
            assert_eq!(scope.tracked(), &[a, b]);
            assert_eq!(store.len(), 3);
        }
        assert_eq!(store.len(), 1);
        assert!(store.contains(&outside));
    }

    #[test]
    fn scope_releases_on_early_return() {
        fn fails(store: &FrameStore) -> Result<(), &'static str> {
            let mut scope = store.scope();
            scope.put(FrameKey::new("tmp"), frame()).map_err(|_| "taken")?;
            Err("boom")
        }
        let store = FrameStore::default();
        assert!(fails(&store).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn occupied_key_is_rejected_and_left_in_place() {
        let store = FrameStore::default();
        let key = FrameKey::new("dl_1_train");
        let mut owner = store.scope();
        owner.put(key.clone(), frame()).unwrap();
        {
            let mut rival = store.scope();
            assert_eq!(
                rival.put(key.clone(), frame()),
                Err(FrameError::KeyInUse("dl_1_train".into()))
            );
            assert!(rival.tracked().is_empty());
        }
        assert!(store.contains(&key));
        drop(owner);
        assert!(store.is_empty());
        assert!(store.insert_new(key.clone(), frame()).is_ok());
        assert!(store.insert_new(key, frame()).is_err());
    }

    #[test]
    fn unique_keys_differ() {
        assert_ne!(FrameKey::unique("dl"), FrameKey::unique("dl"));
        assert!(FrameKey::unique("dl").as_str().starts_with("dl_"));
    }
}

//! A minimal vector feature store with change notifications.
//!
//! Both sides of the sync use it: the ground store is owned by the caller, the shadow store by
//! [`crate::GeometrySync`]. Every mutation bumps a store-wide revision that is carried on the
//! emitted event, which lets a listener recognise the echo of its own writes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use foundation::Extent;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::geometry::Geometry;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureId(pub u64);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: FeatureId,
    pub geometry: Geometry,
    /// Store revision of the last write to this feature.
    pub revision: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Added { id: FeatureId, revision: u64 },
    Changed { id: FeatureId, revision: u64 },
    Removed { id: FeatureId, revision: u64 },
}

impl StoreEvent {
    pub fn id(&self) -> FeatureId {
        match self {
            StoreEvent::Added { id, .. }
            | StoreEvent::Changed { id, .. }
            | StoreEvent::Removed { id, .. } => *id,
        }
    }

    pub fn revision(&self) -> u64 {
        match self {
            StoreEvent::Added { revision, .. }
            | StoreEvent::Changed { revision, .. }
            | StoreEvent::Removed { revision, .. } => *revision,
        }
    }
}

/// Cheap to clone; clones share the same features.
#[derive(Clone)]
pub struct FeatureStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    name: String,
    state: RwLock<StoreState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<StoreEvent>>>,
}

#[derive(Default)]
struct StoreState {
    features: BTreeMap<FeatureId, Feature>,
    next_id: u64,
    revision: u64,
}

impl fmt::Debug for FeatureStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureStore")
            .field("name", &self.inner.name)
            .field("features", &self.len())
            .finish()
    }
}

impl FeatureStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                name: name.into(),
                state: RwLock::new(StoreState::default()),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Receives every event emitted after this call.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    fn emit(&self, event: StoreEvent) {
        self.inner
            .subscribers
            .lock()
            .retain(|tx| tx.send(event).is_ok());
    }

    /// Adds a feature under a fresh id.
    pub fn add(&self, geometry: Geometry) -> FeatureId {
        let (id, revision) = {
            let mut state = self.inner.state.write();
            let mut id = FeatureId(state.next_id);
            while state.features.contains_key(&id) {
                id = FeatureId(id.0 + 1);
            }
            state.next_id = id.0 + 1;
            state.revision += 1;
            let revision = state.revision;
            state.features.insert(
                id,
                Feature {
                    id,
                    geometry,
                    revision,
                },
            );
            (id, revision)
        };
        self.emit(StoreEvent::Added { id, revision });
        id
    }

    /// Adds or replaces the feature `id`. Returns the revision of the write.
    pub fn insert(&self, id: FeatureId, geometry: Geometry) -> u64 {
        let (event, revision) = {
            let mut state = self.inner.state.write();
            state.revision += 1;
            let revision = state.revision;
            let existed = state
                .features
                .insert(
                    id,
                    Feature {
                        id,
                        geometry,
                        revision,
                    },
                )
                .is_some();
            let event = if existed {
                StoreEvent::Changed { id, revision }
            } else {
                StoreEvent::Added { id, revision }
            };
            (event, revision)
        };
        self.emit(event);
        revision
    }

    /// Replaces the geometry of an existing feature. `None` if there is no such feature.
    pub fn set_geometry(&self, id: FeatureId, geometry: Geometry) -> Option<u64> {
        let revision = {
            let mut state = self.inner.state.write();
            if !state.features.contains_key(&id) {
                return None;
            }
            state.revision += 1;
            let revision = state.revision;
            let feature = state.features.get_mut(&id)?;
            feature.geometry = geometry;
            feature.revision = revision;
            revision
        };
        self.emit(StoreEvent::Changed { id, revision });
        Some(revision)
    }

    pub fn remove(&self, id: FeatureId) -> Option<Feature> {
        let (feature, revision) = {
            let mut state = self.inner.state.write();
            let feature = state.features.remove(&id)?;
            state.revision += 1;
            (feature, state.revision)
        };
        self.emit(StoreEvent::Removed { id, revision });
        Some(feature)
    }

    /// Removes every feature, emitting one event per feature.
    pub fn clear(&self) -> usize {
        let removed: Vec<(FeatureId, u64)> = {
            let mut state = self.inner.state.write();
            let ids: Vec<FeatureId> = state.features.keys().copied().collect();
            state.features.clear();
            ids.into_iter()
                .map(|id| {
                    state.revision += 1;
                    (id, state.revision)
                })
                .collect()
        };
        let count = removed.len();
        for (id, revision) in removed {
            self.emit(StoreEvent::Removed { id, revision });
        }
        count
    }

    pub fn get(&self, id: FeatureId) -> Option<Feature> {
        self.inner.state.read().features.get(&id).cloned()
    }

    pub fn contains(&self, id: FeatureId) -> bool {
        self.inner.state.read().features.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn features(&self) -> Vec<Feature> {
        self.inner.state.read().features.values().cloned().collect()
    }

    /// Features whose extent intersects `extent`.
    pub fn features_in_extent(&self, extent: &Extent) -> Vec<Feature> {
        self.inner
            .state
            .read()
            .features
            .values()
            .filter(|f| f.geometry.extent().is_some_and(|e| e.intersects(extent)))
            .cloned()
            .collect()
    }
}

//! Integration registry
//!
//! Sources are registered as factories and instantiated lazily on first
//! use. One adapter failing to construct removes only that source from the
//! live registry; the rest keep serving.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::{Integration, IntegrationError, IntegrationMeta};
use crate::config::IntegrationSettings;

/// Constructor for one adapter, given its per-source settings
pub type IntegrationFactory =
    Box<dyn Fn(&IntegrationSettings) -> Result<Arc<dyn Integration>, IntegrationError> + Send + Sync>;

enum SlotState {
    Uninstantiated,
    Ready(Arc<dyn Integration>),
    /// Construction failed once; do not retry this run
    Dead,
}

struct Slot {
    meta: IntegrationMeta,
    factory: IntegrationFactory,
    state: Mutex<SlotState>,
}

/// Registry of source adapters with lazy instantiation
#[derive(Default)]
pub struct IntegrationRegistry {
    slots: BTreeMap<String, Slot>,
    settings: HashMap<String, IntegrationSettings>,
}

impl IntegrationRegistry {
    pub fn new(settings: HashMap<String, IntegrationSettings>) -> Self {
        Self {
            slots: BTreeMap::new(),
            settings,
        }
    }

    /// Register a source. Disabled sources are skipped entirely, so they
    /// are invisible to hypotheses and the initial search.
    pub fn register(&mut self, meta: IntegrationMeta, factory: IntegrationFactory) {
        let enabled = self
            .settings
            .get(&meta.id)
            .map(|s| s.enabled)
            .unwrap_or(true);
        if !enabled {
            debug!(source_id = %meta.id, "source disabled by configuration, not registering");
            return;
        }
        self.slots.insert(meta.id.clone(), Slot {
            meta,
            factory,
            state: Mutex::new(SlotState::Uninstantiated),
        });
    }

    /// Register an already-constructed adapter (tests and embedders)
    pub fn register_instance(&mut self, adapter: Arc<dyn Integration>) {
        let meta = adapter.metadata().clone();
        let enabled = self
            .settings
            .get(&meta.id)
            .map(|s| s.enabled)
            .unwrap_or(true);
        if !enabled {
            debug!(source_id = %meta.id, "source disabled by configuration, not registering");
            return;
        }
        self.slots.insert(meta.id.clone(), Slot {
            meta,
            factory: Box::new(move |_| Ok(Arc::clone(&adapter))),
            state: Mutex::new(SlotState::Uninstantiated),
        });
    }

    /// Get a live adapter, instantiating it on first use.
    ///
    /// Returns None for unknown ids and for sources whose construction
    /// failed earlier in the run.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Integration>> {
        let slot = self.slots.get(id)?;
        let mut state = slot.state.lock().unwrap();
        match &*state {
            SlotState::Ready(adapter) => Some(Arc::clone(adapter)),
            SlotState::Dead => None,
            SlotState::Uninstantiated => {
                let settings = self.settings.get(id).cloned().unwrap_or_default();
                match (slot.factory)(&settings) {
                    Ok(adapter) => {
                        debug!(source_id = %id, "instantiated integration");
                        *state = SlotState::Ready(Arc::clone(&adapter));
                        Some(adapter)
                    }
                    Err(e) => {
                        warn!(source_id = %id, error = %e, "integration unavailable for this run");
                        *state = SlotState::Dead;
                        None
                    }
                }
            }
        }
    }

    /// Registered source ids, sorted
    pub fn list_ids(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Metadata without instantiation
    pub fn meta(&self, id: &str) -> Option<&IntegrationMeta> {
        self.slots.get(id).map(|slot| &slot.meta)
    }

    /// All metadata, sorted by id
    pub fn metas(&self) -> impl Iterator<Item = &IntegrationMeta> {
        self.slots.values().map(|slot| &slot.meta)
    }

    /// Per-source settings as loaded from configuration
    pub fn settings(&self, id: &str) -> Option<&IntegrationSettings> {
        self.settings.get(id)
    }

    /// Display-name -> id map, built once at engine init.
    ///
    /// Keys are lowercased display names and ids, so "USAJobs", "usajobs"
    /// and the raw id all resolve.
    pub fn display_name_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for meta in self.metas() {
            map.insert(meta.display_name.to_lowercase(), meta.id.clone());
            map.insert(meta.id.to_lowercase(), meta.id.clone());
        }
        map
    }
}

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::{
    error::ServiceError,
    model::{ArtifactLoader, ModelHandle},
};

type Slot = Arc<OnceCell<Arc<ModelHandle>>>;

/// Process-lifetime cache of loaded checkpoints, keyed by the path as given.
///
/// Entries are never evicted. A failed load leaves its slot empty, so the
/// next request for that path tries again.
#[derive(Default)]
pub struct ModelRegistry {
    slots: Mutex<HashMap<PathBuf, Slot>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(
        &self,
        path: &Path,
        loader: &dyn ArtifactLoader,
    ) -> Result<Arc<ModelHandle>, ServiceError> {
        let slot = self.slot(path);
        // Concurrent first access for one path blocks here until a single load finishes.
        slot.get_or_try_init(|| {
            info!(path = %path.display(), "loading model");
            loader.load(path).map(Arc::new).inspect_err(|err| {
                warn!(path = %path.display(), error = %err, "model load failed");
            })
        })
        .cloned()
    }

    pub fn cached(&self, path: &Path) -> Option<Arc<ModelHandle>> {
        self.slots
            .lock()
            .get(path)
            .and_then(|slot| slot.get().cloned())
    }

    pub fn loaded_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    fn slot(&self, path: &Path) -> Slot {
        self.slots
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }
}

use std::sync::{Arc, OnceLock, RwLock};

use crate::schema::ApiModel;

/// Process-wide holder for the current [`ApiModel`] snapshot.
///
/// The model is read-mostly: every request clones the `Arc` (a pointer
/// copy) and works against an immutable snapshot, so a hot reload via
/// [`install`](ModelRegistry::install) never blocks readers on anything
/// longer than the lock's pointer swap and in-flight requests keep the
/// snapshot they started with.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    inner: RwLock<Arc<ApiModel>>,
}

impl ModelRegistry {
    pub fn new(model: ApiModel) -> ModelRegistry {
        ModelRegistry {
            inner: RwLock::new(Arc::new(model)),
        }
    }

    /// Atomically replace the current snapshot.
    pub fn install(&self, model: ApiModel) {
        let snapshot = Arc::new(model);
        match self.inner.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<ApiModel> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The process-wide registry, starting empty until a model is
    /// installed.
    pub fn global() -> &'static ModelRegistry {
        static GLOBAL: OnceLock<ModelRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ModelRegistry::default)
    }
}

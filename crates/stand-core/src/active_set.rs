//! In-process registry of stands currently being worked on
//!
//! A stand name is claimed before any of its rows are touched and released
//! when the returned [`ActiveGuard`] drops, whether the work returned,
//! failed or panicked. Both dispatch lanes share one set, so a stand is never
//! processed twice at the same time inside this process.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

#[derive(Debug, Clone, Default)]
pub struct ActiveSet {
    names: Arc<Mutex<HashSet<String>>>,
}

impl ActiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name`, or `None` if another task already holds it.
    pub fn try_claim(&self, name: &str) -> Option<ActiveGuard> {
        if !self.lock().insert(name.to_string()) {
            return None;
        }
        trace!(stand = name, "claimed");
        Some(ActiveGuard {
            set: self.clone(),
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.names
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Membership of one stand in an [`ActiveSet`]; released on drop.
#[derive(Debug)]
pub struct ActiveGuard {
    set: ActiveSet,
    name: String,
}

impl ActiveGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.name);
        trace!(stand = %self.name, "released");
    }
}

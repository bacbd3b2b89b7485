//! Per-context connection handles
//!
//! The registry owns one [`ContextHandle`] per configured context. Components
//! borrow handles from it instead of reaching for a process-wide client, and
//! removing a context drops its handle (and client) deterministically.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::info;

use kubepulse_types::ClusterContext;

use crate::source::ClusterSource;

/// A configured context plus the source used to reach it
#[derive(Clone)]
pub struct ContextHandle {
    pub context: ClusterContext,
    pub source: Arc<dyn ClusterSource>,
}

impl ContextHandle {
    pub fn new(context: ClusterContext, source: Arc<dyn ClusterSource>) -> Self {
        Self { context, source }
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn is_operated(&self) -> bool {
        self.source.is_operated()
    }
}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("context", &self.context)
            .field("operated", &self.is_operated())
            .finish()
    }
}

/// Ordered set of context handles with change notification
pub struct ContextRegistry {
    handles: RwLock<Vec<ContextHandle>>,
    changes: watch::Sender<Vec<String>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(Vec::new());
        Self {
            handles: RwLock::new(Vec::new()),
            changes,
        }
    }

    pub fn from_handles(handles: impl IntoIterator<Item = ContextHandle>) -> Self {
        let registry = Self::new();
        for handle in handles {
            registry.insert(handle);
        }
        registry
    }

    /// Add a handle, replacing any existing one with the same name
    pub fn insert(&self, handle: ContextHandle) {
        {
            let mut handles = self.handles.write();
            match handles.iter_mut().find(|h| h.name() == handle.name()) {
                Some(existing) => *existing = handle,
                None => handles.push(handle),
            }
        }
        self.notify();
    }

    /// Drop the handle for a context; returns it if it existed
    pub fn remove(&self, name: &str) -> Option<ContextHandle> {
        let removed = {
            let mut handles = self.handles.write();
            let idx = handles.iter().position(|h| h.name() == name)?;
            handles.remove(idx)
        };
        info!(context = %name, "Context removed");
        self.notify();
        Some(removed)
    }

    pub fn get(&self, name: &str) -> Option<ContextHandle> {
        self.handles.read().iter().find(|h| h.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.read().iter().any(|h| h.name() == name)
    }

    /// Context names in registration order
    pub fn names(&self) -> Vec<String> {
        self.handles
            .read()
            .iter()
            .map(|h| h.name().to_string())
            .collect()
    }

    /// `false` for unknown contexts
    pub fn is_operated(&self, name: &str) -> bool {
        self.get(name).is_some_and(|h| h.is_operated())
    }

    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }

    /// Receiver that sees the context name list after every change
    pub fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.changes.subscribe()
    }

    fn notify(&self) {
        self.changes.send_replace(self.names());
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

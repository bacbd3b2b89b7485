use std::sync::Arc;

use tracing::{debug, warn};

use kubepulse_types::PanelPreferences;

use crate::store::{KeyValueStore, StoreError};

/// Panel preferences keyed by context name
#[derive(Clone)]
pub struct PreferencesStore {
    store: Arc<dyn KeyValueStore>,
}

impl PreferencesStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn key(context_name: &str) -> String {
        format!("panel/{}", context_name)
    }

    /// Stored preferences, or a fresh copy of the defaults
    pub fn get(&self, context_name: &str) -> PanelPreferences {
        let raw = match self.store.get(&Self::key(context_name)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return PanelPreferences::default(),
            Err(e) => {
                warn!(context = %context_name, error = %e, "Failed to read preferences, using defaults");
                return PanelPreferences::default();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(context = %context_name, error = %e, "Ignoring unreadable preferences record");
            PanelPreferences::default()
        })
    }

    /// Replace the whole record; last write wins
    pub fn save(&self, context_name: &str, prefs: &PanelPreferences) -> Result<(), StoreError> {
        let raw = serde_json::to_string(prefs)?;
        self.store.set(&Self::key(context_name), &raw)?;
        debug!(context = %context_name, "Preferences saved");
        Ok(())
    }

    /// Drop the stored record so the defaults apply again
    pub fn reset(&self, context_name: &str) -> Result<(), StoreError> {
        self.store.remove(&Self::key(context_name))
    }
}

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::storage::LocalStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Settings,
    Notes,
    HiddenItems,
    ItemColors,
    PaneOrder,
    CachedWeather,
    LastWeatherUpdate,
    AuthToken,
}

impl StoreKey {
    pub const ALL: [StoreKey; 8] = [
        StoreKey::Settings,
        StoreKey::Notes,
        StoreKey::HiddenItems,
        StoreKey::ItemColors,
        StoreKey::PaneOrder,
        StoreKey::CachedWeather,
        StoreKey::LastWeatherUpdate,
        StoreKey::AuthToken,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            StoreKey::Settings => "dashboard_settings",
            StoreKey::Notes => "dashboard_notes",
            StoreKey::HiddenItems => "dashboard_hidden_items",
            StoreKey::ItemColors => "dashboard_item_colors",
            StoreKey::PaneOrder => "paneOrder",
            StoreKey::CachedWeather => "cached_weather",
            StoreKey::LastWeatherUpdate => "last_weather_update",
            StoreKey::AuthToken => "gapi_token",
        }
    }
}

/// Typed JSON access to the dashboard's storage key space.
///
/// Reads never fail: a missing key, an unreadable backend or malformed JSON
/// all yield the collection default after logging. Writes replace the whole
/// value stored under a key.
#[derive(Debug, Clone)]
pub struct PersistentStore {
    backend: Arc<dyn LocalStorage>,
}

impl PersistentStore {
    pub fn new(backend: Arc<dyn LocalStorage>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn LocalStorage> {
        &self.backend
    }

    #[tracing::instrument(skip(self), fields(key = key.as_str()))]
    pub fn load<T>(&self, key: StoreKey) -> T
    where
        T: DeserializeOwned + Default,
    {
        self.load_opt(key).unwrap_or_default()
    }

    /// `None` when the key is absent or its value cannot be decoded.
    #[tracing::instrument(skip(self), fields(key = key.as_str()))]
    pub fn load_opt<T>(&self, key: StoreKey) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let raw = match self.backend.get_item(key.as_str()) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("nothing persisted");
                return None;
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed reading storage item");
                return None;
            }
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                error!(%err, "failed parsing stored value; using default");
                None
            }
        }
    }

    #[tracing::instrument(skip(self, value), fields(key = key.as_str()))]
    pub fn save<T>(&self, key: StoreKey, value: &T) -> anyhow::Result<()>
    where
        T: Serialize + ?Sized,
    {
        let json = serde_json::to_string(value)
            .with_context(|| format!("failed to serialize {}", key.as_str()))?;
        self.backend
            .set_item(key.as_str(), &json)
            .with_context(|| format!("failed to write {}", key.as_str()))?;
        debug!(bytes = json.len(), "saved storage item");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(key = key.as_str()))]
    pub fn remove(&self, key: StoreKey) -> anyhow::Result<()> {
        self.backend
            .remove_item(key.as_str())
            .with_context(|| format!("failed to remove {}", key.as_str()))
    }

    pub fn contains(&self, key: StoreKey) -> bool {
        matches!(self.backend.get_item(key.as_str()), Ok(Some(_)))
    }

    pub fn pane_order(&self) -> Vec<String> {
        self.load(StoreKey::PaneOrder)
    }

    pub fn save_pane_order(&self, order: &[String]) -> anyhow::Result<()> {
        self.save(StoreKey::PaneOrder, order)
    }
}

/// Layout sections in their built-in order.
pub const DEFAULT_PANES: [&str; 3] = ["calendar-section", "tasks-section", "notes-section"];

pub fn default_panes() -> Vec<String> {
    DEFAULT_PANES.iter().map(|id| id.to_string()).collect()
}

/// Arranges `panes` by the saved order. Saved ids that are not present are
/// skipped; panes missing from the saved order keep their relative position
/// after the ordered ones.
pub fn arrange_panes(panes: &[String], saved: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(panes.len());
    for id in saved {
        if panes.contains(id) && !out.contains(id) {
            out.push(id.clone());
        }
    }
    for id in panes {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{PersistentStore, StoreKey, arrange_panes};
    use crate::storage::{LocalStorage, MemoryStorage};

    fn store_with(raw: &[(StoreKey, &str)]) -> PersistentStore {
        let backend = Arc::new(MemoryStorage::new());
        for (key, value) in raw {
            backend.set_item(key.as_str(), value).expect("seed");
        }
        PersistentStore::new(backend)
    }

    #[test]
    fn malformed_json_falls_back_to_default() {
        let store = store_with(&[(StoreKey::PaneOrder, "[not json")]);
        assert!(store.pane_order().is_empty());
        assert!(store.load_opt::<Vec<String>>(StoreKey::PaneOrder).is_none());
    }

    #[test]
    fn save_replaces_whole_value() {
        let store = store_with(&[]);
        store
            .save_pane_order(&["calendar".to_string(), "tasks".to_string()])
            .expect("save");
        store
            .save_pane_order(&["notes".to_string()])
            .expect("save again");
        assert_eq!(store.pane_order(), vec!["notes".to_string()]);
    }

    #[test]
    fn arranges_panes_by_saved_order() {
        let panes = vec![
            "calendar-section".to_string(),
            "tasks-section".to_string(),
            "notes-section".to_string(),
        ];
        let saved = vec![
            "notes-section".to_string(),
            "gone-section".to_string(),
            "calendar-section".to_string(),
        ];
        assert_eq!(
            arrange_panes(&panes, &saved),
            vec![
                "notes-section".to_string(),
                "calendar-section".to_string(),
                "tasks-section".to_string(),
            ]
        );
    }
}

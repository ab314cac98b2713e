use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use anyhow::anyhow;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::settings::SettingEffect;
use crate::store::{PersistentStore, StoreKey};
use crate::ui::{Notice, UiEvent, UiSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Event,
    Task,
    Note,
}

impl ItemKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ItemKind::Event => "event",
            ItemKind::Task => "task",
            ItemKind::Note => "note",
        }
    }

    pub const fn is_hideable(self) -> bool {
        matches!(self, ItemKind::Event | ItemKind::Task)
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "event" | "events" => Ok(ItemKind::Event),
            "task" | "tasks" => Ok(ItemKind::Task),
            "note" | "notes" => Ok(ItemKind::Note),
            other => Err(anyhow!("unknown item type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenItems {
    #[serde(default)]
    pub event: Vec<String>,
    #[serde(default)]
    pub task: Vec<String>,
}

impl HiddenItems {
    pub fn ids(&self, kind: ItemKind) -> &[String] {
        match kind {
            ItemKind::Event => &self.event,
            ItemKind::Task => &self.task,
            ItemKind::Note => &[],
        }
    }

    fn ids_mut(&mut self, kind: ItemKind) -> Option<&mut Vec<String>> {
        match kind {
            ItemKind::Event => Some(&mut self.event),
            ItemKind::Task => Some(&mut self.task),
            ItemKind::Note => None,
        }
    }

    pub fn contains(&self, kind: ItemKind, id: &str) -> bool {
        self.ids(kind).iter().any(|hidden| hidden == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemColors {
    #[serde(default)]
    pub event: BTreeMap<String, String>,
    #[serde(default)]
    pub task: BTreeMap<String, String>,
    #[serde(default)]
    pub note: BTreeMap<String, String>,
}

impl ItemColors {
    pub fn for_kind(&self, kind: ItemKind) -> &BTreeMap<String, String> {
        match kind {
            ItemKind::Event => &self.event,
            ItemKind::Task => &self.task,
            ItemKind::Note => &self.note,
        }
    }

    fn for_kind_mut(&mut self, kind: ItemKind) -> &mut BTreeMap<String, String> {
        match kind {
            ItemKind::Event => &mut self.event,
            ItemKind::Task => &mut self.task,
            ItemKind::Note => &mut self.note,
        }
    }

    pub fn get(&self, kind: ItemKind, id: &str) -> Option<&str> {
        self.for_kind(kind).get(id).map(String::as_str)
    }
}

fn hex_color_re() -> Option<&'static Regex> {
    static HEX_COLOR: OnceLock<Option<Regex>> = OnceLock::new();
    HEX_COLOR
        .get_or_init(|| Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").ok())
        .as_ref()
}

pub fn is_hex_color(value: &str) -> bool {
    hex_color_re().is_some_and(|re| re.is_match(value))
}

/// Hidden-item and custom-colour bookkeeping shared by events, tasks and
/// notes. Each call reads the persisted collection fresh.
pub struct AnnotationStore {
    store: PersistentStore,
    ui: Arc<dyn UiSink>,
}

impl fmt::Debug for AnnotationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationStore").finish_non_exhaustive()
    }
}

impl AnnotationStore {
    pub fn new(store: PersistentStore, ui: Arc<dyn UiSink>) -> Self {
        Self { store, ui }
    }

    pub fn hidden(&self) -> HiddenItems {
        self.store.load(StoreKey::HiddenItems)
    }

    pub fn is_hidden(&self, kind: ItemKind, id: &str) -> bool {
        self.hidden().contains(kind, id)
    }

    #[instrument(skip(self))]
    pub fn hide(&self, kind: ItemKind, id: &str) -> bool {
        let id = id.trim();
        if id.is_empty() {
            return false;
        }
        let mut hidden = self.hidden();
        let Some(ids) = hidden.ids_mut(kind) else {
            debug!(%kind, "item kind cannot be hidden");
            return false;
        };
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
            self.persist(StoreKey::HiddenItems, &hidden);
        }
        self.ui.emit(UiEvent::ItemHidden {
            kind,
            id: id.to_string(),
        });
        true
    }

    #[instrument(skip(self))]
    pub fn clear_hidden(&self, kind: ItemKind) {
        let mut hidden = self.hidden();
        let Some(ids) = hidden.ids_mut(kind) else {
            return;
        };
        ids.clear();
        self.persist(StoreKey::HiddenItems, &hidden);
        self.emit_refresh(kind);
    }

    #[instrument(skip(self))]
    pub fn clear_all_hidden(&self) {
        self.persist(StoreKey::HiddenItems, &HiddenItems::default());
        self.emit_refresh(ItemKind::Event);
        self.emit_refresh(ItemKind::Task);
    }

    pub fn colors(&self) -> ItemColors {
        self.store.load(StoreKey::ItemColors)
    }

    pub fn color(&self, kind: ItemKind, id: &str) -> Option<String> {
        self.colors().get(kind, id).map(ToString::to_string)
    }

    /// Empty `color` resets the item to default styling. Anything that is not
    /// a `#rgb`/`#rrggbb` value is ignored.
    #[instrument(skip(self))]
    pub fn set_color(&self, kind: ItemKind, id: &str, color: &str) -> bool {
        let color = color.trim();
        if !color.is_empty() && !is_hex_color(color) {
            debug!(color, "rejecting malformed colour");
            return false;
        }

        let mut colors = self.colors();
        let entries = colors.for_kind_mut(kind);
        let stored = if color.is_empty() {
            entries.remove(id);
            None
        } else {
            entries.insert(id.to_string(), color.to_ascii_lowercase());
            Some(color.to_ascii_lowercase())
        };
        self.persist(StoreKey::ItemColors, &colors);
        self.ui.emit(UiEvent::ColorChanged {
            kind,
            id: id.to_string(),
            color: stored,
        });
        true
    }

    fn emit_refresh(&self, kind: ItemKind) {
        let effect = match kind {
            ItemKind::Event => SettingEffect::RefreshCalendar,
            ItemKind::Task => SettingEffect::RefreshTasks,
            ItemKind::Note => return,
        };
        self.ui.emit(UiEvent::Effect(effect));
    }

    fn persist<T: Serialize>(&self, key: StoreKey, value: &T) {
        if let Err(err) = self.store.save(key, value) {
            error!(error = %format!("{err:#}"), key = key.as_str(), "failed to persist annotations");
            self.ui
                .emit(UiEvent::Notice(Notice::error("Failed to save item preferences")));
        }
    }
}

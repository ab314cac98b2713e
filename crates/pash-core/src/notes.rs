use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::store::{PersistentStore, StoreKey};
use crate::ui::{Notice, UiEvent, UiSink};

const EMPTY_EDITOR_MARKUP: &str = "<p><br></p>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub content: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteMode {
    Viewing,
    Editing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteView {
    pub note: Note,
    pub mode: NoteMode,
}

/// Pinned first, then ascending `order`, then newest first.
pub fn display_order(a: &Note, b: &Note) -> Ordering {
    b.pinned
        .cmp(&a.pinned)
        .then(a.order.cmp(&b.order))
        .then(b.timestamp.cmp(&a.timestamp))
}

pub fn is_blank_content(content: &str) -> bool {
    let trimmed = content.trim();
    trimmed.is_empty() || trimmed == EMPTY_EDITOR_MARKUP
}

/// Reads RFC 3339, an offset-less date-time (local time), a bare date
/// (UTC midnight) or epoch milliseconds.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|local| local.with_timezone(&Utc))
                .or_else(|| Some(naive.and_utc()));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(i64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(text) => parse_timestamp(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognised timestamp '{text}'"))),
        Raw::Millis(millis) => DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp {millis} out of range"))),
    }
}

/// Persisted notes plus whatever could not be decoded. Undecodable records
/// are written back untouched; when the stored value is not a list at all
/// nothing is written over it.
pub struct NotesStore {
    notes: Vec<Note>,
    unreadable: Vec<Value>,
    writable: bool,
    editing: BTreeSet<i64>,
    store: PersistentStore,
    ui: Arc<dyn UiSink>,
}

impl fmt::Debug for NotesStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotesStore")
            .field("notes", &self.notes.len())
            .field("unreadable", &self.unreadable.len())
            .field("writable", &self.writable)
            .field("editing", &self.editing)
            .finish_non_exhaustive()
    }
}

impl NotesStore {
    #[instrument(skip(store, ui))]
    pub fn open(store: PersistentStore, ui: Arc<dyn UiSink>) -> Self {
        let (records, writable) = match store.load_opt::<Vec<Value>>(StoreKey::Notes) {
            Some(records) => (records, true),
            None if store.contains(StoreKey::Notes) => {
                error!("stored notes are not a list; leaving them untouched");
                ui.emit(UiEvent::Notice(Notice::error(
                    "Saved notes could not be read. Changes will not be saved.",
                )));
                (Vec::new(), false)
            }
            None => (Vec::new(), true),
        };

        let mut notes = Vec::with_capacity(records.len());
        let mut unreadable = Vec::new();
        for record in records {
            match Note::deserialize(&record) {
                Ok(note) => notes.push(note),
                Err(err) => {
                    warn!(%err, "keeping undecodable note record as-is");
                    unreadable.push(record);
                }
            }
        }

        let before = notes.len();
        let mut seen = BTreeSet::new();
        notes.retain(|note| seen.insert(note.id));
        if notes.len() != before {
            debug!(dropped = before - notes.len(), "dropped notes with duplicate ids");
        }
        debug!(count = notes.len(), "loaded notes");

        Self {
            notes,
            unreadable,
            writable,
            editing: BTreeSet::new(),
            store,
            ui,
        }
    }

    pub fn list(&self) -> Vec<Note> {
        let mut sorted = self.notes.clone();
        sorted.sort_by(display_order);
        sorted
    }

    pub fn views(&self) -> Vec<NoteView> {
        self.list()
            .into_iter()
            .map(|note| {
                let mode = self.mode(note.id);
                NoteView { note, mode }
            })
            .collect()
    }

    pub fn get(&self, id: i64) -> Option<&Note> {
        self.notes.iter().find(|note| note.id == id)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Stored records that could not be read as notes.
    pub fn unreadable_count(&self) -> usize {
        self.unreadable.len()
    }

    /// Returns the new note's id, or `None` when the content is blank.
    #[instrument(skip(self, content, now))]
    pub fn add(&mut self, content: &str, now: DateTime<Utc>) -> Option<i64> {
        if is_blank_content(content) {
            debug!("ignoring blank note");
            return None;
        }

        let mut id = now.timestamp_millis();
        while self.notes.iter().any(|note| note.id == id) {
            id += 1;
        }

        self.notes.insert(
            0,
            Note {
                id,
                content: content.trim().to_string(),
                timestamp: now,
                pinned: false,
                order: 0,
            },
        );
        info!(id, "added note");
        self.commit();
        Some(id)
    }

    #[instrument(skip(self, content))]
    pub fn edit(&mut self, id: i64, content: &str) -> bool {
        if is_blank_content(content) {
            debug!(id, "ignoring blank edit");
            return false;
        }
        let Some(note) = self.notes.iter_mut().find(|note| note.id == id) else {
            return false;
        };
        note.content = content.trim().to_string();
        self.commit();
        true
    }

    #[instrument(skip(self))]
    pub fn delete(&mut self, id: i64) -> bool {
        let before = self.notes.len();
        self.notes.retain(|note| note.id != id);
        if self.notes.len() == before {
            return false;
        }
        self.editing.remove(&id);
        info!(id, "deleted note");
        self.commit();
        true
    }

    #[instrument(skip(self))]
    pub fn toggle_pin(&mut self, id: i64) -> Option<bool> {
        let note = self.notes.iter_mut().find(|note| note.id == id)?;
        note.pinned = !note.pinned;
        let pinned = note.pinned;

        self.commit();
        let status = if pinned { "pinned" } else { "unpinned" };
        self.ui.emit(UiEvent::Notice(
            Notice::info(format!("Note {status}"))
                .lasting(std::time::Duration::from_secs(2)),
        ));
        Some(pinned)
    }

    /// Assigns each listed note its position in `ids` as the new `order`.
    /// Ids that match no note are ignored; unlisted notes keep their order.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub fn reorder(&mut self, ids: &[i64]) {
        for note in &mut self.notes {
            if let Some(position) = ids.iter().position(|id| *id == note.id) {
                note.order = position as i64;
            }
        }
        self.commit();
    }

    pub fn mode(&self, id: i64) -> NoteMode {
        if self.editing.contains(&id) {
            NoteMode::Editing
        } else {
            NoteMode::Viewing
        }
    }

    /// Switches a note into editing. Refused when the note is missing or
    /// already being edited.
    pub fn begin_edit(&mut self, id: i64) -> bool {
        if self.get(id).is_none() || !self.editing.insert(id) {
            return false;
        }
        self.ui.emit(UiEvent::NotesChanged);
        true
    }

    pub fn finish_edit(&mut self, id: i64, content: &str) -> bool {
        if !self.editing.contains(&id) {
            return false;
        }
        let saved = self.edit(id, content);
        if saved {
            self.editing.remove(&id);
            self.ui.emit(UiEvent::NotesChanged);
        }
        saved
    }

    pub fn cancel_edit(&mut self, id: i64) {
        if self.editing.remove(&id) {
            self.ui.emit(UiEvent::NotesChanged);
        }
    }

    fn commit(&mut self) {
        self.notes.sort_by(display_order);
        if !self.writable {
            warn!("not persisting notes over an unreadable stored value");
            self.ui
                .emit(UiEvent::Notice(Notice::error("Failed to save notes")));
        } else if let Err(err) = self.persist() {
            error!(error = %format!("{err:#}"), "failed to persist notes");
            self.ui
                .emit(UiEvent::Notice(Notice::error("Failed to save notes")));
        }
        self.ui.emit(UiEvent::NotesChanged);
    }

    fn persist(&self) -> anyhow::Result<()> {
        let mut records = self
            .notes
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<Value>, _>>()?;
        records.extend(self.unreadable.iter().cloned());
        self.store.save(StoreKey::Notes, &records)
    }
}

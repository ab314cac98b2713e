use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use crate::annotations::{AnnotationStore, ItemKind};
use crate::auth::TokenCache;
use crate::cli::{Command, KeyVal, NotesAction, PanesAction, SettingsAction, UnhideTarget};
use crate::notes::NotesStore;
use crate::render::Renderer;
use crate::settings::{ColorSchemePreference, SettingKey, SettingsManager, SettingsPatch};
use crate::store::{DEFAULT_PANES, PersistentStore, arrange_panes, default_panes};
use crate::ui::{UiEvent, UiSink};
use crate::weather::{WeatherPanel, WeatherReport, load_snapshot};

/// One CLI invocation's view of the dashboard: the storage it works on and
/// the UI events raised along the way.
#[derive(Debug)]
pub struct Session {
    store: PersistentStore,
    events: Arc<Mutex<Vec<UiEvent>>>,
}

impl Session {
    pub fn new(store: PersistentStore) -> Self {
        Self {
            store,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    pub fn take_events(&self) -> Vec<UiEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    fn ui(&self) -> Arc<dyn UiSink> {
        self.events.clone()
    }
}

#[instrument(skip(session, renderer))]
pub fn dispatch(
    session: &Session,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let stdout = io::stdout();
    let result = execute(
        session,
        &renderer.for_stream(&stdout),
        command,
        now,
        &mut stdout.lock(),
    );

    let events = session.take_events();
    for event in &events {
        debug!(?event, "ui event");
    }
    renderer.print_notices(&events)?;
    result
}

pub fn execute<W: Write>(
    session: &Session,
    renderer: &Renderer,
    command: Command,
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    match command {
        Command::Settings { action } => match action.unwrap_or(SettingsAction::Show) {
            SettingsAction::Show => cmd_settings_show(session, renderer, out),
            SettingsAction::Set { assignments } => cmd_settings_set(session, &assignments, out),
        },
        Command::Notes { action } => match action.unwrap_or(NotesAction::List) {
            NotesAction::List => cmd_notes_list(session, renderer, out),
            NotesAction::Add { text } => cmd_notes_add(session, &text.join(" "), now, out),
            NotesAction::Edit { id, text } => cmd_notes_edit(session, id, &text.join(" "), out),
            NotesAction::Delete { id } => cmd_notes_delete(session, id, out),
            NotesAction::Pin { id } => cmd_notes_pin(session, id, out),
            NotesAction::Reorder { ids } => cmd_notes_reorder(session, &ids, out),
        },
        Command::Hide { kind, id } => cmd_hide(session, kind, &id, out),
        Command::Unhide { target } => cmd_unhide(session, target, out),
        Command::Color { kind, id, color } => {
            cmd_color(session, kind, &id, color.as_deref().unwrap_or_default(), out)
        }
        Command::Panes { action } => match action.unwrap_or(PanesAction::Show) {
            PanesAction::Show => cmd_panes_show(session, renderer, out),
            PanesAction::Set { ids } => cmd_panes_set(session, renderer, &ids, out),
        },
        Command::Weather => cmd_weather(session, renderer, now, out),
        Command::Logout => cmd_logout(session, out),
    }
}

fn settings_manager(session: &Session) -> SettingsManager {
    SettingsManager::load(
        session.store.clone(),
        ColorSchemePreference::NoPreference,
        session.ui(),
    )
}

fn cmd_settings_show<W: Write>(
    session: &Session,
    renderer: &Renderer,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command settings show");
    let manager = settings_manager(session);
    renderer.write_settings(out, manager.settings())
}

fn cmd_settings_set<W: Write>(
    session: &Session,
    assignments: &[KeyVal],
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command settings set");

    let mut patch = SettingsPatch::new();
    for kv in assignments {
        let key: SettingKey = kv.key.parse()?;
        let value = key
            .parse_value(&kv.value)
            .with_context(|| format!("invalid value for {key}"))?;
        patch.insert(key.as_str(), value);
    }

    let mut manager = settings_manager(session);
    let changed = manager.save(&patch);
    if changed.is_empty() {
        writeln!(out, "No changes.")?;
    } else {
        writeln!(out, "Changed {}.", changed.join(", "))?;
    }
    Ok(())
}

fn cmd_notes_list<W: Write>(
    session: &Session,
    renderer: &Renderer,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command notes list");
    let notes = NotesStore::open(session.store.clone(), session.ui());
    let colors = AnnotationStore::new(session.store.clone(), session.ui()).colors();
    renderer.write_notes(out, &notes.views(), &colors)
}

fn cmd_notes_add<W: Write>(
    session: &Session,
    content: &str,
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command notes add");
    let mut notes = NotesStore::open(session.store.clone(), session.ui());
    let id = notes
        .add(content, now)
        .ok_or_else(|| anyhow!("note text is empty"))?;
    writeln!(out, "Created note {id}.")?;
    Ok(())
}

fn cmd_notes_edit<W: Write>(
    session: &Session,
    id: i64,
    content: &str,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command notes edit");
    let mut notes = NotesStore::open(session.store.clone(), session.ui());
    if notes.get(id).is_none() {
        bail!("no note with id {id}");
    }
    if !notes.edit(id, content) {
        bail!("note text is empty");
    }
    writeln!(out, "Updated note {id}.")?;
    Ok(())
}

fn cmd_notes_delete<W: Write>(session: &Session, id: i64, out: &mut W) -> anyhow::Result<()> {
    info!("command notes delete");
    let mut notes = NotesStore::open(session.store.clone(), session.ui());
    if !notes.delete(id) {
        bail!("no note with id {id}");
    }
    writeln!(out, "Deleted note {id}.")?;
    Ok(())
}

fn cmd_notes_pin<W: Write>(session: &Session, id: i64, out: &mut W) -> anyhow::Result<()> {
    info!("command notes pin");
    let mut notes = NotesStore::open(session.store.clone(), session.ui());
    let pinned = notes
        .toggle_pin(id)
        .ok_or_else(|| anyhow!("no note with id {id}"))?;
    let state = if pinned { "Pinned" } else { "Unpinned" };
    writeln!(out, "{state} note {id}.")?;
    Ok(())
}

fn cmd_notes_reorder<W: Write>(session: &Session, ids: &[i64], out: &mut W) -> anyhow::Result<()> {
    info!("command notes reorder");
    let mut notes = NotesStore::open(session.store.clone(), session.ui());
    notes.reorder(ids);
    writeln!(out, "Reordered {} note(s).", ids.len())?;
    Ok(())
}

fn cmd_hide<W: Write>(
    session: &Session,
    kind: ItemKind,
    id: &str,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command hide");
    if !kind.is_hideable() {
        bail!("{kind} items cannot be hidden");
    }
    let annotations = AnnotationStore::new(session.store.clone(), session.ui());
    if !annotations.hide(kind, id) {
        bail!("{kind} id cannot be empty");
    }
    writeln!(out, "Hid {kind} {}.", id.trim())?;
    Ok(())
}

fn cmd_unhide<W: Write>(session: &Session, target: UnhideTarget, out: &mut W) -> anyhow::Result<()> {
    info!("command unhide");
    let annotations = AnnotationStore::new(session.store.clone(), session.ui());
    match target {
        UnhideTarget::All => {
            annotations.clear_all_hidden();
            writeln!(out, "Showing all hidden items again.")?;
        }
        UnhideTarget::Kind(kind) if kind.is_hideable() => {
            annotations.clear_hidden(kind);
            writeln!(out, "Showing hidden {kind} items again.")?;
        }
        UnhideTarget::Kind(kind) => bail!("{kind} items cannot be hidden"),
    }
    Ok(())
}

fn cmd_color<W: Write>(
    session: &Session,
    kind: ItemKind,
    id: &str,
    color: &str,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command color");
    let annotations = AnnotationStore::new(session.store.clone(), session.ui());
    if !annotations.set_color(kind, id, color) {
        bail!("invalid colour {color:?}; expected #rgb or #rrggbb");
    }
    match annotations.color(kind, id) {
        Some(color) => writeln!(out, "Set {kind} {id} to {color}.")?,
        None => writeln!(out, "Reset {kind} {id} to the default colour.")?,
    }
    Ok(())
}

fn cmd_panes_show<W: Write>(
    session: &Session,
    renderer: &Renderer,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command panes show");
    let arranged = arrange_panes(&default_panes(), &session.store.pane_order());
    renderer.write_panes(out, &arranged)
}

fn cmd_panes_set<W: Write>(
    session: &Session,
    renderer: &Renderer,
    ids: &[String],
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command panes set");
    if let Some(unknown) = ids.iter().find(|id| !DEFAULT_PANES.contains(&id.as_str())) {
        bail!(
            "unknown pane {unknown:?}; expected one of {}",
            DEFAULT_PANES.join(", ")
        );
    }
    let arranged = arrange_panes(&default_panes(), ids);
    session.store.save_pane_order(&arranged)?;
    renderer.write_panes(out, &arranged)
}

fn cmd_weather<W: Write>(
    session: &Session,
    renderer: &Renderer,
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command weather");
    let panel = match load_snapshot(&session.store) {
        Some(snapshot) => match WeatherReport::from_payload(&snapshot.payload) {
            Ok(report) => WeatherPanel::Cached {
                report,
                stale: !snapshot.is_fresh(now),
            },
            Err(reason) => WeatherPanel::Unavailable(reason.to_string()),
        },
        None => WeatherPanel::Unavailable(crate::weather::UNAVAILABLE.to_string()),
    };
    renderer.write_weather(out, &panel)
}

fn cmd_logout<W: Write>(session: &Session, out: &mut W) -> anyhow::Result<()> {
    info!("command logout");
    TokenCache::new(session.store.clone()).clear();
    writeln!(out, "Signed out.")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::{Session, execute};
    use crate::cli::{Command, KeyVal, NotesAction, SettingsAction};
    use crate::render::Renderer;
    use crate::settings::{SettingEffect, Theme};
    use crate::storage::MemoryStorage;
    use crate::store::PersistentStore;
    use crate::ui::UiEvent;

    fn run(session: &Session, command: Command) -> anyhow::Result<String> {
        let mut out = Vec::new();
        execute(session, &Renderer::plain(), command, Utc::now(), &mut out)?;
        Ok(String::from_utf8(out).expect("utf8"))
    }

    fn session() -> Session {
        Session::new(PersistentStore::new(Arc::new(MemoryStorage::new())))
    }

    #[test]
    fn settings_set_reports_changes_and_effects() {
        let session = session();
        let text = run(
            &session,
            Command::Settings {
                action: Some(SettingsAction::Set {
                    assignments: vec![KeyVal {
                        key: "theme".to_string(),
                        value: "dark".to_string(),
                    }],
                }),
            },
        )
        .expect("set");
        assert_eq!(text, "Changed THEME.\n");
        assert!(
            session
                .take_events()
                .contains(&UiEvent::Effect(SettingEffect::ApplyTheme(Theme::Dark)))
        );
    }

    #[test]
    fn invalid_setting_values_are_refused() {
        let session = session();
        let result = run(
            &session,
            Command::Settings {
                action: Some(SettingsAction::Set {
                    assignments: vec![KeyVal {
                        key: "CALENDAR_DAYS".to_string(),
                        value: "soon".to_string(),
                    }],
                }),
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn blank_notes_are_an_error() {
        let session = session();
        let result = run(
            &session,
            Command::Notes {
                action: Some(NotesAction::Add {
                    text: vec!["  ".to_string()],
                }),
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn notes_cannot_be_hidden_from_the_cli() {
        let session = session();
        let result = run(
            &session,
            Command::Hide {
                kind: crate::annotations::ItemKind::Note,
                id: "1".to_string(),
            },
        );
        assert!(result.is_err());
    }
}

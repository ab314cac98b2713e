use std::ffi::OsString;
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use pash_core::annotations::{AnnotationStore, ItemKind};
use pash_core::notes::NotesStore;
use pash_core::settings::{
    ColorSchemePreference, SettingKey, SettingsManager, SettingsPatch, Theme,
};
use pash_core::storage::FileStorage;
use pash_core::store::{PersistentStore, StoreKey};
use pash_core::ui::UiEvent;
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> (PersistentStore, Arc<Mutex<Vec<UiEvent>>>) {
    let backend = FileStorage::open(dir).expect("open storage");
    (
        PersistentStore::new(Arc::new(backend)),
        Arc::new(Mutex::new(Vec::new())),
    )
}

#[test]
fn dashboard_state_survives_reopen() {
    let temp = tempdir().expect("tempdir");

    {
        let (store, ui) = open(temp.path());
        let mut manager =
            SettingsManager::load(store.clone(), ColorSchemePreference::NoPreference, ui.clone());
        let changed = manager.save(
            &SettingsPatch::new()
                .set(SettingKey::Theme, "dark")
                .set(SettingKey::DashboardTitle, "Home"),
        );
        assert_eq!(changed, vec!["DASHBOARD_TITLE".to_string(), "THEME".to_string()]);

        let now = Utc::now();
        let mut notes = NotesStore::open(store.clone(), ui.clone());
        notes.add("hello", now).expect("first note");
        notes
            .add("world", now + Duration::seconds(1))
            .expect("second note");

        let annotations = AnnotationStore::new(store.clone(), ui);
        annotations.hide(ItemKind::Event, "evt-1");
        annotations.set_color(ItemKind::Task, "task-1", "#0af");
        store
            .save_pane_order(&["notes-section".to_string()])
            .expect("pane order");
    }

    let (store, ui) = open(temp.path());
    let manager = SettingsManager::load(store.clone(), ColorSchemePreference::Light, ui.clone());
    assert_eq!(manager.settings().theme(), Theme::Dark);
    assert_eq!(manager.settings().title(), "Home");

    let notes = NotesStore::open(store.clone(), ui.clone());
    let contents: Vec<String> = notes.list().into_iter().map(|note| note.content).collect();
    assert_eq!(contents, vec!["world".to_string(), "hello".to_string()]);

    let annotations = AnnotationStore::new(store.clone(), ui);
    assert!(annotations.is_hidden(ItemKind::Event, "evt-1"));
    assert_eq!(
        annotations.color(ItemKind::Task, "task-1").as_deref(),
        Some("#0af")
    );
    assert_eq!(store.pane_order(), vec!["notes-section".to_string()]);
    assert!(temp.path().join(format!("{}.json", StoreKey::Notes.as_str())).exists());
}

#[test]
fn cli_writes_into_the_data_directory() {
    let temp = tempdir().expect("tempdir");
    let data = temp.path().join("data");
    let rc = temp.path().join("pashrc");
    std::fs::write(&rc, "color = off\n").expect("write pashrc");

    let args = |rest: &[&str]| -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "pash".into(),
            "--pashrc".into(),
            rc.clone().into_os_string(),
            "--data".into(),
            data.clone().into_os_string(),
        ];
        args.extend(rest.iter().map(OsString::from));
        args
    };

    pash_core::run(args(&["notes", "add", "buy", "milk"])).expect("notes add");
    pash_core::run(args(&["settings", "set", "CALENDAR_DAYS=14"])).expect("settings set");
    pash_core::run(args(&["panes", "set", "tasks-section"])).expect("panes set");
    assert!(pash_core::run(args(&["panes", "set", "sidebar"])).is_err());

    let (store, ui) = open(&data);
    let notes = NotesStore::open(store.clone(), ui.clone());
    assert_eq!(notes.list()[0].content, "buy milk");

    let manager = SettingsManager::load(store.clone(), ColorSchemePreference::NoPreference, ui);
    assert_eq!(manager.settings().calendar_days(), 14);
    assert_eq!(
        store.pane_order(),
        vec![
            "tasks-section".to_string(),
            "calendar-section".to_string(),
            "notes-section".to_string(),
        ]
    );
}

#[test]
fn unknown_pashrc_keys_stop_the_cli() {
    let temp = tempdir().expect("tempdir");
    let rc = temp.path().join("pashrc");
    std::fs::write(&rc, "colour = off\n").expect("write pashrc");

    let err = pash_core::run(vec![
        "pash".into(),
        "--pashrc".into(),
        rc.into_os_string(),
        "--data".into(),
        temp.path().join("data").into_os_string(),
    ])
    .expect_err("unknown key");
    assert!(format!("{err:#}").contains("colour"));
    assert!(!temp.path().join("data").exists());
}

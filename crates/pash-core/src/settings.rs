use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::store::{PersistentStore, StoreKey};
use crate::ui::{Notice, UiEvent, UiSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    ClientId,
    ApiKey,
    WeatherApiKey,
    WeatherLocation,
    DashboardTitle,
    Theme,
    ShowDate,
    ShowWeather,
    CalendarDays,
    Clock24h,
    Timezone,
}

impl SettingKey {
    pub const ALL: [SettingKey; 11] = [
        SettingKey::ClientId,
        SettingKey::ApiKey,
        SettingKey::WeatherApiKey,
        SettingKey::WeatherLocation,
        SettingKey::DashboardTitle,
        SettingKey::Theme,
        SettingKey::ShowDate,
        SettingKey::ShowWeather,
        SettingKey::CalendarDays,
        SettingKey::Clock24h,
        SettingKey::Timezone,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            SettingKey::ClientId => "CLIENT_ID",
            SettingKey::ApiKey => "API_KEY",
            SettingKey::WeatherApiKey => "WEATHER_API_KEY",
            SettingKey::WeatherLocation => "WEATHER_LOCATION",
            SettingKey::DashboardTitle => "DASHBOARD_TITLE",
            SettingKey::Theme => "THEME",
            SettingKey::ShowDate => "SHOW_DATE",
            SettingKey::ShowWeather => "SHOW_WEATHER",
            SettingKey::CalendarDays => "CALENDAR_DAYS",
            SettingKey::Clock24h => "CLOCK_24H",
            SettingKey::Timezone => "TIMEZONE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }

    pub fn default_value(self) -> Value {
        match self {
            SettingKey::ClientId | SettingKey::ApiKey | SettingKey::WeatherApiKey => {
                Value::from("")
            }
            SettingKey::WeatherLocation => Value::from("Singapore"),
            SettingKey::DashboardTitle => Value::from("Pash"),
            SettingKey::Theme => Value::from(Theme::Light.as_str()),
            SettingKey::ShowDate => Value::Bool(false),
            SettingKey::ShowWeather => Value::Bool(true),
            SettingKey::CalendarDays => Value::from(7),
            SettingKey::Clock24h => Value::Bool(true),
            SettingKey::Timezone => Value::from("auto"),
        }
    }

    /// Coerces user-typed text into the JSON type this key stores.
    pub fn parse_value(self, text: &str) -> anyhow::Result<Value> {
        let text = text.trim();
        match self {
            SettingKey::ShowDate | SettingKey::ShowWeather | SettingKey::Clock24h => {
                parse_bool(text)
                    .map(Value::Bool)
                    .ok_or_else(|| anyhow!("{} expects on/off, got {text:?}", self.as_str()))
            }
            SettingKey::CalendarDays => match text.parse::<u32>() {
                Ok(days) if days > 0 => Ok(Value::from(days)),
                _ => Err(anyhow!(
                    "CALENDAR_DAYS expects a positive number of days, got {text:?}"
                )),
            },
            SettingKey::Theme => Ok(Value::from(text.parse::<Theme>()?.as_str())),
            SettingKey::Timezone => {
                TimezoneChoice::from_str(text)?;
                Ok(Value::from(text))
            }
            SettingKey::ClientId
            | SettingKey::ApiKey
            | SettingKey::WeatherApiKey
            | SettingKey::WeatherLocation
            | SettingKey::DashboardTitle => Ok(Value::from(text)),
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(&s.trim().to_ascii_uppercase())
            .ok_or_else(|| anyhow!("unknown setting: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub const fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

impl FromStr for Theme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(anyhow!("THEME expects light or dark, got {other:?}")),
        }
    }
}

/// The host environment's colour-scheme signal, consulted only when nothing
/// has been persisted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSchemePreference {
    #[default]
    NoPreference,
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimezoneChoice {
    Auto,
    Zone(Tz),
}

impl FromStr for TimezoneChoice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            return Ok(TimezoneChoice::Auto);
        }
        trimmed
            .parse::<Tz>()
            .map(TimezoneChoice::Zone)
            .map_err(|_| anyhow!("unknown timezone: {trimmed}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockFormat {
    pub show_date: bool,
    pub hour24: bool,
    pub timezone: TimezoneChoice,
}

impl ClockFormat {
    pub fn time_pattern(&self) -> &'static str {
        match (self.hour24, self.show_date) {
            (true, false) => "%H:%M",
            (false, false) => "%-I:%M %p",
            (true, true) => "%a, %b %-d %H:%M",
            (false, true) => "%a, %b %-d %-I:%M %p",
        }
    }

    pub fn render(&self, now: DateTime<Utc>) -> String {
        let pattern = self.time_pattern();
        match self.timezone {
            TimezoneChoice::Auto => now.with_timezone(&Local).format(pattern).to_string(),
            TimezoneChoice::Zone(tz) => now.with_timezone(&tz).format(pattern).to_string(),
        }
    }
}

/// Work a settings change asks the renderer (or the data layer) to do.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingEffect {
    SetTitle(String),
    ApplyTheme(Theme),
    RenderClock(ClockFormat),
    SetWeatherVisible(bool),
    RefreshWeather,
    ReinitApiClients,
    RefreshCalendar,
    RefreshTasks,
    RestoreColors,
    RefetchCalendar { days: u32 },
}

pub type EffectBuilder = fn(&Settings) -> SettingEffect;

fn set_title(s: &Settings) -> SettingEffect {
    SettingEffect::SetTitle(s.title())
}

fn apply_theme(s: &Settings) -> SettingEffect {
    SettingEffect::ApplyTheme(s.theme())
}

fn render_clock(s: &Settings) -> SettingEffect {
    SettingEffect::RenderClock(s.clock_format())
}

fn set_weather_visible(s: &Settings) -> SettingEffect {
    SettingEffect::SetWeatherVisible(s.show_weather())
}

fn refresh_weather(_: &Settings) -> SettingEffect {
    SettingEffect::RefreshWeather
}

fn reinit_api_clients(_: &Settings) -> SettingEffect {
    SettingEffect::ReinitApiClients
}

fn refresh_calendar(_: &Settings) -> SettingEffect {
    SettingEffect::RefreshCalendar
}

fn refresh_tasks(_: &Settings) -> SettingEffect {
    SettingEffect::RefreshTasks
}

fn restore_colors(_: &Settings) -> SettingEffect {
    SettingEffect::RestoreColors
}

fn refetch_calendar(s: &Settings) -> SettingEffect {
    SettingEffect::RefetchCalendar {
        days: s.calendar_days(),
    }
}

static EFFECT_REGISTRY: &[(SettingKey, &[EffectBuilder])] = &[
    (SettingKey::DashboardTitle, &[set_title]),
    (
        SettingKey::Theme,
        &[apply_theme, refresh_calendar, refresh_tasks, restore_colors],
    ),
    (SettingKey::ShowDate, &[render_clock]),
    (SettingKey::Clock24h, &[render_clock]),
    (
        SettingKey::Timezone,
        &[render_clock, refresh_calendar, refresh_tasks],
    ),
    (SettingKey::ShowWeather, &[set_weather_visible]),
    (SettingKey::WeatherApiKey, &[refresh_weather]),
    (SettingKey::WeatherLocation, &[refresh_weather]),
    (SettingKey::ClientId, &[reinit_api_clients]),
    (SettingKey::ApiKey, &[reinit_api_clients]),
    (SettingKey::CalendarDays, &[refetch_calendar]),
];

/// Effect builders registered for a key; empty for inert keys.
pub fn effects_for(key: SettingKey) -> &'static [EffectBuilder] {
    EFFECT_REGISTRY
        .iter()
        .find(|(registered, _)| *registered == key)
        .map(|(_, builders)| *builders)
        .unwrap_or(&[])
}

/// Builds the de-duplicated effect list for a set of changed key names,
/// evaluated against the post-change settings.
pub fn collect_effects(changed: &[String], settings: &Settings) -> Vec<SettingEffect> {
    let mut out: Vec<SettingEffect> = Vec::new();
    for name in changed {
        let Some(key) = SettingKey::from_name(name) else {
            continue;
        };
        for build in effects_for(key) {
            let effect = build(settings);
            if !out.contains(&effect) {
                out.push(effect);
            }
        }
    }
    out
}

/// The dashboard configuration. Every recognized key is always present;
/// unknown keys loaded from storage ride along untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Settings {
    values: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut values = Map::new();
        for key in SettingKey::ALL {
            values.insert(key.as_str().to_string(), key.default_value());
        }
        Self { values }
    }
}

impl Settings {
    pub fn from_persisted(persisted: Map<String, Value>) -> Self {
        let mut settings = Self::default();
        settings.values.extend(persisted);
        settings
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn merge(&mut self, patch: &SettingsPatch) {
        for (name, value) in patch.iter() {
            self.values.insert(name.clone(), value.clone());
        }
    }

    /// Names of patch entries whose value differs from the current one.
    pub fn changed_keys(&self, patch: &SettingsPatch) -> Vec<String> {
        patch
            .iter()
            .filter(|(name, value)| self.values.get(name.as_str()) != Some(*value))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn text(&self, key: SettingKey) -> String {
        match self.values.get(key.as_str()).and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => key
                .default_value()
                .as_str()
                .unwrap_or_default()
                .to_string(),
        }
    }

    fn flag(&self, key: SettingKey) -> bool {
        self.values
            .get(key.as_str())
            .and_then(Value::as_bool)
            .or_else(|| key.default_value().as_bool())
            .unwrap_or(false)
    }

    pub fn client_id(&self) -> String {
        self.text(SettingKey::ClientId)
    }

    pub fn api_key(&self) -> String {
        self.text(SettingKey::ApiKey)
    }

    pub fn has_api_credentials(&self) -> bool {
        !self.client_id().is_empty() && !self.api_key().is_empty()
    }

    pub fn weather_api_key(&self) -> String {
        self.text(SettingKey::WeatherApiKey)
    }

    pub fn weather_location(&self) -> String {
        self.text(SettingKey::WeatherLocation)
    }

    pub fn title(&self) -> String {
        self.text(SettingKey::DashboardTitle)
    }

    pub fn theme(&self) -> Theme {
        self.text(SettingKey::Theme)
            .parse()
            .unwrap_or(Theme::Light)
    }

    pub fn show_date(&self) -> bool {
        self.flag(SettingKey::ShowDate)
    }

    pub fn show_weather(&self) -> bool {
        self.flag(SettingKey::ShowWeather)
    }

    pub fn clock_24h(&self) -> bool {
        self.flag(SettingKey::Clock24h)
    }

    pub fn calendar_days(&self) -> u32 {
        let raw = self.values.get(SettingKey::CalendarDays.as_str());
        let days = match raw {
            Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Some(Value::String(s)) => s.trim().parse::<u32>().ok(),
            _ => None,
        };
        match days {
            Some(days) if days > 0 => days,
            _ => 7,
        }
    }

    pub fn timezone(&self) -> TimezoneChoice {
        self.text(SettingKey::Timezone)
            .parse()
            .unwrap_or(TimezoneChoice::Auto)
    }

    pub fn clock_format(&self) -> ClockFormat {
        ClockFormat {
            show_date: self.show_date(),
            hour24: self.clock_24h(),
            timezone: self.timezone(),
        }
    }
}

/// A partial settings update. Keys are kept sorted, so changes and effects
/// come out in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsPatch {
    values: Map<String, Value>,
}

impl SettingsPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: SettingKey, value: impl Into<Value>) -> Self {
        self.values.insert(key.as_str().to_string(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Map<String, Value>> for SettingsPatch {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

/// Owns the live configuration. All changes funnel through `apply`/`save`.
pub struct SettingsManager {
    settings: Settings,
    store: PersistentStore,
    ui: Arc<dyn UiSink>,
}

impl fmt::Debug for SettingsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SettingsManager {
    #[instrument(skip(store, ui))]
    pub fn load(
        store: PersistentStore,
        preference: ColorSchemePreference,
        ui: Arc<dyn UiSink>,
    ) -> Self {
        let persisted = store.load_opt::<Map<String, Value>>(StoreKey::Settings);
        let settings = match persisted {
            Some(map) => {
                debug!(keys = map.len(), "merging persisted settings over defaults");
                Settings::from_persisted(map)
            }
            None => {
                let mut settings = Settings::default();
                if preference == ColorSchemePreference::Dark {
                    info!("no saved settings; following dark colour-scheme preference");
                    settings.merge(
                        &SettingsPatch::new().set(SettingKey::Theme, Theme::Dark.as_str()),
                    );
                }
                settings
            }
        };

        let manager = Self {
            settings,
            store,
            ui,
        };
        for effect in [
            SettingEffect::SetTitle(manager.settings.title()),
            SettingEffect::ApplyTheme(manager.settings.theme()),
            SettingEffect::RenderClock(manager.settings.clock_format()),
            SettingEffect::SetWeatherVisible(manager.settings.show_weather()),
        ] {
            manager.ui.emit(UiEvent::Effect(effect));
        }
        manager
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Updates the in-memory configuration for every key whose value differs
    /// and dispatches the registered effects. Returns the changed keys.
    #[instrument(skip(self, patch))]
    pub fn apply(&mut self, patch: &SettingsPatch) -> Vec<String> {
        let changed = self.settings.changed_keys(patch);
        for (name, value) in patch.iter() {
            if changed.contains(name) {
                self.settings.values.insert(name.clone(), value.clone());
            }
        }
        self.dispatch(&changed);
        changed
    }

    /// Merges, persists the full configuration, then dispatches effects for
    /// keys that changed relative to the configuration before the merge.
    #[instrument(skip(self, patch))]
    pub fn save(&mut self, patch: &SettingsPatch) -> Vec<String> {
        let changed = self.settings.changed_keys(patch);
        self.settings.merge(patch);

        if let Err(err) = self.store.save(StoreKey::Settings, &self.settings) {
            error!(error = %format!("{err:#}"), "failed to persist settings");
            self.ui
                .emit(UiEvent::Notice(Notice::error("Failed to save settings")));
        }

        self.dispatch(&changed);
        if changed.is_empty() {
            debug!("settings saved without changes");
        } else {
            info!(changed = ?changed, "settings saved");
        }
        changed
    }

    fn dispatch(&self, changed: &[String]) {
        for name in changed {
            if SettingKey::from_name(name).is_none() {
                warn!(key = %name, "stored unrecognized setting");
            }
        }
        for effect in collect_effects(changed, &self.settings) {
            debug!(?effect, "dispatching setting effect");
            self.ui.emit(UiEvent::Effect(effect));
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "y" | "yes" | "on" | "true" => Some(true),
        "0" | "n" | "no" | "off" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::Value;

    use chrono::{TimeZone, Utc};

    use super::{
        ClockFormat, ColorSchemePreference, SettingEffect, SettingKey, SettingsManager,
        SettingsPatch, Theme, TimezoneChoice, collect_effects, effects_for,
    };
    use crate::storage::{LocalStorage, MemoryStorage};
    use crate::store::{PersistentStore, StoreKey};
    use crate::ui::UiEvent;

    fn fresh() -> (PersistentStore, Arc<Mutex<Vec<UiEvent>>>) {
        let store = PersistentStore::new(Arc::new(MemoryStorage::new()));
        (store, Arc::new(Mutex::new(Vec::new())))
    }

    fn effects(events: &Mutex<Vec<UiEvent>>) -> Vec<SettingEffect> {
        events
            .lock()
            .iter()
            .filter_map(|event| match event {
                UiEvent::Effect(effect) => Some(effect.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn saving_dark_theme_reports_theme_change() {
        let (store, ui) = fresh();
        let mut manager =
            SettingsManager::load(store, ColorSchemePreference::Light, ui.clone());
        ui.lock().clear();

        let changed =
            manager.save(&SettingsPatch::new().set(SettingKey::Theme, "dark"));

        assert_eq!(changed, vec!["THEME".to_string()]);
        assert_eq!(manager.settings().theme(), Theme::Dark);
        assert!(effects(&ui).contains(&SettingEffect::ApplyTheme(Theme::Dark)));
    }

    #[test]
    fn unchanged_values_produce_no_changes() {
        let (store, ui) = fresh();
        let mut manager = SettingsManager::load(store, ColorSchemePreference::NoPreference, ui.clone());
        ui.lock().clear();

        let changed = manager.apply(
            &SettingsPatch::new()
                .set(SettingKey::Theme, "light")
                .set(SettingKey::CalendarDays, 7),
        );
        assert!(changed.is_empty());
        assert!(ui.lock().is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let (store, ui) = fresh();
        let mut manager =
            SettingsManager::load(store.clone(), ColorSchemePreference::NoPreference, ui.clone());
        manager.save(
            &SettingsPatch::new()
                .set(SettingKey::DashboardTitle, "Home")
                .set(SettingKey::CalendarDays, 14)
                .set(SettingKey::Clock24h, false),
        );

        let reloaded = SettingsManager::load(store, ColorSchemePreference::Dark, ui);
        assert_eq!(reloaded.settings(), manager.settings());
        assert_eq!(reloaded.settings().title(), "Home");
        assert_eq!(reloaded.settings().calendar_days(), 14);
        assert_eq!(reloaded.settings().theme(), Theme::Light);
    }

    #[test]
    fn falls_back_to_environment_preference_without_saved_settings() {
        let (store, ui) = fresh();
        let manager = SettingsManager::load(store.clone(), ColorSchemePreference::Dark, ui);
        assert_eq!(manager.settings().theme(), Theme::Dark);
        assert!(!store.contains(StoreKey::Settings));
    }

    #[test]
    fn unknown_keys_survive_persistence() {
        let backend = Arc::new(MemoryStorage::new());
        backend
            .set_item(
                StoreKey::Settings.as_str(),
                r#"{"THEME":"dark","LEGACY_FLAG":true}"#,
            )
            .expect("seed");
        let store = PersistentStore::new(backend);
        let ui = Arc::new(Mutex::new(Vec::new()));
        let mut manager =
            SettingsManager::load(store.clone(), ColorSchemePreference::NoPreference, ui);

        assert_eq!(manager.settings().theme(), Theme::Dark);
        assert_eq!(manager.settings().title(), "Pash");

        manager.save(&SettingsPatch::new().set(SettingKey::ShowDate, true));
        let raw = store
            .load_opt::<serde_json::Map<String, Value>>(StoreKey::Settings)
            .expect("persisted");
        assert_eq!(raw.get("LEGACY_FLAG"), Some(&Value::Bool(true)));
    }

    #[test]
    fn registry_dedupes_shared_effects() {
        let settings = super::Settings::default();
        let found = collect_effects(
            &["CLOCK_24H".to_string(), "SHOW_DATE".to_string()],
            &settings,
        );
        assert_eq!(found.len(), 1);
        assert!(matches!(found[0], SettingEffect::RenderClock(_)));
        assert!(effects_for(SettingKey::ClientId).len() == 1);
    }

    #[test]
    fn calendar_window_change_requests_refetch() {
        let (store, ui) = fresh();
        let mut manager = SettingsManager::load(store, ColorSchemePreference::NoPreference, ui.clone());
        ui.lock().clear();
        manager.save(&SettingsPatch::new().set(SettingKey::CalendarDays, 3));
        assert_eq!(
            effects(&ui),
            vec![SettingEffect::RefetchCalendar { days: 3 }]
        );
    }

    #[test]
    fn parses_typed_values_at_the_boundary() {
        assert_eq!(
            SettingKey::ShowWeather.parse_value("off").expect("bool"),
            Value::Bool(false)
        );
        assert!(SettingKey::CalendarDays.parse_value("0").is_err());
        assert!(SettingKey::Theme.parse_value("sepia").is_err());
        assert!(SettingKey::Timezone.parse_value("Mars/Olympus").is_err());
        assert_eq!(
            SettingKey::Timezone
                .parse_value("Asia/Singapore")
                .expect("zone"),
            Value::from("Asia/Singapore")
        );
    }

    #[test]
    fn clock_renders_in_the_configured_zone() {
        let now = Utc
            .with_ymd_and_hms(2024, 5, 1, 13, 5, 0)
            .single()
            .expect("timestamp");
        let zone = TimezoneChoice::Zone(chrono_tz::Asia::Singapore);
        let h24 = ClockFormat {
            show_date: false,
            hour24: true,
            timezone: zone,
        };
        assert_eq!(h24.render(now), "21:05");

        let h12 = ClockFormat {
            show_date: true,
            hour24: false,
            timezone: zone,
        };
        assert_eq!(h12.render(now), "Wed, May 1 9:05 PM");
    }
}

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::api::{WeatherApi, WeatherQuery};
use crate::settings::Settings;
use crate::store::{PersistentStore, StoreKey};

/// Cached payloads younger than this are served without a fetch.
pub const FRESHNESS_MS: i64 = 600_000;

pub const MISSING_KEY: &str = "API key missing. Set in settings.";
pub const UNAVAILABLE: &str = "Weather unavailable";
pub const LOCATION_NOT_FOUND: &str = "Location not found";
pub const MALFORMED: &str = "Weather data error";

/// The displayable parts of a provider payload.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub temperature: f64,
    pub description: String,
    pub icon: String,
    pub place: Option<String>,
}

impl WeatherReport {
    pub fn from_payload(payload: &Value) -> Result<Self, &'static str> {
        let cod = payload.get("cod");
        if cod.and_then(Value::as_str) == Some("404") || cod.and_then(Value::as_i64) == Some(404) {
            return Err(LOCATION_NOT_FOUND);
        }
        let temperature = payload
            .pointer("/main/temp")
            .and_then(Value::as_f64)
            .ok_or(MALFORMED)?;
        let current = payload.pointer("/weather/0").ok_or(MALFORMED)?;
        let description = current
            .get("description")
            .and_then(Value::as_str)
            .ok_or(MALFORMED)?
            .to_string();
        let icon = current
            .get("icon")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let place = payload
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        Ok(Self {
            temperature,
            description,
            icon,
            place,
        })
    }

    pub fn rounded_celsius(&self) -> i64 {
        self.temperature.round() as i64
    }

    pub fn icon_url(&self) -> String {
        format!("https://openweathermap.org/img/wn/{}@2x.png", self.icon)
    }
}

impl fmt::Display for WeatherReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°C {}", self.rounded_celsius(), self.description)?;
        if let Some(place) = &self.place {
            write!(f, " ({place})")?;
        }
        Ok(())
    }
}

/// A payload together with when it was fetched. A payload whose fetch time
/// was lost is still usable, but never fresh.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSnapshot {
    pub payload: Value,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl WeatherSnapshot {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.fetched_at
            .is_some_and(|fetched_at| (now - fetched_at).num_milliseconds() < FRESHNESS_MS)
    }
}

/// What the weather panel should show.
#[derive(Debug, Clone, PartialEq)]
pub enum WeatherPanel {
    Live(WeatherReport),
    /// Served from storage; `stale` is set when a refresh just failed.
    Cached { report: WeatherReport, stale: bool },
    Unavailable(String),
}

impl fmt::Display for WeatherPanel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeatherPanel::Live(report) | WeatherPanel::Cached { report, stale: false } => {
                write!(f, "{report}")
            }
            WeatherPanel::Cached { report, stale: true } => {
                write!(f, "{report} [using cached data, failed to update]")
            }
            WeatherPanel::Unavailable(reason) => f.write_str(reason),
        }
    }
}

pub fn load_snapshot(store: &PersistentStore) -> Option<WeatherSnapshot> {
    let payload = store.load_opt::<Value>(StoreKey::CachedWeather)?;
    let fetched_at = store
        .load_opt::<i64>(StoreKey::LastWeatherUpdate)
        .and_then(DateTime::from_timestamp_millis);
    if fetched_at.is_none() {
        debug!("cached weather has no fetch time");
    }
    Some(WeatherSnapshot {
        payload,
        fetched_at,
    })
}

pub fn save_snapshot(store: &PersistentStore, snapshot: &WeatherSnapshot) -> anyhow::Result<()> {
    store.save(StoreKey::CachedWeather, &snapshot.payload)?;
    match snapshot.fetched_at {
        Some(fetched_at) => store.save(StoreKey::LastWeatherUpdate, &fetched_at.timestamp_millis()),
        None => store.remove(StoreKey::LastWeatherUpdate),
    }
}

fn panel_from(payload: &Value, live: bool, stale: bool) -> WeatherPanel {
    match WeatherReport::from_payload(payload) {
        Ok(report) if live => WeatherPanel::Live(report),
        Ok(report) => WeatherPanel::Cached { report, stale },
        Err(reason) => WeatherPanel::Unavailable(reason.to_string()),
    }
}

pub struct WeatherService {
    store: PersistentStore,
    api: Arc<dyn WeatherApi>,
}

impl fmt::Debug for WeatherService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeatherService").finish_non_exhaustive()
    }
}

impl WeatherService {
    pub fn new(store: PersistentStore, api: Arc<dyn WeatherApi>) -> Self {
        Self { store, api }
    }

    /// Serves a fresh cached payload, otherwise fetches by `coordinates`
    /// when known or by the configured location name. A failed fetch falls
    /// back to whatever is cached.
    #[instrument(skip(self, settings))]
    pub async fn panel(
        &self,
        settings: &Settings,
        coordinates: Option<(f64, f64)>,
        now: DateTime<Utc>,
    ) -> WeatherPanel {
        let cached = load_snapshot(&self.store);
        if let Some(snapshot) = &cached
            && snapshot.is_fresh(now)
        {
            debug!(fetched_at = ?snapshot.fetched_at, "serving cached weather");
            return panel_from(&snapshot.payload, false, false);
        }

        let api_key = settings.weather_api_key();
        if api_key.trim().is_empty() {
            return WeatherPanel::Unavailable(MISSING_KEY.to_string());
        }

        let query = match coordinates {
            Some((lat, lon)) => WeatherQuery::Coordinates { lat, lon },
            None => WeatherQuery::City(settings.weather_location()),
        };

        match self.api.current(&api_key, &query).await {
            Ok(payload) => {
                let snapshot = WeatherSnapshot {
                    payload,
                    fetched_at: Some(now),
                };
                if let Err(err) = save_snapshot(&self.store, &snapshot) {
                    warn!(error = %format!("{err:#}"), "failed to cache weather");
                }
                info!(?query, "fetched weather");
                panel_from(&snapshot.payload, true, false)
            }
            Err(err) => {
                warn!(error = %err, "weather fetch failed");
                match cached {
                    Some(snapshot) => panel_from(&snapshot.payload, false, true),
                    None => WeatherPanel::Unavailable(UNAVAILABLE.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    use super::{WeatherPanel, WeatherReport, WeatherService, WeatherSnapshot, save_snapshot};
    use crate::api::{ApiError, ApiResult, WeatherApi, WeatherQuery};
    use crate::settings::{SettingKey, Settings, SettingsPatch};
    use crate::storage::MemoryStorage;
    use crate::store::{PersistentStore, StoreKey};

    struct FakeWeather {
        response: ApiResult<Value>,
        queries: Mutex<Vec<WeatherQuery>>,
    }

    #[async_trait]
    impl WeatherApi for FakeWeather {
        async fn current(&self, _api_key: &str, query: &WeatherQuery) -> ApiResult<Value> {
            self.queries.lock().push(query.clone());
            self.response.clone()
        }
    }

    fn payload(temp: f64) -> Value {
        json!({
            "name": "Singapore",
            "main": { "temp": temp },
            "weather": [{ "description": "light rain", "icon": "10d" }]
        })
    }

    fn keyed_settings() -> Settings {
        let mut settings = Settings::default();
        settings.merge(&SettingsPatch::new().set(SettingKey::WeatherApiKey, "k"));
        settings
    }

    fn service(response: ApiResult<Value>) -> (PersistentStore, Arc<FakeWeather>, WeatherService) {
        let store = PersistentStore::new(Arc::new(MemoryStorage::new()));
        let api = Arc::new(FakeWeather {
            response,
            queries: Mutex::new(Vec::new()),
        });
        let service = WeatherService::new(store.clone(), api.clone());
        (store, api, service)
    }

    #[test]
    fn report_reads_provider_payload() {
        let report = WeatherReport::from_payload(&payload(27.6)).expect("report");
        assert_eq!(report.rounded_celsius(), 28);
        assert_eq!(report.description, "light rain");
        assert_eq!(report.icon_url(), "https://openweathermap.org/img/wn/10d@2x.png");
        assert_eq!(
            WeatherReport::from_payload(&json!({"cod": "404"})),
            Err(super::LOCATION_NOT_FOUND)
        );
    }

    #[tokio::test]
    async fn failure_without_cache_is_unavailable() {
        let (_, _, service) = service(Err(ApiError::Transport("offline".to_string())));
        let panel = service.panel(&keyed_settings(), None, Utc::now()).await;
        assert_eq!(panel, WeatherPanel::Unavailable(super::UNAVAILABLE.to_string()));
    }

    #[tokio::test]
    async fn failure_with_old_cache_is_flagged_stale() {
        let (store, _, service) = service(Err(ApiError::Transport("offline".to_string())));
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("timestamp");
        save_snapshot(
            &store,
            &WeatherSnapshot {
                payload: payload(20.0),
                fetched_at: Some(now - Duration::hours(1)),
            },
        )
        .expect("seed");

        let panel = service.panel(&keyed_settings(), None, now).await;
        assert!(matches!(panel, WeatherPanel::Cached { stale: true, .. }));
    }

    #[tokio::test]
    async fn cache_without_fetch_time_is_still_a_fallback() {
        let (store, api, service) = service(Err(ApiError::Transport("offline".to_string())));
        store
            .save(StoreKey::CachedWeather, &payload(18.0))
            .expect("seed payload");
        assert!(!store.contains(StoreKey::LastWeatherUpdate));

        let panel = service.panel(&keyed_settings(), None, Utc::now()).await;
        match panel {
            WeatherPanel::Cached { report, stale } => {
                assert!(stale);
                assert_eq!(report.rounded_celsius(), 18);
            }
            other => panic!("expected cached weather, got {other:?}"),
        }
        assert_eq!(api.queries.lock().len(), 1);
    }

    #[tokio::test]
    async fn fresh_cache_skips_the_fetch() {
        let (store, api, service) = service(Ok(payload(30.0)));
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("timestamp");
        save_snapshot(
            &store,
            &WeatherSnapshot {
                payload: payload(20.0),
                fetched_at: Some(now - Duration::minutes(5)),
            },
        )
        .expect("seed");

        let panel = service.panel(&keyed_settings(), None, now).await;
        assert!(matches!(panel, WeatherPanel::Cached { stale: false, .. }));
        assert!(api.queries.lock().is_empty());
    }

    #[tokio::test]
    async fn fetch_prefers_coordinates_and_caches() {
        let (store, api, service) = service(Ok(payload(30.0)));
        let now = Utc::now();
        let panel = service
            .panel(&keyed_settings(), Some((1.3, 103.8)), now)
            .await;
        assert!(matches!(panel, WeatherPanel::Live(_)));
        assert_eq!(
            *api.queries.lock(),
            vec![WeatherQuery::Coordinates { lat: 1.3, lon: 103.8 }]
        );
        assert!(super::load_snapshot(&store).is_some());
    }

    #[tokio::test]
    async fn missing_key_is_reported() {
        let (_, api, service) = service(Ok(payload(30.0)));
        let panel = service.panel(&Settings::default(), None, Utc::now()).await;
        assert_eq!(panel, WeatherPanel::Unavailable(super::MISSING_KEY.to_string()));
        assert!(api.queries.lock().is_empty());
    }
}

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone, Utc};
use tracing::{debug, instrument};

use crate::annotations::{HiddenItems, ItemKind};
use crate::api::{ApiResult, CalendarApi, CalendarEvent, EventTime};
use crate::settings::{Settings, TimezoneChoice};

/// The query window for upcoming events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWindow {
    pub time_min: DateTime<Utc>,
    pub time_max: DateTime<Utc>,
}

fn midnight_in<Z: TimeZone>(now: DateTime<Utc>, zone: &Z) -> DateTime<Utc> {
    let local = now.with_timezone(zone).date_naive().and_time(NaiveTime::MIN);
    zone.from_local_datetime(&local)
        .earliest()
        .map(|start| start.with_timezone(&Utc))
        .unwrap_or(now)
}

/// Midnight of `now`'s calendar day in the chosen zone.
pub fn start_of_day(now: DateTime<Utc>, timezone: TimezoneChoice) -> DateTime<Utc> {
    match timezone {
        TimezoneChoice::Auto => midnight_in(now, &Local),
        TimezoneChoice::Zone(tz) => midnight_in(now, &tz),
    }
}

/// From the start of today to `days` days later.
pub fn event_window(now: DateTime<Utc>, days: u32, timezone: TimezoneChoice) -> EventWindow {
    let time_min = start_of_day(now, timezone);
    let time_max = time_min
        .checked_add_days(Days::new(u64::from(days)))
        .unwrap_or(time_min);
    EventWindow { time_min, time_max }
}

impl EventTime {
    /// All-day events sort at midnight UTC of their date.
    pub fn sort_key(&self) -> DateTime<Utc> {
        match self {
            EventTime::DateTime(at) => *at,
            EventTime::Date(date) => date.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    pub fn is_all_day(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }
}

/// Fetches events in the configured window, drops hidden ones, and orders
/// them by start.
#[instrument(skip(api, settings, hidden))]
pub async fn load_events(
    api: &dyn CalendarApi,
    settings: &Settings,
    hidden: &HiddenItems,
    now: DateTime<Utc>,
) -> ApiResult<Vec<CalendarEvent>> {
    let window = event_window(now, settings.calendar_days(), settings.timezone());
    let mut events = api.list_events(window.time_min, window.time_max).await?;
    let fetched = events.len();
    events.retain(|event| !hidden.contains(ItemKind::Event, &event.id));
    events.sort_by_key(|event| event.start.sort_key());
    debug!(fetched, shown = events.len(), "loaded calendar events");
    Ok(events)
}

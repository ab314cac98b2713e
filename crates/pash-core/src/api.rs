//! Narrow interfaces to the external calendar, task, weather and auth
//! providers. The HTTP clients behind them live outside this crate.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The bearer token was rejected (HTTP 401).
    #[error("authentication expired")]
    Unauthorized,

    #[error("request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if status == 401 {
            ApiError::Unauthorized
        } else {
            ApiError::Http {
                status,
                message: message.into(),
            }
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "needsAction")]
    NeedsAction,
    #[serde(rename = "completed")]
    Completed,
}

impl TaskStatus {
    pub fn from_completed(completed: bool) -> Self {
        if completed {
            TaskStatus::Completed
        } else {
            TaskStatus::NeedsAction
        }
    }

    pub fn is_completed(self) -> bool {
        self == TaskStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskList {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTask {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub due: Option<DateTime<Utc>>,
}

/// All-day events carry a date, timed events a date-time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventTime {
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WeatherQuery {
    Coordinates { lat: f64, lon: f64 },
    City(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    /// Lifetime in seconds as reported by the provider.
    pub expires_in: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn list_task_lists(&self) -> ApiResult<Vec<TaskList>>;
    async fn insert_task_list(&self, title: &str) -> ApiResult<TaskList>;
    async fn list_tasks(&self, list_id: &str) -> ApiResult<Vec<RemoteTask>>;
    async fn insert_task(&self, list_id: &str, title: &str) -> ApiResult<RemoteTask>;
    async fn update_status(
        &self,
        list_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> ApiResult<RemoteTask>;
    async fn delete_task(&self, list_id: &str, task_id: &str) -> ApiResult<()>;
}

#[async_trait]
pub trait CalendarApi: Send + Sync {
    async fn list_events(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> ApiResult<Vec<CalendarEvent>>;
}

#[async_trait]
pub trait WeatherApi: Send + Sync {
    /// Returns the provider's raw JSON payload.
    async fn current(&self, api_key: &str, query: &WeatherQuery) -> ApiResult<Value>;
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn request_token(&self, client_id: &str) -> ApiResult<AccessToken>;
    async fn revoke(&self, access_token: &str) -> ApiResult<()>;
}

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::annotations::ItemKind;
use crate::api::ApiError;
use crate::refresh::RefreshTarget;
use crate::settings::SettingEffect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A transient, dismissible notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub duration: Duration,
}

impl Notice {
    pub const DEFAULT_DURATION: Duration = Duration::from_secs(3);

    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            duration: Self::DEFAULT_DURATION,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }

    pub fn lasting(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Everything the core asks of the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Effect(SettingEffect),
    Notice(Notice),
    NotesChanged,
    ItemHidden { kind: ItemKind, id: String },
    ColorChanged { kind: ItemKind, id: String, color: Option<String> },
    TaskRowChanged { task_id: String },
    Reauthenticate,
    ResyncTasks,
    Refresh(RefreshTarget),
}

pub trait UiSink: Send + Sync {
    fn emit(&self, event: UiEvent);
}

impl UiSink for UnboundedSender<UiEvent> {
    fn emit(&self, event: UiEvent) {
        if let Err(err) = self.send(event) {
            debug!(event = ?err.0, "ui receiver dropped; event discarded");
        }
    }
}

/// Buffers events in memory; handy for headless runs and tests.
impl UiSink for Mutex<Vec<UiEvent>> {
    fn emit(&self, event: UiEvent) {
        self.lock().push(event);
    }
}

/// Writes events to the log instead of a screen.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl UiSink for LogSink {
    fn emit(&self, event: UiEvent) {
        match event {
            UiEvent::Notice(notice) => match notice.level {
                NoticeLevel::Warning | NoticeLevel::Error => {
                    warn!(level = ?notice.level, "{}", notice.message)
                }
                NoticeLevel::Info | NoticeLevel::Success => {
                    info!(level = ?notice.level, "{}", notice.message)
                }
            },
            other => debug!(event = ?other, "ui event"),
        }
    }
}

/// Converts a provider failure into the user-facing reaction: a rejected token
/// asks for re-authentication, anything else becomes an error notice.
pub fn report_api_error(ui: &dyn UiSink, err: &ApiError, failure_message: &str) {
    if err.is_unauthorized() {
        warn!("provider rejected the access token");
        ui.emit(UiEvent::Notice(Notice::warning(
            "Authentication expired. Reconnecting...",
        )));
        ui.emit(UiEvent::Reauthenticate);
    } else {
        warn!(error = %err, "{failure_message}");
        ui.emit(UiEvent::Notice(Notice::error(failure_message)));
    }
}

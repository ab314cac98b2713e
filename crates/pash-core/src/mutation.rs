//! Delayed, cancellable commits of task mutations.
//!
//! The UI reflects a completion or deletion immediately; the call to the task
//! provider only happens once the undo window has elapsed. Undo cancels the
//! timer and no request is made. Scheduling again for the same task replaces
//! the pending mutation, so at most one timer per task is live.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::api::{TaskApi, TaskStatus};
use crate::tasks::TaskBoard;
use crate::ui::{Notice, UiEvent, UiSink, report_api_error};

pub const DEFAULT_COMMIT_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    SetCompleted(bool),
    Delete,
}

impl MutationKind {
    fn describe(self) -> &'static str {
        match self {
            MutationKind::SetCompleted(true) => "marked as completed",
            MutationKind::SetCompleted(false) => "marked as uncompleted",
            MutationKind::Delete => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("task {0} is not on the board")]
    UnknownTask(String),
    #[error("no async runtime to run the commit timer on")]
    NoRuntime,
}

/// Snapshot of a pending mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingMutation {
    pub kind: MutationKind,
    pub commit_at: DateTime<Utc>,
}

struct PendingEntry {
    ticket: u64,
    kind: MutationKind,
    commit_at: DateTime<Utc>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    api: Arc<dyn TaskApi>,
    ui: Arc<dyn UiSink>,
    board: Arc<Mutex<TaskBoard>>,
    pending: Mutex<HashMap<String, PendingEntry>>,
}

pub struct MutationScheduler {
    shared: Arc<Shared>,
    delay: Duration,
    next_ticket: AtomicU64,
}

impl fmt::Debug for MutationScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationScheduler")
            .field("delay", &self.delay)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl MutationScheduler {
    pub fn new(api: Arc<dyn TaskApi>, ui: Arc<dyn UiSink>, board: Arc<Mutex<TaskBoard>>) -> Self {
        Self::with_delay(api, ui, board, DEFAULT_COMMIT_DELAY)
    }

    pub fn with_delay(
        api: Arc<dyn TaskApi>,
        ui: Arc<dyn UiSink>,
        board: Arc<Mutex<TaskBoard>>,
        delay: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                api,
                ui,
                board,
                pending: Mutex::new(HashMap::new()),
            }),
            delay,
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn board(&self) -> &Arc<Mutex<TaskBoard>> {
        &self.shared.board
    }

    pub fn pending(&self, task_id: &str) -> Option<PendingMutation> {
        self.shared
            .pending
            .lock()
            .get(task_id)
            .map(|entry| PendingMutation {
                kind: entry.kind,
                commit_at: entry.commit_at,
            })
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Shows the intended end state right away and arms the commit timer on
    /// the current tokio runtime. Nothing changes when there is none.
    #[instrument(skip(self))]
    pub fn schedule(
        &self,
        task_id: &str,
        kind: MutationKind,
    ) -> Result<PendingMutation, MutationError> {
        let runtime = Handle::try_current().map_err(|err| {
            warn!(%err, "cannot arm mutation timer");
            MutationError::NoRuntime
        })?;
        let title = {
            let mut board = self.shared.board.lock();
            let row = board
                .row_mut(task_id)
                .ok_or_else(|| MutationError::UnknownTask(task_id.to_string()))?;
            row.pending = Some(kind);
            row.title.clone()
        };
        self.shared.ui.emit(UiEvent::TaskRowChanged {
            task_id: task_id.to_string(),
        });

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let commit_at = Utc::now()
            + chrono::Duration::from_std(self.delay).unwrap_or(chrono::Duration::zero());
        let cancel = CancellationToken::new();

        // The entry must be registered before the timer can observe it.
        let replaced = {
            let mut pending = self.shared.pending.lock();
            let handle = runtime.spawn(run_timer(
                self.shared.clone(),
                task_id.to_string(),
                ticket,
                self.delay,
                cancel.clone(),
            ));
            pending.insert(
                task_id.to_string(),
                PendingEntry {
                    ticket,
                    kind,
                    commit_at,
                    cancel,
                    handle,
                },
            )
        };
        if let Some(previous) = replaced {
            debug!(previous = ?previous.kind, "replacing pending mutation");
            previous.cancel.cancel();
        }

        let subject = if title.is_empty() {
            "Task".to_string()
        } else {
            format!("\"{title}\"")
        };
        self.shared.ui.emit(UiEvent::Notice(
            Notice::info(format!(
                "{subject} will be {} in {} seconds. Click undo to cancel.",
                kind.describe(),
                self.delay.as_secs()
            ))
            .lasting(self.delay),
        ));
        info!(?kind, ticket, "armed task mutation");

        Ok(PendingMutation { kind, commit_at })
    }

    /// Cancels the pending mutation for `task_id`, restoring the row. Returns
    /// `false` when nothing was pending.
    #[instrument(skip(self))]
    pub fn undo(&self, task_id: &str) -> bool {
        let Some(entry) = self.shared.pending.lock().remove(task_id) else {
            return false;
        };
        entry.cancel.cancel();

        if let Some(row) = self.shared.board.lock().row_mut(task_id) {
            row.pending = None;
        }
        self.shared.ui.emit(UiEvent::TaskRowChanged {
            task_id: task_id.to_string(),
        });
        self.shared
            .ui
            .emit(UiEvent::Notice(Notice::success("Action cancelled")));
        info!(kind = ?entry.kind, "undid task mutation");
        true
    }

    /// Drops every pending mutation without committing it.
    pub fn shutdown(&self) {
        let drained: Vec<(String, PendingEntry)> = self.shared.pending.lock().drain().collect();
        for (task_id, entry) in drained {
            debug!(%task_id, "abandoning pending mutation");
            entry.cancel.cancel();
            entry.handle.abort();
        }
    }
}

impl Drop for MutationScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_timer(
    shared: Arc<Shared>,
    task_id: String,
    ticket: u64,
    delay: Duration,
    cancel: CancellationToken,
) {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(%task_id, ticket, "mutation timer cancelled");
            return;
        }
        _ = tokio::time::sleep(delay) => {}
    }

    let kind = {
        let mut pending = shared.pending.lock();
        match pending.get(&task_id) {
            Some(entry) if entry.ticket == ticket => {}
            _ => return,
        }
        match pending.remove(&task_id) {
            Some(entry) => entry.kind,
            None => return,
        }
    };

    commit(&shared, &task_id, kind).await;
}

#[instrument(skip(shared))]
async fn commit(shared: &Shared, task_id: &str, kind: MutationKind) {
    let list_id = {
        let board = shared.board.lock();
        board
            .row(task_id)
            .map(|row| row.list_id.clone())
            .or_else(|| board.list().map(|list| list.id.clone()))
    };
    let Some(list_id) = list_id else {
        warn!("no task list for pending mutation");
        shared.ui.emit(UiEvent::Notice(Notice::error(
            "Task list not found. Please reload.",
        )));
        return;
    };

    let result = match kind {
        MutationKind::SetCompleted(completed) => shared
            .api
            .update_status(&list_id, task_id, TaskStatus::from_completed(completed))
            .await
            .map(|_| ()),
        MutationKind::Delete => shared.api.delete_task(&list_id, task_id).await,
    };

    match result {
        Ok(()) => {
            {
                let mut board = shared.board.lock();
                match kind {
                    MutationKind::SetCompleted(true) | MutationKind::Delete => {
                        board.remove(task_id);
                    }
                    MutationKind::SetCompleted(false) => {
                        if let Some(row) = board.row_mut(task_id) {
                            row.status = TaskStatus::NeedsAction;
                            row.pending = None;
                        }
                    }
                }
            }
            shared.ui.emit(UiEvent::TaskRowChanged {
                task_id: task_id.to_string(),
            });
            let message = match kind {
                MutationKind::Delete => "Task deleted successfully",
                MutationKind::SetCompleted(_) => "Task updated successfully",
            };
            shared.ui.emit(UiEvent::Notice(Notice::success(message)));
            info!(?kind, "committed task mutation");
        }
        Err(err) => {
            let failure = match kind {
                MutationKind::Delete => "Error deleting task. Please try again.",
                MutationKind::SetCompleted(_) => "Error updating task. Please try again.",
            };
            if let Some(row) = shared.board.lock().row_mut(task_id) {
                row.pending = None;
            }
            shared.ui.emit(UiEvent::TaskRowChanged {
                task_id: task_id.to_string(),
            });
            report_api_error(shared.ui.as_ref(), &err, failure);
            if !err.is_unauthorized() {
                shared.ui.emit(UiEvent::ResyncTasks);
            }
        }
    }
}

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::annotations::{HiddenItems, ItemKind};
use crate::api::{ApiResult, RemoteTask, TaskApi, TaskList, TaskStatus};
use crate::mutation::MutationKind;

pub const DEFAULT_TASK_LIST_TITLE: &str = "My Tasks";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub id: String,
    pub list_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub due: Option<DateTime<Utc>>,
    pub pending: Option<MutationKind>,
}

/// How a task row should look. A pure function of the row's status and any
/// pending mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowAppearance {
    pub checked: bool,
    pub struck_through: bool,
    pub pending_deletion: bool,
    pub undo_visible: bool,
    pub delete_visible: bool,
}

impl TaskRow {
    pub fn from_remote(list_id: &str, task: RemoteTask) -> Self {
        Self {
            id: task.id,
            list_id: list_id.to_string(),
            title: task.title,
            status: task.status,
            due: task.due,
            pending: None,
        }
    }

    pub fn appearance(&self) -> RowAppearance {
        let completed = self.status.is_completed();
        match self.pending {
            None => RowAppearance {
                checked: completed,
                struck_through: completed,
                pending_deletion: false,
                undo_visible: false,
                delete_visible: true,
            },
            Some(MutationKind::SetCompleted(intended)) => RowAppearance {
                checked: intended,
                struck_through: intended,
                pending_deletion: false,
                undo_visible: true,
                delete_visible: false,
            },
            Some(MutationKind::Delete) => RowAppearance {
                checked: completed,
                struck_through: completed,
                pending_deletion: true,
                undo_visible: true,
                delete_visible: false,
            },
        }
    }
}

/// The tasks section's view model: the active list and its visible rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskBoard {
    list: Option<TaskList>,
    rows: Vec<TaskRow>,
}

impl TaskBoard {
    pub fn from_remote(list: TaskList, tasks: Vec<RemoteTask>, hidden: &HiddenItems) -> Self {
        let rows = tasks
            .into_iter()
            .filter(|task| !hidden.contains(ItemKind::Task, &task.id))
            .map(|task| TaskRow::from_remote(&list.id, task))
            .collect();
        Self {
            list: Some(list),
            rows,
        }
    }

    pub fn list(&self) -> Option<&TaskList> {
        self.list.as_ref()
    }

    pub fn rows(&self) -> &[TaskRow] {
        &self.rows
    }

    pub fn row(&self, task_id: &str) -> Option<&TaskRow> {
        self.rows.iter().find(|row| row.id == task_id)
    }

    pub fn row_mut(&mut self, task_id: &str) -> Option<&mut TaskRow> {
        self.rows.iter_mut().find(|row| row.id == task_id)
    }

    pub fn remove(&mut self, task_id: &str) -> Option<TaskRow> {
        let idx = self.rows.iter().position(|row| row.id == task_id)?;
        Some(self.rows.remove(idx))
    }

    pub fn appearance(&self, task_id: &str) -> Option<RowAppearance> {
        self.row(task_id).map(TaskRow::appearance)
    }

    /// Drops rows the user has hidden since the board was loaded.
    pub fn retain_visible(&mut self, hidden: &HiddenItems) {
        self.rows
            .retain(|row| !hidden.contains(ItemKind::Task, &row.id));
    }
}

/// Loads the first task list (creating one when the account has none) and
/// its tasks, minus hidden ones.
#[instrument(skip(api, hidden))]
pub async fn load_board(api: &dyn TaskApi, hidden: &HiddenItems) -> ApiResult<TaskBoard> {
    let lists = api.list_task_lists().await?;
    let list = match lists.into_iter().next() {
        Some(list) => list,
        None => {
            info!("no task lists found; creating a default list");
            api.insert_task_list(DEFAULT_TASK_LIST_TITLE).await?
        }
    };

    debug!(list_id = %list.id, title = %list.title, "using task list");
    let tasks = api.list_tasks(&list.id).await?;
    debug!(count = tasks.len(), "retrieved tasks");
    Ok(TaskBoard::from_remote(list, tasks, hidden))
}

/// Inserts a task with `title`; blank titles are ignored and yield `None`.
#[instrument(skip(api))]
pub async fn add_task(
    api: &dyn TaskApi,
    list_id: &str,
    title: &str,
) -> ApiResult<Option<RemoteTask>> {
    let title = title.trim();
    if title.is_empty() {
        return Ok(None);
    }
    let task = api.insert_task(list_id, title).await?;
    info!(task_id = %task.id, "added task");
    Ok(Some(task))
}

#[cfg(test)]
mod tests {
    use super::{TaskBoard, TaskRow};
    use crate::annotations::HiddenItems;
    use crate::api::{RemoteTask, TaskList, TaskStatus};
    use crate::mutation::MutationKind;

    fn remote(id: &str, status: TaskStatus) -> RemoteTask {
        RemoteTask {
            id: id.to_string(),
            title: format!("task {id}"),
            status,
            due: None,
        }
    }

    #[test]
    fn board_skips_hidden_tasks() {
        let hidden = HiddenItems {
            event: vec![],
            task: vec!["b".to_string()],
        };
        let board = TaskBoard::from_remote(
            TaskList {
                id: "L".to_string(),
                title: "My Tasks".to_string(),
            },
            vec![
                remote("a", TaskStatus::NeedsAction),
                remote("b", TaskStatus::NeedsAction),
            ],
            &hidden,
        );
        let ids: Vec<&str> = board.rows().iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert_eq!(board.rows()[0].list_id, "L");
    }

    #[test]
    fn appearance_follows_pending_intent() {
        let mut row = TaskRow::from_remote("L", remote("a", TaskStatus::NeedsAction));
        let idle = row.appearance();
        assert!(!idle.checked && idle.delete_visible && !idle.undo_visible);

        row.pending = Some(MutationKind::SetCompleted(true));
        let pending = row.appearance();
        assert!(pending.checked && pending.struck_through && pending.undo_visible);
        assert!(!pending.delete_visible);

        row.pending = Some(MutationKind::Delete);
        assert!(row.appearance().pending_deletion);

        row.pending = None;
        assert_eq!(row.appearance(), idle);
    }
}

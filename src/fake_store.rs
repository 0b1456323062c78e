//! In-memory `RemoteStore` used by the session and gateway tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Mutex;

use crate::api::{CreatedTask, RemoteStore, SavedLine, StatusUpdate};
use crate::error::{PutawayError, Result};
use crate::model::{AppSnapshot, DraftLine, Line, Task, TaskStatus, User};

#[derive(Default)]
struct State {
    snapshot: AppSnapshot,
    next_id: u32,
    calls: Vec<String>,
    failing_actions: HashSet<String>,
    failing_tasks: HashSet<String>,
    saves_before_failure: Option<usize>,
    offline: bool,
}

impl State {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }

    fn enter(&mut self, action: &str) -> Result<()> {
        self.calls.push(action.to_string());
        if self.offline {
            return Err(PutawayError::Transport("Cannot reach task store".into()));
        }
        if self.failing_actions.contains(action) {
            return Err(PutawayError::Backend(format!("{action} rejected")));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: AppSnapshot) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().snapshot = snapshot;
        store
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn fail_action(&self, action: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_actions
            .insert(action.to_string());
    }

    pub fn fail_task(&self, task_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_tasks
            .insert(task_id.to_string());
    }

    /// Let `n` `saveLine` calls through, then reject the rest.
    pub fn fail_after_saves(&self, n: usize) {
        self.state.lock().unwrap().saves_before_failure = Some(n);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn snapshot(&self) -> AppSnapshot {
        self.state.lock().unwrap().snapshot.clone()
    }

    /// Mutate the backend behind the session's back.
    pub fn push_line(&self, task_id: &str, bin_id: &str, sku_id: &str, qty: u32) {
        let mut st = self.state.lock().unwrap();
        let id = st.next("L");
        st.snapshot.lines.push(Line {
            id,
            task_id: task_id.to_string(),
            bin_id: bin_id.to_string(),
            sku_id: sku_id.to_string(),
            qty,
            remarks: None,
            scanned_at: Some(Utc::now()),
        });
    }
}

pub fn task(id: &str, status: TaskStatus, created_at: DateTime<Utc>) -> Task {
    Task {
        id: id.to_string(),
        code: Some(format!("PA-{id}")),
        status,
        created_at,
        closed_at: None,
        device_id: "dev-00000000".into(),
        closed_by: None,
    }
}

pub fn line(id: &str, task_id: &str, bin_id: &str, sku_id: &str, qty: u32) -> Line {
    Line {
        id: id.to_string(),
        task_id: task_id.to_string(),
        bin_id: bin_id.to_string(),
        sku_id: sku_id.to_string(),
        qty,
        remarks: None,
        scanned_at: None,
    }
}

#[async_trait]
impl RemoteStore for FakeStore {
    async fn fetch_app_data(&self) -> Result<AppSnapshot> {
        let mut st = self.state.lock().unwrap();
        st.enter("getAppData")?;
        Ok(st.snapshot.clone())
    }

    async fn create_task_with_lines(
        &self,
        device_id: &str,
        created_at: DateTime<Utc>,
        lines: &[DraftLine],
    ) -> Result<CreatedTask> {
        let mut st = self.state.lock().unwrap();
        st.enter("createTaskWithLines")?;
        let task_id = st.next("T");
        let code = format!("PA-{task_id}");
        st.snapshot.tasks.push(Task {
            id: task_id.clone(),
            code: Some(code.clone()),
            status: TaskStatus::Open,
            created_at,
            closed_at: None,
            device_id: device_id.to_string(),
            closed_by: None,
        });
        for draft in lines {
            let id = st.next("L");
            st.snapshot.lines.push(Line {
                id,
                task_id: task_id.clone(),
                bin_id: draft.bin_id.clone(),
                sku_id: draft.sku_id.clone(),
                qty: draft.qty,
                remarks: draft.remarks.clone(),
                scanned_at: Some(draft.scanned_at),
            });
        }
        Ok(CreatedTask {
            task_id,
            code: Some(code),
        })
    }

    async fn save_line(
        &self,
        device_id: &str,
        _user_id: &str,
        bin_id: &str,
        sku_id: &str,
        qty: u32,
    ) -> Result<SavedLine> {
        let mut st = self.state.lock().unwrap();
        st.enter("saveLine")?;
        if let Some(left) = st.saves_before_failure {
            if left == 0 {
                return Err(PutawayError::Backend("saveLine rejected".into()));
            }
            st.saves_before_failure = Some(left - 1);
        }
        let existing = st
            .snapshot
            .tasks
            .iter()
            .find(|t| t.device_id == device_id && t.status == TaskStatus::InProgress)
            .map(|t| t.id.clone());
        let task_id = match existing {
            Some(id) => id,
            None => {
                let id = st.next("T");
                st.snapshot.tasks.push(Task {
                    id: id.clone(),
                    code: None,
                    status: TaskStatus::InProgress,
                    created_at: Utc::now(),
                    closed_at: None,
                    device_id: device_id.to_string(),
                    closed_by: None,
                });
                id
            }
        };
        let line_id = st.next("L");
        st.snapshot.lines.push(Line {
            id: line_id.clone(),
            task_id: task_id.clone(),
            bin_id: bin_id.to_string(),
            sku_id: sku_id.to_string(),
            qty,
            remarks: None,
            scanned_at: Some(Utc::now()),
        });
        Ok(SavedLine {
            task_id,
            line_id: Some(line_id),
        })
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        new_status: TaskStatus,
        closed_by: Option<&str>,
    ) -> Result<StatusUpdate> {
        let mut st = self.state.lock().unwrap();
        st.enter("updateTaskStatus")?;
        if st.failing_tasks.contains(task_id) {
            return Err(PutawayError::Backend(format!("Task {task_id} is locked")));
        }
        let task = st
            .snapshot
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| PutawayError::Backend(format!("Task not found: {task_id}")))?;
        task.status = new_status;
        if task.code.is_none() {
            task.code = Some(format!("PA-{task_id}"));
        }
        if new_status == TaskStatus::Closed {
            task.closed_at = Some(Utc::now());
            task.closed_by = closed_by.map(str::to_string);
        }
        Ok(StatusUpdate {
            code: task.code.clone(),
        })
    }

    async fn update_line(&self, line_id: &str, qty: u32) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.enter("updateLine")?;
        let line = st
            .snapshot
            .lines
            .iter_mut()
            .find(|l| l.id == line_id)
            .ok_or_else(|| PutawayError::Backend(format!("Line not found: {line_id}")))?;
        line.qty = qty;
        Ok(())
    }

    async fn delete_line(&self, line_id: &str) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.enter("deleteLine")?;
        let before = st.snapshot.lines.len();
        st.snapshot.lines.retain(|l| l.id != line_id);
        if st.snapshot.lines.len() == before {
            return Err(PutawayError::Backend(format!("Line not found: {line_id}")));
        }
        Ok(())
    }

    async fn login(&self, pin: &str) -> Result<User> {
        let mut st = self.state.lock().unwrap();
        st.enter("login")?;
        match pin {
            "1234" => Ok(User {
                id: "u-1".into(),
                name: "Dana".into(),
                role: Some("supervisor".into()),
            }),
            _ => Err(PutawayError::Backend("Invalid PIN".into())),
        }
    }
}

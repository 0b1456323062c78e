//! Remote task store client.
//!
//! The store is a spreadsheet-backed web app with a single endpoint: reads
//! are `GET ?action=...`, writes are JSON `POST {action, ...}`. A body with
//! `success: false` is a business failure (`Backend`), distinct from an
//! HTTP or network failure (`Transport`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{PutawayError, Result};
use crate::model::{de_opt_string, de_string_lenient, AppSnapshot, DraftLine, TaskStatus, User};

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the store URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_store_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> PutawayError {
    let msg = if err.is_connect() {
        format!("Cannot reach task store at {url}")
    } else if err.is_timeout() {
        format!("Connection to {url} timed out")
    } else if err.is_builder() {
        format!("Invalid task store URL: {url}")
    } else if err.is_decode() {
        format!("Invalid response from task store: {err}")
    } else {
        format!("Network error communicating with {url}: {err}")
    };
    PutawayError::Transport(msg)
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 | 403 => "Task store refused the request (not authorized)".to_string(),
        404 => "Task store endpoint not found".to_string(),
        s if s >= 500 => format!("Task store server error (HTTP {s})"),
        s => format!("Unexpected response from task store (HTTP {s})"),
    }
}

/// Reject bodies that carry `success: false` (or omit it when `required`).
fn check_success(body: &Value, required: bool) -> Result<()> {
    let success = body.get("success").and_then(Value::as_bool);
    let ok = match success {
        Some(flag) => flag,
        None => !required,
    };
    if ok {
        return Ok(());
    }
    let message = body
        .get("error")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("Backend error");
    Err(PutawayError::Backend(message.to_string()))
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A draft line as sent inside `createTaskWithLines`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLine {
    pub bin_id: String,
    pub sku_id: String,
    pub qty: u32,
    pub remarks: String,
    pub scanned_at: DateTime<Utc>,
}

impl From<&DraftLine> for NewLine {
    fn from(line: &DraftLine) -> Self {
        Self {
            bin_id: line.bin_id.clone(),
            sku_id: line.sku_id.clone(),
            qty: line.qty,
            remarks: line.remarks.clone().unwrap_or_default(),
            scanned_at: line.scanned_at,
        }
    }
}

/// POST bodies, tagged by `action`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StoreAction {
    CreateTaskWithLines {
        device_id: String,
        created_at: DateTime<Utc>,
        lines: Vec<NewLine>,
    },
    SaveLine {
        device_id: String,
        user_id: String,
        bin_id: String,
        sku_id: String,
        qty: u32,
    },
    UpdateTaskStatus {
        task_id: String,
        new_status: TaskStatus,
        closed_by: String,
    },
    UpdateLine {
        line_id: String,
        qty: u32,
    },
    DeleteLine {
        line_id: String,
    },
    Login {
        pin: String,
    },
}

impl StoreAction {
    fn name(&self) -> &'static str {
        match self {
            Self::CreateTaskWithLines { .. } => "createTaskWithLines",
            Self::SaveLine { .. } => "saveLine",
            Self::UpdateTaskStatus { .. } => "updateTaskStatus",
            Self::UpdateLine { .. } => "updateLine",
            Self::DeleteLine { .. } => "deleteLine",
            Self::Login { .. } => "login",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTask {
    #[serde(deserialize_with = "de_string_lenient")]
    pub task_id: String,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedLine {
    #[serde(deserialize_with = "de_string_lenient")]
    pub task_id: String,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub line_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    #[serde(default, deserialize_with = "de_opt_string")]
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginReply {
    user: User,
}

#[derive(Debug, Deserialize)]
struct Ack {}

// ---------------------------------------------------------------------------
// Store seam
// ---------------------------------------------------------------------------

/// Operations the remote task store offers.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch_app_data(&self) -> Result<AppSnapshot>;

    async fn create_task_with_lines(
        &self,
        device_id: &str,
        created_at: DateTime<Utc>,
        lines: &[DraftLine],
    ) -> Result<CreatedTask>;

    /// Legacy per-line save; the backend creates an `IN_PROGRESS` task for
    /// the device on first use.
    async fn save_line(
        &self,
        device_id: &str,
        user_id: &str,
        bin_id: &str,
        sku_id: &str,
        qty: u32,
    ) -> Result<SavedLine>;

    async fn update_task_status(
        &self,
        task_id: &str,
        new_status: TaskStatus,
        closed_by: Option<&str>,
    ) -> Result<StatusUpdate>;

    async fn update_line(&self, line_id: &str, qty: u32) -> Result<()>;

    async fn delete_line(&self, line_id: &str) -> Result<()>;

    async fn login(&self, pin: &str) -> Result<User>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpRemoteStore {
    client: Client,
    url: String,
}

impl HttpRemoteStore {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = normalize_store_url(url);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PutawayError::Transport(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn read_body(&self, resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let body_text = resp.text().await.map_err(|e| friendly_error(&self.url, &e))?;
        if !status.is_success() {
            let detail = body_text.trim();
            return Err(PutawayError::Transport(if detail.is_empty() {
                status_error(status)
            } else {
                format!("{}: {}", status_error(status), truncate(detail, 200))
            }));
        }
        serde_json::from_str(&body_text).map_err(|e| {
            PutawayError::Transport(format!("Invalid JSON from task store: {e}"))
        })
    }

    async fn post<T: DeserializeOwned>(&self, action: &StoreAction) -> Result<T> {
        let name = action.name();
        let start = Instant::now();
        let resp = self
            .client
            .post(&self.url)
            .json(action)
            .send()
            .await
            .map_err(|e| friendly_error(&self.url, &e))?;
        let body = self.read_body(resp).await?;
        debug!(
            action = name,
            latency_ms = start.elapsed().as_millis() as u64,
            "Task store replied"
        );
        if let Err(e) = check_success(&body, true) {
            warn!(action = name, error = %e, "Task store rejected request");
            return Err(e);
        }
        serde_json::from_value(body)
            .map_err(|e| PutawayError::Backend(format!("Unexpected {name} response: {e}")))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch_app_data(&self) -> Result<AppSnapshot> {
        let start = Instant::now();
        let resp = self
            .client
            .get(&self.url)
            .query(&[("action", "getAppData")])
            .send()
            .await
            .map_err(|e| friendly_error(&self.url, &e))?;
        let body = self.read_body(resp).await?;
        check_success(&body, false)?;

        if !body.get("tasks").is_some_and(Value::is_array)
            || !body.get("lines").is_some_and(Value::is_array)
        {
            return Err(PutawayError::Backend(
                "Unexpected backend response format".into(),
            ));
        }
        let snapshot: AppSnapshot = serde_json::from_value(body)
            .map_err(|e| PutawayError::Backend(format!("Unexpected getAppData response: {e}")))?;
        info!(
            tasks = snapshot.tasks.len(),
            lines = snapshot.lines.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Fetched app data"
        );
        Ok(snapshot)
    }

    async fn create_task_with_lines(
        &self,
        device_id: &str,
        created_at: DateTime<Utc>,
        lines: &[DraftLine],
    ) -> Result<CreatedTask> {
        self.post(&StoreAction::CreateTaskWithLines {
            device_id: device_id.to_string(),
            created_at,
            lines: lines.iter().map(NewLine::from).collect(),
        })
        .await
    }

    async fn save_line(
        &self,
        device_id: &str,
        user_id: &str,
        bin_id: &str,
        sku_id: &str,
        qty: u32,
    ) -> Result<SavedLine> {
        self.post(&StoreAction::SaveLine {
            device_id: device_id.to_string(),
            user_id: user_id.to_string(),
            bin_id: bin_id.to_string(),
            sku_id: sku_id.to_string(),
            qty,
        })
        .await
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        new_status: TaskStatus,
        closed_by: Option<&str>,
    ) -> Result<StatusUpdate> {
        self.post(&StoreAction::UpdateTaskStatus {
            task_id: task_id.to_string(),
            new_status,
            closed_by: closed_by.unwrap_or_default().to_string(),
        })
        .await
    }

    async fn update_line(&self, line_id: &str, qty: u32) -> Result<()> {
        self.post::<Ack>(&StoreAction::UpdateLine {
            line_id: line_id.to_string(),
            qty,
        })
        .await
        .map(|_| ())
    }

    async fn delete_line(&self, line_id: &str) -> Result<()> {
        self.post::<Ack>(&StoreAction::DeleteLine {
            line_id: line_id.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn login(&self, pin: &str) -> Result<User> {
        let reply: LoginReply = self
            .post(&StoreAction::Login {
                pin: pin.to_string(),
            })
            .await?;
        Ok(reply.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::http::StatusCode as AxumStatus;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<Value>>>;

    async fn get_handler(Query(q): Query<HashMap<String, String>>) -> Response {
        match q.get("action").map(String::as_str) {
            Some("getAppData") => Json(serde_json::json!({
                "success": true,
                "tasks": [{
                    "id": "T1",
                    "code": "PA-0001",
                    "status": "OPEN",
                    "createdAt": "2026-05-04T09:00:00Z",
                    "deviceId": "dev-1"
                }],
                "lines": [{
                    "id": "L1",
                    "taskId": "T1",
                    "binId": "A1",
                    "skuId": "SKU1",
                    "qty": 4
                }]
            }))
            .into_response(),
            _ => (AxumStatus::NOT_FOUND, "no such action").into_response(),
        }
    }

    async fn legacy_handler() -> Json<Value> {
        Json(serde_json::json!({ "rows": [] }))
    }

    async fn post_handler(State(seen): State<Seen>, Json(body): Json<Value>) -> Response {
        seen.lock().unwrap().push(body.clone());
        match body["action"].as_str().unwrap_or_default() {
            "createTaskWithLines" => Json(serde_json::json!({
                "success": true,
                "taskId": 42,
                "code": "PA-0042"
            }))
            .into_response(),
            "updateTaskStatus" => Json(serde_json::json!({
                "success": false,
                "error": "Task already closed"
            }))
            .into_response(),
            "deleteLine" => Json(serde_json::json!({ "success": true })).into_response(),
            "login" => Json(serde_json::json!({
                "success": true,
                "user": { "id": "u1", "name": "Dana", "role": "supervisor" }
            }))
            .into_response(),
            _ => (AxumStatus::INTERNAL_SERVER_ERROR, "boom").into_response(),
        }
    }

    async fn spawn_store() -> (String, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/exec", get(get_handler).post(post_handler))
            .route("/legacy", get(legacy_handler))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/exec"), seen)
    }

    fn store(url: &str) -> HttpRemoteStore {
        HttpRemoteStore::new(url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_normalize_store_url() {
        assert_eq!(
            normalize_store_url(" script.example.com/macros/s/abc/exec/ "),
            "https://script.example.com/macros/s/abc/exec"
        );
        assert_eq!(normalize_store_url("localhost:8080/"), "http://localhost:8080");
        assert_eq!(normalize_store_url("http://10.0.0.2/exec"), "http://10.0.0.2/exec");
    }

    #[test]
    fn test_check_success_rules() {
        assert!(check_success(&serde_json::json!({ "tasks": [] }), false).is_ok());
        assert!(check_success(&serde_json::json!({}), true).is_err());
        let err = check_success(&serde_json::json!({ "success": false, "error": "nope" }), false)
            .unwrap_err();
        assert!(matches!(err, PutawayError::Backend(ref m) if m == "nope"));
    }

    #[test]
    fn test_action_bodies_are_camel_case() {
        let body = serde_json::to_value(StoreAction::UpdateTaskStatus {
            task_id: "T1".into(),
            new_status: TaskStatus::Closed,
            closed_by: "Dana".into(),
        })
        .unwrap();
        assert_eq!(body["action"], "updateTaskStatus");
        assert_eq!(body["taskId"], "T1");
        assert_eq!(body["newStatus"], "CLOSED");
        assert_eq!(body["closedBy"], "Dana");
    }

    #[tokio::test]
    async fn test_fetch_app_data() {
        let (url, _) = spawn_store().await;
        let snapshot = store(&url).fetch_app_data().await.unwrap();
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.tasks[0].code.as_deref(), Some("PA-0001"));
        assert_eq!(snapshot.lines[0].qty, 4);
    }

    #[tokio::test]
    async fn test_create_task_sends_whole_draft() {
        let (url, seen) = spawn_store().await;
        let lines = vec![DraftLine {
            id: "d1".into(),
            bin_id: "A1".into(),
            sku_id: "SKU1".into(),
            qty: 3,
            remarks: Some("fragile, top".into()),
            scanned_at: Utc::now(),
        }];
        let created = store(&url)
            .create_task_with_lines("dev-1", Utc::now(), &lines)
            .await
            .unwrap();
        assert_eq!(created.task_id, "42");
        assert_eq!(created.code.as_deref(), Some("PA-0042"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0]["action"], "createTaskWithLines");
        assert_eq!(seen[0]["deviceId"], "dev-1");
        assert_eq!(seen[0]["lines"][0]["binId"], "A1");
        assert_eq!(seen[0]["lines"][0]["remarks"], "fragile, top");
    }

    #[tokio::test]
    async fn test_backend_and_transport_failures_are_distinct() {
        let (url, _) = spawn_store().await;
        let s = store(&url);

        let err = s
            .update_task_status("T1", TaskStatus::Closed, Some("Dana"))
            .await
            .unwrap_err();
        assert!(matches!(err, PutawayError::Backend(ref m) if m == "Task already closed"));

        let err = s.update_line("L1", 3).await.unwrap_err();
        assert!(matches!(err, PutawayError::Transport(ref m) if m.contains("HTTP 500")));

        let bad = store(&format!("{url}/missing"));
        assert!(matches!(
            bad.fetch_app_data().await,
            Err(PutawayError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_without_arrays_is_backend_error() {
        let (url, _) = spawn_store().await;
        let legacy = store(&url.replace("/exec", "/legacy"));
        let err = legacy.fetch_app_data().await.unwrap_err();
        assert!(matches!(err, PutawayError::Backend(ref m) if m.contains("response format")));
    }

    #[tokio::test]
    async fn test_unreachable_store_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = store(&format!("http://{addr}/exec"))
            .fetch_app_data()
            .await
            .unwrap_err();
        assert!(matches!(err, PutawayError::Transport(_)));
    }

    #[tokio::test]
    async fn test_login_and_delete() {
        let (url, _) = spawn_store().await;
        let s = store(&url);
        let user = s.login("1234").await.unwrap();
        assert_eq!(user.display_name(), "Dana");
        s.delete_line("L1").await.unwrap();
    }
}

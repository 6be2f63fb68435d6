//! JSON handlers for the Management HTTP API (C6): list/detail/output/
//! stop/clean over the same Registry and Output Store the tool-call
//! surface drives. Every handler returns the `{"success": ..}` envelope;
//! `ProcessNotFound` maps to 404, anything else to 500.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use procsup_core::{ProcError, ProcessId, StreamKey};
use procsup_executor::Executor;
use procsup_store::{GetOptions, GrepMode};
use serde::Deserialize;
use serde_json::json;

#[derive(Clone)]
pub struct ApiState {
    pub executor: Arc<Executor>,
}

fn ok_response<T: serde::Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(json!({"success": true, "data": data}))).into_response()
}

fn error_response(err: ProcError) -> Response {
    let status = if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(json!({"success": false, "error": err.to_string()}))).into_response()
}

fn parse_pid(raw: &str) -> Result<ProcessId, Response> {
    ProcessId::try_from(raw).map_err(error_response)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, Response> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| error_response(ProcError::Validation(format!("invalid ISO-8601 timestamp {raw:?}: {e}"))))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub labels: Option<String>,
}

pub async fn list_processes(State(state): State<ApiState>, Query(q): Query<ListQuery>) -> Response {
    let status = match procsup_executor::parse_status_filter(q.status.as_deref()) {
        Ok(s) => s,
        Err(message) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "error": message})),
            )
                .into_response();
        }
    };
    let labels: Vec<String> = q
        .labels
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let infos = state.executor.list_processes(status, &labels).await;
    ok_response(infos)
}

pub async fn get_process(State(state): State<ApiState>, Path(pid): Path<String>) -> Response {
    let pid = match parse_pid(&pid) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state.executor.get_process_info(&pid).await {
        Ok(info) => ok_response(info),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct OutputQuery {
    pub tail: Option<usize>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub with_stdout: Option<bool>,
    pub with_stderr: Option<bool>,
    pub grep: Option<String>,
    pub grep_mode: Option<String>,
}

pub async fn get_output(
    State(state): State<ApiState>,
    Path(pid): Path<String>,
    Query(q): Query<OutputQuery>,
) -> Response {
    let pid = match parse_pid(&pid) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let since = match q.since.as_deref().map(parse_timestamp).transpose() {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let until = match q.until.as_deref().map(parse_timestamp).transpose() {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let grep_mode = match q.grep_mode.as_deref() {
        Some("content") => GrepMode::Content,
        _ => GrepMode::Line,
    };
    let with_stdout = q.with_stdout.unwrap_or(true);
    let with_stderr = q.with_stderr.unwrap_or(false);

    let mut data = serde_json::Map::new();
    if with_stdout {
        let opts = GetOptions { since, until, tail: q.tail, grep: q.grep.clone(), grep_mode };
        match state.executor.get_output(&pid, StreamKey::Stdout, opts).await {
            Ok(entries) => {
                data.insert("stdout".to_string(), serde_json::to_value(entries).unwrap());
            }
            Err(e) => return error_response(e),
        }
    }
    if with_stderr {
        let opts = GetOptions { since, until, tail: q.tail, grep: q.grep.clone(), grep_mode };
        match state.executor.get_output(&pid, StreamKey::Stderr, opts).await {
            Ok(entries) => {
                data.insert("stderr".to_string(), serde_json::to_value(entries).unwrap());
            }
            Err(e) => return error_response(e),
        }
    }
    ok_response(serde_json::Value::Object(data))
}

#[derive(Debug, Deserialize, Default)]
pub struct StopBody {
    #[serde(default)]
    pub force: bool,
}

pub async fn stop_process(
    State(state): State<ApiState>,
    Path(pid): Path<String>,
    Json(body): Json<StopBody>,
) -> Response {
    let pid = match parse_pid(&pid) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let reason = if body.force { "stopped via HTTP API (forced)" } else { "stopped via HTTP API" };
    match state.executor.stop_process(&pid, body.force, reason).await {
        Ok(()) => ok_response(json!({"stopped": true})),
        Err(e) => error_response(e),
    }
}

/// Always 200, even if the pid is already gone — the body's `result`
/// field carries the outcome (`"Success"`, `"Not found"`, or `"Failed:
/// still running"`).
pub async fn clean_process(State(state): State<ApiState>, Path(pid): Path<String>) -> Response {
    let pid = match parse_pid(&pid) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let outcomes = state.executor.clean_processes(&[pid.clone()]).await;
    let result = outcomes
        .get(&pid)
        .map(|o| o.to_string())
        .unwrap_or_else(|| "Not found".to_string());
    ok_response(json!({"result": result}))
}

//! Title reconciliation for subtasks.
//!
//! Whenever Bitrix24 reports a task change, the service fetches the task
//! and its parent and rewrites the subtask title to `"<base> | <parent
//! title>"`. The suffix check keeps the rewrite idempotent: the update
//! call itself fires a new webhook event, and that second pass must be a
//! no-op rather than grow the title again.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::bitrix::{BitrixError, RemoteCall};

const TITLE_SEPARATOR: &str = " | ";

/// Terminal state of one webhook delivery. Every variant maps to an
/// HTTP 200 acknowledgment; the token is the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    NoTaskId,
    InvalidTaskId,
    NoTask,
    NotASubtask,
    InvalidParentId,
    NoParent,
    AlreadyReconciled,
    Renamed { task_id: u64, title: String },
}

impl Outcome {
    pub fn token(&self) -> &'static str {
        match self {
            Outcome::NoTaskId => "no taskId",
            Outcome::InvalidTaskId => "invalid taskId",
            Outcome::NoTask => "no task",
            Outcome::NotASubtask => "not a subtask",
            Outcome::InvalidParentId => "invalid parentId",
            Outcome::NoParent => "no parent",
            Outcome::AlreadyReconciled => "already reconciled",
            Outcome::Renamed { .. } => "renamed",
        }
    }
}

/// Find the task id in a loosely-shaped event payload.
///
/// Different webhook senders and portal versions put the id in different
/// places, so this checks a fixed priority list and returns the first
/// present, non-null value unmodified. Absence is expected (plenty of
/// unrelated events reach the same endpoint) and is not an error.
pub fn extract_task_id(payload: &Value) -> Option<&Value> {
    const PATHS: &[&[&str]] = &[
        &["taskId"],
        &["TASK_ID"],
        &["data", "taskId"],
        &["data", "TASK_ID"],
        &["data", "FIELDS_AFTER", "ID"],
        &["data", "FIELDS_BEFORE", "ID"],
        &["FIELDS_AFTER", "ID"],
        &["ID"],
    ];
    PATHS.iter().find_map(|path| lookup(payload, path))
}

fn lookup<'a>(payload: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = payload;
    for key in path {
        current = current.get(key)?;
    }
    (!current.is_null()).then_some(current)
}

/// Coerce a raw extracted value into a positive integer id. Bitrix
/// returns numeric fields as strings about as often as numbers.
pub fn parse_id(raw: &Value) -> Option<u64> {
    match raw {
        Value::Number(n) => n.as_u64().filter(|id| *id > 0),
        Value::String(s) => s.trim().parse::<u64>().ok().filter(|id| *id > 0),
        _ => None,
    }
}

/// Decide whether a subtask title needs rewriting.
///
/// Returns `None` when the title already carries the current parent
/// annotation. Otherwise any stale annotation (everything from the first
/// separator on) is discarded, so the title carries at most one
/// annotation no matter how many times reconciliation fires.
pub fn compute_new_title(child_title: &str, parent_title: &str) -> Option<String> {
    let suffix = format!("{TITLE_SEPARATOR}{parent_title}");
    if child_title.ends_with(&suffix) {
        return None;
    }
    let base = child_title
        .split(TITLE_SEPARATOR)
        .next()
        .unwrap_or(child_title)
        .trim();
    Some(format!("{base}{suffix}"))
}

#[derive(Debug, Clone, Deserialize)]
struct TaskFields {
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "parentId")]
    parent_id: Option<Value>,
    #[serde(default, rename = "parentTaskId")]
    parent_task_id: Option<Value>,
}

async fn fetch_task(
    remote: &dyn RemoteCall,
    task_id: u64,
) -> Result<Option<TaskFields>, BitrixError> {
    let result = remote
        .call("tasks.task.get", &json!({ "taskId": task_id }))
        .await?;
    let Some(task) = result.get("task") else {
        return Ok(None);
    };
    Ok(serde_json::from_value(task.clone()).ok())
}

/// Run the full reconciliation flow for one inbound event.
///
/// At most two reads and one write, strictly sequential. Returns an
/// `Outcome` for every expected short-circuit; only remote-call failures
/// surface as errors, to be downgraded at the handler boundary.
pub async fn process(remote: &dyn RemoteCall, payload: &Value) -> Result<Outcome, BitrixError> {
    let Some(raw_id) = extract_task_id(payload) else {
        return Ok(Outcome::NoTaskId);
    };
    let Some(task_id) = parse_id(raw_id) else {
        return Ok(Outcome::InvalidTaskId);
    };

    let Some(task) = fetch_task(remote, task_id).await? else {
        return Ok(Outcome::NoTask);
    };

    let parent_ref = task
        .parent_id
        .as_ref()
        .or(task.parent_task_id.as_ref())
        .filter(|v| !v.is_null());
    let Some(parent_ref) = parent_ref else {
        return Ok(Outcome::NotASubtask);
    };
    let parent_id = match parse_id(parent_ref) {
        Some(id) => id,
        // Top-level tasks come back with parentId "0".
        None if is_zero(parent_ref) => return Ok(Outcome::NotASubtask),
        None => return Ok(Outcome::InvalidParentId),
    };

    let Some(parent) = fetch_task(remote, parent_id).await? else {
        return Ok(Outcome::NoParent);
    };

    let child_title = task.title.unwrap_or_default();
    let parent_title = parent.title.unwrap_or_default();
    let Some(new_title) = compute_new_title(&child_title, &parent_title) else {
        debug!(task_id, "title already carries the parent annotation");
        return Ok(Outcome::AlreadyReconciled);
    };

    remote
        .call(
            "tasks.task.update",
            &json!({ "taskId": task_id, "fields": { "TITLE": new_title.clone() } }),
        )
        .await?;
    Ok(Outcome::Renamed {
        task_id,
        title: new_title,
    })
}

fn is_zero(raw: &Value) -> bool {
    match raw {
        Value::Number(n) => n.as_i64() == Some(0),
        Value::String(s) => s.trim() == "0",
        _ => false,
    }
}

//! The event envelope and the closed [`Action`] dispatch enum.
//!
//! The wire format keeps `payload` as a loose [`serde_json::Value`] for backward
//! compatibility (unknown fields round-trip untouched); `action` is parsed into a
//! closed enum so the projector and validator dispatch exhaustively instead of
//! string-matching at every call site.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::constants::SCHEMA_VERSION;
use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[serde(rename = "run.start")]
    RunStart,
    #[serde(rename = "run.end")]
    RunEnd,
    #[serde(rename = "task.create")]
    TaskCreate,
    Claim,
    Complete,
    Review,
    #[serde(rename = "issue.report")]
    IssueReport,
    #[serde(rename = "hotfix.create")]
    HotfixCreate,
    #[serde(rename = "issue.resolve")]
    IssueResolve,
    #[serde(rename = "output.rejected")]
    OutputRejected,
    #[serde(rename = "orchestrator.file.write")]
    OrchestratorFileWrite,
    #[serde(rename = "orchestrator.view.mutate")]
    OrchestratorViewMutate,
    #[serde(rename = "verify.start")]
    VerifyStart,
    #[serde(rename = "verify.ok")]
    VerifyOk,
    #[serde(rename = "verify.fail")]
    VerifyFail,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::RunStart => "run.start",
            Action::RunEnd => "run.end",
            Action::TaskCreate => "task.create",
            Action::Claim => "claim",
            Action::Complete => "complete",
            Action::Review => "review",
            Action::IssueReport => "issue.report",
            Action::HotfixCreate => "hotfix.create",
            Action::IssueResolve => "issue.resolve",
            Action::OutputRejected => "output.rejected",
            Action::OrchestratorFileWrite => "orchestrator.file.write",
            Action::OrchestratorViewMutate => "orchestrator.view.mutate",
            Action::VerifyStart => "verify.start",
            Action::VerifyOk => "verify.ok",
            Action::VerifyFail => "verify.fail",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "run.start" => Action::RunStart,
            "run.end" => Action::RunEnd,
            "task.create" => Action::TaskCreate,
            "claim" => Action::Claim,
            "complete" => Action::Complete,
            "review" => Action::Review,
            "issue.report" => Action::IssueReport,
            "hotfix.create" => Action::HotfixCreate,
            "issue.resolve" => Action::IssueResolve,
            "output.rejected" => Action::OutputRejected,
            "orchestrator.file.write" => Action::OrchestratorFileWrite,
            "orchestrator.view.mutate" => Action::OrchestratorViewMutate,
            "verify.start" => Action::VerifyStart,
            "verify.ok" => Action::VerifyOk,
            "verify.fail" => Action::VerifyFail,
            other => {
                return Err(OrchestratorError::corrupted(
                    "UNKNOWN_ACTION",
                    format!("unknown action: {other}"),
                ))
            }
        })
    }
}

/// A single durable, immutable record in the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub schema_version: String,
    pub event_id: String,
    pub event_seq: u64,
    pub ts: String,
    pub actor: String,
    pub action: Action,
    pub payload: Value,
}

impl Event {
    pub fn new(event_seq: u64, actor: impl Into<String>, action: Action, payload: Value) -> Self {
        Event {
            schema_version: SCHEMA_VERSION.to_string(),
            event_id: format!("EV-{:08}", event_seq),
            event_seq,
            ts: crate::util::utc_now_iso(),
            actor: actor.into(),
            action,
            payload,
        }
    }
}

/// Normalize a v0.3-style raw JSON event into canonical v0.4 shape, in place on a
/// [`serde_json::Map`]. Mirrors `compat.normalize_legacy_event` exactly:
/// - `data` (no `payload`) is renamed to `payload`.
/// - `action: "run.init"` is rewritten to `"run.start"` with `payload.status` defaulted.
/// - `schema_version` defaults to `"0.3.0"` when absent.
pub fn normalize_legacy_event(mut raw: serde_json::Map<String, Value>) -> serde_json::Map<String, Value> {
    if !raw.contains_key("payload") {
        if let Some(data) = raw.remove("data") {
            raw.insert("payload".to_string(), data);
        }
    } else {
        raw.remove("data");
    }

    if raw.get("action").and_then(Value::as_str) == Some("run.init") {
        raw.insert("action".to_string(), Value::String("run.start".to_string()));
        let payload = raw
            .entry("payload")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = payload {
            map.entry("status").or_insert_with(|| Value::String("initialized".to_string()));
        }
    }

    raw.entry("schema_version")
        .or_insert_with(|| Value::String("0.3.0".to_string()));

    raw
}

/// Legacy `verify_status = "fail"` reads as `"mismatch"` going forward.
pub fn normalize_legacy_verify_status(status: &str) -> &str {
    if status == "fail" {
        "mismatch"
    } else {
        status
    }
}

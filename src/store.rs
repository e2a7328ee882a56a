//! Append-only event log persistence plus the JSON view files derived from it.
//!
//! `parse_event_store` is the single place corruption is detected: any JSONL line
//! that fails to decode, breaks sequence monotonicity, duplicates an id, is missing
//! a required field, or names an action outside [`crate::constants::CANONICAL_ACTIONS`]
//! raises [`OrchestratorError::Corrupted`], which `verify` reports as `"corrupted"`
//! rather than a normal domain error.

use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{
    is_canonical_action, AGENT_CONTRACT_PATH, AGENT_RESULT_SCHEMA_PATH, EVENT_STORE_PATH,
    ISSUES_PATH, LESSONS_PATH, ROADMAP_PATH,
};
use crate::contract::AgentContract;
use crate::error::OrchestratorError;
use crate::event::{normalize_legacy_event, Event};
use crate::task::{IssuesView, LessonsView, Roadmap};
use crate::util::ensure_parent;

fn read_json(path: &Path) -> Result<Value, OrchestratorError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<(), OrchestratorError> {
    ensure_parent(path)?;
    let mut text = serde_json::to_string_pretty(data)?;
    text.push('\n');
    fs::write(path, text)?;
    Ok(())
}

pub fn load_roadmap(root: &Path) -> Result<Option<Roadmap>, OrchestratorError> {
    let path = root.join(ROADMAP_PATH);
    if !path.exists() {
        return Ok(None);
    }
    let value = read_json(&path)?;
    Ok(Some(serde_json::from_value(value)?))
}

pub fn save_roadmap(root: &Path, roadmap: &Roadmap) -> Result<(), OrchestratorError> {
    write_json(&root.join(ROADMAP_PATH), roadmap)
}

pub fn save_issues(root: &Path, issues: &IssuesView) -> Result<(), OrchestratorError> {
    write_json(&root.join(ISSUES_PATH), issues)
}

pub fn save_lessons(root: &Path, lessons: &LessonsView) -> Result<(), OrchestratorError> {
    write_json(&root.join(LESSONS_PATH), lessons)
}

pub fn ensure_event_store(root: &Path) -> Result<PathBuf, OrchestratorError> {
    let path = root.join(EVENT_STORE_PATH);
    ensure_parent(&path)?;
    if !path.exists() {
        fs::write(&path, "")?;
    }
    Ok(path)
}

/// Read, normalize, and strictly validate every line of the event log.
pub fn parse_event_store(root: &Path) -> Result<Vec<Event>, OrchestratorError> {
    let path = ensure_event_store(root)?;
    let text = fs::read_to_string(&path)?;

    let mut events = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut last_seq: u64 = 0;

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let line_no = idx + 1;

        let raw: Value = serde_json::from_str(line).map_err(|e| {
            OrchestratorError::corrupted("JSONL_INVALID", format!("invalid JSON at line {line_no}: {e}"))
        })?;
        let raw_map = raw.as_object().cloned().ok_or_else(|| {
            OrchestratorError::corrupted("JSONL_INVALID", format!("event at line {line_no} is not an object"))
        })?;
        let mut event = normalize_legacy_event(raw_map);

        let event_seq = event
            .get("event_seq")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                OrchestratorError::corrupted("EVENT_SEQ_INVALID", format!("event_seq missing/invalid at line {line_no}"))
            })?;
        if event_seq != last_seq + 1 {
            return Err(OrchestratorError::corrupted(
                "EVENT_SEQ_NON_MONOTONIC",
                format!("expected event_seq={}, got {event_seq}", last_seq + 1),
            ));
        }
        last_seq = event_seq;

        if !event.contains_key("event_id") {
            event.insert(
                "event_id".to_string(),
                Value::String(format!("LEGACY-EV-{event_seq:08}")),
            );
        }
        let event_id = event["event_id"].as_str().unwrap_or_default().to_string();
        if !seen_ids.insert(event_id.clone()) {
            return Err(OrchestratorError::corrupted(
                "EVENT_ID_DUPLICATE",
                format!("duplicate event_id {event_id}"),
            ));
        }

        let required = ["schema_version", "event_id", "event_seq", "ts", "actor", "action", "payload"];
        let missing: Vec<&str> = required.iter().filter(|k| !event.contains_key(**k)).copied().collect();
        if !missing.is_empty() {
            return Err(OrchestratorError::corrupted(
                "EVENT_MISSING_FIELDS",
                format!("missing fields: {}", missing.join(", ")),
            ));
        }

        let action_str = event["action"].as_str().unwrap_or_default();
        if !is_canonical_action(action_str) {
            return Err(OrchestratorError::corrupted(
                "UNKNOWN_ACTION",
                format!("unknown action in event store: {action_str}"),
            ));
        }

        let event: Event = serde_json::from_value(Value::Object(event))?;
        events.push(event);
    }

    Ok(events)
}

/// Append compact JSON-per-line events. All-or-nothing: building the lines cannot
/// fail independently per event (serialization of [`Event`] cannot fail), so a
/// short write never leaves a half-written event.
pub fn append_events(root: &Path, events: &[Event]) -> Result<(), OrchestratorError> {
    if events.is_empty() {
        return Ok(());
    }
    let path = ensure_event_store(root)?;
    let mut buf = String::new();
    for event in events {
        buf.push_str(&serde_json::to_string(event)?);
        buf.push('\n');
    }
    use std::io::Write;
    let mut file = fs::OpenOptions::new().append(true).open(&path)?;
    file.write_all(buf.as_bytes())?;
    Ok(())
}

pub fn next_event_seq(events: &[Event]) -> u64 {
    events.last().map(|e| e.event_seq + 1).unwrap_or(1)
}

pub fn load_agent_contract(root: &Path) -> Result<AgentContract, OrchestratorError> {
    let text = fs::read_to_string(root.join(AGENT_CONTRACT_PATH))?;
    Ok(serde_yaml::from_str(&text)?)
}

pub fn load_agent_result_schema(root: &Path) -> Result<Value, OrchestratorError> {
    read_json(&root.join(AGENT_RESULT_SCHEMA_PATH))
}

pub fn require_task<'a>(roadmap: &'a Roadmap, task_id: &str) -> Result<&'a crate::task::Task, OrchestratorError> {
    roadmap
        .find_task(task_id)
        .ok_or_else(|| OrchestratorError::workflow("TASK_NOT_FOUND", format!("task_id not found: {task_id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_empty_store_returns_no_events() {
        let dir = tempdir().unwrap();
        let events = parse_event_store(dir.path()).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn parse_rejects_non_monotonic_seq() {
        let dir = tempdir().unwrap();
        ensure_event_store(dir.path()).unwrap();
        let path = dir.path().join(EVENT_STORE_PATH);
        fs::write(
            &path,
            r#"{"schema_version":"0.4.0","event_id":"EV-00000001","event_seq":1,"ts":"2026-01-01T00:00:00Z","actor":"orchestrator","action":"run.start","payload":{}}
{"schema_version":"0.4.0","event_id":"EV-00000003","event_seq":3,"ts":"2026-01-01T00:00:01Z","actor":"orchestrator","action":"run.end","payload":{}}
"#,
        )
        .unwrap();
        let err = parse_event_store(dir.path()).unwrap_err();
        assert_eq!(err.code(), "EVENT_SEQ_NON_MONOTONIC");
    }

    #[test]
    fn parse_rejects_invalid_json() {
        let dir = tempdir().unwrap();
        ensure_event_store(dir.path()).unwrap();
        fs::write(dir.path().join(EVENT_STORE_PATH), "{not json}\n").unwrap();
        let err = parse_event_store(dir.path()).unwrap_err();
        assert_eq!(err.code(), "JSONL_INVALID");
    }

    #[test]
    fn append_then_parse_round_trips() {
        use crate::event::Action;
        let dir = tempdir().unwrap();
        let events = vec![Event::new(1, "orchestrator", Action::RunStart, serde_json::json!({}))];
        append_events(dir.path(), &events).unwrap();
        let parsed = parse_event_store(dir.path()).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].event_seq, 1);
    }
}

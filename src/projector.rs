//! The deterministic projector: folds the event log into a [`Roadmap`] plus
//! [`IssuesView`]/[`LessonsView`], and computes the projection hash that `verify`
//! checks against.
//!
//! Every `_apply_*` function here mirrors its Python namesake one-to-one, including
//! the exact error codes raised on an invalid transition. `materialize` is pure: the
//! same event slice always produces the same roadmap and the same hash.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::constants::{ESAA_VERSION, EVENT_STORE_PATH, SCHEMA_VERSION};
use crate::error::OrchestratorError;
use crate::event::{normalize_legacy_verify_status, Action, Event};
use crate::task::{
    Immutability, Issue, IssueIndexes, IssueLinks, IssueStatus, IssueTimeline, IssuesView,
    Lesson, LessonIndexes, LessonsView, Outputs, Project, Roadmap, RoadmapMeta, RunMeta, Task,
    TaskIndexes, TaskKind, TaskStatus, ViewMeta,
};
use crate::util::{sha256_hex_value, utc_now_iso};

/// In-flight fold state, equivalent to the Python `_empty_state` dict.
struct State {
    project_name: String,
    master_correlation_id: Option<String>,
    tasks: Vec<Task>,
    issues: Vec<Issue>,
    lessons: Vec<Lesson>,
    run_id: Option<String>,
    run_status: String,
    verify_status: String,
    last_event_seq: u64,
}

fn empty_state(project_name: &str) -> State {
    State {
        project_name: project_name.to_string(),
        master_correlation_id: None,
        tasks: Vec::new(),
        issues: Vec::new(),
        lessons: Vec::new(),
        run_id: None,
        run_status: "not_started".to_string(),
        verify_status: "unknown".to_string(),
        last_event_seq: 0,
    }
}

fn task_index_mut<'a>(state: &'a mut State, task_id: &str) -> Result<usize, OrchestratorError> {
    state
        .tasks
        .iter()
        .position(|t| t.task_id == task_id)
        .ok_or_else(|| OrchestratorError::workflow("TASK_NOT_FOUND", format!("task_id not found: {task_id}")))
}

fn ensure_owner(task: &Task, actor: &str) -> Result<(), OrchestratorError> {
    if task.assigned_to.as_deref() != Some(actor) {
        return Err(OrchestratorError::workflow(
            "NOT_LOCK_OWNER",
            format!("actor {actor} does not own task {}", task.task_id),
        ));
    }
    Ok(())
}

fn new_task(payload: &Value) -> Result<Task, OrchestratorError> {
    let task_id = payload
        .get("task_id")
        .and_then(Value::as_str)
        .ok_or_else(|| OrchestratorError::corrupted("EVENT_MISSING_FIELDS", "task.create missing task_id"))?
        .to_string();
    let title = payload.get("title").and_then(Value::as_str).unwrap_or_default().to_string();
    let description = payload
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or(&title)
        .to_string();
    let task_kind: TaskKind = serde_json::from_value(
        payload.get("task_kind").cloned().unwrap_or(json!("impl")),
    )?;
    let depends_on = payload
        .get("depends_on")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();
    let targets = payload
        .get("targets")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();
    let outputs = payload
        .get("outputs")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let immutability = Immutability {
        done_is_immutable: payload
            .get("immutability")
            .and_then(|v| v.get("done_is_immutable"))
            .and_then(Value::as_bool)
            .unwrap_or(true),
    };

    Ok(Task {
        task_id,
        task_kind,
        title,
        description,
        status: TaskStatus::Todo,
        depends_on,
        targets,
        outputs: Outputs { files: outputs },
        immutability,
        assigned_to: None,
        started_at: None,
        completed_at: None,
        verification: None,
        issue_id: payload.get("issue_id").and_then(Value::as_str).map(String::from),
        fixes: payload.get("fixes").cloned(),
        is_hotfix: payload.get("is_hotfix").and_then(Value::as_bool).unwrap_or(false),
        scope_patch: payload
            .get("scope_patch")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect()),
        required_verification: payload
            .get("required_verification")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect()),
        baseline_id: payload.get("baseline_id").and_then(Value::as_str).map(String::from),
    })
}

fn apply_claim(state: &mut State, actor: &str, payload: &Value, ts: &str) -> Result<(), OrchestratorError> {
    let task_id = payload.get("task_id").and_then(Value::as_str).unwrap_or_default();
    let idx = task_index_mut(state, task_id)?;
    let task = &mut state.tasks[idx];
    if task.status == TaskStatus::Done {
        return Err(OrchestratorError::workflow("IMMUTABLE_DONE", format!("task {task_id} is done")));
    }
    if task.is_locked() && task.assigned_to.as_deref() != Some(actor) {
        return Err(OrchestratorError::workflow("LOCKED_TASK", format!("task {task_id} is already claimed")));
    }
    task.status = TaskStatus::InProgress;
    task.assigned_to = Some(actor.to_string());
    task.started_at = Some(ts.to_string());
    Ok(())
}

fn apply_complete(state: &mut State, actor: &str, payload: &Value) -> Result<(), OrchestratorError> {
    let task_id = payload.get("task_id").and_then(Value::as_str).unwrap_or_default();
    let idx = task_index_mut(state, task_id)?;
    let task = &mut state.tasks[idx];
    if task.status != TaskStatus::InProgress {
        return Err(OrchestratorError::workflow(
            "INVALID_TRANSITION",
            format!("cannot complete task {task_id} from status {:?}", task.status),
        ));
    }
    ensure_owner(task, actor)?;
    task.status = TaskStatus::Review;
    task.verification = payload.get("verification").cloned();
    if let Some(issue_id) = payload.get("issue_id").and_then(Value::as_str) {
        task.issue_id = Some(issue_id.to_string());
    }
    if let Some(fixes) = payload.get("fixes") {
        task.fixes = Some(fixes.clone());
    }
    Ok(())
}

fn apply_review(state: &mut State, actor: &str, payload: &Value, ts: &str) -> Result<(), OrchestratorError> {
    let task_id = payload.get("task_id").and_then(Value::as_str).unwrap_or_default();
    let idx = task_index_mut(state, task_id)?;
    let task = &mut state.tasks[idx];
    if task.status != TaskStatus::Review {
        return Err(OrchestratorError::workflow(
            "INVALID_TRANSITION",
            format!("cannot review task {task_id} from status {:?}", task.status),
        ));
    }
    ensure_owner(task, actor)?;
    let decision = payload.get("decision").and_then(Value::as_str).unwrap_or_default();
    match decision {
        "approve" => {
            task.status = TaskStatus::Done;
            task.completed_at = Some(ts.to_string());
        }
        "request_changes" => {
            task.status = TaskStatus::InProgress;
        }
        other => {
            return Err(OrchestratorError::workflow(
                "INVALID_TRANSITION",
                format!("unknown review decision: {other}"),
            ))
        }
    }
    Ok(())
}

fn apply_issue_report(state: &mut State, event: &Event) -> Result<(), OrchestratorError> {
    let payload = &event.payload;
    let event_seq = event.event_seq;
    let issue_id = payload
        .get("issue_id")
        .and_then(Value::as_str)
        .ok_or_else(|| OrchestratorError::corrupted("EVENT_MISSING_FIELDS", "issue.report missing issue_id"))?
        .to_string();

    if !state.issues.iter().any(|i| i.issue_id == issue_id) {
        state.issues.push(Issue {
            issue_id: issue_id.clone(),
            status: IssueStatus::Open,
            severity: payload.get("severity").and_then(Value::as_str).unwrap_or("low").to_string(),
            title: payload.get("title").and_then(Value::as_str).unwrap_or_default().to_string(),
            baseline_id: payload.get("baseline_id").and_then(Value::as_str).map(String::from),
            affected: payload.get("affected").cloned().unwrap_or(Value::Null),
            evidence: payload.get("evidence").cloned().unwrap_or(Value::Null),
            resolution: None,
            links: IssueLinks {
                reported_by_task_id: payload.get("task_id").and_then(Value::as_str).map(String::from),
                fixes_task_id: payload.get("fixes_task_id").cloned(),
                hotfix_task_id: None,
            },
            timeline: IssueTimeline {
                created_event_seq: event_seq,
                resolved_event_seq: None,
            },
        });
    }

    let category = payload.get("category").and_then(Value::as_str).unwrap_or_default();
    let subtype = payload.get("subtype").and_then(Value::as_str).unwrap_or_default();
    let lesson_payload = payload.get("lesson");
    if category == "process" && subtype == "lesson" {
        if let Some(lesson_payload) = lesson_payload {
            let source_refs = vec![json!({
                "task_id": payload.get("task_id").cloned().unwrap_or(Value::Null),
                "event_id": event.event_id,
            })];
            state.lessons.push(Lesson {
                lesson_id: format!("LES-{:04}", state.lessons.len() + 1),
                status: "active".to_string(),
                created_at: utc_now_iso(),
                title: payload.get("title").and_then(Value::as_str).unwrap_or_default().to_string(),
                mistake: lesson_payload.get("mistake").cloned().unwrap_or(Value::Null),
                rule: lesson_payload.get("rule").cloned().unwrap_or(Value::Null),
                scope: lesson_payload.get("scope").cloned().unwrap_or(Value::Null),
                enforcement: lesson_payload.get("enforcement").cloned().unwrap_or(Value::Null),
                source_refs,
            });
        }
    }
    Ok(())
}

fn apply_hotfix_create(state: &mut State, payload: &Value) -> Result<(), OrchestratorError> {
    let task_id = payload.get("task_id").and_then(Value::as_str).unwrap_or_default();
    if state.tasks.iter().any(|t| t.task_id == task_id) {
        return Err(OrchestratorError::workflow("DUPLICATE_TASK", format!("task_id already exists: {task_id}")));
    }
    let task = new_task(payload)?;
    let issue_id = payload.get("issue_id").and_then(Value::as_str);
    if let Some(issue_id) = issue_id {
        if let Some(issue) = state.issues.iter_mut().find(|i| i.issue_id == issue_id) {
            issue.links.hotfix_task_id = Some(task.task_id.clone());
        }
    }
    state.tasks.push(task);
    Ok(())
}

fn apply_issue_resolve(state: &mut State, payload: &Value, event_seq: u64) -> Result<(), OrchestratorError> {
    let issue_id = payload.get("issue_id").and_then(Value::as_str).unwrap_or_default();
    let issue = state
        .issues
        .iter_mut()
        .find(|i| i.issue_id == issue_id)
        .ok_or_else(|| OrchestratorError::workflow("ISSUE_NOT_FOUND", format!("issue_id not found: {issue_id}")))?;
    issue.status = IssueStatus::Resolved;
    issue.resolution = payload.get("resolution").cloned();
    issue.timeline.resolved_event_seq = Some(event_seq);
    Ok(())
}

fn apply_event(state: &mut State, event: &Event) -> Result<(), OrchestratorError> {
    match event.action {
        Action::RunStart => {
            state.run_id = event.payload.get("run_id").and_then(Value::as_str).map(String::from);
            state.master_correlation_id = event
                .payload
                .get("master_correlation_id")
                .and_then(Value::as_str)
                .map(String::from);
            state.run_status = "running".to_string();
        }
        Action::RunEnd => {
            state.run_status = event
                .payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("completed")
                .to_string();
        }
        Action::TaskCreate => {
            let task_id = event.payload.get("task_id").and_then(Value::as_str).unwrap_or_default();
            if state.tasks.iter().any(|t| t.task_id == task_id) {
                return Err(OrchestratorError::workflow("DUPLICATE_TASK", format!("task_id already exists: {task_id}")));
            }
            state.tasks.push(new_task(&event.payload)?);
        }
        Action::Claim => apply_claim(state, &event.actor, &event.payload, &event.ts)?,
        Action::Complete => apply_complete(state, &event.actor, &event.payload)?,
        Action::Review => apply_review(state, &event.actor, &event.payload, &event.ts)?,
        Action::IssueReport => apply_issue_report(state, event)?,
        Action::HotfixCreate => apply_hotfix_create(state, &event.payload)?,
        Action::IssueResolve => apply_issue_resolve(state, &event.payload, event.event_seq)?,
        Action::VerifyOk => {
            state.verify_status = "ok".to_string();
        }
        Action::VerifyFail => {
            let raw = event.payload.get("verify_status").and_then(Value::as_str).unwrap_or("mismatch");
            state.verify_status = normalize_legacy_verify_status(raw).to_string();
        }
        Action::OutputRejected
        | Action::OrchestratorFileWrite
        | Action::OrchestratorViewMutate
        | Action::VerifyStart => {
            // Bookend / audit-only actions: recorded in the log but do not mutate projection state.
        }
    }
    state.last_event_seq = event.event_seq;
    Ok(())
}

fn index_counts<'a, I: Iterator<Item = &'a str>>(values: I) -> BTreeMap<String, u64> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for v in values {
        *counts.entry(v.to_string()).or_insert(0) += 1;
    }
    counts
}

fn build_task_indexes(tasks: &[Task]) -> TaskIndexes {
    TaskIndexes {
        by_status: index_counts(tasks.iter().map(|t| match t.status {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
        })),
        by_kind: index_counts(tasks.iter().map(|t| t.task_kind.as_str())),
    }
}

/// The hashed payload is `{schema_version, project, tasks, indexes}` — run metadata
/// (including `updated_at`) is excluded so replaying the same prefix of events always
/// yields the same hash regardless of wall-clock time.
pub fn compute_projection_hash(schema_version: &str, project: &Project, tasks: &[Task], indexes: &TaskIndexes) -> Result<String, OrchestratorError> {
    let mut map = Map::new();
    map.insert("schema_version".to_string(), json!(schema_version));
    map.insert("project".to_string(), serde_json::to_value(project)?);
    map.insert("tasks".to_string(), serde_json::to_value(tasks)?);
    map.insert("indexes".to_string(), serde_json::to_value(indexes)?);
    Ok(sha256_hex_value(&Value::Object(map)))
}

#[derive(Debug)]
pub struct Materialized {
    pub roadmap: Roadmap,
    pub issues_view: IssuesView,
    pub lessons_view: LessonsView,
}

/// Fold the full event slice into a roadmap and its derived views. Pure: no I/O, no
/// clock reads beyond stamping `updated_at` on the output (which is excluded from
/// the hash).
pub fn materialize(events: &[Event], project_name: &str) -> Result<Materialized, OrchestratorError> {
    let mut state = empty_state(project_name);
    for event in events {
        apply_event(&mut state, event)?;
    }

    let indexes = build_task_indexes(&state.tasks);
    let project = Project {
        name: state.project_name.clone(),
        audit_scope: "full".to_string(),
    };
    let hash = compute_projection_hash(SCHEMA_VERSION, &project, &state.tasks, &indexes)?;

    let verify_status = state.verify_status.clone();

    let roadmap = Roadmap {
        meta: RoadmapMeta {
            schema_version: SCHEMA_VERSION.to_string(),
            esaa_version: ESAA_VERSION.to_string(),
            immutable_done: true,
            master_correlation_id: state.master_correlation_id.clone(),
            run: RunMeta {
                run_id: state.run_id.clone(),
                status: state.run_status.clone(),
                last_event_seq: state.last_event_seq,
                projection_hash_sha256: hash,
                verify_status,
            },
            updated_at: utc_now_iso(),
        },
        project,
        tasks: state.tasks,
        indexes,
    };

    let view_meta = |last_event_seq: u64| ViewMeta {
        schema_version: SCHEMA_VERSION.to_string(),
        esaa_version: ESAA_VERSION.to_string(),
        generated_by: "projector".to_string(),
        source_event_store: EVENT_STORE_PATH.to_string(),
        last_event_seq: Some(last_event_seq),
        updated_at: utc_now_iso(),
    };

    let mut open_by_baseline: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for issue in state.issues.iter().filter(|i| i.status == IssueStatus::Open) {
        let key = issue.baseline_id.clone().unwrap_or_else(|| "none".to_string());
        open_by_baseline.entry(key).or_default().push(issue.issue_id.clone());
    }
    for v in open_by_baseline.values_mut() {
        v.sort();
    }

    let issues_view = IssuesView {
        meta: view_meta(state.last_event_seq),
        issues: state.issues,
        indexes: IssueIndexes { open_by_baseline },
    };

    let mut by_task_kind: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut by_enforcement_applies_to: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for lesson in &state.lessons {
        if let Some(kinds) = lesson.scope.get("task_kinds").and_then(Value::as_array) {
            for kind in kinds.iter().filter_map(Value::as_str) {
                by_task_kind.entry(kind.to_string()).or_default().push(lesson.lesson_id.clone());
            }
        }
        if let Some(applies_to) = lesson.enforcement.get("applies_to").and_then(Value::as_str) {
            by_enforcement_applies_to
                .entry(applies_to.to_string())
                .or_default()
                .push(lesson.lesson_id.clone());
        }
    }

    let lessons_view = LessonsView {
        meta: view_meta(state.last_event_seq),
        lessons: state.lessons,
        indexes: LessonIndexes { by_task_kind, by_enforcement_applies_to },
    };

    Ok(Materialized { roadmap, issues_view, lessons_view })
}

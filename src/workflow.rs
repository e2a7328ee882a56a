//! Task scheduling, dispatch context construction, and hotfix synthesis.
//!
//! Selection order is fixed so the same roadmap always dispatches the same task:
//! anything in `review` first, then anything already `in_progress`, then the
//! lexicographically smallest `todo` task whose dependencies are all `done`.

use serde_json::{json, Value};

use crate::event::{Action, Event};
use crate::task::{Roadmap, Task, TaskStatus};

pub fn all_tasks_done(tasks: &[Task]) -> bool {
    tasks.iter().all(|t| t.status == TaskStatus::Done)
}

fn dependencies_satisfied(task: &Task, roadmap: &Roadmap) -> bool {
    task.depends_on
        .iter()
        .all(|dep| roadmap.find_task(dep).map(|t| t.status == TaskStatus::Done).unwrap_or(false))
}

/// Review tasks first, then in-progress, then the smallest-id ready todo task.
pub fn select_next_task<'a>(roadmap: &'a Roadmap) -> Option<&'a Task> {
    let mut review: Vec<&Task> = roadmap.tasks.iter().filter(|t| t.status == TaskStatus::Review).collect();
    review.sort_by(|a, b| a.task_id.cmp(&b.task_id));
    if let Some(task) = review.into_iter().next() {
        return Some(task);
    }

    let mut in_progress: Vec<&Task> = roadmap.tasks.iter().filter(|t| t.status == TaskStatus::InProgress).collect();
    in_progress.sort_by(|a, b| a.task_id.cmp(&b.task_id));
    if let Some(task) = in_progress.into_iter().next() {
        return Some(task);
    }

    let mut ready: Vec<&Task> = roadmap
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Todo && dependencies_satisfied(t, roadmap))
        .collect();
    ready.sort_by(|a, b| a.task_id.cmp(&b.task_id));
    ready.into_iter().next()
}

pub fn build_dispatch_context(roadmap: &Roadmap, task: &Task) -> Result<crate::adapter::DispatchContext, serde_json::Error> {
    Ok(crate::adapter::DispatchContext {
        task: serde_json::to_value(task)?,
        roadmap_project: serde_json::to_value(&roadmap.project)?,
    })
}

pub fn make_event(event_seq: u64, actor: &str, action: Action, payload: Value) -> Event {
    Event::new(event_seq, actor, action, payload)
}

/// The three tasks every fresh roadmap starts with.
pub fn seed_tasks() -> Vec<Value> {
    vec![
        json!({
            "task_id": "T-1000",
            "task_kind": "spec",
            "title": "Define roadmap scope",
            "description": "Write the initial specification for this roadmap's audit scope.",
            "outputs": {"files": ["docs/T-1000.md"]},
        }),
        json!({
            "task_id": "T-1010",
            "task_kind": "impl",
            "title": "Implement baseline functionality",
            "description": "Implement the functionality described by T-1000.",
            "depends_on": ["T-1000"],
            "outputs": {"files": ["src/T-1010.rs"]},
        }),
        json!({
            "task_id": "T-1020",
            "task_kind": "qa",
            "title": "Verify baseline functionality",
            "description": "Write and run tests covering T-1010's implementation.",
            "depends_on": ["T-1010"],
            "outputs": {"files": ["tests/T-1020.rs"]},
        }),
    ]
}

/// Build a follow-up `hotfix.create` event for an `issue.report` that named `fixes`.
/// Returns `None` if a hotfix task for this issue already exists in `events`.
pub fn build_hotfix_event(events: &[Event], issue_payload: &Value) -> Option<Value> {
    let issue_id = issue_payload.get("issue_id").and_then(Value::as_str)?;
    let hotfix_task_id = format!("HF-{issue_id}");

    let already_exists = events.iter().any(|e| {
        e.action == Action::HotfixCreate
            && e.payload.get("task_id").and_then(Value::as_str) == Some(hotfix_task_id.as_str())
    });
    if already_exists {
        return None;
    }

    let scope_patch = issue_payload
        .get("scope_patch")
        .cloned()
        .unwrap_or_else(|| json!(["src/hotfix/"]));
    let required_verification = issue_payload
        .get("required_verification")
        .cloned()
        .unwrap_or_else(|| json!(["unit", "regression"]));
    let baseline_id = issue_payload
        .get("affected")
        .and_then(|a| a.get("baseline_id"))
        .cloned()
        .unwrap_or_else(|| json!("B-000"));

    Some(json!({
        "task_id": hotfix_task_id,
        "task_kind": "impl",
        "title": format!("Hotfix for {issue_id}"),
        "description": issue_payload.get("title").cloned().unwrap_or(Value::Null),
        "issue_id": issue_id,
        "is_hotfix": true,
        "scope_patch": scope_patch,
        "required_verification": required_verification,
        "baseline_id": baseline_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Immutability, Outputs, TaskKind};

    fn task(id: &str, status: TaskStatus, depends_on: Vec<&str>) -> Task {
        Task {
            task_id: id.to_string(),
            task_kind: TaskKind::Impl,
            title: id.to_string(),
            description: id.to_string(),
            status,
            depends_on: depends_on.into_iter().map(String::from).collect(),
            targets: vec![],
            outputs: Outputs::default(),
            immutability: Immutability { done_is_immutable: true },
            assigned_to: None,
            started_at: None,
            completed_at: None,
            verification: None,
            issue_id: None,
            fixes: None,
            is_hotfix: false,
            scope_patch: None,
            required_verification: None,
            baseline_id: None,
        }
    }

    fn roadmap(tasks: Vec<Task>) -> Roadmap {
        Roadmap {
            meta: crate::task::RoadmapMeta {
                schema_version: "0.4.0".into(),
                esaa_version: "0.4.x".into(),
                immutable_done: true,
                master_correlation_id: None,
                run: crate::task::RunMeta {
                    run_id: None,
                    status: "running".into(),
                    last_event_seq: 0,
                    projection_hash_sha256: String::new(),
                    verify_status: "not_run".into(),
                },
                updated_at: "2026-01-01T00:00:00Z".into(),
            },
            project: crate::task::Project { name: "esaa-core".into(), audit_scope: "full".into() },
            tasks,
            indexes: Default::default(),
        }
    }

    #[test]
    fn selects_review_before_in_progress_and_todo() {
        let rm = roadmap(vec![
            task("T-1", TaskStatus::Todo, vec![]),
            task("T-2", TaskStatus::InProgress, vec![]),
            task("T-3", TaskStatus::Review, vec![]),
        ]);
        assert_eq!(select_next_task(&rm).unwrap().task_id, "T-3");
    }

    #[test]
    fn skips_todo_with_unsatisfied_dependency() {
        let rm = roadmap(vec![
            task("T-1", TaskStatus::Todo, vec!["T-0"]),
            task("T-2", TaskStatus::Todo, vec![]),
        ]);
        assert_eq!(select_next_task(&rm).unwrap().task_id, "T-2");
    }

    #[test]
    fn picks_lexicographically_smallest_ready_todo() {
        let rm = roadmap(vec![task("T-2", TaskStatus::Todo, vec![]), task("T-1", TaskStatus::Todo, vec![])]);
        assert_eq!(select_next_task(&rm).unwrap().task_id, "T-1");
    }

    #[test]
    fn hotfix_event_is_skipped_when_already_created() {
        let existing = vec![Event::new(
            1,
            "orchestrator",
            Action::HotfixCreate,
            json!({"task_id": "HF-ISS-1"}),
        )];
        let issue_payload = json!({"issue_id": "ISS-1", "title": "bug"});
        assert!(build_hotfix_event(&existing, &issue_payload).is_none());
    }

    #[test]
    fn hotfix_event_is_built_from_issue_payload() {
        let issue_payload = json!({
            "issue_id": "ISS-2",
            "title": "bug",
            "affected": {"baseline_id": "BL-1"},
            "scope_patch": ["src/parser.rs"],
            "required_verification": ["unit"],
        });
        let event = build_hotfix_event(&[], &issue_payload).unwrap();
        assert_eq!(event["task_id"], "HF-ISS-2");
        assert_eq!(event["is_hotfix"], true);
        assert_eq!(event["baseline_id"], "BL-1");
        assert_eq!(event["scope_patch"], json!(["src/parser.rs"]));
        assert_eq!(event["required_verification"], json!(["unit"]));
    }

    #[test]
    fn hotfix_event_defaults_scope_patch_and_baseline_when_absent() {
        let issue_payload = json!({"issue_id": "ISS-3", "title": "bug"});
        let event = build_hotfix_event(&[], &issue_payload).unwrap();
        assert_eq!(event["scope_patch"], json!(["src/hotfix/"]));
        assert_eq!(event["required_verification"], json!(["unit", "regression"]));
        assert_eq!(event["baseline_id"], "B-000");
    }
}

//! Pluggable agent adapters.
//!
//! The orchestrator core never talks to a real model backend directly — it hands a
//! dispatch context to an [`AgentAdapter`] and gets back a JSON agent-output object
//! shaped like what [`crate::validator::validate_agent_output`] expects. The only
//! adapter shipped here is [`MockAgentAdapter`], a deterministic stand-in used by
//! `run` and in tests; real backends are wired up by embedders of this crate.

use serde_json::{json, Value};

/// A dispatchable unit of work handed to an adapter: the task plus enough roadmap
/// context to decide what to do next.
pub struct DispatchContext {
    pub task: Value,
    pub roadmap_project: Value,
}

pub trait AgentAdapter {
    fn agent_id(&self) -> &str;
    fn execute(&self, context: &DispatchContext) -> Value;
    fn health(&self) -> bool {
        true
    }
}

/// Deterministic adapter: inspects `task.status` and emits the canonical next
/// activity event for it. Used by `esaa run` when no other adapter is configured,
/// and exercised directly in tests in place of a real model call.
pub struct MockAgentAdapter {
    agent_id: String,
}

impl MockAgentAdapter {
    pub fn new(agent_id: impl Into<String>) -> Self {
        MockAgentAdapter { agent_id: agent_id.into() }
    }

    fn choose_output_file(task: &Value) -> String {
        if let Some(file) = task
            .get("outputs")
            .and_then(|o| o.get("files"))
            .and_then(Value::as_array)
            .and_then(|files| files.first())
            .and_then(Value::as_str)
        {
            return file.to_string();
        }
        let task_id = task.get("task_id").and_then(Value::as_str).unwrap_or("unknown");
        match task.get("task_kind").and_then(Value::as_str) {
            Some("spec") => format!("docs/{task_id}.md"),
            Some("qa") => format!("tests/{task_id}.rs"),
            _ => format!("src/{task_id}.rs"),
        }
    }

    fn build_file_content(task: &Value) -> String {
        let title = task.get("title").and_then(Value::as_str).unwrap_or("untitled");
        format!("// generated for {title}\n")
    }
}

impl AgentAdapter for MockAgentAdapter {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn execute(&self, context: &DispatchContext) -> Value {
        let task = &context.task;
        let task_id = task.get("task_id").and_then(Value::as_str).unwrap_or_default();
        let status = task.get("status").and_then(Value::as_str).unwrap_or_default();

        match status {
            "todo" => json!({
                "activity_event": {
                    "action": "claim",
                    "task_id": task_id,
                    "notes": "claiming task",
                }
            }),
            "in_progress" => {
                let path = Self::choose_output_file(task);
                let content = Self::build_file_content(task);
                let is_hotfix = task.get("is_hotfix").and_then(Value::as_bool).unwrap_or(false);
                let checks = if is_hotfix {
                    json!([{"name": "unit"}, {"name": "regression"}])
                } else {
                    json!([{"name": "unit"}])
                };
                let mut activity_event = json!({
                    "action": "complete",
                    "task_id": task_id,
                    "notes": "work complete",
                    "verification": {"checks": checks},
                });
                if is_hotfix {
                    if let Some(issue_id) = task.get("issue_id") {
                        activity_event["issue_id"] = issue_id.clone();
                    }
                    activity_event["fixes"] = task.get("fixes").cloned().unwrap_or(json!({}));
                }
                json!({
                    "activity_event": activity_event,
                    "file_updates": [{"path": path, "content": content}],
                })
            }
            "review" => json!({
                "activity_event": {
                    "action": "review",
                    "task_id": task_id,
                    "decision": "approve",
                    "tasks": [task_id],
                    "notes": "looks good",
                }
            }),
            _ => json!({
                "activity_event": {
                    "action": "issue.report",
                    "task_id": task_id,
                    "issue_id": format!("ISS-MOCK-{task_id}"),
                    "severity": "low",
                    "title": format!("unexpected status for {task_id}"),
                    "evidence": {"symptom": "no handler for task status", "repro_steps": []},
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(task: Value) -> DispatchContext {
        DispatchContext { task, roadmap_project: json!({"name": "esaa-core"}) }
    }

    #[test]
    fn todo_task_is_claimed() {
        let adapter = MockAgentAdapter::new("mock-1");
        let output = adapter.execute(&ctx(json!({"task_id": "T-1", "status": "todo"})));
        assert_eq!(output["activity_event"]["action"], "claim");
    }

    #[test]
    fn in_progress_task_is_completed_with_file_update() {
        let adapter = MockAgentAdapter::new("mock-1");
        let output = adapter.execute(&ctx(json!({
            "task_id": "T-1", "status": "in_progress", "task_kind": "impl",
        })));
        assert_eq!(output["activity_event"]["action"], "complete");
        assert_eq!(output["file_updates"][0]["path"], "src/T-1.rs");
    }

    #[test]
    fn review_task_is_approved() {
        let adapter = MockAgentAdapter::new("mock-1");
        let output = adapter.execute(&ctx(json!({"task_id": "T-1", "status": "review"})));
        assert_eq!(output["activity_event"]["decision"], "approve");
    }

    #[test]
    fn unknown_status_reports_an_issue() {
        let adapter = MockAgentAdapter::new("mock-1");
        let output = adapter.execute(&ctx(json!({"task_id": "T-1", "status": "done"})));
        assert_eq!(output["activity_event"]["action"], "issue.report");
    }
}

//! Agent output validation: schema, action vocabulary, lock ownership, forbidden
//! fields, workflow gates, and write-boundary enforcement.
//!
//! Validation runs in a fixed order so the first violation found is always the same
//! one a human debugging a rejected submission would expect, mirroring
//! `validate_agent_output` exactly.

use jsonschema::JSONSchema;
use serde_json::Value;
use std::path::Path;

use crate::contract::{AgentContract, TaskKindBoundary};
use crate::error::OrchestratorError;
use crate::event::Action;
use crate::task::Task;
use crate::util::normalize_safe_rel_path;

/// A file the agent wants written, relative to the repository root.
#[derive(Debug, Clone)]
pub struct FileUpdate {
    pub path: String,
    pub content: String,
}

#[derive(Debug)]
pub struct ValidatedOutput {
    pub action: Action,
    pub activity_event: Value,
    pub file_updates: Vec<FileUpdate>,
}

fn matches_any(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        glob::Pattern::new(pattern)
            .map(|p| p.matches(path))
            .unwrap_or(false)
    })
}

fn validate_safe_path(path: &str) -> Result<String, OrchestratorError> {
    normalize_safe_rel_path(path)
        .ok_or_else(|| OrchestratorError::validation("BOUNDARY_VIOLATION", format!("unsafe path: {path}")))
}

fn boundary_for<'a>(contract: &'a AgentContract, task: &Task) -> Result<&'a TaskKindBoundary, OrchestratorError> {
    contract.boundary_for(task.task_kind.as_str()).ok_or_else(|| {
        OrchestratorError::validation(
            "BOUNDARY_VIOLATION",
            format!("no boundary rules declared for task kind {}", task.task_kind.as_str()),
        )
    })
}

fn validate_boundaries(
    updates: &[FileUpdate],
    contract: &AgentContract,
    task: &Task,
) -> Result<(), OrchestratorError> {
    let boundary = boundary_for(contract, task)?;

    let patch_scope_active = task.is_hotfix && contract.boundaries.patch_scope.enabled;
    let scope = task.scope_patch.as_deref().unwrap_or(&[]);
    if patch_scope_active && scope.is_empty() {
        return Err(OrchestratorError::validation(
            "BOUNDARY_VIOLATION",
            "hotfix task missing scope_patch",
        ));
    }

    for update in updates {
        let path = validate_safe_path(&update.path)?;

        if matches_any(&path, &boundary.forbidden_write) {
            return Err(OrchestratorError::validation(
                "BOUNDARY_VIOLATION",
                format!("path is forbidden for writes: {path}"),
            ));
        }
        if !matches_any(&path, &boundary.write) {
            return Err(OrchestratorError::validation(
                "BOUNDARY_VIOLATION",
                format!("path is outside the allowed write set: {path}"),
            ));
        }

        if patch_scope_active && !matches_any(&path, scope) {
            return Err(OrchestratorError::validation(
                "BOUNDARY_VIOLATION",
                format!("path is outside the hotfix's scope_patch: {path}"),
            ));
        }
    }
    Ok(())
}

/// Validate a complete agent output object against the contract and the task it
/// targets. Returns the parsed activity event plus any requested file writes.
pub fn validate_agent_output(
    output: &Value,
    schema: &Value,
    contract: &AgentContract,
    task: &Task,
) -> Result<ValidatedOutput, OrchestratorError> {
    let compiled = JSONSchema::compile(schema)
        .map_err(|e| OrchestratorError::validation("SCHEMA_INVALID", format!("bad agent_result schema: {e}")))?;
    if let Err(mut errors) = compiled.validate(output) {
        let first = errors.next().map(|e| e.to_string()).unwrap_or_default();
        return Err(OrchestratorError::validation("SCHEMA_INVALID", first));
    }

    let allowed_root_keys = ["activity_event", "file_updates"];
    if let Some(obj) = output.as_object() {
        if let Some(unknown) = obj.keys().find(|k| !allowed_root_keys.contains(&k.as_str())) {
            return Err(OrchestratorError::validation(
                "SCHEMA_INVALID",
                format!("unknown root key in agent output: {unknown}"),
            ));
        }
    }

    let activity_event = output
        .get("activity_event")
        .cloned()
        .ok_or_else(|| OrchestratorError::validation("SCHEMA_INVALID", "missing activity_event"))?;

    let action_str = activity_event
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| OrchestratorError::validation("SCHEMA_INVALID", "activity_event missing action"))?;
    if !contract.vocabulary.allowed_agent_actions.iter().any(|a| a == action_str) {
        return Err(OrchestratorError::validation(
            "UNKNOWN_ACTION",
            format!("action not allowed by contract: {action_str}"),
        ));
    }
    let action: Action = action_str.parse()?;

    if let Some(event_task_id) = activity_event.get("task_id").and_then(Value::as_str) {
        if event_task_id != task.task_id {
            return Err(OrchestratorError::validation(
                "SCHEMA_INVALID",
                format!("activity_event task_id {event_task_id} does not match dispatched task {}", task.task_id),
            ));
        }
    }

    if let Some(obj) = activity_event.as_object() {
        if let Some(forbidden) = contract
            .output_contract
            .activity_event
            .forbidden_fields
            .iter()
            .find(|f| obj.contains_key(f.as_str()))
        {
            return Err(OrchestratorError::validation(
                "SCHEMA_INVALID",
                format!("activity_event contains forbidden field: {forbidden}"),
            ));
        }
    }

    if action == Action::Complete && task.task_kind == crate::task::TaskKind::Impl {
        let checks_len = activity_event
            .get("verification")
            .and_then(|v| v.get("checks"))
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        let required_count = if task.is_hotfix { 2 } else { 1 };
        if checks_len < required_count {
            return Err(OrchestratorError::workflow(
                "WORKFLOW_GATE",
                format!("complete requires at least {required_count} verification check(s), got {checks_len}"),
            ));
        }
    }

    if action == Action::Complete && task.is_hotfix {
        let has_issue_id = activity_event.get("issue_id").is_some();
        let has_fixes = activity_event.get("fixes").is_some();
        if !has_issue_id || !has_fixes {
            return Err(OrchestratorError::workflow(
                "WORKFLOW_GATE",
                "hotfix complete must include issue_id and fixes",
            ));
        }
    }

    if action == Action::Review {
        let decision = activity_event.get("decision").and_then(Value::as_str).unwrap_or_default();
        if decision != "approve" && decision != "request_changes" {
            return Err(OrchestratorError::validation(
                "SCHEMA_INVALID",
                format!("invalid review decision: {decision}"),
            ));
        }
    }

    let file_updates: Vec<FileUpdate> = output
        .get("file_updates")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|u| {
                    let path = u.get("path")?.as_str()?.to_string();
                    let content = u.get("content")?.as_str()?.to_string();
                    Some(FileUpdate { path, content })
                })
                .collect()
        })
        .unwrap_or_default();

    validate_boundaries(&file_updates, contract, task)?;

    Ok(ValidatedOutput { action, activity_event, file_updates })
}

/// Write validated file updates relative to `root`, creating parent directories.
pub fn apply_file_updates(root: &Path, updates: &[FileUpdate]) -> Result<(), OrchestratorError> {
    for update in updates {
        let target = root.join(&update.path);
        crate::util::ensure_parent(&target)?;
        std::fs::write(&target, &update.content)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contract() -> AgentContract {
        serde_yaml::from_str(
            r#"
vocabulary:
  allowed_agent_actions: [claim, complete, review, issue.report]
output_contract:
  activity_event:
    forbidden_fields: [event_seq, event_id]
boundaries:
  by_task_kind:
    impl:
      read: ["**/*"]
      write: ["src/**"]
      forbidden_write: [".roadmap/**"]
  patch_scope:
    enabled: true
"#,
        )
        .unwrap()
    }

    fn task() -> Task {
        crate::task::Task {
            task_id: "T-1".into(),
            task_kind: crate::task::TaskKind::Impl,
            title: "t".into(),
            description: "d".into(),
            status: crate::task::TaskStatus::InProgress,
            depends_on: vec![],
            targets: vec![],
            outputs: crate::task::Outputs::default(),
            immutability: crate::task::Immutability { done_is_immutable: true },
            assigned_to: Some("agent-a".into()),
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

    fn schema() -> Value {
        json!({"type": "object"})
    }

    #[test]
    fn rejects_action_outside_contract_vocabulary() {
        let output = json!({"activity_event": {"action": "delete_everything", "task_id": "T-1"}});
        let err = validate_agent_output(&output, &schema(), &contract(), &task()).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_ACTION");
    }

    #[test]
    fn rejects_mismatched_task_id() {
        let output = json!({"activity_event": {"action": "claim", "task_id": "T-OTHER"}});
        let err = validate_agent_output(&output, &schema(), &contract(), &task()).unwrap_err();
        assert_eq!(err.code(), "SCHEMA_INVALID");
    }

    #[test]
    fn accepts_write_inside_boundary() {
        let output = json!({
            "activity_event": {"action": "claim", "task_id": "T-1"},
            "file_updates": [{"path": "src/lib.rs", "content": "// ok"}],
        });
        let result = validate_agent_output(&output, &schema(), &contract(), &task()).unwrap();
        assert_eq!(result.file_updates.len(), 1);
    }

    #[test]
    fn rejects_write_outside_boundary() {
        let output = json!({
            "activity_event": {"action": "claim", "task_id": "T-1"},
            "file_updates": [{"path": ".roadmap/roadmap.json", "content": "{}"}],
        });
        let err = validate_agent_output(&output, &schema(), &contract(), &task()).unwrap_err();
        assert_eq!(err.code(), "BOUNDARY_VIOLATION");
    }

    #[test]
    fn rejects_path_traversal() {
        let output = json!({
            "activity_event": {"action": "claim", "task_id": "T-1"},
            "file_updates": [{"path": "../../etc/passwd", "content": "x"}],
        });
        let err = validate_agent_output(&output, &schema(), &contract(), &task()).unwrap_err();
        assert_eq!(err.code(), "BOUNDARY_VIOLATION");
    }

    #[test]
    fn complete_without_any_checks_fails_workflow_gate() {
        let output = json!({"activity_event": {"action": "complete", "task_id": "T-1", "verification": {"checks": []}}});
        let err = validate_agent_output(&output, &schema(), &contract(), &task()).unwrap_err();
        assert_eq!(err.code(), "WORKFLOW_GATE");
    }

    #[test]
    fn complete_with_one_check_satisfies_plain_impl_gate() {
        let output = json!({
            "activity_event": {"action": "complete", "task_id": "T-1", "verification": {"checks": [{"name": "tests"}]}},
        });
        let result = validate_agent_output(&output, &schema(), &contract(), &task()).unwrap();
        assert_eq!(result.action, Action::Complete);
    }

    fn hotfix_task() -> Task {
        let mut t = task();
        t.is_hotfix = true;
        t.scope_patch = Some(vec!["src/hotfix/**".to_string()]);
        t
    }

    #[test]
    fn hotfix_complete_with_one_check_fails_workflow_gate() {
        let output = json!({
            "activity_event": {
                "action": "complete",
                "task_id": "T-1",
                "verification": {"checks": [{"name": "unit"}]},
                "issue_id": "ISS-1",
                "fixes": {},
            },
        });
        let err = validate_agent_output(&output, &schema(), &contract(), &hotfix_task()).unwrap_err();
        assert_eq!(err.code(), "WORKFLOW_GATE");
    }

    #[test]
    fn hotfix_complete_missing_issue_id_fails_workflow_gate() {
        let output = json!({
            "activity_event": {
                "action": "complete",
                "task_id": "T-1",
                "verification": {"checks": [{"name": "unit"}, {"name": "regression"}]},
                "fixes": {},
            },
        });
        let err = validate_agent_output(&output, &schema(), &contract(), &hotfix_task()).unwrap_err();
        assert_eq!(err.code(), "WORKFLOW_GATE");
    }

    #[test]
    fn hotfix_with_empty_scope_patch_fails_boundary_check() {
        let mut t = hotfix_task();
        t.scope_patch = Some(vec![]);
        let output = json!({
            "activity_event": {"action": "claim", "task_id": "T-1"},
            "file_updates": [{"path": "src/hotfix/fix.rs", "content": "// fix"}],
        });
        let err = validate_agent_output(&output, &schema(), &contract(), &t).unwrap_err();
        assert_eq!(err.code(), "BOUNDARY_VIOLATION");
    }
}

//! Projection record types: [`Task`], [`Issue`], [`Lesson`], and the three views
//! ([`Roadmap`], [`IssuesView`], [`LessonsView`]) the projector materializes.
//!
//! These are the only structs the projector ever clones into an emitted view —
//! Rust's ordinary value semantics give the deep-copy discipline the original
//! Python projector had to do by hand with `copy.deepcopy`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Spec,
    Impl,
    Qa,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Spec => "spec",
            TaskKind::Impl => "impl",
            TaskKind::Qa => "qa",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Review,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Immutability {
    pub done_is_immutable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Outputs {
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub task_kind: TaskKind,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub outputs: Outputs,
    pub immutability: Immutability,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixes: Option<Value>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_hotfix: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_patch: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_verification: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_id: Option<String>,
}

impl Task {
    pub fn is_locked(&self) -> bool {
        matches!(self.status, TaskStatus::InProgress | TaskStatus::Review) || self.assigned_to.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueLinks {
    pub reported_by_task_id: Option<String>,
    pub fixes_task_id: Option<Value>,
    pub hotfix_task_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueTimeline {
    pub created_event_seq: u64,
    pub resolved_event_seq: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub issue_id: String,
    pub status: IssueStatus,
    pub severity: String,
    pub title: String,
    pub baseline_id: Option<String>,
    #[serde(default)]
    pub affected: Value,
    #[serde(default)]
    pub evidence: Value,
    pub resolution: Option<Value>,
    pub links: IssueLinks,
    pub timeline: IssueTimeline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub lesson_id: String,
    pub status: String,
    pub created_at: String,
    pub title: String,
    pub mistake: Value,
    pub rule: Value,
    pub scope: Value,
    pub enforcement: Value,
    pub source_refs: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: Option<String>,
    pub status: String,
    pub last_event_seq: u64,
    pub projection_hash_sha256: String,
    pub verify_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadmapMeta {
    pub schema_version: String,
    pub esaa_version: String,
    pub immutable_done: bool,
    pub master_correlation_id: Option<String>,
    pub run: RunMeta,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub audit_scope: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskIndexes {
    pub by_status: BTreeMap<String, u64>,
    pub by_kind: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roadmap {
    pub meta: RoadmapMeta,
    pub project: Project,
    pub tasks: Vec<Task>,
    pub indexes: TaskIndexes,
}

impl Roadmap {
    pub fn find_task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewMeta {
    pub schema_version: String,
    pub esaa_version: String,
    pub generated_by: String,
    pub source_event_store: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_seq: Option<u64>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IssueIndexes {
    pub open_by_baseline: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuesView {
    pub meta: ViewMeta,
    pub issues: Vec<Issue>,
    pub indexes: IssueIndexes,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LessonIndexes {
    pub by_task_kind: BTreeMap<String, Vec<String>>,
    pub by_enforcement_applies_to: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonsView {
    pub meta: ViewMeta,
    pub lessons: Vec<Lesson>,
    pub indexes: LessonIndexes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_value(TaskKind::Impl).unwrap(), "impl");
    }

    #[test]
    fn task_is_locked_when_assigned() {
        let task = Task {
            task_id: "T-1".into(),
            task_kind: TaskKind::Spec,
            title: "t".into(),
            description: "d".into(),
            status: TaskStatus::Todo,
            depends_on: vec![],
            targets: vec![],
            outputs: Outputs::default(),
            immutability: Immutability { done_is_immutable: true },
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
        };
        assert!(task.is_locked());
    }
}

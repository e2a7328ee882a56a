//! The agent contract: vocabulary, output shape, and write boundaries an agent
//! output must respect, loaded from `AGENT_CONTRACT.yaml`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    pub allowed_agent_actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEventContract {
    #[serde(default)]
    pub forbidden_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputContract {
    pub activity_event: ActivityEventContract,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskKindBoundary {
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
    #[serde(default)]
    pub forbidden_write: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PatchScope {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Boundaries {
    pub by_task_kind: BTreeMap<String, TaskKindBoundary>,
    #[serde(default)]
    pub patch_scope: PatchScope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContract {
    pub vocabulary: Vocabulary,
    pub output_contract: OutputContract,
    pub boundaries: Boundaries,
}

impl AgentContract {
    pub fn boundary_for(&self, task_kind: &str) -> Option<&TaskKindBoundary> {
        self.boundaries.by_task_kind.get(task_kind)
    }
}

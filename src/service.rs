//! The orchestrator service: the operations the CLI exposes (`init`, `project`,
//! `verify`, `replay`, `submit`, `process`, `run`), each grounded one-to-one on the
//! corresponding method on the original `ESAAService`.

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::adapter::AgentAdapter;
use crate::constants::{
    DEFAULT_PROJECT_NAME, EVENT_STORE_PATH, INBOX_DIR, INBOX_DONE_DIR, INBOX_REJECTED_DIR,
};
use crate::error::OrchestratorError;
use crate::event::{normalize_legacy_verify_status, Action, Event};
use crate::projector::{compute_projection_hash, materialize};
use crate::store;
use crate::task::TaskStatus;
use crate::validator::{apply_file_updates, validate_agent_output};
use crate::util::utc_now_iso;
use crate::workflow::{all_tasks_done, build_dispatch_context, build_hotfix_event, select_next_task};

pub struct OrchestratorService {
    root: PathBuf,
}

impl OrchestratorService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        OrchestratorService { root: root.into() }
    }

    fn append_and_save(&self, mut events: Vec<Event>, new_events: Vec<Event>) -> Result<Value, OrchestratorError> {
        store::append_events(&self.root, &new_events)?;
        events.extend(new_events);
        let materialized = materialize(&events, DEFAULT_PROJECT_NAME)?;
        store::save_roadmap(&self.root, &materialized.roadmap)?;
        store::save_issues(&self.root, &materialized.issues_view)?;
        store::save_lessons(&self.root, &materialized.lessons_view)?;
        Ok(serde_json::to_value(&materialized.roadmap)?)
    }

    /// Scaffold `.roadmap/` and seed the three baseline tasks. Refuses to run
    /// against a non-empty event store unless `force` is set.
    pub fn init(
        &self,
        run_id: &str,
        master_correlation_id: Option<&str>,
        force: bool,
    ) -> Result<Value, OrchestratorError> {
        let existing = store::parse_event_store(&self.root)?;
        if !existing.is_empty() && !force {
            return Err(OrchestratorError::workflow(
                "INIT_BLOCKED",
                "event store already has events; pass force to reinitialize",
            ));
        }
        if force {
            fs::write(self.root.join(EVENT_STORE_PATH), "")?;
        }

        let mut seq = 1u64;
        let mut new_events = Vec::new();
        new_events.push(Event::new(
            seq,
            "orchestrator",
            Action::RunStart,
            json!({
                "run_id": run_id,
                "master_correlation_id": master_correlation_id,
            }),
        ));
        seq += 1;

        for task_payload in crate::workflow::seed_tasks() {
            new_events.push(Event::new(seq, "orchestrator", Action::TaskCreate, task_payload));
            seq += 1;
        }

        new_events.push(Event::new(seq, "orchestrator", Action::VerifyStart, json!({})));
        seq += 1;
        new_events.push(Event::new(seq, "orchestrator", Action::VerifyOk, json!({})));

        self.append_and_save(Vec::new(), new_events)
    }

    pub fn project(&self) -> Result<Value, OrchestratorError> {
        let events = store::parse_event_store(&self.root)?;
        let materialized = materialize(&events, DEFAULT_PROJECT_NAME)?;
        store::save_roadmap(&self.root, &materialized.roadmap)?;
        store::save_issues(&self.root, &materialized.issues_view)?;
        store::save_lessons(&self.root, &materialized.lessons_view)?;
        Ok(serde_json::to_value(&materialized.roadmap)?)
    }

    /// Recompute the projection hash from the event log and compare against the
    /// stored roadmap. Never raises on a parse failure: a corrupted store becomes
    /// `verify_status = "corrupted"` in the result instead.
    pub fn verify(&self) -> Result<Value, OrchestratorError> {
        let events = match store::parse_event_store(&self.root) {
            Ok(events) => events,
            Err(e) if e.is_corrupted() => {
                return Ok(json!({
                    "verify_status": "corrupted",
                    "error_code": e.code(),
                    "error_message": e.to_string(),
                }))
            }
            Err(e) => return Err(e),
        };

        let materialized = materialize(&events, DEFAULT_PROJECT_NAME)?;
        let computed_hash = compute_projection_hash(
            &materialized.roadmap.meta.schema_version,
            &materialized.roadmap.project,
            &materialized.roadmap.tasks,
            &materialized.roadmap.indexes,
        )?;

        let stored = store::load_roadmap(&self.root)?;
        let verify_status = match stored {
            Some(stored) => {
                let stored_status = normalize_legacy_verify_status(&stored.meta.run.verify_status);
                if stored.meta.run.projection_hash_sha256 == computed_hash
                    && stored.meta.run.last_event_seq == materialized.roadmap.meta.run.last_event_seq
                {
                    "ok"
                } else if stored_status == "corrupted" {
                    "corrupted"
                } else {
                    "mismatch"
                }
            }
            None => "ok",
        };

        Ok(json!({
            "verify_status": verify_status,
            "computed_hash": computed_hash,
            "last_event_seq": materialized.roadmap.meta.run.last_event_seq,
        }))
    }

    /// Materialize only the events up to (and including) `until`, which may be a
    /// numeric event_seq or an event_id. Does not truncate the on-disk log.
    pub fn replay(&self, until: &str, write_views: bool) -> Result<Value, OrchestratorError> {
        let events = store::parse_event_store(&self.root)?;
        let cutoff = match until.parse::<u64>() {
            Ok(seq) => events.iter().position(|e| e.event_seq == seq),
            Err(_) => events.iter().position(|e| e.event_id == until),
        }
        .ok_or_else(|| OrchestratorError::workflow("TASK_NOT_FOUND", format!("replay target not found: {until}")))?;

        let slice = &events[..=cutoff];
        let materialized = materialize(slice, DEFAULT_PROJECT_NAME)?;
        if write_views {
            store::save_roadmap(&self.root, &materialized.roadmap)?;
            store::save_issues(&self.root, &materialized.issues_view)?;
            store::save_lessons(&self.root, &materialized.lessons_view)?;
        }
        Ok(serde_json::to_value(&materialized.roadmap)?)
    }

    /// Validate and apply one agent output: the activity event, any requested file
    /// writes, hotfix synthesis, and a verify bookend. Nothing is persisted when
    /// `dry_run` is set.
    pub fn submit(&self, agent_output: &Value, actor: &str, dry_run: bool) -> Result<Value, OrchestratorError> {
        let events = store::parse_event_store(&self.root)?;
        let materialized = materialize(&events, DEFAULT_PROJECT_NAME)?;

        let task_id = agent_output
            .get("activity_event")
            .and_then(|e| e.get("task_id"))
            .and_then(Value::as_str)
            .ok_or_else(|| OrchestratorError::validation("SCHEMA_INVALID", "agent output missing task_id"))?;
        let task = store::require_task(&materialized.roadmap, task_id)?;

        let contract = store::load_agent_contract(&self.root)?;
        let schema = store::load_agent_result_schema(&self.root)?;

        let validated = validate_agent_output(agent_output, &schema, &contract, task)?;

        let mut seq = store::next_event_seq(&events);
        let mut new_events = vec![Event::new(seq, actor, validated.action, validated.activity_event.clone())];
        seq += 1;

        for update in &validated.file_updates {
            new_events.push(Event::new(
                seq,
                actor,
                Action::OrchestratorFileWrite,
                json!({"task_id": task_id, "path": update.path}),
            ));
            seq += 1;
        }

        if validated.action == Action::IssueReport {
            if let Some(hotfix_payload) = build_hotfix_event(&events, &validated.activity_event) {
                new_events.push(Event::new(seq, "orchestrator", Action::HotfixCreate, hotfix_payload));
                seq += 1;
            }
        }

        let mut tentative = events.clone();
        tentative.extend(new_events.clone());
        let verify_result = materialize(&tentative, DEFAULT_PROJECT_NAME);

        let (verify_action, verify_payload) = match &verify_result {
            Ok(_) => (Action::VerifyOk, json!({})),
            Err(e) => (Action::VerifyFail, json!({"error_code": e.code(), "error_message": e.to_string()})),
        };
        new_events.push(Event::new(seq, "orchestrator", verify_action, verify_payload));

        let materialized_final = verify_result?;

        if dry_run {
            return Ok(json!({
                "dry_run": true,
                "would_apply": new_events,
                "roadmap": materialized_final.roadmap,
            }));
        }

        for update in &validated.file_updates {
            apply_file_updates(&self.root, std::slice::from_ref(update))?;
        }

        self.append_and_save(events, new_events)
    }

    /// Scan `.roadmap/inbox/*.json` for `actor__task_id.json`-named agent outputs,
    /// submitting each and filing it under `inbox/done/` or `inbox/rejected/`.
    pub fn process(&self, dry_run: bool) -> Result<Value, OrchestratorError> {
        let inbox = self.root.join(INBOX_DIR);
        if !inbox.exists() {
            return Ok(json!({"processed": Vec::<Value>::new()}));
        }

        let mut results = Vec::new();
        let mut entries: Vec<PathBuf> = walkdir::WalkDir::new(&inbox)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        entries.sort();

        for path in entries {
            let file_name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
            let actor = file_name.split("__").next().unwrap_or("unknown-agent").to_string();
            let text = fs::read_to_string(&path)?;
            let output: Value = serde_json::from_str(&text)?;

            match self.submit(&output, &actor, dry_run) {
                Ok(_) => {
                    results.push(json!({"file": file_name, "status": "accepted"}));
                    if !dry_run {
                        self.move_inbox_entry(&path, INBOX_DONE_DIR)?;
                    }
                }
                Err(e) => {
                    results.push(json!({"file": file_name, "status": "rejected", "error_code": e.code()}));
                    if !dry_run {
                        self.move_inbox_entry(&path, INBOX_REJECTED_DIR)?;
                    }
                }
            }
        }

        Ok(json!({"processed": results}))
    }

    fn move_inbox_entry(&self, path: &Path, dest_dir: &str) -> Result<(), OrchestratorError> {
        let dest = self.root.join(dest_dir);
        fs::create_dir_all(&dest)?;
        let target = dest.join(path.file_name().unwrap());
        fs::rename(path, target)?;
        Ok(())
    }

    /// Autonomously drive `steps` dispatch cycles with `adapter`, stopping early
    /// once every task is done. A rejected adapter output is recorded as
    /// `output.rejected` rather than aborting the run.
    pub fn run(&self, adapter: &dyn AgentAdapter, steps: u32, dry_run: bool) -> Result<Value, OrchestratorError> {
        let mut log = Vec::new();

        for _ in 0..steps {
            let events = store::parse_event_store(&self.root)?;
            let materialized = materialize(&events, DEFAULT_PROJECT_NAME)?;

            if all_tasks_done(&materialized.roadmap.tasks) {
                if !dry_run {
                    let seq = store::next_event_seq(&events);
                    self.append_and_save(
                        events,
                        vec![Event::new(seq, "orchestrator", Action::RunEnd, json!({"status": "completed"}))],
                    )?;
                }
                log.push(json!({"step": "run.end", "reason": "all tasks done"}));
                break;
            }

            let task = match select_next_task(&materialized.roadmap) {
                Some(task) => task,
                None => {
                    log.push(json!({"step": "idle", "reason": "no dispatchable task"}));
                    break;
                }
            };
            let task_id = task.task_id.clone();

            let context = build_dispatch_context(&materialized.roadmap, task)?;
            let output = adapter.execute(&context);

            match self.submit(&output, adapter.agent_id(), dry_run) {
                Ok(_) => log.push(json!({"step": task_id, "status": "accepted"})),
                Err(e) => {
                    log.push(json!({"step": task_id, "status": "rejected", "error_code": e.code()}));
                    if !dry_run {
                        let events = store::parse_event_store(&self.root)?;
                        let seq = store::next_event_seq(&events);
                        self.append_and_save(
                            events,
                            vec![Event::new(
                                seq,
                                "orchestrator",
                                Action::OutputRejected,
                                json!({"task_id": task_id, "error_code": e.code(), "error_message": e.to_string()}),
                            )],
                        )?;
                    }
                }
            }
        }

        Ok(json!({"steps_run": log.len(), "log": log, "updated_at": utc_now_iso()}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockAgentAdapter;
    use tempfile::tempdir;

    fn write_fixtures(root: &Path) {
        fs::create_dir_all(root.join(".roadmap")).unwrap();
        fs::write(
            root.join(".roadmap/AGENT_CONTRACT.yaml"),
            r#"
vocabulary:
  allowed_agent_actions: [claim, complete, review, "issue.report"]
output_contract:
  activity_event:
    forbidden_fields: [event_seq, event_id]
boundaries:
  by_task_kind:
    spec:
      write: ["docs/**"]
    impl:
      write: ["src/**"]
    qa:
      write: ["tests/**"]
  patch_scope:
    enabled: true
"#,
        )
        .unwrap();
        fs::write(
            root.join(".roadmap/agent_result.schema.json"),
            r#"{"type": "object"}"#,
        )
        .unwrap();
    }

    #[test]
    fn init_seeds_three_tasks_and_six_events() {
        let dir = tempdir().unwrap();
        write_fixtures(dir.path());
        let service = OrchestratorService::new(dir.path());
        service.init("RUN-1", None, false).unwrap();

        let events = store::parse_event_store(dir.path()).unwrap();
        assert_eq!(events.len(), 6);
        let roadmap = store::load_roadmap(dir.path()).unwrap().unwrap();
        assert_eq!(roadmap.tasks.len(), 3);
    }

    #[test]
    fn init_twice_without_force_is_blocked() {
        let dir = tempdir().unwrap();
        write_fixtures(dir.path());
        let service = OrchestratorService::new(dir.path());
        service.init("RUN-1", None, false).unwrap();
        let err = service.init("RUN-1", None, false).unwrap_err();
        assert_eq!(err.code(), "INIT_BLOCKED");
    }

    #[test]
    fn run_drives_the_first_task_through_claim() {
        let dir = tempdir().unwrap();
        write_fixtures(dir.path());
        let service = OrchestratorService::new(dir.path());
        service.init("RUN-1", None, false).unwrap();

        let adapter = MockAgentAdapter::new("mock-1");
        service.run(&adapter, 1, false).unwrap();

        let roadmap = store::load_roadmap(dir.path()).unwrap().unwrap();
        let task = roadmap.find_task("T-1000").unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[test]
    fn verify_reports_ok_right_after_init() {
        let dir = tempdir().unwrap();
        write_fixtures(dir.path());
        let service = OrchestratorService::new(dir.path());
        service.init("RUN-1", None, false).unwrap();
        let result = service.verify().unwrap();
        assert_eq!(result["verify_status"], "ok");
    }
}

//! The orchestrator service object: binds sessions to workflow records and
//! wires the gate state machine, completion guard, tier router, and swarm
//! dispatcher together behind the exposed operations.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use swarm_orchestrator_sdk::{
    log_completion_checked, log_gate_updated, log_route_denied, log_warning, AgentSessionService,
};

use crate::completion::{CompletionCheck, CompletionGuard};
use crate::config::OrchestratorConfig;
use crate::gates::apply_gate_update;
use crate::router::TierRouter;
use crate::state::{GateStatus, StateStore, WorkflowState, PHASE_COMPLETED};
use crate::swarm::{
    BatchOutcome, CancelOutcome, SpawnReport, SwarmDispatcher, TaskDetail, TaskResultEntry,
    TaskSpec, TaskStatus,
};

/// Default await window when a tool call omits the timeout
pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 300_000;

/// Mode assumed when a batch is spawned without a bound session
const DEFAULT_MODE: &str = "balanced";

/// State snapshot with derived progress counts
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    #[serde(flatten)]
    pub state: WorkflowState,
    pub gates_satisfied: usize,
    pub gates_pending: usize,
}

/// One orchestrator instance per process; multiple instances are safe as
/// long as they do not share workflow state files.
pub struct Orchestrator {
    store: StateStore,
    guard: Mutex<CompletionGuard>,
    router: Mutex<TierRouter>,
    swarm: SwarmDispatcher,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, service: Arc<dyn AgentSessionService>) -> Self {
        let store = StateStore::new(config.state_dir.clone());
        let swarm = SwarmDispatcher::new(service, config);
        Self {
            store,
            guard: Mutex::new(CompletionGuard::new()),
            router: Mutex::new(TierRouter::new()),
            swarm,
        }
    }

    /// Bind a host session to a workflow state file; returns the workflow id
    pub fn bind_session(&self, session_id: &str, workflow_path: &Path) -> Result<String> {
        self.store.bind(session_id, workflow_path)
    }

    /// Record a gate verdict and advance the phase when it passes
    pub fn update_gate(
        &self,
        session_id: &str,
        gate: &str,
        status: GateStatus,
        agent_type: &str,
    ) -> Result<WorkflowState> {
        let (_, path) = self
            .store
            .resolve(session_id)
            .ok_or_else(|| anyhow!("No active workflow for session '{}'", session_id))?;

        let updated = self.store.update(&path, |state| {
            apply_gate_update(state, gate, status, agent_type, Utc::now());
        })?;

        if status == GateStatus::Passed {
            self.guard.lock().unwrap().reset(session_id);
        }

        let iteration = updated.gates.get(gate).map(|g| g.iteration).unwrap_or(0);
        log_gate_updated!(&updated.workflow_id, gate, status, iteration);

        Ok(updated)
    }

    /// Consult the completion guard. Approval archives the workflow record;
    /// the guard remains advisory — it cannot stop a caller that quits
    /// without asking.
    pub fn check_completion(&self, session_id: &str) -> CompletionCheck {
        let (state, path) = match self.store.resolve(session_id) {
            Some(found) => found,
            None => {
                return CompletionCheck {
                    can_complete: false,
                    pending_gates: Vec::new(),
                    reason: format!("No active workflow for session '{}'", session_id),
                }
            }
        };

        let check = self.guard.lock().unwrap().check(session_id, &state);
        log_completion_checked!(session_id, check.can_complete, &check.reason);

        if check.can_complete {
            match self.store.archive(&path) {
                Ok(_) => self.store.unbind(session_id),
                Err(e) => log_warning!("Failed to archive {}: {}", path.display(), e),
            }
        }

        check
    }

    /// Snapshot of the bound workflow, or `None` when nothing is active
    pub fn get_state(&self, session_id: &str) -> Option<StateSnapshot> {
        let (state, _) = self.store.resolve(session_id)?;
        let gates_satisfied = state
            .gates
            .values()
            .filter(|g| g.status.is_satisfied())
            .count();
        // Sequenced gates with no recorded verdict count as pending
        let untouched = state
            .phase
            .remaining
            .iter()
            .filter(|gate| !state.gates.contains_key(*gate))
            .count();
        let gates_pending = state.gates.len() - gates_satisfied + untouched;
        Some(StateSnapshot {
            state,
            gates_satisfied,
            gates_pending,
        })
    }

    /// Advisory view over every workflow record in the state directory
    pub fn find_all_active(&self) -> Vec<(WorkflowState, PathBuf)> {
        self.store.find_all_active()
    }

    /// Spawn a batch, routing each task through the tier policy first.
    /// Denied tasks are recorded as failed in the batch, never dropped.
    pub async fn spawn_batch(
        &self,
        session_id: Option<&str>,
        batch_id: &str,
        tasks: Vec<TaskSpec>,
        working_dir: Option<&Path>,
    ) -> Result<SpawnReport> {
        let sid = session_id.unwrap_or("anonymous");
        let mode = session_id
            .and_then(|s| self.store.resolve(s))
            .map(|(state, _)| state.mode.current)
            .unwrap_or_else(|| DEFAULT_MODE.to_string());

        let mut allowed = Vec::with_capacity(tasks.len());
        let mut denied: Vec<TaskDetail> = Vec::new();
        {
            let mut router = self.router.lock().unwrap();
            for task in tasks {
                let decision = router.check(sid, &mode, &task.model);
                if decision.allowed {
                    allowed.push(task);
                } else {
                    log_route_denied!(sid, &mode, &task.model, decision.tier);
                    denied.push(TaskDetail {
                        task_id: task.task_id.clone(),
                        provider: crate::router::resolve_provider(&task.model),
                        status: TaskStatus::Failed,
                        session_id: None,
                        error: Some(decision.reason.clone()),
                    });
                    self.swarm.record_failed(batch_id, task, &decision.reason);
                }
            }
        }

        let mut report = self.swarm.spawn_batch(batch_id, allowed, working_dir).await?;
        report.details.extend(denied);
        Ok(report)
    }

    /// Poll the batch until terminal or timed out
    pub async fn await_batch(
        &self,
        batch_id: &str,
        timeout_ms: Option<u64>,
    ) -> Result<BatchOutcome> {
        self.swarm
            .await_batch(batch_id, timeout_ms.unwrap_or(DEFAULT_BATCH_TIMEOUT_MS))
            .await
    }

    /// Collect truncated transcripts for a batch
    pub async fn collect_results(
        &self,
        batch_id: &str,
    ) -> Result<std::collections::BTreeMap<String, TaskResultEntry>> {
        self.swarm.collect_results(batch_id).await
    }

    /// Cancel one task in a batch
    pub async fn cancel_task(&self, task_id: &str, batch_id: &str) -> Result<CancelOutcome> {
        self.swarm.cancel_task(task_id, batch_id).await
    }

    /// Spawn the fixed three-reviewer validation batch
    pub async fn spawn_validation(
        &self,
        summary: &str,
        changed_files: &[String],
    ) -> Result<(String, SpawnReport)> {
        self.swarm.spawn_validation(summary, changed_files).await
    }

    /// Whether the bound workflow has sequenced every gate
    pub fn is_phase_completed(&self, session_id: &str) -> bool {
        self.store
            .resolve(session_id)
            .map(|(state, _)| state.phase.current == PHASE_COMPLETED)
            .unwrap_or(false)
    }
}

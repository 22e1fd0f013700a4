//! Concurrency-limited parallel task dispatcher
//!
//! Spawns sub-tasks against a per-provider slot budget, polls them for
//! liveness, reclaims capacity from stale or stuck sessions, and collects
//! truncated results. Batches are independent and may run concurrently;
//! the slot table and batch map are shared across batches and guarded by
//! mutexes.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

use swarm_orchestrator_sdk::{
    log_batch_completed, log_batch_started, log_session_completed, log_session_failed,
    log_session_queued, log_session_reclaimed, log_session_spawned, log_warning,
    AgentSessionService, SessionStatus,
};

use crate::config::OrchestratorConfig;
use crate::router::resolve_provider;
use crate::staleness::{classify, Liveness};

/// Delay between successive spawns in one batch, to avoid bursting the
/// remote service
pub const SPAWN_DELAY_MS: u64 = 100;
/// Ceiling applied to collected transcripts
pub const RESULT_TRUNCATE_BYTES: usize = 2048;
/// Model used for the fixed validation batch
const VALIDATION_MODEL: &str = "claude-sonnet-4";

/// Local status of a tracked batch task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// One sub-task submitted to a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: String,
    /// Agent role name, for logging and prompts
    pub agent: String,
    pub model: String,
    pub prompt: String,
}

/// In-memory record of one spawned (or queued) remote task
#[derive(Debug, Clone)]
pub struct TrackedSession {
    pub spec: TaskSpec,
    pub session_id: Option<Uuid>,
    pub provider: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub last_message_count: usize,
    pub last_progress_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl TrackedSession {
    fn new(spec: TaskSpec, provider: String, status: TaskStatus) -> Self {
        let now = Utc::now();
        Self {
            spec,
            session_id: None,
            provider,
            status,
            started_at: now,
            last_message_count: 0,
            last_progress_at: now,
            error: None,
        }
    }
}

struct Batch {
    working_dir: Option<PathBuf>,
    tasks: BTreeMap<String, TrackedSession>,
}

/// Per-task line of a spawn report
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    pub task_id: String,
    pub provider: String,
    pub status: TaskStatus,
    pub session_id: Option<String>,
    pub error: Option<String>,
}

/// Result of `spawn_batch`
#[derive(Debug, Clone, Serialize)]
pub struct SpawnReport {
    pub spawned: usize,
    pub queued: usize,
    pub details: Vec<TaskDetail>,
}

/// Result of `await_batch`
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub completed: bool,
    pub timed_out: bool,
    pub statuses: BTreeMap<String, TaskStatus>,
}

/// One collected task result: transcript text or an error
#[derive(Debug, Clone, Serialize)]
pub struct TaskResultEntry {
    pub status: TaskStatus,
    pub text: Option<String>,
    pub error: Option<String>,
}

/// Result of `cancel_task`
#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub cancelled: bool,
    pub reason: String,
}

/// Per-provider concurrency budget. Acquire/release are atomic per call
/// under the dispatcher's mutex.
#[derive(Debug)]
pub struct SlotTable {
    default_limit: usize,
    limits: HashMap<String, usize>,
    in_flight: HashMap<String, usize>,
}

impl SlotTable {
    pub fn new(default_limit: usize, limits: HashMap<String, usize>) -> Self {
        Self {
            default_limit,
            limits,
            in_flight: HashMap::new(),
        }
    }

    pub fn limit(&self, provider: &str) -> usize {
        self.limits
            .get(provider)
            .copied()
            .unwrap_or(self.default_limit)
    }

    pub fn in_flight(&self, provider: &str) -> usize {
        self.in_flight.get(provider).copied().unwrap_or(0)
    }

    pub fn can_acquire(&self, provider: &str) -> bool {
        self.in_flight(provider) < self.limit(provider)
    }

    /// Take one slot; returns false (and takes nothing) at the limit
    pub fn acquire(&mut self, provider: &str) -> bool {
        if !self.can_acquire(provider) {
            return false;
        }
        *self.in_flight.entry(provider.to_string()).or_insert(0) += 1;
        true
    }

    pub fn release(&mut self, provider: &str) {
        if let Some(count) = self.in_flight.get_mut(provider) {
            *count = count.saturating_sub(1);
        }
    }
}

/// The dispatcher: owns the slot table and the batch → task → session map
pub struct SwarmDispatcher {
    service: Arc<dyn AgentSessionService>,
    config: OrchestratorConfig,
    slots: Mutex<SlotTable>,
    batches: Mutex<HashMap<String, Batch>>,
}

impl SwarmDispatcher {
    pub fn new(service: Arc<dyn AgentSessionService>, config: OrchestratorConfig) -> Self {
        let slots = SlotTable::new(
            config.default_concurrency,
            config.provider_concurrency.clone(),
        );
        Self {
            service,
            config,
            slots: Mutex::new(slots),
            batches: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a batch of tasks, queueing (without blocking) whatever the
    /// per-provider budget cannot admit. Queued tasks from earlier calls on
    /// the same batch are promoted first.
    pub async fn spawn_batch(
        &self,
        batch_id: &str,
        tasks: Vec<TaskSpec>,
        working_dir: Option<&Path>,
    ) -> Result<SpawnReport> {
        log_batch_started!(batch_id, tasks.len());

        {
            let mut batches = self.batches.lock().unwrap();
            batches.entry(batch_id.to_string()).or_insert_with(|| Batch {
                working_dir: working_dir.map(Path::to_path_buf),
                tasks: BTreeMap::new(),
            });
        }

        // Earlier queued tasks become eligible on this spawn cycle
        self.promote_queued(batch_id).await;

        let mut details = Vec::with_capacity(tasks.len());
        for task in tasks {
            let provider = resolve_provider(&task.model);

            {
                let batches = self.batches.lock().unwrap();
                if let Some(batch) = batches.get(batch_id) {
                    if batch.tasks.contains_key(&task.task_id) {
                        details.push(TaskDetail {
                            task_id: task.task_id.clone(),
                            provider,
                            status: TaskStatus::Failed,
                            session_id: None,
                            error: Some("Duplicate task id in batch".to_string()),
                        });
                        continue;
                    }
                }
            }

            let acquired = self.slots.lock().unwrap().acquire(&provider);
            if !acquired {
                log_session_queued!(batch_id, &task.task_id, &provider);
                let tracked =
                    TrackedSession::new(task.clone(), provider.clone(), TaskStatus::Queued);
                details.push(TaskDetail {
                    task_id: task.task_id.clone(),
                    provider,
                    status: TaskStatus::Queued,
                    session_id: None,
                    error: None,
                });
                self.insert_task(batch_id, tracked);
                continue;
            }

            match self.start_session(&task, working_dir).await {
                Ok(session_id) => {
                    log_session_spawned!(batch_id, &task.task_id, session_id, &provider);
                    let mut tracked =
                        TrackedSession::new(task.clone(), provider.clone(), TaskStatus::Running);
                    tracked.session_id = Some(session_id);
                    details.push(TaskDetail {
                        task_id: task.task_id.clone(),
                        provider,
                        status: TaskStatus::Running,
                        session_id: Some(session_id.to_string()),
                        error: None,
                    });
                    self.insert_task(batch_id, tracked);
                    // Stagger spawns so the remote service is not burst
                    tokio::time::sleep(Duration::from_millis(SPAWN_DELAY_MS)).await;
                }
                Err(e) => {
                    // A slot must never be held for a session that does not exist
                    self.slots.lock().unwrap().release(&provider);
                    log_session_failed!(batch_id, &task.task_id, e);
                    let mut tracked =
                        TrackedSession::new(task.clone(), provider.clone(), TaskStatus::Failed);
                    tracked.error = Some(e.to_string());
                    details.push(TaskDetail {
                        task_id: task.task_id.clone(),
                        provider,
                        status: TaskStatus::Failed,
                        session_id: None,
                        error: Some(e.to_string()),
                    });
                    self.insert_task(batch_id, tracked);
                }
            }
        }

        let spawned = details
            .iter()
            .filter(|d| d.status == TaskStatus::Running)
            .count();
        let queued = details
            .iter()
            .filter(|d| d.status == TaskStatus::Queued)
            .count();

        Ok(SpawnReport {
            spawned,
            queued,
            details,
        })
    }

    /// Record a task as failed without ever spawning it (e.g. router denial),
    /// so it stays visible in the batch instead of being silently dropped.
    pub fn record_failed(&self, batch_id: &str, task: TaskSpec, reason: &str) {
        let provider = resolve_provider(&task.model);
        log_session_failed!(batch_id, &task.task_id, reason);
        let mut batches = self.batches.lock().unwrap();
        let batch = batches.entry(batch_id.to_string()).or_insert_with(|| Batch {
            working_dir: None,
            tasks: BTreeMap::new(),
        });
        let mut tracked = TrackedSession::new(task, provider, TaskStatus::Failed);
        tracked.error = Some(reason.to_string());
        batch.tasks.insert(tracked.spec.task_id.clone(), tracked);
    }

    /// Poll until every task in the batch is terminal or the timeout elapses.
    /// Timing out stops polling without cancelling anything; a later call may
    /// still reclaim stale sessions.
    pub async fn await_batch(&self, batch_id: &str, timeout_ms: u64) -> Result<BatchOutcome> {
        if !self.batches.lock().unwrap().contains_key(batch_id) {
            return Err(anyhow!("Unknown batch: {}", batch_id));
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            self.promote_queued(batch_id).await;
            self.poll_batch_once(batch_id).await;

            let statuses = self.batch_statuses(batch_id).unwrap_or_default();
            if statuses.values().all(|s| s.is_terminal()) {
                let completed = statuses
                    .values()
                    .filter(|s| **s == TaskStatus::Completed)
                    .count();
                let failed = statuses.len() - completed;
                log_batch_completed!(batch_id, completed, failed);
                return Ok(BatchOutcome {
                    completed: true,
                    timed_out: false,
                    statuses,
                });
            }

            if Instant::now() >= deadline {
                return Ok(BatchOutcome {
                    completed: false,
                    timed_out: true,
                    statuses,
                });
            }

            tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        }
    }

    /// Fetch final transcripts for every task, truncated to a fixed ceiling
    pub async fn collect_results(
        &self,
        batch_id: &str,
    ) -> Result<BTreeMap<String, TaskResultEntry>> {
        let snapshot: Vec<(String, Option<Uuid>, TaskStatus, Option<String>)> = {
            let batches = self.batches.lock().unwrap();
            let batch = batches
                .get(batch_id)
                .ok_or_else(|| anyhow!("Unknown batch: {}", batch_id))?;
            batch
                .tasks
                .values()
                .map(|t| {
                    (
                        t.spec.task_id.clone(),
                        t.session_id,
                        t.status,
                        t.error.clone(),
                    )
                })
                .collect()
        };

        // Transcripts are independent; fetch them concurrently
        let fetches = snapshot.into_iter().map(|(task_id, session_id, status, error)| async move {
            let entry = match session_id {
                Some(session_id) => match self.service.fetch_transcript(&session_id).await {
                    Ok(text) => TaskResultEntry {
                        status,
                        text: Some(truncate_result(&text)),
                        error,
                    },
                    Err(e) => TaskResultEntry {
                        status,
                        text: None,
                        error: Some(format!("Failed to fetch transcript: {}", e)),
                    },
                },
                None => TaskResultEntry {
                    status,
                    text: None,
                    error: Some(error.unwrap_or_else(|| "Task never spawned".to_string())),
                },
            };
            (task_id, entry)
        });

        Ok(futures::future::join_all(fetches).await.into_iter().collect())
    }

    /// Cancel one task: best-effort remote cancel, immediate local bookkeeping
    pub async fn cancel_task(&self, task_id: &str, batch_id: &str) -> Result<CancelOutcome> {
        let (session_id, status, provider) = {
            let batches = self.batches.lock().unwrap();
            let batch = batches
                .get(batch_id)
                .ok_or_else(|| anyhow!("Unknown batch: {}", batch_id))?;
            match batch.tasks.get(task_id) {
                Some(task) => (task.session_id, task.status, task.provider.clone()),
                None => {
                    return Ok(CancelOutcome {
                        cancelled: false,
                        reason: format!("Task '{}' not found in batch", task_id),
                    })
                }
            }
        };

        if status.is_terminal() {
            return Ok(CancelOutcome {
                cancelled: false,
                reason: format!("Task already {}", status),
            });
        }

        if let Some(session_id) = session_id {
            // Best-effort: local state is forced regardless of the outcome
            if let Err(e) = self.service.cancel_session(&session_id).await {
                log_warning!("Remote cancel failed for task {}: {}", task_id, e);
            }
        }

        {
            let mut batches = self.batches.lock().unwrap();
            if let Some(task) = batches
                .get_mut(batch_id)
                .and_then(|b| b.tasks.get_mut(task_id))
            {
                let held_slot = task.status == TaskStatus::Running;
                task.status = TaskStatus::Cancelled;
                if held_slot {
                    self.slots.lock().unwrap().release(&provider);
                }
            }
        }

        Ok(CancelOutcome {
            cancelled: true,
            reason: if status == TaskStatus::Queued {
                "Task cancelled before spawn".to_string()
            } else {
                "Cancel requested".to_string()
            },
        })
    }

    /// Fixed convenience batch: functional, security, and quality review of
    /// a change, spawned like any other batch.
    pub async fn spawn_validation(
        &self,
        summary: &str,
        changed_files: &[String],
    ) -> Result<(String, SpawnReport)> {
        let batch_id = format!("validation-{}", Uuid::new_v4());
        let files = changed_files.join("\n");

        let tasks = vec![
            TaskSpec {
                task_id: "functional_review".to_string(),
                agent: "functional-reviewer".to_string(),
                model: VALIDATION_MODEL.to_string(),
                prompt: format!(
                    "Review the following change for functional correctness.\n\n\
                     Summary:\n{}\n\nChanged files:\n{}",
                    summary, files
                ),
            },
            TaskSpec {
                task_id: "security_review".to_string(),
                agent: "security-reviewer".to_string(),
                model: VALIDATION_MODEL.to_string(),
                prompt: format!(
                    "Review the following change for security issues.\n\n\
                     Summary:\n{}\n\nChanged files:\n{}",
                    summary, files
                ),
            },
            TaskSpec {
                task_id: "quality_review".to_string(),
                agent: "quality-reviewer".to_string(),
                model: VALIDATION_MODEL.to_string(),
                prompt: format!(
                    "Review the following change for code quality and maintainability.\n\n\
                     Summary:\n{}\n\nChanged files:\n{}",
                    summary, files
                ),
            },
        ];

        let report = self.spawn_batch(&batch_id, tasks, None).await?;
        Ok((batch_id, report))
    }

    /// Statuses of every task in a batch
    pub fn batch_statuses(&self, batch_id: &str) -> Option<BTreeMap<String, TaskStatus>> {
        let batches = self.batches.lock().unwrap();
        batches.get(batch_id).map(|batch| {
            batch
                .tasks
                .iter()
                .map(|(id, task)| (id.clone(), task.status))
                .collect()
        })
    }

    /// Current in-flight count for a provider (observability)
    pub fn in_flight(&self, provider: &str) -> usize {
        self.slots.lock().unwrap().in_flight(provider)
    }

    fn insert_task(&self, batch_id: &str, tracked: TrackedSession) {
        let mut batches = self.batches.lock().unwrap();
        if let Some(batch) = batches.get_mut(batch_id) {
            batch.tasks.insert(tracked.spec.task_id.clone(), tracked);
        }
    }

    async fn start_session(&self, task: &TaskSpec, working_dir: Option<&Path>) -> Result<Uuid> {
        let session_id = self
            .service
            .create_session(&task.model, working_dir)
            .await
            .map_err(|e| anyhow!("Failed to create session: {}", e))?;

        if let Err(e) = self.service.send_prompt(&session_id, &task.prompt).await {
            // Don't leak the half-started remote session
            let _ = self.service.cancel_session(&session_id).await;
            return Err(anyhow!("Failed to submit prompt: {}", e));
        }

        Ok(session_id)
    }

    /// Try to start tasks queued for want of a slot. Marked running before
    /// the remote call so concurrent promoters cannot double-spawn.
    async fn promote_queued(&self, batch_id: &str) {
        let to_spawn: Vec<(TaskSpec, Option<PathBuf>)> = {
            let mut batches = self.batches.lock().unwrap();
            let batch = match batches.get_mut(batch_id) {
                Some(batch) => batch,
                None => return,
            };
            let working_dir = batch.working_dir.clone();
            let mut slots = self.slots.lock().unwrap();

            let mut eligible = Vec::new();
            for task in batch.tasks.values_mut() {
                if task.status != TaskStatus::Queued {
                    continue;
                }
                if !slots.acquire(&task.provider) {
                    continue;
                }
                task.status = TaskStatus::Running;
                let now = Utc::now();
                task.started_at = now;
                task.last_progress_at = now;
                eligible.push((task.spec.clone(), working_dir.clone()));
            }
            eligible
        };

        for (spec, working_dir) in to_spawn {
            match self.start_session(&spec, working_dir.as_deref()).await {
                Ok(session_id) => {
                    log_session_spawned!(
                        batch_id,
                        &spec.task_id,
                        session_id,
                        resolve_provider(&spec.model)
                    );
                    {
                        let mut batches = self.batches.lock().unwrap();
                        if let Some(task) = batches
                            .get_mut(batch_id)
                            .and_then(|b| b.tasks.get_mut(&spec.task_id))
                        {
                            task.session_id = Some(session_id);
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(SPAWN_DELAY_MS)).await;
                }
                Err(e) => {
                    log_session_failed!(batch_id, &spec.task_id, e);
                    let provider = resolve_provider(&spec.model);
                    self.slots.lock().unwrap().release(&provider);
                    let mut batches = self.batches.lock().unwrap();
                    if let Some(task) = batches
                        .get_mut(batch_id)
                        .and_then(|b| b.tasks.get_mut(&spec.task_id))
                    {
                        task.status = TaskStatus::Failed;
                        task.error = Some(e.to_string());
                    }
                }
            }
        }
    }

    /// One poll pass over every running task in the batch
    async fn poll_batch_once(&self, batch_id: &str) {
        let running: Vec<(String, Uuid)> = {
            let batches = self.batches.lock().unwrap();
            match batches.get(batch_id) {
                Some(batch) => batch
                    .tasks
                    .values()
                    .filter(|t| t.status == TaskStatus::Running)
                    .filter_map(|t| t.session_id.map(|sid| (t.spec.task_id.clone(), sid)))
                    .collect(),
                None => return,
            }
        };

        let mut reclaim: Vec<(String, Uuid, Liveness)> = Vec::new();

        for (task_id, session_id) in running {
            let poll = match self.service.poll_status(&session_id).await {
                Ok(poll) => poll,
                Err(e) => {
                    // Transient infrastructure blip: never fail a task on a
                    // single bad poll, the next interval retries
                    log_warning!("Poll failed for task {}: {}", task_id, e);
                    continue;
                }
            };

            let now = Utc::now();
            let mut batches = self.batches.lock().unwrap();
            let task = match batches
                .get_mut(batch_id)
                .and_then(|b| b.tasks.get_mut(&task_id))
            {
                Some(task) => task,
                None => continue,
            };
            if task.status != TaskStatus::Running {
                continue;
            }

            if poll.status.is_terminal() {
                task.status = match poll.status {
                    SessionStatus::Completed => TaskStatus::Completed,
                    SessionStatus::Cancelled => TaskStatus::Cancelled,
                    _ => TaskStatus::Failed,
                };
                let provider = task.provider.clone();
                match task.status {
                    TaskStatus::Completed => log_session_completed!(batch_id, &task_id),
                    _ => log_session_failed!(batch_id, &task_id, "Remote session ended"),
                }
                self.slots.lock().unwrap().release(&provider);
            } else if poll.message_count > task.last_message_count {
                task.last_message_count = poll.message_count;
                task.last_progress_at = now;
            } else {
                match classify(task, now, &self.config) {
                    Liveness::Active => {}
                    verdict => reclaim.push((task_id.clone(), session_id, verdict)),
                }
            }
        }

        for (task_id, session_id, verdict) in reclaim {
            if let Err(e) = self.service.cancel_session(&session_id).await {
                log_warning!("Reclaim cancel failed for task {}: {}", task_id, e);
            }
            log_session_reclaimed!(batch_id, &task_id, verdict);

            let mut batches = self.batches.lock().unwrap();
            if let Some(task) = batches
                .get_mut(batch_id)
                .and_then(|b| b.tasks.get_mut(&task_id))
            {
                if task.status == TaskStatus::Running {
                    task.status = TaskStatus::Cancelled;
                    task.error = Some(format!("Reclaimed: session {}", verdict));
                    let provider = task.provider.clone();
                    self.slots.lock().unwrap().release(&provider);
                }
            }
        }
    }
}

/// Truncate a transcript to the result ceiling on a char boundary
pub fn truncate_result(text: &str) -> String {
    if text.len() <= RESULT_TRUNCATE_BYTES {
        return text.to_string();
    }
    let mut end = RESULT_TRUNCATE_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

//! Persisted workflow state records and session bindings
//!
//! One YAML file per workflow instance, mutated only through the store's
//! read-entire / apply / write-entire path. The design assumes a single live
//! writer per record; concurrent external edits are a documented limitation,
//! not something the store guards against.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Phase pointer value when every gate has been sequenced
pub const PHASE_COMPLETED: &str = "completed";

/// Verdict status of a single gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pending,
    InProgress,
    Passed,
    Failed,
    Skipped,
}

impl GateStatus {
    /// Whether this status counts as satisfied for completion purposes
    pub fn is_satisfied(&self) -> bool {
        matches!(self, GateStatus::Passed | GateStatus::Skipped)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(GateStatus::Pending),
            "in_progress" => Some(GateStatus::InProgress),
            "passed" => Some(GateStatus::Passed),
            "failed" => Some(GateStatus::Failed),
            "skipped" => Some(GateStatus::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateStatus::Pending => "pending",
            GateStatus::InProgress => "in_progress",
            GateStatus::Passed => "passed",
            GateStatus::Failed => "failed",
            GateStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Per-gate record: verdict plus a monotonically non-decreasing retry count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateEntry {
    pub status: GateStatus,
    pub iteration: u32,
}

impl Default for GateEntry {
    fn default() -> Self {
        Self {
            status: GateStatus::Pending,
            iteration: 0,
        }
    }
}

/// One line of the append-only audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLogEntry {
    pub timestamp: DateTime<Utc>,
    pub agent_type: String,
    pub gate: String,
    pub verdict: GateStatus,
    pub iteration: u32,
}

/// Active execution-policy profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeState {
    pub current: String,
}

/// Ordered gate progression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseState {
    /// Either a gate name (head of `remaining`) or `"completed"`
    pub current: String,
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub remaining: Vec<String>,
}

/// Durable record of one workflow instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub workflow_type: String,
    pub mode: ModeState,
    pub phase: PhaseState,
    #[serde(default)]
    pub gates: BTreeMap<String, GateEntry>,
    #[serde(default)]
    pub agent_log: Vec<AgentLogEntry>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Create a fresh record with the given gate sequence
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_type: impl Into<String>,
        mode: impl Into<String>,
        gate_order: Vec<String>,
    ) -> Self {
        let current = gate_order
            .first()
            .cloned()
            .unwrap_or_else(|| PHASE_COMPLETED.to_string());
        Self {
            workflow_id: workflow_id.into(),
            workflow_type: workflow_type.into(),
            mode: ModeState {
                current: mode.into(),
            },
            phase: PhaseState {
                current,
                completed: Vec::new(),
                remaining: gate_order,
            },
            gates: BTreeMap::new(),
            agent_log: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Ephemeral binding of a host session to a workflow state file
#[derive(Debug, Clone)]
pub struct SessionBinding {
    pub path: PathBuf,
    pub workflow_id: String,
}

/// Store for workflow state records plus the session-binding cache
pub struct StateStore {
    state_dir: PathBuf,
    /// Session bindings; a cache over the durable records, never persisted
    bindings: Mutex<HashMap<String, SessionBinding>>,
}

impl StateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            bindings: Mutex::new(HashMap::new()),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Bind a session to a workflow state file
    pub fn bind(&self, session_id: &str, path: impl Into<PathBuf>) -> Result<String> {
        let path = path.into();
        let state = Self::read_state(&path)
            .ok_or_else(|| anyhow!("No workflow state record at {}", path.display()))?;
        let workflow_id = state.workflow_id.clone();
        self.bindings.lock().unwrap().insert(
            session_id.to_string(),
            SessionBinding {
                path,
                workflow_id: workflow_id.clone(),
            },
        );
        Ok(workflow_id)
    }

    /// Resolve a session to its current state; `None` means no active workflow
    pub fn resolve(&self, session_id: &str) -> Option<(WorkflowState, PathBuf)> {
        let binding = self.bindings.lock().unwrap().get(session_id).cloned()?;
        let state = Self::read_state(&binding.path)?;
        Some((state, binding.path))
    }

    /// Drop a session's binding (used after archiving)
    pub fn unbind(&self, session_id: &str) {
        self.bindings.lock().unwrap().remove(session_id);
    }

    /// Read a state record; missing or unparsable files read as `None`
    pub fn read_state(path: &Path) -> Option<WorkflowState> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_yaml::from_str(&content).ok()
    }

    /// Atomic-enough read-modify-write of one record.
    ///
    /// Reads the entire record, applies `mutate`, writes the entire record
    /// through a temp file + rename so the file on disk is always whole.
    pub fn update<F>(&self, path: &Path, mutate: F) -> Result<WorkflowState>
    where
        F: FnOnce(&mut WorkflowState),
    {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow state: {}", path.display()))?;
        let mut state: WorkflowState = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse workflow state: {}", path.display()))?;

        mutate(&mut state);

        Self::write_state(path, &state)?;
        Ok(state)
    }

    /// Write a full record to disk via temp file + rename
    pub fn write_state(path: &Path, state: &WorkflowState) -> Result<()> {
        let yaml = serde_yaml::to_string(state).context("Failed to serialize workflow state")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state dir: {}", parent.display()))?;
        }
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml)
            .with_context(|| format!("Failed to write workflow state: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace workflow state: {}", path.display()))?;
        Ok(())
    }

    /// Scan the state directory for active workflow records (advisory view)
    pub fn find_all_active(&self) -> Vec<(WorkflowState, PathBuf)> {
        let entries = match std::fs::read_dir(&self.state_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .map(|ext| ext == "yaml" || ext == "yml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }
            // Unparsable records are skipped, not raised
            if let Some(state) = Self::read_state(&path) {
                found.push((state, path));
            }
        }
        found.sort_by(|(a, _), (b, _)| a.workflow_id.cmp(&b.workflow_id));
        found
    }

    /// Archive a finished record: moved into `archive/`, never deleted
    pub fn archive(&self, path: &Path) -> Result<PathBuf> {
        let archive_dir = path
            .parent()
            .map(|p| p.join("archive"))
            .unwrap_or_else(|| PathBuf::from("archive"));
        std::fs::create_dir_all(&archive_dir)
            .with_context(|| format!("Failed to create archive dir: {}", archive_dir.display()))?;

        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("State path has no file name: {}", path.display()))?;
        let dest = archive_dir.join(file_name);
        std::fs::rename(path, &dest)
            .with_context(|| format!("Failed to archive workflow state: {}", path.display()))?;
        Ok(dest)
    }
}

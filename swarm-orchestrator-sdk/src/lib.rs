//! Shared vocabulary for the swarm orchestrator: the remote agent-session
//! service boundary, structured log events, and the tool-invocation surface.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

// Re-export async trait for convenience
pub use async_trait::async_trait;

/// Result type for session-service and tool operations
pub type SessionResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Remote-side status of an agent session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    /// Whether the remote session has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

/// Snapshot returned by a status poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPoll {
    pub status: SessionStatus,
    /// Number of messages the session has produced so far (liveness signal)
    pub message_count: usize,
}

/// The remote agent-session service, reachable only through these five
/// operations. Nothing else about the service is load-bearing.
#[async_trait]
pub trait AgentSessionService: Send + Sync {
    /// Create a unit of remote work against the given model
    async fn create_session(
        &self,
        model: &str,
        working_dir: Option<&Path>,
    ) -> SessionResult<Uuid>;

    /// Submit a prompt without waiting for the session to finish
    async fn send_prompt(&self, session_id: &Uuid, prompt: &str) -> SessionResult<()>;

    /// Poll current status and message count
    async fn poll_status(&self, session_id: &Uuid) -> SessionResult<SessionPoll>;

    /// Fetch the full transcript produced so far
    async fn fetch_transcript(&self, session_id: &Uuid) -> SessionResult<String>;

    /// Best-effort cancellation of a running session
    async fn cancel_session(&self, session_id: &Uuid) -> SessionResult<()>;
}

/// Structured logging events emitted by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorLog {
    /// Gate verdict recorded
    GateUpdated {
        workflow_id: String,
        gate: String,
        status: String,
        iteration: u32,
    },
    /// Completion guard consulted
    CompletionChecked {
        session_id: String,
        can_complete: bool,
        reason: String,
    },
    /// Remote session spawned for a batch task
    SessionSpawned {
        batch_id: String,
        task_id: String,
        session_id: String,
        provider: String,
    },
    /// Task queued because no slot was free for its provider
    SessionQueued {
        batch_id: String,
        task_id: String,
        provider: String,
    },
    /// Tracked session finished remotely
    SessionCompleted {
        batch_id: String,
        task_id: String,
    },
    /// Tracked session failed (spawn error or remote failure)
    SessionFailed {
        batch_id: String,
        task_id: String,
        error: String,
    },
    /// Tracked session reclaimed by the staleness detector
    SessionReclaimed {
        batch_id: String,
        task_id: String,
        verdict: String,
    },
    /// Batch lifecycle
    BatchStarted {
        batch_id: String,
        total_tasks: usize,
    },
    BatchCompleted {
        batch_id: String,
        completed: usize,
        failed: usize,
    },
    /// Tier router denied a model request
    RouteDenied {
        session_id: String,
        mode: String,
        model: String,
        tier: String,
    },
}

impl OrchestratorLog {
    /// Emit this log event to stderr for host-side parsing
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            use std::io::Write;
            eprintln!("__ORCH_EVENT__:{}", json);
            // Force flush stderr in async/concurrent contexts
            let _ = std::io::stderr().flush();
        }
    }
}

/// Helper macros for orchestrator logging
#[macro_export]
macro_rules! log_gate_updated {
    ($workflow_id:expr, $gate:expr, $status:expr, $iteration:expr) => {
        $crate::OrchestratorLog::GateUpdated {
            workflow_id: $workflow_id.to_string(),
            gate: $gate.to_string(),
            status: $status.to_string(),
            iteration: $iteration,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_completion_checked {
    ($session_id:expr, $can_complete:expr, $reason:expr) => {
        $crate::OrchestratorLog::CompletionChecked {
            session_id: $session_id.to_string(),
            can_complete: $can_complete,
            reason: $reason.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_session_spawned {
    ($batch_id:expr, $task_id:expr, $session_id:expr, $provider:expr) => {
        $crate::OrchestratorLog::SessionSpawned {
            batch_id: $batch_id.to_string(),
            task_id: $task_id.to_string(),
            session_id: $session_id.to_string(),
            provider: $provider.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_session_queued {
    ($batch_id:expr, $task_id:expr, $provider:expr) => {
        $crate::OrchestratorLog::SessionQueued {
            batch_id: $batch_id.to_string(),
            task_id: $task_id.to_string(),
            provider: $provider.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_session_completed {
    ($batch_id:expr, $task_id:expr) => {
        $crate::OrchestratorLog::SessionCompleted {
            batch_id: $batch_id.to_string(),
            task_id: $task_id.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_session_failed {
    ($batch_id:expr, $task_id:expr, $error:expr) => {
        $crate::OrchestratorLog::SessionFailed {
            batch_id: $batch_id.to_string(),
            task_id: $task_id.to_string(),
            error: $error.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_session_reclaimed {
    ($batch_id:expr, $task_id:expr, $verdict:expr) => {
        $crate::OrchestratorLog::SessionReclaimed {
            batch_id: $batch_id.to_string(),
            task_id: $task_id.to_string(),
            verdict: $verdict.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_batch_started {
    ($batch_id:expr, $total:expr) => {
        $crate::OrchestratorLog::BatchStarted {
            batch_id: $batch_id.to_string(),
            total_tasks: $total,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_batch_completed {
    ($batch_id:expr, $completed:expr, $failed:expr) => {
        $crate::OrchestratorLog::BatchCompleted {
            batch_id: $batch_id.to_string(),
            completed: $completed,
            failed: $failed,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_route_denied {
    ($session_id:expr, $mode:expr, $model:expr, $tier:expr) => {
        $crate::OrchestratorLog::RouteDenied {
            session_id: $session_id.to_string(),
            mode: $mode.to_string(),
            model: $model.to_string(),
            tier: $tier.to_string(),
        }
        .emit();
    };
}

/// Logs an informational message to stderr. Stdout is reserved for tool
/// results, so console output shares the stderr stream with structured
/// events.
#[macro_export]
macro_rules! log_info {
    ($message:expr) => {
        eprintln!("\x1b[36mℹ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        eprintln!("\x1b[36mℹ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a warning message to stderr.
#[macro_export]
macro_rules! log_warning {
    ($message:expr) => {
        eprintln!("\x1b[33m⚠ Warning: {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        eprintln!("\x1b[33m⚠ Warning: {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

// ============================================================================
// Tool-invocation boundary
// ============================================================================

/// Result of a tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

type ToolHandler =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, SessionResult<ToolResult>> + Send + Sync>;

/// A single named tool with a JSON schema and an async handler
pub struct Tool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
    handler: ToolHandler,
}

impl Tool {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> BoxFuture<'static, SessionResult<ToolResult>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &serde_json::Value {
        &self.input_schema
    }
}

/// Registry of tools exposed over the host tool-invocation boundary
pub struct ToolServer {
    name: String,
    version: String,
    tools: HashMap<String, Tool>,
}

impl ToolServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "0.1.0".to_string(),
            tools: HashMap::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.insert(tool.name.clone(), tool);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_version(&self) -> &str {
        &self.version
    }

    /// List registered tools as (name, description, schema) triples
    pub fn list_tools(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        let mut tools: Vec<_> = self
            .tools
            .values()
            .map(|t| (t.name.as_str(), t.description.as_str(), &t.input_schema))
            .collect();
        tools.sort_by_key(|(name, _, _)| *name);
        tools
    }

    /// Dispatch a tool invocation by name
    pub async fn call(&self, name: &str, params: serde_json::Value) -> SessionResult<ToolResult> {
        match self.tools.get(name) {
            Some(tool) => (tool.handler)(params).await,
            None => Ok(ToolResult::error(format!("Unknown tool: {}", name))),
        }
    }
}

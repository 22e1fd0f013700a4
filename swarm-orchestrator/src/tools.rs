//! Tool surface exposed over the host tool-invocation boundary

use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use swarm_orchestrator_sdk::{Tool, ToolResult, ToolServer};

use crate::orchestrator::Orchestrator;
use crate::state::GateStatus;
use crate::swarm::TaskSpec;

/// Create the orchestrator tool server with all tools
pub fn create_orchestrator_tool_server(orchestrator: Arc<Orchestrator>) -> ToolServer {
    ToolServer::new("swarm_orchestrator")
        .version("1.0.0")
        .tool(bind_session_tool(orchestrator.clone()))
        .tool(update_gate_tool(orchestrator.clone()))
        .tool(check_completion_tool(orchestrator.clone()))
        .tool(get_state_tool(orchestrator.clone()))
        .tool(spawn_batch_tool(orchestrator.clone()))
        .tool(await_batch_tool(orchestrator.clone()))
        .tool(spawn_validation_tool(orchestrator.clone()))
        .tool(collect_results_tool(orchestrator.clone()))
        .tool(cancel_task_tool(orchestrator))
}

/// Tool: bind_session
fn bind_session_tool(orchestrator: Arc<Orchestrator>) -> Tool {
    Tool::new(
        "bind_session",
        "Bind this session to a workflow state file so gate and completion tools can resolve it",
        json!({
            "type": "object",
            "properties": {
                "session_id": {"type": "string"},
                "workflow_path": {"type": "string"}
            },
            "required": ["session_id", "workflow_path"]
        }),
        move |params| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                let session_id = match params.get("session_id").and_then(|v| v.as_str()) {
                    Some(id) => id.to_string(),
                    None => return Ok(ToolResult::error("Missing session_id")),
                };
                let workflow_path = match params.get("workflow_path").and_then(|v| v.as_str()) {
                    Some(path) => PathBuf::from(path),
                    None => return Ok(ToolResult::error("Missing workflow_path")),
                };

                match orchestrator.bind_session(&session_id, &workflow_path) {
                    Ok(workflow_id) => {
                        let result = json!({
                            "bound": true,
                            "workflow_id": workflow_id,
                            "workflow_path": workflow_path.display().to_string(),
                        });
                        Ok(ToolResult::text(
                            serde_json::to_string_pretty(&result).unwrap_or_default(),
                        ))
                    }
                    Err(e) => Ok(ToolResult::error(format!("Failed to bind session: {}", e))),
                }
            })
        },
    )
}

/// Tool: update_gate
fn update_gate_tool(orchestrator: Arc<Orchestrator>) -> Tool {
    Tool::new(
        "update_gate",
        "Record a gate verdict for the bound workflow. Passing a gate advances the phase pointer.",
        json!({
            "type": "object",
            "properties": {
                "session_id": {"type": "string"},
                "gate": {"type": "string"},
                "status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "passed", "failed", "skipped"]
                },
                "agent_type": {"type": "string"}
            },
            "required": ["session_id", "gate", "status", "agent_type"]
        }),
        move |params| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                let session_id = match params.get("session_id").and_then(|v| v.as_str()) {
                    Some(id) => id.to_string(),
                    None => return Ok(ToolResult::error("Missing session_id")),
                };
                let gate = match params.get("gate").and_then(|v| v.as_str()) {
                    Some(gate) => gate.to_string(),
                    None => return Ok(ToolResult::error("Missing gate")),
                };
                let status = match params
                    .get("status")
                    .and_then(|v| v.as_str())
                    .and_then(GateStatus::parse)
                {
                    Some(status) => status,
                    None => return Ok(ToolResult::error("Missing or invalid status")),
                };
                let agent_type = params
                    .get("agent_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();

                match orchestrator.update_gate(&session_id, &gate, status, &agent_type) {
                    Ok(state) => {
                        let result = json!({
                            "gate": gate,
                            "status": status.to_string(),
                            "iteration": state.gates.get(&gate).map(|g| g.iteration),
                            "phase": state.phase.current,
                        });
                        Ok(ToolResult::text(
                            serde_json::to_string_pretty(&result).unwrap_or_default(),
                        ))
                    }
                    Err(e) => Ok(ToolResult::error(format!("Failed to update gate: {}", e))),
                }
            })
        },
    )
}

/// Tool: check_completion
fn check_completion_tool(orchestrator: Arc<Orchestrator>) -> Tool {
    Tool::new(
        "check_completion",
        "Ask whether the bound workflow may be declared finished. Call this before stopping.",
        json!({
            "type": "object",
            "properties": {
                "session_id": {"type": "string"}
            },
            "required": ["session_id"]
        }),
        move |params| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                let session_id = match params.get("session_id").and_then(|v| v.as_str()) {
                    Some(id) => id.to_string(),
                    None => return Ok(ToolResult::error("Missing session_id")),
                };

                let check = orchestrator.check_completion(&session_id);
                match serde_json::to_string_pretty(&check) {
                    Ok(json) => Ok(ToolResult::text(json)),
                    Err(e) => Ok(ToolResult::error(format!("Serialization error: {}", e))),
                }
            })
        },
    )
}

/// Tool: get_state
fn get_state_tool(orchestrator: Arc<Orchestrator>) -> Tool {
    Tool::new(
        "get_state",
        "Get a snapshot of the bound workflow's gates, phase, and audit log",
        json!({
            "type": "object",
            "properties": {
                "session_id": {"type": "string"}
            },
            "required": ["session_id"]
        }),
        move |params| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                let session_id = match params.get("session_id").and_then(|v| v.as_str()) {
                    Some(id) => id.to_string(),
                    None => return Ok(ToolResult::error("Missing session_id")),
                };

                match orchestrator.get_state(&session_id) {
                    Some(snapshot) => match serde_json::to_string_pretty(&snapshot) {
                        Ok(json) => Ok(ToolResult::text(json)),
                        Err(e) => Ok(ToolResult::error(format!("Serialization error: {}", e))),
                    },
                    None => {
                        // Degrade to the advisory directory scan
                        let active: Vec<_> = orchestrator
                            .find_all_active()
                            .into_iter()
                            .map(|(state, path)| {
                                json!({
                                    "workflow_id": state.workflow_id,
                                    "workflow_type": state.workflow_type,
                                    "phase": state.phase.current,
                                    "path": path.display().to_string(),
                                })
                            })
                            .collect();
                        let result = json!({
                            "active_workflow": false,
                            "message": "No active workflow for this session",
                            "all_active": active,
                        });
                        Ok(ToolResult::text(
                            serde_json::to_string_pretty(&result).unwrap_or_default(),
                        ))
                    }
                }
            })
        },
    )
}

/// Tool: spawn_batch
fn spawn_batch_tool(orchestrator: Arc<Orchestrator>) -> Tool {
    Tool::new(
        "spawn_batch",
        "Spawn a batch of independent sub-tasks against the remote agent-session service, \
         respecting per-provider concurrency limits. Tasks beyond the limit are queued.",
        json!({
            "type": "object",
            "properties": {
                "batch_id": {"type": "string"},
                "tasks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "task_id": {"type": "string"},
                            "agent": {"type": "string"},
                            "model": {"type": "string"},
                            "prompt": {"type": "string"}
                        },
                        "required": ["task_id", "agent", "model", "prompt"]
                    }
                },
                "working_dir": {"type": "string"},
                "session_id": {"type": "string"}
            },
            "required": ["batch_id", "tasks"]
        }),
        move |params| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                let batch_id = match params.get("batch_id").and_then(|v| v.as_str()) {
                    Some(id) => id.to_string(),
                    None => return Ok(ToolResult::error("Missing batch_id")),
                };
                let tasks: Vec<TaskSpec> = match params.get("tasks") {
                    Some(value) => match serde_json::from_value(value.clone()) {
                        Ok(tasks) => tasks,
                        Err(e) => return Ok(ToolResult::error(format!("Invalid tasks: {}", e))),
                    },
                    None => return Ok(ToolResult::error("Missing tasks")),
                };
                let working_dir = params
                    .get("working_dir")
                    .and_then(|v| v.as_str())
                    .map(PathBuf::from);
                let session_id = params
                    .get("session_id")
                    .and_then(|v| v.as_str())
                    .map(String::from);

                match orchestrator
                    .spawn_batch(
                        session_id.as_deref(),
                        &batch_id,
                        tasks,
                        working_dir.as_deref(),
                    )
                    .await
                {
                    Ok(report) => match serde_json::to_string_pretty(&report) {
                        Ok(json) => Ok(ToolResult::text(json)),
                        Err(e) => Ok(ToolResult::error(format!("Serialization error: {}", e))),
                    },
                    Err(e) => Ok(ToolResult::error(format!("Failed to spawn batch: {}", e))),
                }
            })
        },
    )
}

/// Tool: await_batch
fn await_batch_tool(orchestrator: Arc<Orchestrator>) -> Tool {
    Tool::new(
        "await_batch",
        "Poll a batch until every task is terminal or the timeout elapses. \
         Timing out does not cancel anything.",
        json!({
            "type": "object",
            "properties": {
                "batch_id": {"type": "string"},
                "timeout_ms": {"type": "integer"}
            },
            "required": ["batch_id"]
        }),
        move |params| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                let batch_id = match params.get("batch_id").and_then(|v| v.as_str()) {
                    Some(id) => id.to_string(),
                    None => return Ok(ToolResult::error("Missing batch_id")),
                };
                let timeout_ms = params.get("timeout_ms").and_then(|v| v.as_u64());

                match orchestrator.await_batch(&batch_id, timeout_ms).await {
                    Ok(outcome) => match serde_json::to_string_pretty(&outcome) {
                        Ok(json) => Ok(ToolResult::text(json)),
                        Err(e) => Ok(ToolResult::error(format!("Serialization error: {}", e))),
                    },
                    Err(e) => Ok(ToolResult::error(format!("Failed to await batch: {}", e))),
                }
            })
        },
    )
}

/// Tool: spawn_validation
fn spawn_validation_tool(orchestrator: Arc<Orchestrator>) -> Tool {
    Tool::new(
        "spawn_validation",
        "Spawn the fixed validation batch: functional, security, and quality review of a change",
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "changed_files": {
                    "type": "array",
                    "items": {"type": "string"}
                }
            },
            "required": ["summary", "changed_files"]
        }),
        move |params| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                let summary = match params.get("summary").and_then(|v| v.as_str()) {
                    Some(summary) => summary.to_string(),
                    None => return Ok(ToolResult::error("Missing summary")),
                };
                let changed_files: Vec<String> = params
                    .get("changed_files")
                    .and_then(|v| v.as_array())
                    .map(|files| {
                        files
                            .iter()
                            .filter_map(|f| f.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();

                match orchestrator.spawn_validation(&summary, &changed_files).await {
                    Ok((batch_id, report)) => {
                        let result = json!({
                            "batch_id": batch_id,
                            "spawned": report.spawned,
                            "queued": report.queued,
                            "details": report.details,
                        });
                        Ok(ToolResult::text(
                            serde_json::to_string_pretty(&result).unwrap_or_default(),
                        ))
                    }
                    Err(e) => Ok(ToolResult::error(format!(
                        "Failed to spawn validation: {}",
                        e
                    ))),
                }
            })
        },
    )
}

/// Tool: collect_results
fn collect_results_tool(orchestrator: Arc<Orchestrator>) -> Tool {
    Tool::new(
        "collect_results",
        "Fetch the transcript of every task in a batch, truncated to a fixed ceiling",
        json!({
            "type": "object",
            "properties": {
                "batch_id": {"type": "string"}
            },
            "required": ["batch_id"]
        }),
        move |params| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                let batch_id = match params.get("batch_id").and_then(|v| v.as_str()) {
                    Some(id) => id.to_string(),
                    None => return Ok(ToolResult::error("Missing batch_id")),
                };

                match orchestrator.collect_results(&batch_id).await {
                    Ok(results) => match serde_json::to_string_pretty(&results) {
                        Ok(json) => Ok(ToolResult::text(json)),
                        Err(e) => Ok(ToolResult::error(format!("Serialization error: {}", e))),
                    },
                    Err(e) => Ok(ToolResult::error(format!(
                        "Failed to collect results: {}",
                        e
                    ))),
                }
            })
        },
    )
}

/// Tool: cancel_task
fn cancel_task_tool(orchestrator: Arc<Orchestrator>) -> Tool {
    Tool::new(
        "cancel_task",
        "Cancel one task in a batch. Best-effort remotely; local bookkeeping updates immediately.",
        json!({
            "type": "object",
            "properties": {
                "task_id": {"type": "string"},
                "batch_id": {"type": "string"}
            },
            "required": ["task_id", "batch_id"]
        }),
        move |params| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                let task_id = match params.get("task_id").and_then(|v| v.as_str()) {
                    Some(id) => id.to_string(),
                    None => return Ok(ToolResult::error("Missing task_id")),
                };
                let batch_id = match params.get("batch_id").and_then(|v| v.as_str()) {
                    Some(id) => id.to_string(),
                    None => return Ok(ToolResult::error("Missing batch_id")),
                };

                match orchestrator.cancel_task(&task_id, &batch_id).await {
                    Ok(outcome) => match serde_json::to_string_pretty(&outcome) {
                        Ok(json) => Ok(ToolResult::text(json)),
                        Err(e) => Ok(ToolResult::error(format!("Serialization error: {}", e))),
                    },
                    Err(e) => Ok(ToolResult::error(format!("Failed to cancel task: {}", e))),
                }
            })
        },
    )
}

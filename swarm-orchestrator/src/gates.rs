//! Gate state machine: transition rules layered on the workflow record

use chrono::{DateTime, Utc};

use crate::state::{AgentLogEntry, GateStatus, WorkflowState, PHASE_COMPLETED};

/// Apply one gate transition to a workflow record.
///
/// Every call increments the gate's iteration (never reset), sets the new
/// status, and appends exactly one audit-log entry. Only `passed` touches
/// the phase pointer: the gate moves from `remaining` to the end of
/// `completed` (a no-op when already completed) and `current` becomes the
/// new head of `remaining`, or `"completed"` when none remain. `skipped`
/// counts as satisfied for completion but must still be sequenced by the
/// caller.
pub fn apply_gate_update(
    state: &mut WorkflowState,
    gate: &str,
    status: GateStatus,
    agent_type: &str,
    now: DateTime<Utc>,
) {
    let entry = state.gates.entry(gate.to_string()).or_default();
    entry.iteration += 1;
    entry.status = status;
    let iteration = entry.iteration;

    state.agent_log.push(AgentLogEntry {
        timestamp: now,
        agent_type: agent_type.to_string(),
        gate: gate.to_string(),
        verdict: status,
        iteration,
    });

    if status == GateStatus::Passed {
        advance_phase(state, gate);
    }

    state.updated_at = now;
}

fn advance_phase(state: &mut WorkflowState, gate: &str) {
    let phase = &mut state.phase;
    if !phase.completed.iter().any(|g| g == gate) {
        phase.remaining.retain(|g| g != gate);
        phase.completed.push(gate.to_string());
    }
    phase.current = phase
        .remaining
        .first()
        .cloned()
        .unwrap_or_else(|| PHASE_COMPLETED.to_string());
}

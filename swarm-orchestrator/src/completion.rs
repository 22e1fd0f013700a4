//! Completion guard: three-layer policy deciding whether a workflow may be
//! declared finished.
//!
//! The guard is advisory — it cannot stop a misbehaving caller from quitting
//! early. It maximizes the likelihood of a correct completion decision with
//! two safety valves against permanent deadlock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::state::WorkflowState;

/// Layer 2: force-allow after this many consecutive denials
pub const MAX_COMPLETION_DENIALS: u32 = 5;
/// Layer 3: force-allow after this many consecutive checks with an
/// unchanged `updated_at`
pub const MAX_UNCHANGED_CHECKS: u32 = 3;

/// Outcome of one completion check
#[derive(Debug, Clone, Serialize)]
pub struct CompletionCheck {
    pub can_complete: bool,
    pub pending_gates: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Default)]
struct SessionCounters {
    /// Consecutive Layer-1 denials
    denials: u32,
    /// `updated_at` seen on the previous check
    last_seen: Option<DateTime<Utc>>,
    /// Consecutive checks observing the same `updated_at`
    unchanged: u32,
}

/// Per-session completion policy state
#[derive(Debug, Default)]
pub struct CompletionGuard {
    sessions: HashMap<String, SessionCounters>,
}

impl CompletionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear both counters for a session (called when a gate passes and on
    /// every allow path)
    pub fn reset(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Decide whether the workflow bound to `session_id` may be declared
    /// finished.
    pub fn check(&mut self, session_id: &str, state: &WorkflowState) -> CompletionCheck {
        // A gate is pending when it was recorded unsatisfied, or when it is
        // still sequenced in the phase order and never recorded at all.
        let mut pending_gates: Vec<String> = state
            .phase
            .remaining
            .iter()
            .filter(|gate| {
                !state
                    .gates
                    .get(*gate)
                    .map(|entry| entry.status.is_satisfied())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        for (name, entry) in &state.gates {
            if !entry.status.is_satisfied() && !pending_gates.contains(name) {
                pending_gates.push(name.clone());
            }
        }

        // Layer 1: every gate passed or skipped
        if pending_gates.is_empty() {
            self.reset(session_id);
            return CompletionCheck {
                can_complete: true,
                pending_gates,
                reason: "All gates passed or skipped".to_string(),
            };
        }

        let counters = self.sessions.entry(session_id.to_string()).or_default();

        // Layer 3 bookkeeping: track repeat observations of updated_at
        if counters.last_seen == Some(state.updated_at) {
            counters.unchanged += 1;
        } else {
            counters.last_seen = Some(state.updated_at);
            counters.unchanged = 1;
        }

        // Layer 2: bounded denial
        counters.denials += 1;
        if counters.denials >= MAX_COMPLETION_DENIALS {
            let denials = counters.denials;
            self.reset(session_id);
            return CompletionCheck {
                can_complete: true,
                pending_gates,
                reason: format!(
                    "Completion denied {} consecutive times; safety valve override",
                    denials
                ),
            };
        }

        // Layer 3: workflow-level staleness. Catches the case where Layer 2
        // was reset by progress on an unrelated gate while the workflow is
        // not actually moving toward completion.
        if counters.unchanged >= MAX_UNCHANGED_CHECKS {
            let unchanged = counters.unchanged;
            self.reset(session_id);
            return CompletionCheck {
                can_complete: true,
                pending_gates,
                reason: format!(
                    "Workflow state unchanged across {} checks; staleness override",
                    unchanged
                ),
            };
        }

        CompletionCheck {
            can_complete: false,
            pending_gates: pending_gates.clone(),
            reason: format!("Gates not yet satisfied: {}", pending_gates.join(", ")),
        }
    }
}

//! Staleness detection: a pure function of a tracked task's timestamps
//!
//! Distinguishes two "stopped progressing" conditions: `stale` for sessions
//! that never produced any progress, `stuck` for sessions that progressed
//! and then went quiet.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::config::OrchestratorConfig;
use crate::swarm::TrackedSession;

/// No session is reclaimed within this window after spawn
pub const GRACE_PERIOD_MS: i64 = 30_000;

/// Liveness verdict for a tracked session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Active,
    Stale,
    Stuck,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Liveness::Active => "active",
            Liveness::Stale => "stale",
            Liveness::Stuck => "stuck",
        };
        write!(f, "{}", s)
    }
}

/// Classify a tracked session's liveness at `now`
pub fn classify(session: &TrackedSession, now: DateTime<Utc>, config: &OrchestratorConfig) -> Liveness {
    let since_start = (now - session.started_at).num_milliseconds();
    if since_start < GRACE_PERIOD_MS {
        return Liveness::Active;
    }

    let idle = (now - session.last_progress_at).num_milliseconds();
    if session.last_message_count == 0 {
        if idle > config.stale_timeout_ms as i64 {
            return Liveness::Stale;
        }
    } else if idle > config.progress_timeout_ms as i64 {
        return Liveness::Stuck;
    }

    Liveness::Active
}

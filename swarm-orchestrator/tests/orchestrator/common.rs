//! Common test utilities: a scripted session service and config helpers

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use swarm_orchestrator::config::OrchestratorConfig;
use swarm_orchestrator::state::{StateStore, WorkflowState};
use swarm_orchestrator_sdk::{
    async_trait, AgentSessionService, SessionPoll, SessionResult, SessionStatus,
};

/// Config suitable for tests: tiny poll interval (constructed directly so
/// the production floors do not apply) and timeouts too large for the
/// staleness detector to ever fire.
pub fn test_config(state_dir: &Path) -> OrchestratorConfig {
    OrchestratorConfig {
        default_concurrency: 3,
        provider_concurrency: HashMap::new(),
        poll_interval_ms: 10,
        stale_timeout_ms: 3_600_000,
        progress_timeout_ms: 3_600_000,
        state_dir: state_dir.to_path_buf(),
        session_service_url: "http://127.0.0.1:1".to_string(),
    }
}

/// Write a fresh workflow record and return its path
pub fn write_workflow(
    dir: &Path,
    workflow_id: &str,
    mode: &str,
    gates: &[&str],
) -> PathBuf {
    let state = WorkflowState::new(
        workflow_id,
        "feature",
        mode,
        gates.iter().map(|g| g.to_string()).collect(),
    );
    let path = dir.join(format!("{}.yaml", workflow_id));
    StateStore::write_state(&path, &state).unwrap();
    path
}

struct MockSession {
    polls: usize,
    finished: bool,
}

struct MockInner {
    sessions: HashMap<Uuid, MockSession>,
    active: usize,
    peak_active: usize,
    creates: usize,
    cancels: usize,
}

/// Scripted stand-in for the remote agent-session service. Every session
/// completes after a fixed number of polls; message counts grow on each
/// poll so the staleness detector sees progress. Models whose id contains
/// "unspawnable" fail at creation.
pub struct MockSessionService {
    polls_until_complete: usize,
    transcript: String,
    inner: Mutex<MockInner>,
}

impl MockSessionService {
    pub fn new(polls_until_complete: usize) -> Self {
        Self {
            polls_until_complete,
            transcript: "mock transcript".to_string(),
            inner: Mutex::new(MockInner {
                sessions: HashMap::new(),
                active: 0,
                peak_active: 0,
                creates: 0,
                cancels: 0,
            }),
        }
    }

    /// Sessions that never reach a terminal state on their own
    pub fn never_completing() -> Self {
        Self::new(usize::MAX)
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = transcript.into();
        self
    }

    pub fn creates(&self) -> usize {
        self.inner.lock().unwrap().creates
    }

    pub fn cancels(&self) -> usize {
        self.inner.lock().unwrap().cancels
    }

    /// Highest number of sessions that were live at the same time
    pub fn peak_active(&self) -> usize {
        self.inner.lock().unwrap().peak_active
    }
}

#[async_trait]
impl AgentSessionService for MockSessionService {
    async fn create_session(
        &self,
        model: &str,
        _working_dir: Option<&Path>,
    ) -> SessionResult<Uuid> {
        if model.contains("unspawnable") {
            return Err(format!("No capacity for model '{}'", model).into());
        }
        let session_id = Uuid::new_v4();
        let mut inner = self.inner.lock().unwrap();
        inner.creates += 1;
        inner.active += 1;
        inner.peak_active = inner.peak_active.max(inner.active);
        inner.sessions.insert(
            session_id,
            MockSession {
                polls: 0,
                finished: false,
            },
        );
        Ok(session_id)
    }

    async fn send_prompt(&self, session_id: &Uuid, _prompt: &str) -> SessionResult<()> {
        let inner = self.inner.lock().unwrap();
        if inner.sessions.contains_key(session_id) {
            Ok(())
        } else {
            Err("Unknown session".into())
        }
    }

    async fn poll_status(&self, session_id: &Uuid) -> SessionResult<SessionPoll> {
        let mut inner = self.inner.lock().unwrap();
        let threshold = self.polls_until_complete;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or("Unknown session")?;

        if session.finished {
            return Ok(SessionPoll {
                status: SessionStatus::Cancelled,
                message_count: session.polls,
            });
        }

        session.polls += 1;
        if session.polls >= threshold {
            session.finished = true;
            let count = session.polls;
            inner.active -= 1;
            return Ok(SessionPoll {
                status: SessionStatus::Completed,
                message_count: count,
            });
        }

        Ok(SessionPoll {
            status: SessionStatus::Running,
            message_count: session.polls,
        })
    }

    async fn fetch_transcript(&self, session_id: &Uuid) -> SessionResult<String> {
        let inner = self.inner.lock().unwrap();
        if inner.sessions.contains_key(session_id) {
            Ok(self.transcript.clone())
        } else {
            Err("Unknown session".into())
        }
    }

    async fn cancel_session(&self, session_id: &Uuid) -> SessionResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.cancels += 1;
        if let Some(session) = inner.sessions.get_mut(session_id) {
            if !session.finished {
                session.finished = true;
                inner.active -= 1;
            }
        }
        Ok(())
    }
}

//! Completion guard behavior through the orchestrator surface, with real
//! workflow records on disk

use super::common::*;
use std::sync::Arc;
use tempfile::TempDir;

use swarm_orchestrator::orchestrator::Orchestrator;
use swarm_orchestrator::state::GateStatus;

fn setup(gates: &[&str]) -> (TempDir, Arc<Orchestrator>, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let service = Arc::new(MockSessionService::new(1));
    let orchestrator = Arc::new(Orchestrator::new(config, service));
    let path = write_workflow(dir.path(), "wf_completion", "balanced", gates);
    (dir, orchestrator, path)
}

/// Touch the record so the staleness layer sees a fresh `updated_at`
/// without resetting the guard (only a pass resets it)
fn touch(orchestrator: &Orchestrator, session_id: &str) {
    orchestrator
        .update_gate(session_id, "review", GateStatus::Failed, "reviewer")
        .unwrap();
}

#[tokio::test]
async fn test_unbound_session_is_denied() {
    let (_dir, orchestrator, _path) = setup(&["plan"]);
    let check = orchestrator.check_completion("nobody");
    assert!(!check.can_complete);
    assert!(check.reason.contains("No active workflow"));
}

#[tokio::test]
async fn test_denied_until_gates_pass_then_archived() {
    let (dir, orchestrator, path) = setup(&["plan", "review"]);
    orchestrator.bind_session("sess_1", &path).unwrap();

    let check = orchestrator.check_completion("sess_1");
    assert!(!check.can_complete);
    assert_eq!(
        check.pending_gates,
        vec!["plan".to_string(), "review".to_string()]
    );

    orchestrator
        .update_gate("sess_1", "plan", GateStatus::Passed, "planner")
        .unwrap();
    orchestrator
        .update_gate("sess_1", "review", GateStatus::Passed, "reviewer")
        .unwrap();

    let check = orchestrator.check_completion("sess_1");
    assert!(check.can_complete);

    // Approval archived the record and released the binding
    assert!(!path.exists());
    assert!(dir.path().join("archive").join("wf_completion.yaml").exists());
    let after = orchestrator.check_completion("sess_1");
    assert!(!after.can_complete);
    assert!(after.reason.contains("No active workflow"));
}

#[tokio::test]
async fn test_staleness_override_on_third_unchanged_check() {
    let (_dir, orchestrator, path) = setup(&["plan", "review"]);
    orchestrator.bind_session("sess_1", &path).unwrap();

    // Nothing touches the record between checks
    assert!(!orchestrator.check_completion("sess_1").can_complete);
    assert!(!orchestrator.check_completion("sess_1").can_complete);
    let third = orchestrator.check_completion("sess_1");
    assert!(third.can_complete);
    assert!(third.reason.contains("staleness"));
}

#[tokio::test]
async fn test_safety_valve_on_fifth_denial() {
    let (_dir, orchestrator, path) = setup(&["review"]);
    orchestrator.bind_session("sess_1", &path).unwrap();

    for call in 1..5 {
        let check = orchestrator.check_completion("sess_1");
        assert!(!check.can_complete, "call {} should deny", call);
        // Keep the record moving so only the denial counter accumulates
        touch(&orchestrator, "sess_1");
    }

    let fifth = orchestrator.check_completion("sess_1");
    assert!(fifth.can_complete);
    assert!(fifth.reason.contains("safety valve"));
}

#[tokio::test]
async fn test_passed_gate_resets_denial_counter() {
    let (_dir, orchestrator, path) = setup(&["plan", "review"]);
    orchestrator.bind_session("sess_1", &path).unwrap();

    for _ in 0..3 {
        assert!(!orchestrator.check_completion("sess_1").can_complete);
        touch(&orchestrator, "sess_1");
    }

    // A pass clears the guard; denials start over from zero
    orchestrator
        .update_gate("sess_1", "plan", GateStatus::Passed, "planner")
        .unwrap();

    for call in 1..5 {
        let check = orchestrator.check_completion("sess_1");
        assert!(
            !check.can_complete,
            "call {} after reset should deny",
            call
        );
        touch(&orchestrator, "sess_1");
    }
    assert!(orchestrator.check_completion("sess_1").can_complete);
}

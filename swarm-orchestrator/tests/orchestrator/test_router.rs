//! Tier routing at the batch boundary: mode policies, denial valve,
//! fail-open defaults

use super::common::*;
use std::sync::Arc;
use tempfile::TempDir;

use swarm_orchestrator::orchestrator::Orchestrator;
use swarm_orchestrator::swarm::{TaskSpec, TaskStatus};

fn setup(mode: &str) -> (TempDir, Arc<Orchestrator>, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let service = Arc::new(MockSessionService::new(1));
    let orchestrator = Arc::new(Orchestrator::new(config, service));
    let path = write_workflow(dir.path(), "wf_router", mode, &["plan"]);
    (dir, orchestrator, path)
}

fn task(task_id: &str, model: &str) -> TaskSpec {
    TaskSpec {
        task_id: task_id.to_string(),
        agent: "implementer".to_string(),
        model: model.to_string(),
        prompt: "do the work".to_string(),
    }
}

#[tokio::test]
async fn test_fast_mode_denies_high_tier() {
    let (_dir, orchestrator, path) = setup("fast");
    orchestrator.bind_session("sess_1", &path).unwrap();

    let report = orchestrator
        .spawn_batch(Some("sess_1"), "batch_1", vec![task("t1", "claude-opus-4")], None)
        .await
        .unwrap();

    assert_eq!(report.spawned, 0);
    let detail = &report.details[0];
    assert_eq!(detail.status, TaskStatus::Failed);
    assert!(detail.error.as_ref().unwrap().contains("low"));

    // The denied task stays visible in the batch
    let results = orchestrator.collect_results("batch_1").await.unwrap();
    assert_eq!(results["t1"].status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_router_valve_allows_fourth_insistence() {
    let (_dir, orchestrator, path) = setup("fast");
    orchestrator.bind_session("sess_1", &path).unwrap();

    for attempt in 1..=3 {
        let report = orchestrator
            .spawn_batch(
                Some("sess_1"),
                &format!("batch_{}", attempt),
                vec![task(&format!("t{}", attempt), "claude-opus-4")],
                None,
            )
            .await
            .unwrap();
        assert_eq!(report.spawned, 0, "attempt {} should be denied", attempt);
    }

    let fourth = orchestrator
        .spawn_batch(Some("sess_1"), "batch_4", vec![task("t4", "claude-opus-4")], None)
        .await
        .unwrap();
    assert_eq!(fourth.spawned, 1, "4th insistence must be honored");

    // Valve reset: the next attempt is denied again
    let fifth = orchestrator
        .spawn_batch(Some("sess_1"), "batch_5", vec![task("t5", "claude-opus-4")], None)
        .await
        .unwrap();
    assert_eq!(fifth.spawned, 0);
}

#[tokio::test]
async fn test_quality_mode_denies_low_tier() {
    let (_dir, orchestrator, path) = setup("quality");
    orchestrator.bind_session("sess_1", &path).unwrap();

    let report = orchestrator
        .spawn_batch(
            Some("sess_1"),
            "batch_1",
            vec![task("t1", "claude-3-5-haiku")],
            None,
        )
        .await
        .unwrap();
    assert_eq!(report.spawned, 0);
}

#[tokio::test]
async fn test_balanced_mode_allows_everything() {
    let (_dir, orchestrator, path) = setup("balanced");
    orchestrator.bind_session("sess_1", &path).unwrap();

    let report = orchestrator
        .spawn_batch(
            Some("sess_1"),
            "batch_1",
            vec![
                task("t1", "claude-3-5-haiku"),
                task("t2", "claude-opus-4"),
            ],
            None,
        )
        .await
        .unwrap();
    assert_eq!(report.spawned, 2);
}

#[tokio::test]
async fn test_unknown_model_fails_open() {
    let (_dir, orchestrator, path) = setup("fast");
    orchestrator.bind_session("sess_1", &path).unwrap();

    let report = orchestrator
        .spawn_batch(
            Some("sess_1"),
            "batch_1",
            vec![task("t1", "some-experimental-model")],
            None,
        )
        .await
        .unwrap();
    assert_eq!(report.spawned, 1);
}

#[tokio::test]
async fn test_unbound_session_uses_balanced_mode() {
    let (_dir, orchestrator, _path) = setup("fast");

    // No binding: the mode policy defaults to balanced, which allows all
    let report = orchestrator
        .spawn_batch(None, "batch_1", vec![task("t1", "claude-opus-4")], None)
        .await
        .unwrap();
    assert_eq!(report.spawned, 1);
}

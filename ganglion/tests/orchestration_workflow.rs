//! End-to-end job handling: submit, delegate, report, synthesize

mod common;

use std::time::Duration;

use serde_json::json;

use common::*;
use ganglion::agents::{AgentId, Expertise};
use ganglion::coordination::MessageKind;
use ganglion::oracle::{CallSite, ScriptedOracle, ScriptedReply};
use ganglion::orchestration::{CompletionReport, ManagerEvent, RouteDecision, Team};
use ganglion::tasks::{AnalysisTask, ConfidenceLevel, GoalType, TaskStatus};

const STAFF: &[(&str, &[Expertise])] = &[
    ("manager-topics", &[Expertise::TopicAnalysis, Expertise::KeyPointExtraction]),
    ("manager-sentiment", &[Expertise::SentimentAnalysis]),
    ("manager-entities", &[Expertise::EntityExtraction]),
];

fn three_way_oracle() -> ScriptedOracle {
    ScriptedOracle::new()
        .on(
            CallSite::Decomposition,
            ScriptedReply::Decision(json!({
                "subtasks": [
                    { "description": "Identify main topics", "expertise": "topic_analysis", "priority": 1 },
                    {
                        "description": "Assess speaker sentiment",
                        "expertise": "sentiment_analysis",
                        "priority": 2,
                        "dependencies": ["identify main topics"]
                    },
                    { "description": "Extract named entities", "expertise": "entity_extraction", "priority": 3 }
                ]
            })),
        )
        .on(CallSite::Synthesis, synthesis("Release planning call"))
        .on(CallSite::Synthesis, synthesis("Release planning call"))
}

#[tokio::test]
async fn test_submit_delegates_every_subtask() {
    let mut harness = Harness::new(three_way_oracle(), STAFF).await;
    let job = AnalysisTask::new(GoalType::FullAnalysis, transcript());

    let subtasks = harness.supervisor.submit_task(job.clone()).await.unwrap();
    assert_eq!(subtasks.len(), 3);

    let registry = harness.supervisor.registry().read().await;
    for subtask in &subtasks {
        assert!(registry.contains(&subtask.managed_by));
        assert_eq!(subtask.status, TaskStatus::Assigned);
        assert_eq!(subtask.parent_task_id(), job.id);
    }
    drop(registry);

    let topics = &subtasks[0];
    let sentiment = &subtasks[1];
    assert_eq!(topics.goal_type, GoalType::TopicExtraction);
    assert_eq!(sentiment.context.dependencies, vec![topics.id.clone()]);

    let delegated = harness.drain("manager-sentiment");
    assert_eq!(delegated.len(), 1);
    assert_eq!(delegated[0].kind, MessageKind::Delegate);
    assert_eq!(delegated[0].metadata.get("task_type").map(String::as_str), Some("sentiment_analysis"));
    assert_eq!(delegated[0].content["subtask"]["id"], json!(sentiment.id));

    let parent = harness.supervisor.task(&job.id).await.unwrap();
    assert_eq!(parent.status, TaskStatus::InProgress);
    assert_eq!(parent.assigned_to.as_ref(), Some(harness.supervisor.id()));
}

#[tokio::test]
async fn test_reports_drive_progressive_synthesis_to_completion() {
    let harness = Harness::new(three_way_oracle(), STAFF).await;
    let job = AnalysisTask::new(GoalType::FullAnalysis, transcript());
    let subtasks = harness.supervisor.submit_task(job.clone()).await.unwrap();
    let supervisor_id = harness.supervisor.id().clone();

    let report = |index: usize, quality: f64| {
        let subtask = &subtasks[index];
        CompletionReport {
            subtask_id: subtask.id.clone(),
            result: json!({ "finding": index }),
            quality: Some(quality),
            confidence: None,
            reasoning: None,
        }
        .into_message(subtask.managed_by.clone(), supervisor_id.clone())
    };

    harness.report(report(0, 0.9)).await;
    assert!(harness.supervisor.final_result(&job.id).await.is_none());

    harness.report(report(1, 0.8)).await;
    let partial = harness.supervisor.final_result(&job.id).await.unwrap();
    assert_eq!(partial.metadata.component_count, 2);
    assert_eq!(
        harness.supervisor.task(&job.id).await.unwrap().status,
        TaskStatus::InProgress
    );

    harness.report(report(2, 0.7)).await;
    let done = harness.supervisor.task(&job.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);

    let output = done.output.unwrap();
    assert_eq!(output.component(), "synthesis");
    assert_eq!(output.content()["summary"], json!("Release planning call"));

    let final_result = harness.supervisor.final_result(&job.id).await.unwrap();
    assert_eq!(final_result.metadata.component_count, 3);
    assert!(!final_result.metadata.fallback);
    assert_eq!(harness.oracle.call_count(CallSite::Synthesis).await, 2);

    let registry = harness.supervisor.registry().read().await;
    let topics = registry.get(&AgentId::from("manager-topics")).unwrap();
    assert!(topics.performance_score > registry.config().initial_performance);
}

#[tokio::test]
async fn test_failed_subtasks_fail_the_job() {
    let harness = Harness::new(single_topic_oracle(), STAFF).await;
    let job = AnalysisTask::new(GoalType::FullAnalysis, transcript());
    let subtasks = harness.supervisor.submit_task(job.clone()).await.unwrap();
    let subtask = &subtasks[0];

    let failure = ManagerEvent::SubtaskFailed {
        subtask_id: subtask.id.clone(),
        reason: "transcript unreadable".to_string(),
    }
    .into_message(subtask.managed_by.clone(), harness.supervisor.id().clone());
    harness.report(failure).await;

    let job = harness.supervisor.task(&job.id).await.unwrap();
    assert_eq!(job.status, TaskStatus::Failed);
    assert!(job.output.is_none());
    assert!(harness.supervisor.final_result(&job.id).await.is_none());

    let registry = harness.supervisor.registry().read().await;
    let manager = registry.get(&subtask.managed_by).unwrap();
    assert!(manager.performance_score < registry.config().initial_performance);
}

#[tokio::test]
async fn test_out_of_range_quality_is_clamped_before_confidence() {
    let harness = Harness::new(single_topic_oracle(), STAFF).await;
    let job = AnalysisTask::new(GoalType::FullAnalysis, transcript());
    let subtask = harness.supervisor.submit_task(job.clone()).await.unwrap().remove(0);

    let report = CompletionReport {
        subtask_id: subtask.id.clone(),
        result: json!({ "topics": ["release date"] }),
        quality: Some(1.5),
        confidence: None,
        reasoning: None,
    }
    .into_message(subtask.managed_by.clone(), harness.supervisor.id().clone());
    harness.report(report).await;

    let completed = harness.supervisor.subtask(&subtask.id).await.unwrap();
    let output = completed.output.unwrap();
    assert_eq!(output.confidence(), ConfidenceLevel::High);
    assert_eq!(output.metadata().get("quality").map(String::as_str), Some("1"));

    let final_result = harness.supervisor.final_result(&job.id).await.unwrap();
    assert_eq!(final_result.metadata.contributors, vec![subtask.managed_by.clone()]);
}

#[tokio::test]
async fn test_unparsable_decomposition_falls_back_to_one_subtask() {
    let oracle = ScriptedOracle::new().on(CallSite::Decomposition, ScriptedReply::Text("I cannot help".into()));
    let harness = Harness::new(oracle, STAFF).await;
    let job = AnalysisTask::new(GoalType::FullAnalysis, transcript());

    let subtasks = harness.supervisor.submit_task(job.clone()).await.unwrap();

    assert_eq!(subtasks.len(), 1);
    let fallback = &subtasks[0];
    assert_eq!(fallback.managed_by, AgentId::from("manager-topics"));
    assert_eq!(fallback.context.extra["fallback"], json!(true));
    assert_eq!(fallback.context.extra["input"], transcript());
}

#[tokio::test]
async fn test_manager_events_update_registry() {
    let harness = Harness::new(ScriptedOracle::new(), &[]).await;
    let supervisor_id = harness.supervisor.id().clone();
    let manager = AgentId::from("manager-late");

    let register = ManagerEvent::Register {
        expertise: vec!["summarization".to_string()],
    }
    .into_message(manager.clone(), supervisor_id.clone());
    harness.report(register).await;

    let assigned = ManagerEvent::AgentAssigned {
        agent_id: AgentId::from("worker-1"),
    }
    .into_message(manager.clone(), supervisor_id.clone());
    harness.report(assigned).await;

    assert_eq!(
        harness.supervisor.assign_manager_for_expertise(Expertise::Summarization).await,
        manager
    );

    harness
        .report(ManagerEvent::Unavailable.into_message(manager.clone(), supervisor_id))
        .await;
    let chosen = harness.supervisor.assign_manager_for_expertise(Expertise::Summarization).await;
    assert!(chosen.is_placeholder());

    let registry = harness.supervisor.registry().read().await;
    assert_eq!(registry.get(&manager).unwrap().load(), 1);
}

#[tokio::test]
async fn test_route_job_finishes_without_subtasks() {
    let harness = Harness::new(ScriptedOracle::new(), &[]).await;
    assert_eq!(harness.supervisor.route_job("no-such-job").await, RouteDecision::Finish);
    assert_eq!(harness.oracle.call_count(CallSite::Routing).await, 0);
}

#[tokio::test]
async fn test_route_job_follows_oracle_choice() {
    let oracle = single_topic_oracle().on(
        CallSite::Routing,
        ScriptedReply::Decision(json!({ "next": "sentiment_analysis" })),
    );
    let harness = Harness::new(oracle, STAFF).await;
    let job = AnalysisTask::new(GoalType::FullAnalysis, transcript());
    harness.supervisor.submit_task(job.clone()).await.unwrap();

    assert_eq!(
        harness.supervisor.route_job(&job.id).await,
        RouteDecision::Team(Team::SentimentAnalysis)
    );
}

#[tokio::test]
async fn test_run_loop_handles_bus_traffic() {
    let harness = Harness::new(single_topic_oracle(), STAFF).await;
    let inbox = harness.supervisor.connect().await;
    let runner = tokio::spawn(harness.supervisor.clone().run(inbox));

    let job = AnalysisTask::new(GoalType::FullAnalysis, transcript());
    let subtasks = harness.supervisor.submit_task(job.clone()).await.unwrap();
    let subtask = &subtasks[0];

    let report = CompletionReport {
        subtask_id: subtask.id.clone(),
        result: json!({ "topics": ["release date", "QA capacity"] }),
        quality: None,
        confidence: Some("high".to_string()),
        reasoning: None,
    }
    .into_message(subtask.managed_by.clone(), harness.supervisor.id().clone());
    harness.bus.send(report).await.unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(task) = harness.supervisor.task(&job.id).await {
                if task.status.is_terminal() {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job closes");

    assert_eq!(closed.status, TaskStatus::Completed);

    // Script has no synthesis reply, so the merge falls back
    let final_result = harness.supervisor.final_result(&job.id).await.unwrap();
    assert!(final_result.metadata.fallback);
    assert_eq!(final_result.sections["topic_extraction"][0]["topics"][1], json!("QA capacity"));

    runner.abort();
}

#[tokio::test]
async fn test_snapshots_are_persisted() {
    use std::sync::Arc;
    use ganglion::coordination::MessageBus;
    use ganglion::orchestration::Supervisor;
    use ganglion::state::{KeyFilter, MemoryStateStore, StateStore};

    let store = Arc::new(MemoryStateStore::new());
    let supervisor = Supervisor::new(
        Arc::new(single_topic_oracle()),
        Arc::new(MessageBus::default()),
        test_config(),
    )
    .with_store(store.clone());

    let job = AnalysisTask::new(GoalType::FullAnalysis, transcript());
    let subtasks = supervisor.submit_task(job.clone()).await.unwrap();
    supervisor.fail_subtask(&subtasks[0].id, "no speakers").await.unwrap();

    let snapshot = store.load(&format!("job:{}", job.id)).await.unwrap().unwrap();
    assert_eq!(snapshot["status"], json!("FAILED"));

    let keys = store.list(&KeyFilter::prefix("subtask:")).await.unwrap();
    assert_eq!(keys, vec![format!("subtask:{}", subtasks[0].id)]);

    let versioned = store.load_versioned(&keys[0]).await.unwrap().unwrap();
    assert!(versioned.version > 1);
}

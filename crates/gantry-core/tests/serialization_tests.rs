//! Serialization roundtrip tests for gantry-core types.

use chrono::Utc;
use gantry_core::events::*;
use gantry_core::ids::*;
use gantry_core::pipeline::*;
use gantry_core::run::*;
use std::collections::HashMap;

fn sample_snapshot(run_id: RunId, pipeline_id: PipelineId) -> RunStatusSnapshot {
    RunStatusSnapshot {
        run_id,
        pipeline_id,
        pipeline_name: "web-app".to_string(),
        run_number: 42,
        status: RunStatus::Queued,
        trigger: TriggerMeta::push("main"),
        stages: vec![StageSnapshot {
            id: StageId::new("build"),
            name: "build".to_string(),
            status: StageStatus::Queued,
            jobs: vec![JobSummary {
                id: JobId::new(),
                name: "compile".to_string(),
                status: JobStatus::Queued,
                agent_id: None,
                attempts: 0,
                failure: None,
                estimated_duration_secs: Some(120),
                duration_ms: None,
            }],
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }],
        queued_at: Utc::now(),
        started_at: None,
        completed_at: None,
        duration_ms: None,
    }
}

#[test]
fn test_run_queued_payload_roundtrip() {
    let run_id = RunId::new();
    let pipeline_id = PipelineId::new();
    let payload = RunQueuedPayload {
        run_id,
        pipeline_id,
        pipeline_name: "web-app".to_string(),
        run_number: 42,
        trigger: TriggerType::Push,
        snapshot: sample_snapshot(run_id, pipeline_id),
        queued_at: Utc::now(),
    };

    let json = serde_json::to_string(&payload).expect("serialize");
    let parsed: RunQueuedPayload = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(payload.run_id, parsed.run_id);
    assert_eq!(payload.pipeline_name, parsed.pipeline_name);
    assert_eq!(payload.snapshot.stages.len(), parsed.snapshot.stages.len());
}

#[test]
fn test_job_completed_payload_roundtrip() {
    let payload = JobCompletedPayload {
        run_id: RunId::new(),
        job_id: JobId::new(),
        job_name: "compile".to_string(),
        status: JobStatus::Failed,
        attempts: 2,
        failure: Some("executor exited with code 1".to_string()),
        duration_ms: Some(5000),
        completed_at: Utc::now(),
    };

    let json = serde_json::to_string(&payload).expect("serialize");
    let parsed: JobCompletedPayload = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(payload.status, parsed.status);
    assert_eq!(payload.attempts, parsed.attempts);
    assert_eq!(payload.failure, parsed.failure);
}

#[test]
fn test_event_tag_is_snake_case() {
    let event = Event::AgentOffline(AgentOfflinePayload {
        agent_id: AgentId::new(),
        last_heartbeat_at: None,
        detected_at: Utc::now(),
    });

    let json = serde_json::to_value(&event).expect("serialize");
    assert_eq!(json.get("type").and_then(|v| v.as_str()), Some("agent_offline"));
}

#[test]
fn test_event_enum_roundtrip() {
    let event = Event::CountersUpdated(LiveCounters {
        active_agents: 5,
        queue_length: 4,
        last_updated: Utc::now(),
    });

    let json = serde_json::to_string(&event).expect("serialize");
    let parsed: Event = serde_json::from_str(&json).expect("deserialize");

    match parsed {
        Event::CountersUpdated(counters) => {
            assert_eq!(counters.active_agents, 5);
            assert_eq!(counters.queue_length, 4);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_definition_roundtrip_preserves_stage_order() {
    let definition = PipelineDefinition {
        name: "web-app".to_string(),
        description: Some("build, deploy, release".to_string()),
        variables: HashMap::new(),
        stages: ["build", "deploy", "release"]
            .into_iter()
            .map(|name| StageTemplate {
                name: name.to_string(),
                display_name: None,
                jobs: vec![],
            })
            .collect(),
        default_job_timeout_secs: 900,
    };

    let json = serde_json::to_string(&definition).expect("serialize");
    let parsed: PipelineDefinition = serde_json::from_str(&json).expect("deserialize");

    let names: Vec<_> = parsed.stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["build", "deploy", "release"]);
}

#[test]
fn test_id_serializes_transparent() {
    let id = RunId::new();
    let json = serde_json::to_string(&id).expect("serialize");
    // Transparent newtype: plain UUID string, no prefix on the wire.
    assert!(json.contains('-'));
    assert!(!json.contains("run_"));
}

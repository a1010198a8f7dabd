//! Sequence id allocation: ordering, probing, retry, exhaustion and deadlines.

mod common;

use casebook_core::config::{AllocatorConfig, AppConfig};
use casebook_metadata::TestCaseSequences;
use casebook_metadata::models::{TestCaseDraft, TestCaseRow};
use casebook_service::{SequenceAllocator, ServiceError};
use common::{CreateBehavior, ScriptedCounter, TestHarness};
use std::collections::HashSet;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

fn draft(title: &str) -> TestCaseDraft {
    TestCaseDraft {
        title: title.to_string(),
        description: None,
        priority: "medium".to_string(),
        status: "draft".to_string(),
    }
}

fn allocator(max_attempts: u32, base_backoff_ms: u64) -> SequenceAllocator {
    SequenceAllocator::new(&AllocatorConfig {
        max_attempts,
        base_backoff_ms,
        ..AllocatorConfig::default()
    })
}

#[tokio::test]
async fn test_sequential_allocation_in_fresh_project() {
    let harness = TestHarness::new().await;
    let project = harness.project().await;

    let mut ids = Vec::new();
    for i in 0..3 {
        let row = harness
            .services
            .entities
            .create_test_case(project.project_id, draft(&format!("case {i}")))
            .await
            .unwrap();
        ids.push(row.tc_id);
    }
    assert_eq!(ids, vec!["tc1", "tc2", "tc3"]);
}

#[tokio::test]
async fn test_preseeded_ids_are_skipped() {
    let harness = TestHarness::new().await;
    let project = harness.project().await;

    // An imported record already holds tc2 while the count is 1.
    harness
        .metadata
        .insert_test_case(&TestCaseRow {
            id: Uuid::new_v4(),
            project_id: project.project_id,
            tc_id: "tc2".to_string(),
            title: "imported".to_string(),
            description: None,
            priority: "low".to_string(),
            status: "draft".to_string(),
            created_at: OffsetDateTime::now_utc(),
            deleted_at: None,
        })
        .await
        .unwrap();

    let row = harness
        .services
        .entities
        .create_test_case(project.project_id, draft("next"))
        .await
        .unwrap();
    assert_eq!(row.tc_id, "tc3");
}

#[tokio::test]
async fn test_first_allocation_after_tc1_is_tc2() {
    let store = ScriptedCounter::always(CreateBehavior::Insert);
    store.seed("tc1");

    let id = allocator(5, 1).allocate(&store, "project", &()).await.unwrap();
    assert_eq!(id, "tc2");
}

#[tokio::test]
async fn test_concurrent_allocations_are_unique() {
    const TASKS: usize = 8;

    let harness = TestHarness::new().await;
    let project = harness.project().await;
    let allocator = allocator(TASKS as u32 + 2, 1);
    let sequences = TestCaseSequences::new(harness.metadata.clone());
    let parent_key = project.project_id.to_string();

    let handles: Vec<_> = (0..TASKS)
        .map(|i| {
            let allocator = allocator.clone();
            let sequences = sequences.clone();
            let parent_key = parent_key.clone();
            tokio::spawn(async move {
                allocator
                    .allocate(&sequences, &parent_key, &draft(&format!("racer {i}")))
                    .await
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        let row = handle.await.unwrap().expect("allocation should succeed");
        assert!(ids.insert(row.tc_id.clone()), "duplicate id {}", row.tc_id);
    }

    let expected: HashSet<String> = (1..=TASKS).map(|n| format!("tc{n}")).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_soft_deleted_ids_are_never_reissued() {
    let harness = TestHarness::new().await;
    let project = harness.project().await;
    let entities = &harness.services.entities;

    let _first = entities
        .create_test_case(project.project_id, draft("a"))
        .await
        .unwrap();
    let second = entities
        .create_test_case(project.project_id, draft("b"))
        .await
        .unwrap();
    entities.delete_test_case(second.id).await.unwrap();

    let third = entities
        .create_test_case(project.project_id, draft("c"))
        .await
        .unwrap();
    assert_eq!(third.tc_id, "tc3");

    let live: Vec<_> = entities
        .list_test_cases(project.project_id)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.tc_id)
        .collect();
    assert_eq!(live, vec!["tc1", "tc3"]);
}

#[tokio::test]
async fn test_retries_after_unique_violation() {
    let store = ScriptedCounter::colliding(2);

    let id = allocator(5, 1).allocate(&store, "project", &()).await.unwrap();
    assert_eq!(id, "tc1");
    assert_eq!(store.create_calls(), 3);
}

#[tokio::test]
async fn test_exhausted_after_max_attempts() {
    let store = ScriptedCounter::always(CreateBehavior::Collide);

    let err = allocator(5, 1)
        .allocate(&store, "project", &())
        .await
        .unwrap_err();
    match err {
        ServiceError::AllocationExhausted {
            parent_key,
            attempts,
            last_candidate,
            timed_out,
        } => {
            assert_eq!(parent_key, "project");
            assert_eq!(attempts, 5);
            assert_eq!(last_candidate.as_deref(), Some("tc1"));
            assert!(!timed_out);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(store.create_calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_linearly() {
    let store = ScriptedCounter::colliding(3);
    let start = tokio::time::Instant::now();

    allocator(5, 100)
        .allocate(&store, "project", &())
        .await
        .unwrap();

    // 100ms + 200ms + 300ms
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(600), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(700), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_no_sleep_after_final_attempt() {
    let store = ScriptedCounter::always(CreateBehavior::Collide);
    let start = tokio::time::Instant::now();

    let _ = allocator(3, 100).allocate(&store, "project", &()).await;

    // Sleeps only between attempts: 100ms + 200ms.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_deadline_bounds_allocation() {
    let store = ScriptedCounter::always(CreateBehavior::Hang);
    let allocator = SequenceAllocator::new(&AllocatorConfig {
        deadline_ms: 2_000,
        ..AllocatorConfig::default()
    });

    let err = allocator
        .allocate(&store, "project", &())
        .await
        .unwrap_err();
    match err {
        ServiceError::AllocationExhausted {
            attempts,
            last_candidate,
            timed_out,
            ..
        } => {
            assert!(timed_out);
            assert_eq!(attempts, 1);
            assert_eq!(last_candidate.as_deref(), Some("tc1"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_other_store_errors_are_not_retried() {
    let store = ScriptedCounter::always(CreateBehavior::Fail);

    let err = allocator(5, 1)
        .allocate(&store, "project", &())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::StorageFault(_)));
    assert_eq!(store.create_calls(), 1);
}

#[tokio::test]
async fn test_rejects_empty_parent_key_and_foreign_scope() {
    let harness = TestHarness::with_config(AppConfig::for_testing()).await;
    let sequences = TestCaseSequences::new(harness.metadata.clone());
    let allocator = allocator(5, 1);

    assert!(matches!(
        allocator.allocate(&sequences, "", &draft("x")).await,
        Err(ServiceError::Validation(_))
    ));
    assert!(matches!(
        allocator.allocate(&sequences, "not-a-project", &draft("x")).await,
        Err(ServiceError::Validation(_))
    ));
}

#[tokio::test]
async fn test_defects_use_their_own_sequence() {
    let harness = TestHarness::new().await;
    let project = harness.project().await;

    harness
        .services
        .entities
        .create_test_case(project.project_id, draft("case"))
        .await
        .unwrap();
    let defect = harness
        .services
        .entities
        .create_defect(
            project.project_id,
            casebook_metadata::models::DefectDraft {
                title: "crash".to_string(),
                description: Some("on save".to_string()),
                severity: "high".to_string(),
                status: "open".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(defect.defect_id, "DEF-1");
}

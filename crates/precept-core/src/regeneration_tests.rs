//! Regeneration pipeline tests against the mocked store.

use chrono::{TimeZone, Utc};
use std::sync::Arc;

use crate::context::EntityBundle;
use crate::domain::{Assignment, AssignmentStatus, ClerkshipType};
use crate::ports::{FixedClock, MockSchedulingStore, MutationBatch};
use crate::regeneration::{GenerateRequest, RegenerationMode, RegenerationService};
use crate::testing::fixtures::*;

fn clock() -> FixedClock {
    FixedClock(Utc.with_ymd_and_hms(2026, 2, 15, 8, 0, 0).unwrap())
}

fn scheduled(student: &str, preceptor: &str, day: &str) -> Assignment {
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    Assignment {
        id: format!("{}@{}", student, day),
        student_id: student.to_string(),
        preceptor_id: preceptor.to_string(),
        clerkship_id: "c1".to_string(),
        site_id: Some("site1".to_string()),
        elective_id: None,
        date: date(day),
        status: AssignmentStatus::Scheduled,
        created_at: now,
        updated_at: now,
    }
}

/// Bundle for the minimal-change scenario: Dr X only has explicit
/// availability before the cutoff, Dr Y is unconstrained.
fn minimal_change_bundle() -> EntityBundle {
    let mut bundle = base_bundle();
    bundle.preceptors.push(preceptor("p-x", "hs1", &["site1"], 2));
    bundle.preceptors.push(preceptor("p-y", "hs1", &["site1"], 2));
    bundle
        .availability
        .extend(weekday_availability_all("p-x", "site1", "2026-02-16", "2026-02-20"));
    bundle
        .clerkships
        .push(clerkship("c1", ClerkshipType::Outpatient, 1));
    bundle.students.push(student("alice", &["hs1"]));
    bundle.enrollments.push(enrollment("alice", "c1"));
    bundle
}

fn mock_store(
    bundle: EntityBundle,
    assignments: Vec<Assignment>,
    expect_write: bool,
) -> (MockSchedulingStore, Arc<std::sync::Mutex<Vec<MutationBatch>>>) {
    let mut store = MockSchedulingStore::new();
    let per = period("per1", "2026-01-01", "2026-12-31");
    store
        .expect_load_period()
        .returning(move |_| Ok(Some(per.clone())));
    store
        .expect_load_entities()
        .returning(move |_| Ok(bundle.clone()));
    store
        .expect_load_assignments()
        .returning(move |_, _| Ok(assignments.clone()));

    let applied = Arc::new(std::sync::Mutex::new(Vec::new()));
    if expect_write {
        store.expect_acquire_period_lock().returning(|_| Ok(()));
        store.expect_release_period_lock().returning(|_| Ok(()));
        let sink = applied.clone();
        store.expect_apply_mutations().returning(move |batch| {
            sink.lock().unwrap().push(batch);
            Ok(())
        });
    }
    (store, applied)
}

fn request(mode: RegenerationMode, preview: bool) -> GenerateRequest {
    let mut req = GenerateRequest::new(
        "per1",
        date("2026-01-01"),
        date("2026-12-31"),
        mode,
    );
    req.cutoff_date = Some(date("2026-03-01"));
    req.preview = preview;
    req
}

// ===== Minimal-change regeneration =====

#[tokio::test]
async fn test_minimal_change_preview_classifies_affected_row() {
    let existing = vec![scheduled("alice", "p-x", "2026-03-10")];
    let (store, _) = mock_store(minimal_change_bundle(), existing, false);
    let service = RegenerationService::new(Arc::new(store), Arc::new(clock()));

    let result = service
        .generate(request(RegenerationMode::MinimalChange, true))
        .await
        .unwrap();

    assert!(result.preview);
    assert!(result.audit_log_id.is_none());
    let impact = result.impact.unwrap();
    assert_eq!(impact.preservable_count, 0);
    assert_eq!(impact.affected_count, 1);
    assert_eq!(impact.replaceable_count, 1, "Dr Y can take the day");
    assert_eq!(impact.to_delete_count, 1);
}

#[tokio::test]
async fn test_minimal_change_replaces_invalid_assignment() {
    let existing = vec![scheduled("alice", "p-x", "2026-03-10")];
    let (store, applied) = mock_store(minimal_change_bundle(), existing, true);
    let service = RegenerationService::new(Arc::new(store), Arc::new(clock()));

    let result = service
        .generate(request(RegenerationMode::MinimalChange, false))
        .await
        .unwrap();

    assert_eq!(result.deleted_future, 1);
    assert_eq!(result.new_generated, 1);
    assert!(result.audit_log_id.is_some());

    let batches = applied.lock().unwrap();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.delete_assignment_ids, vec!["alice@2026-03-10"]);
    assert_eq!(batch.insert_assignments.len(), 1);
    // Dr X has no availability after the cutoff, so Dr Y picks it up.
    assert_eq!(batch.insert_assignments[0].preceptor_id, "p-y");
    let audit = batch.audit.as_ref().unwrap();
    assert_eq!(audit.strategy, "minimal-change");
    assert!(audit.success);
    assert_eq!(audit.deleted_count, 1);
    assert_eq!(audit.generated_count, 1);
}

#[tokio::test]
async fn test_minimal_change_preserves_valid_assignment() {
    // Dr X is explicitly available on the assignment's date.
    let mut bundle = minimal_change_bundle();
    bundle
        .availability
        .extend(weekday_availability_all("p-x", "site1", "2026-03-09", "2026-03-13"));
    let existing = vec![scheduled("alice", "p-x", "2026-03-10")];
    let (store, applied) = mock_store(bundle, existing, true);
    let service = RegenerationService::new(Arc::new(store), Arc::new(clock()));

    let result = service
        .generate(request(RegenerationMode::MinimalChange, false))
        .await
        .unwrap();

    assert_eq!(result.preserved_future, 1);
    assert_eq!(result.deleted_future, 0);
    // The requirement is 1 day and the preserved row credits it in full.
    assert_eq!(result.new_generated, 0);
    let batches = applied.lock().unwrap();
    assert!(batches[0].delete_assignment_ids.is_empty());
    assert!(batches[0].insert_assignments.is_empty());
}

// ===== Preview / commit consistency =====

#[tokio::test]
async fn test_preview_then_commit_produce_same_impact() {
    let existing = vec![scheduled("alice", "p-x", "2026-03-10")];
    let (preview_store, _) = mock_store(minimal_change_bundle(), existing.clone(), false);
    let preview_service =
        RegenerationService::new(Arc::new(preview_store), Arc::new(clock()));
    let previewed = preview_service
        .generate(request(RegenerationMode::MinimalChange, true))
        .await
        .unwrap();

    let (commit_store, applied) = mock_store(minimal_change_bundle(), existing, true);
    let commit_service =
        RegenerationService::new(Arc::new(commit_store), Arc::new(clock()));
    let committed = commit_service
        .generate(request(RegenerationMode::MinimalChange, false))
        .await
        .unwrap();

    let pi = previewed.impact.unwrap();
    let ci = committed.impact.unwrap();
    assert_eq!(pi.affected_count, ci.affected_count);
    assert_eq!(pi.to_delete_count, ci.to_delete_count);
    assert_eq!(pi.summary, ci.summary);
    assert_eq!(previewed.new_generated, committed.new_generated);
    assert_eq!(
        applied.lock().unwrap()[0].insert_assignments.len() as u32,
        previewed.new_generated
    );
}

// ===== Completion mode =====

fn completion_bundle() -> EntityBundle {
    let mut bundle = base_bundle();
    bundle.preceptors.push(preceptor("p1", "hs1", &["site1"], 2));
    bundle
        .clerkships
        .push(clerkship("c1", ClerkshipType::Outpatient, 20));
    bundle.students.push(student("alice", &["hs1"]));
    bundle.enrollments.push(enrollment("alice", "c1"));
    bundle
}

fn completion_request() -> GenerateRequest {
    let mut req = GenerateRequest::new(
        "per1",
        date("2026-01-01"),
        date("2026-12-31"),
        RegenerationMode::Completion,
    );
    req.cutoff_date = Some(date("2026-01-01"));
    req
}

#[tokio::test]
async fn test_completion_fills_only_the_gap_then_is_idempotent() {
    // 18 of 20 days already scheduled.
    let mut existing = Vec::new();
    for day in crate::domain::calendar::working_days(
        date("2026-01-05"),
        date("2026-01-28"),
        &Default::default(),
    ) {
        existing.push(scheduled("alice", "p1", &day.to_string()));
    }
    assert_eq!(existing.len(), 18);

    let (store, applied) = mock_store(completion_bundle(), existing.clone(), true);
    let service = RegenerationService::new(Arc::new(store), Arc::new(clock()));
    let first = service.generate(completion_request()).await.unwrap();

    assert_eq!(first.preserved_future, 18);
    assert_eq!(first.deleted_future, 0);
    assert_eq!(first.new_generated, 2);
    let new_rows = applied.lock().unwrap()[0].insert_assignments.clone();
    assert_eq!(new_rows.len(), 2);

    // Second run over the completed schedule: nothing new, nothing deleted.
    existing.extend(new_rows);
    let (store, applied) = mock_store(completion_bundle(), existing, true);
    let service = RegenerationService::new(Arc::new(store), Arc::new(clock()));
    let second = service.generate(completion_request()).await.unwrap();

    assert_eq!(second.new_generated, 0);
    assert_eq!(second.deleted_future, 0);
    assert_eq!(second.preserved_future, 20);
    assert!(applied.lock().unwrap()[0].insert_assignments.is_empty());
}

// ===== Full reoptimize =====

#[tokio::test]
async fn test_full_reoptimize_deletes_future_keeps_past() {
    let mut bundle = completion_bundle();
    bundle.clerkships[0].required_days = 4;
    let existing = vec![
        scheduled("alice", "p1", "2026-02-02"), // past (before cutoff)
        scheduled("alice", "p1", "2026-03-02"), // future
        scheduled("alice", "p1", "2026-03-03"), // future
    ];
    let (store, applied) = mock_store(bundle, existing, true);
    let service = RegenerationService::new(Arc::new(store), Arc::new(clock()));

    let result = service
        .generate(request(RegenerationMode::FullReoptimize, false))
        .await
        .unwrap();

    assert_eq!(result.preserved_past, 1);
    assert_eq!(result.deleted_future, 2);
    // 4 required, 1 past credit: 3 days regenerate after the cutoff.
    assert_eq!(result.new_generated, 3);
    let batch = &applied.lock().unwrap()[0];
    assert_eq!(batch.delete_assignment_ids.len(), 2);
    assert!(batch
        .delete_assignment_ids
        .iter()
        .all(|id| id.starts_with("alice@2026-03")));
}

#[tokio::test]
async fn test_unknown_period_is_not_found() {
    let mut store = MockSchedulingStore::new();
    store.expect_load_period().returning(|_| Ok(None));
    store.expect_acquire_period_lock().returning(|_| Ok(()));
    store.expect_release_period_lock().returning(|_| Ok(()));
    let service = RegenerationService::new(Arc::new(store), Arc::new(clock()));

    let err = service
        .generate(request(RegenerationMode::Full, false))
        .await
        .unwrap_err();
    let core = err.downcast_ref::<crate::domain::CoreError>().unwrap();
    assert!(matches!(core, crate::domain::CoreError::NotFound { .. }));
}

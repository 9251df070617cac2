//! Drives the same wiring the CLI subcommands use, against an on-disk
//! database file.

use std::sync::Arc;

use precept_core::testing::fixtures::*;
use precept_core::{
    ClerkshipType, EditingService, GenerateRequest, RegenerationMode, RegenerationService,
    SchedulingStore, SystemClock,
};
use precept_storage::{init_db, SqliteSchedulingStore};

#[tokio::test]
async fn test_generate_and_edit_against_file_db() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("precept.db");
    let db_path = db_path.to_str().unwrap();

    let pool = init_db(db_path).await.unwrap();
    let store = Arc::new(SqliteSchedulingStore::new(pool));

    store
        .insert_period(&period("per1", "2026-01-01", "2026-12-31"))
        .await
        .unwrap();
    store
        .insert_health_system(&health_system("hs1"))
        .await
        .unwrap();
    store.insert_site(&site("site1", "hs1")).await.unwrap();
    store
        .insert_clerkship(&clerkship("c1", ClerkshipType::Outpatient, 3))
        .await
        .unwrap();
    store
        .insert_preceptor(&preceptor("p1", "hs1", &["site1"], 2))
        .await
        .unwrap();
    store
        .insert_preceptor(&preceptor("p2", "hs1", &["site1"], 2))
        .await
        .unwrap();
    store.insert_student(&student("s1", &["hs1"])).await.unwrap();
    store
        .insert_enrollment(&enrollment("s1", "c1"))
        .await
        .unwrap();

    let service = RegenerationService::new(store.clone(), Arc::new(SystemClock));
    let mut request = GenerateRequest::new(
        "per1",
        date("2026-01-01"),
        date("2026-12-31"),
        RegenerationMode::Full,
    );
    request.cutoff_date = Some(date("2026-01-05"));
    let result = service.generate(request).await.unwrap();
    assert_eq!(result.new_generated, 3);

    // The rows survive pool reopening (real file, not :memory:).
    drop(service);
    drop(store);
    let pool = init_db(db_path).await.unwrap();
    let store = Arc::new(SqliteSchedulingStore::new(pool));
    let rows = store
        .load_assignments(date("2026-01-01"), date("2026-12-31"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);

    let editor = EditingService::new(store.clone(), Arc::new(SystemClock));
    let other = if rows[0].preceptor_id == "p1" { "p2" } else { "p1" };
    let verdict = editor
        .reassign("per1", &rows[0].id, other, true)
        .await
        .unwrap();
    assert!(verdict.valid);

    let audits = store.load_audit_log(5).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].strategy, "full");
}

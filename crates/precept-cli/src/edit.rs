use anyhow::Result;
use chrono::NaiveDate;
use colored::*;
use std::sync::Arc;

use precept_core::{AssignmentPatch, EditingService, SystemClock, ValidationResult};
use precept_storage::{init_db, SqliteSchedulingStore};

async fn service(db_path: &str) -> Result<EditingService<SqliteSchedulingStore>> {
    let pool = init_db(db_path).await?;
    let store = Arc::new(SqliteSchedulingStore::new(pool));
    Ok(EditingService::new(store, Arc::new(SystemClock)))
}

fn report(result: &ValidationResult, dry_run: bool, action: &str) {
    if result.valid {
        let suffix = if dry_run { " (dry run, no changes)" } else { "" };
        println!("✅ {}{}", format!("{} is valid", action).green().bold(), suffix.dimmed());
    } else {
        println!("❌ {}", format!("{} rejected", action).red().bold());
        for error in &result.errors {
            println!(
                "   {} {}",
                format!("[{}]", error.constraint).red(),
                error.message
            );
        }
    }
}

pub async fn reassign(
    db_path: &str,
    period_id: &str,
    assignment_id: &str,
    new_preceptor_id: &str,
    dry_run: bool,
) -> Result<()> {
    let service = service(db_path).await?;
    let result = service
        .reassign(period_id, assignment_id, new_preceptor_id, dry_run)
        .await?;
    report(&result, dry_run, "reassign");
    Ok(())
}

pub async fn swap(
    db_path: &str,
    period_id: &str,
    assignment_id_1: &str,
    assignment_id_2: &str,
    dry_run: bool,
) -> Result<()> {
    let service = service(db_path).await?;
    let result = service
        .swap(period_id, assignment_id_1, assignment_id_2, dry_run)
        .await?;
    report(&result, dry_run, "swap");
    Ok(())
}

pub async fn move_date(
    db_path: &str,
    period_id: &str,
    assignment_id: &str,
    new_date: NaiveDate,
    dry_run: bool,
) -> Result<()> {
    let service = service(db_path).await?;
    let patch = AssignmentPatch {
        date: Some(new_date),
        status: None,
    };
    let result = service
        .update_assignment(period_id, assignment_id, patch, dry_run)
        .await?;
    report(&result, dry_run, "date change");
    Ok(())
}

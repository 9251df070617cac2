use anyhow::Result;
use colored::*;
use std::sync::Arc;

use precept_core::{EditingService, SystemClock};
use precept_storage::{init_db, SqliteSchedulingStore};

pub async fn run(db_path: &str, period_id: &str) -> Result<()> {
    let pool = init_db(db_path).await?;
    let store = Arc::new(SqliteSchedulingStore::new(pool));
    let service = EditingService::new(store, Arc::new(SystemClock));

    println!(
        "🔎 {}",
        format!("Validating schedule for period {}", period_id)
            .bright_cyan()
            .bold()
    );
    println!();

    let violations = service.validate_schedule(period_id).await?;
    if violations.is_empty() {
        println!("✅ {}", "No violations found".green().bold());
        return Ok(());
    }

    println!(
        "❌ {}",
        format!("{} violations", violations.len()).red().bold()
    );
    for violation in &violations {
        let date = violation
            .date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "   {} {} {} {}",
            date.dimmed(),
            violation.student_id.yellow(),
            format!("[{}]", violation.constraint).red(),
            violation.message
        );
    }
    Ok(())
}

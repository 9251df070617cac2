use anyhow::Result;
use colored::*;

use precept_storage::{init_db, SqliteSchedulingStore};

pub async fn run(db_path: &str, limit: u32) -> Result<()> {
    let pool = init_db(db_path).await?;
    let store = SqliteSchedulingStore::new(pool);

    let records = store.load_audit_log(limit).await?;
    if records.is_empty() {
        println!("{}", "No regenerations recorded yet.".dimmed());
        return Ok(());
    }

    for record in records {
        let status = if record.success {
            "ok".green().bold()
        } else {
            "failed".red().bold()
        };
        println!(
            "{} {} {} cutoff={} end={}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            record.strategy.bright_cyan(),
            status,
            record.cutoff_date,
            record.end_date
        );
        println!(
            "   past={} preserved={} deleted={} affected={} generated={}",
            record.past_count,
            record.preserved_count,
            record.deleted_count,
            record.affected_count,
            record.generated_count
        );
        if !record.bypassed_constraints.is_empty() {
            println!(
                "   {} {}",
                "bypassed:".yellow(),
                record.bypassed_constraints.join(", ")
            );
        }
        if let Some(notes) = &record.notes {
            println!("   {}", notes.dimmed());
        }
    }
    Ok(())
}

use anyhow::Result;
use chrono::NaiveDate;
use colored::*;
use std::collections::BTreeSet;
use std::sync::Arc;

use precept_core::{
    ConstraintId, GenerateRequest, RegenerationMode, RegenerationService, SchedulingStore,
    SystemClock,
};
use precept_storage::{init_db, SqliteSchedulingStore};

#[allow(clippy::too_many_arguments)]
pub async fn run(
    db_path: &str,
    period_id: &str,
    mode: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    cutoff: Option<NaiveDate>,
    preview: bool,
    bypass: &[String],
    deadline_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let mode = RegenerationMode::parse(mode).map_err(|e| anyhow::anyhow!(e))?;
    let mut bypassed: BTreeSet<ConstraintId> = BTreeSet::new();
    for name in bypass {
        bypassed.insert(ConstraintId::parse(name).map_err(|e| anyhow::anyhow!(e))?);
    }

    let pool = init_db(db_path).await?;
    let store = Arc::new(SqliteSchedulingStore::new(pool));

    let period = store
        .load_period(period_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("unknown scheduling period: {}", period_id))?;

    let mut request = GenerateRequest::new(
        period_id,
        start.unwrap_or(period.start_date),
        end.unwrap_or(period.end_date),
        mode,
    );
    request.cutoff_date = cutoff;
    request.preview = preview;
    request.bypassed_constraints = bypassed;
    request.deadline_ms = deadline_ms;

    if !json {
        let label = if preview { "Previewing" } else { "Generating" };
        println!(
            "🗓  {}",
            format!("{} schedule for period {} ({})", label, period_id, mode)
                .bright_cyan()
                .bold()
        );
        println!();
    }

    let service = RegenerationService::new(store, Arc::new(SystemClock));
    let result = service.generate(request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if let Some(impact) = &result.impact {
        println!("   {}: {}", "Past assignments".dimmed(), impact.past_count);
        println!(
            "   {}: {}",
            "Preserved future".dimmed(),
            impact.preservable_count
        );
        println!(
            "   {}: {} ({} replaceable)",
            "Affected".dimmed(),
            impact.affected_count,
            impact.replaceable_count
        );
        println!("   {}: {}", "Deleted".dimmed(), impact.to_delete_count);
        println!();
    }

    println!(
        "✅ {}",
        format!("{} assignments generated", result.new_generated)
            .green()
            .bold()
    );
    if !result.unmet_requirements.is_empty() {
        println!();
        println!(
            "⚠️  {}",
            format!("{} unmet requirements", result.unmet_requirements.len())
                .yellow()
                .bold()
        );
        for unmet in &result.unmet_requirements {
            let reasons: Vec<String> = unmet
                .reasons
                .iter()
                .map(|(k, n)| format!("{}×{}", k, n))
                .collect();
            println!(
                "   {} {} {}/{} days ({})",
                unmet.student_id.yellow(),
                unmet.clerkship_id.dimmed(),
                unmet.days_placed,
                unmet.days_requested,
                reasons.join(", ").dimmed()
            );
        }
    }
    if !result.violations.is_empty() {
        println!();
        println!(
            "⚠️  {}",
            format!("{} violations (bypassed constraints)", result.violations.len()).yellow()
        );
    }
    if let Some(audit_id) = &result.audit_log_id {
        println!();
        println!("   {}: {}", "Audit record".dimmed(), audit_id.dimmed());
    }
    Ok(())
}

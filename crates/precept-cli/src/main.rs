use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

mod audit;
mod edit;
mod generate;
mod validate;

/// Precept CLI - operator tool for the clinical scheduling engine
#[derive(Parser)]
#[command(name = "precept")]
#[command(about = "Generate, inspect and edit preceptor schedules", long_about = None)]
struct Cli {
    /// Database path (default: data/precept.db or $PRECEPT_DB_PATH)
    #[arg(short, long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a schedule regeneration
    Generate {
        /// Scheduling period ID
        period_id: String,
        /// Regeneration mode: full, minimal-change, full-reoptimize, completion
        #[arg(long, default_value = "full-reoptimize")]
        mode: String,
        /// Range start (defaults to the period start)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Range end (defaults to the period end)
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Cutoff date (defaults to today)
        #[arg(long)]
        cutoff: Option<NaiveDate>,
        /// Compute the impact without writing anything
        #[arg(long)]
        preview: bool,
        /// Constraint ids to bypass (comma separated)
        #[arg(long, value_delimiter = ',')]
        bypass: Vec<String>,
        /// Wall-clock deadline in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
        /// Emit the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate every existing assignment of a period
    Validate {
        /// Scheduling period ID
        period_id: String,
    },
    /// Move an assignment to another preceptor
    Reassign {
        /// Scheduling period ID
        period_id: String,
        /// Assignment ID
        assignment_id: String,
        /// New preceptor ID
        new_preceptor_id: String,
        /// Validate only, never write
        #[arg(long)]
        dry_run: bool,
    },
    /// Swap the preceptors of two assignments
    Swap {
        /// Scheduling period ID
        period_id: String,
        /// First assignment ID
        assignment_id_1: String,
        /// Second assignment ID
        assignment_id_2: String,
        /// Validate only, never write
        #[arg(long)]
        dry_run: bool,
    },
    /// Move an assignment to another date
    MoveDate {
        /// Scheduling period ID
        period_id: String,
        /// Assignment ID
        assignment_id: String,
        /// Target date (YYYY-MM-DD)
        new_date: NaiveDate,
        /// Validate only, never write
        #[arg(long)]
        dry_run: bool,
    },
    /// Show recent regeneration audit records
    Audit {
        /// Number of records to show
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

fn db_path(cli: &Cli) -> String {
    cli.db
        .clone()
        .or_else(|| std::env::var("PRECEPT_DB_PATH").ok())
        .unwrap_or_else(|| "data/precept.db".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let db = db_path(&cli);

    match cli.command {
        Commands::Generate {
            period_id,
            mode,
            start,
            end,
            cutoff,
            preview,
            bypass,
            deadline_ms,
            json,
        } => {
            generate::run(
                &db,
                &period_id,
                &mode,
                start,
                end,
                cutoff,
                preview,
                &bypass,
                deadline_ms,
                json,
            )
            .await?;
        }
        Commands::Validate { period_id } => {
            validate::run(&db, &period_id).await?;
        }
        Commands::Reassign {
            period_id,
            assignment_id,
            new_preceptor_id,
            dry_run,
        } => {
            edit::reassign(&db, &period_id, &assignment_id, &new_preceptor_id, dry_run).await?;
        }
        Commands::Swap {
            period_id,
            assignment_id_1,
            assignment_id_2,
            dry_run,
        } => {
            edit::swap(&db, &period_id, &assignment_id_1, &assignment_id_2, dry_run).await?;
        }
        Commands::MoveDate {
            period_id,
            assignment_id,
            new_date,
            dry_run,
        } => {
            edit::move_date(&db, &period_id, &assignment_id, new_date, dry_run).await?;
        }
        Commands::Audit { limit } => {
            audit::run(&db, limit).await?;
        }
    }

    Ok(())
}

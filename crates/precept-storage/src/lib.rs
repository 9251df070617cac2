pub mod error;
pub mod models;
pub mod store;

pub use error::{is_busy, Result, StorageError};
pub use store::SqliteSchedulingStore;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Initialize the scheduling database with migrations.
pub async fn init_db(db_path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(db_path)?
        .create_if_missing(true)
        .foreign_keys(true);

    // An in-memory database is per-connection; pin the pool to one so every
    // query and the migrations see the same schema.
    let pool = if db_path.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?
    } else {
        SqlitePool::connect_with(options).await?
    };

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!(path = db_path, "scheduling DB initialized");
    Ok(pool)
}

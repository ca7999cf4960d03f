//! Database module for SQLite persistence.
//!
//! SQLite is the source of truth for requests and the user directory.

mod repository;

pub use repository::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Permit and equipment ids are drawn from this one sequence so the two
    // tables never share an id.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS request_ids (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS permit_requests (
            id INTEGER PRIMARY KEY,
            requester_code TEXT NOT NULL,
            requester_name TEXT NOT NULL,
            phone TEXT NOT NULL,
            dates TEXT NOT NULL,
            time TEXT,
            novelty_type TEXT NOT NULL,
            description TEXT NOT NULL,
            attachments TEXT,
            approval_marker TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            response_text TEXT,
            notified INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS equipment_requests (
            id INTEGER PRIMARY KEY,
            requester_code TEXT NOT NULL,
            requester_name TEXT NOT NULL,
            equipment_type TEXT NOT NULL,
            description TEXT NOT NULL,
            zone TEXT,
            shift_code_am TEXT,
            shift_code_pm TEXT,
            shift TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            response_text TEXT,
            notified INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            phone TEXT,
            email TEXT,
            role TEXT NOT NULL DEFAULT 'employee'
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_permit_requester ON permit_requests(requester_code);
        CREATE INDEX IF NOT EXISTS idx_permit_status ON permit_requests(status);
        CREATE INDEX IF NOT EXISTS idx_equipment_requester ON equipment_requests(requester_code);
        CREATE INDEX IF NOT EXISTS idx_equipment_status ON equipment_requests(status);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

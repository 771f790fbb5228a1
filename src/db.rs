use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, SqlErr, SqlxPostgresConnector, Statement};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::fs;

use crate::{config::AppConfig, error::AppError};

pub type DbPool = PgPool;

/// Create the sqlx pool. The acquire timeout bounds every repository call.
pub async fn create_pool(config: &AppConfig) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_acquire_timeout_secs))
        .connect(&config.database_url)
        .await?;
    Ok(pool)
}

/// Wrap an existing pool as a SeaORM connection.
pub fn orm_from_pool(pool: DbPool) -> DatabaseConnection {
    SqlxPostgresConnector::from_sqlx_postgres_pool(pool)
}

/// Create a SeaORM connection.
pub async fn create_orm_conn(config: &AppConfig) -> Result<DatabaseConnection> {
    let pool = create_pool(config).await?;
    Ok(orm_from_pool(pool))
}

/// Minimal migration runner that executes SQL files in `migrations/` in filename order.
/// Every statement is written with `IF NOT EXISTS`, so replaying the files is harmless.
pub async fn run_migrations(conn: &DatabaseConnection) -> Result<()> {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
    let mut entries = fs::read_dir(&dir).await?;
    let mut files: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    files.sort();

    let backend = conn.get_database_backend();
    for file in files {
        tracing::debug!(file = %file.display(), "applying migration");
        let sql = fs::read_to_string(&file).await?;
        // Postgres prepared statements cannot contain multiple commands,
        // so split the migration file and run each statement individually.
        for stmt in sql.split(';') {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            let statement = format!("{stmt};");
            conn.execute(Statement::from_string(backend, statement))
                .await?;
        }
    }

    Ok(())
}

/// Translate constraint violations into a 409 with `message`; anything else stays a storage error.
pub fn map_constraint_err(err: DbErr, message: &str) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail))
        | Some(SqlErr::ForeignKeyConstraintViolation(detail)) => {
            tracing::debug!(%detail, "constraint violation");
            AppError::Conflict(message.to_string())
        }
        _ => AppError::OrmError(err),
    }
}

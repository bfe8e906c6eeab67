use anyhow::{Context, Result};
use sqlx::{Executor, PgPool};
use tracing::info;

/// Migrations in application order, embedded at build time
const MIGRATIONS: &[(&str, &str)] = &[
    ("001_user_role.sql", include_str!("sql/001_user_role.sql")),
    ("002_cameras.sql", include_str!("sql/002_cameras.sql")),
    ("003_users.sql", include_str!("sql/003_users.sql")),
    (
        "004_system_settings.sql",
        include_str!("sql/004_system_settings.sql"),
    ),
    ("005_path_events.sql", include_str!("sql/005_path_events.sql")),
];

/// Apply every embedded migration. Each script is idempotent.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        pool.execute(*sql)
            .await
            .with_context(|| format!("Failed to apply migration {}", name))?;
        info!("Applied migration: {}", name);
    }

    Ok(())
}

use db_pool::{create_pool, CreatePoolError, DbConfig, PgPool};
use deadpool_postgres::Pool;
use thiserror::Error;

// Embedded at compile time; applied in order, each at most once
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_create_conversations",
        include_str!("../migrations/0001_create_conversations.sql"),
    ),
    (
        "0002_create_messages",
        include_str!("../migrations/0002_create_messages.sql"),
    ),
];

/// Arbitrary constant key for the migration advisory lock
const MIGRATION_LOCK_KEY: i64 = 0x636f_6e76_6572_7361;

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error(transparent)]
    Pool(#[from] CreatePoolError),
    #[error("pool checkout failed: {0}")]
    Checkout(#[from] deadpool_postgres::PoolError),
    #[error("migration {name} failed: {source}")]
    Migration {
        name: &'static str,
        #[source]
        source: tokio_postgres::Error,
    },
    #[error("migration bookkeeping failed: {0}")]
    Bookkeeping(#[from] tokio_postgres::Error),
}

const SERVICE_NAME: &str = "conversation-service";

/// Build the pool (sizing from `DB_*` variables) and bring the schema up to date
pub async fn init_pool(database_url: &str) -> Result<PgPool, DbInitError> {
    let mut cfg = DbConfig::from_env(SERVICE_NAME).unwrap_or_default();
    cfg.service_name = SERVICE_NAME.to_string();
    cfg.database_url = database_url.to_string();
    cfg.log_config();

    let pool = create_pool(cfg).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Apply pending migrations, recording each in `schema_migrations`
pub async fn run_migrations(pool: &Pool) -> Result<(), DbInitError> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    tx.execute("SELECT pg_advisory_xact_lock($1)", &[&MIGRATION_LOCK_KEY])
        .await?;
    tx.batch_execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .await?;

    for &(name, sql) in MIGRATIONS {
        let applied = tx
            .query_opt("SELECT 1 FROM schema_migrations WHERE name = $1", &[&name])
            .await?
            .is_some();
        if applied {
            continue;
        }

        tx.batch_execute(sql)
            .await
            .map_err(|source| DbInitError::Migration { name, source })?;
        tx.execute("INSERT INTO schema_migrations (name) VALUES ($1)", &[&name])
            .await?;
        tracing::info!(migration = %name, "conversation-service migration applied");
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_and_unique() {
        let names: Vec<_> = MIGRATIONS.iter().map(|(n, _)| *n).collect();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_schema_contains_ordering_constraints() {
        let all: String = MIGRATIONS.iter().map(|(_, sql)| *sql).collect();
        assert!(all.contains("idx_messages_conversation_seq"));
        assert!(all.contains("PRIMARY KEY (conversation_id, user_id)"));
        assert!(all.contains("idx_conversations_participant_key"));
    }
}

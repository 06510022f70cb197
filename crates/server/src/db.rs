use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use grantflow_core::config::PostgresConfig;
use grantflow_storage::{DeliveryLog, GrantStore, MemoryStore, PgStore};

/// Create a PostgreSQL connection pool and run migrations.
/// Returns None if Postgres is not configured or unreachable.
pub async fn init_pg_pool(config: &PostgresConfig) -> Option<PgPool> {
    if !config.is_configured() {
        warn!("PG_URL not configured, grants and delivery history stay in memory");
        return None;
    }

    let pool = match PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            warn!("Failed to connect to PostgreSQL: {} (falling back to in-memory store)", e);
            return None;
        }
    };
    info!("PostgreSQL connected: {}", config.host);

    match sqlx::migrate!("../../migrations").run(&pool).await {
        Ok(_) => {
            info!("Database migrations applied successfully");
            Some(pool)
        }
        Err(e) => {
            warn!("Failed to run migrations: {} (falling back to in-memory store)", e);
            None
        }
    }
}

/// Grant store and delivery log, on Postgres when available.
pub async fn open_stores(config: &PostgresConfig) -> (Arc<dyn GrantStore>, Arc<dyn DeliveryLog>) {
    match init_pg_pool(config).await {
        Some(pool) => {
            let store = Arc::new(PgStore::new(pool));
            let grants: Arc<dyn GrantStore> = store.clone();
            let log: Arc<dyn DeliveryLog> = store;
            (grants, log)
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            let grants: Arc<dyn GrantStore> = store.clone();
            let log: Arc<dyn DeliveryLog> = store;
            (grants, log)
        }
    }
}

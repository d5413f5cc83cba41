//! Persistence of routes (with their executions and checkpoints) between
//! process restarts

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::step::Route;

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert or overwrite a route snapshot
    async fn save_route(&self, route: &Route) -> Result<(), StoreError>;

    async fn load_route(&self, route_id: &str) -> Result<Option<Route>, StoreError>;

    /// Returns whether a route was removed
    async fn delete_route(&self, route_id: &str) -> Result<bool, StoreError>;

    /// Routes with at least one step not yet DONE
    async fn list_unfinished(&self) -> Result<Vec<Route>, StoreError>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryExecutionStore {
    routes: DashMap<String, Route>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn save_route(&self, route: &Route) -> Result<(), StoreError> {
        self.routes.insert(route.id.clone(), route.clone());
        Ok(())
    }

    async fn load_route(&self, route_id: &str) -> Result<Option<Route>, StoreError> {
        Ok(self.routes.get(route_id).map(|r| r.clone()))
    }

    async fn delete_route(&self, route_id: &str) -> Result<bool, StoreError> {
        Ok(self.routes.remove(route_id).is_some())
    }

    async fn list_unfinished(&self) -> Result<Vec<Route>, StoreError> {
        Ok(self
            .routes
            .iter()
            .filter(|r| !r.is_finished())
            .map(|r| r.clone())
            .collect())
    }
}

/// PostgreSQL store, one JSONB document per route
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Create the route table if missing
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executed_routes (
                route_id TEXT PRIMARY KEY,
                route JSONB NOT NULL,
                finished BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_executed_routes_unfinished
            ON executed_routes (finished) WHERE finished = FALSE
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Execution store migrations complete");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn save_route(&self, route: &Route) -> Result<(), StoreError> {
        let document = serde_json::to_value(route)?;

        sqlx::query(
            r#"
            INSERT INTO executed_routes (route_id, route, finished, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (route_id)
            DO UPDATE SET route = $2, finished = $3, updated_at = NOW()
            "#,
        )
        .bind(&route.id)
        .bind(document)
        .bind(route.is_finished())
        .execute(&self.pool)
        .await?;

        debug!("Saved route {}", route.id);
        Ok(())
    }

    async fn load_route(&self, route_id: &str) -> Result<Option<Route>, StoreError> {
        let row = sqlx::query("SELECT route FROM executed_routes WHERE route_id = $1")
            .bind(route_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let document: serde_json::Value = row.try_get("route")?;
                Ok(Some(serde_json::from_value(document)?))
            }
            None => Ok(None),
        }
    }

    async fn delete_route(&self, route_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM executed_routes WHERE route_id = $1")
            .bind(route_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_unfinished(&self) -> Result<Vec<Route>, StoreError> {
        let rows = sqlx::query(
            "SELECT route FROM executed_routes WHERE finished = FALSE ORDER BY updated_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<Route, StoreError> {
                let document: serde_json::Value = row.try_get("route")?;
                Ok(serde_json::from_value(document)?)
            })
            .collect()
    }
}

// visit-store-rs/src/lib.rs
//
// Durable visit records for the keepalive monitoring service.
// Provides:
// - VisitStore trait (record a timestamped visit, find the most recent one)
// - In-memory backend for tests and DATABASE_URL-less deployments
// - PostgreSQL backend via sqlx
//
// The monitor endpoint reads the most recent record for a page tag to decide
// whether the external scheduler is still firing; the keepalive endpoint
// writes one record per successful probe.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A single recorded visit, tagged by the logical page/route name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitRecord {
    pub id: String,
    pub page: String,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Storage abstraction for visit records
#[async_trait]
pub trait VisitStore: Send + Sync {
    /// Initialize the backend (create tables where applicable)
    async fn initialize(&self) -> Result<()>;

    /// Check if the backend is reachable
    async fn is_healthy(&self) -> bool;

    /// Record a visit for the given page tag
    async fn record_visit(
        &self,
        page: &str,
        user_agent: Option<&str>,
        ip: Option<&str>,
    ) -> Result<()>;

    /// Timestamp of the most recent visit for the given page tag
    async fn last_visit(&self, page: &str) -> Result<Option<DateTime<Utc>>>;
}

/// In-memory visit store backend
pub struct InMemoryVisitStore {
    visits: RwLock<Vec<VisitRecord>>,
}

impl InMemoryVisitStore {
    pub fn new() -> Self {
        Self {
            visits: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryVisitStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VisitStore for InMemoryVisitStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    async fn record_visit(
        &self,
        page: &str,
        user_agent: Option<&str>,
        ip: Option<&str>,
    ) -> Result<()> {
        let mut visits = self.visits.write().await;
        visits.push(VisitRecord {
            id: Uuid::new_v4().to_string(),
            page: page.to_string(),
            user_agent: user_agent.map(|s| s.to_string()),
            ip: ip.map(|s| s.to_string()),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn last_visit(&self, page: &str) -> Result<Option<DateTime<Utc>>> {
        let visits = self.visits.read().await;
        Ok(visits
            .iter()
            .filter(|v| v.page == page)
            .map(|v| v.created_at)
            .max())
    }
}

/// PostgreSQL visit store backend
pub struct PostgresVisitStore {
    pool: sqlx::PgPool,
}

impl PostgresVisitStore {
    /// Connect to PostgreSQL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = sqlx::PgPool::connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl VisitStore for PostgresVisitStore {
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS site_visits (
                id VARCHAR(64) PRIMARY KEY,
                page VARCHAR(255) NOT NULL,
                user_agent TEXT,
                ip VARCHAR(64),
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create site_visits table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS site_visits_page_created_at_idx \
             ON site_visits (page, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create site_visits index")?;

        log::info!("PostgreSQL visit store initialized");
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    async fn record_visit(
        &self,
        page: &str,
        user_agent: Option<&str>,
        ip: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO site_visits (id, page, user_agent, ip) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(page)
        .bind(user_agent)
        .bind(ip)
        .execute(&self.pool)
        .await
        .context("Failed to record visit")?;

        log::debug!("Recorded visit for page {}", page);
        Ok(())
    }

    async fn last_visit(&self, page: &str) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT created_at FROM site_visits WHERE page = $1 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(page)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up last visit")?;

        Ok(row.map(|r| r.0))
    }
}

/// Create a visit store backend based on configuration
///
/// `VISIT_STORE_BACKEND` selects "memory" or "postgres" explicitly; when it is
/// unset, the presence of `DATABASE_URL` selects PostgreSQL.
pub async fn create_visit_store() -> Result<Arc<dyn VisitStore>> {
    let database_url = env::var("DATABASE_URL").ok();
    let backend = env::var("VISIT_STORE_BACKEND").unwrap_or_else(|_| {
        if database_url.is_some() {
            "postgres".to_string()
        } else {
            "memory".to_string()
        }
    });

    match backend.as_str() {
        "memory" | "in-memory" => {
            log::info!("Using in-memory visit store backend");
            Ok(Arc::new(InMemoryVisitStore::new()))
        }
        "postgres" | "postgresql" => {
            let url = database_url
                .context("DATABASE_URL is required for the postgres visit store backend")?;
            log::info!("Using PostgreSQL visit store backend");
            Ok(Arc::new(PostgresVisitStore::new(&url).await?))
        }
        other => anyhow::bail!("Unknown visit store backend: {}", other),
    }
}

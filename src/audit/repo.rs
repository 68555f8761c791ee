use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info_span, Instrument};

use super::AuditEntry;
use crate::store::PgStore;

#[async_trait]
pub trait AuditRepo: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<()>;
}

#[async_trait]
impl AuditRepo for PgStore {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let query = r"
            INSERT INTO audit_logs (id, user_id, event, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
        ";
        sqlx::query(query)
            .bind(entry.id)
            .bind(entry.user_id)
            .bind(entry.event.as_str())
            .bind(&entry.content)
            .bind(entry.created_at)
            .execute(self.pool())
            .instrument(info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.table = "audit_logs"
            ))
            .await
            .context("failed to insert audit log")?;
        Ok(())
    }
}

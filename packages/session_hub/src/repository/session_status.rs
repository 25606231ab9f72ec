use anyhow::Result;
use serde::Serialize;
use sqlx::Row;

use super::HubRepository;
use crate::tenant::TenantId;

/// Last observed liveness of a tenant's session.
///
/// Reports history only: a record saying "logged in" does not mean a live
/// client exists in this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatusRecord {
    pub tenant_id: TenantId,
    pub is_connected: bool,
    pub is_logged_in: bool,
    /// Unix seconds
    pub last_active_at: i64,
}

impl HubRepository {
    pub async fn upsert_session_status(
        &self,
        tenant: TenantId,
        is_connected: bool,
        is_logged_in: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_status (tenant_id, is_connected, is_logged_in, last_active_at)
            VALUES (?, ?, ?, unixepoch())
            ON CONFLICT(tenant_id) DO UPDATE SET
                is_connected = excluded.is_connected,
                is_logged_in = excluded.is_logged_in,
                last_active_at = excluded.last_active_at
            "#,
        )
        .bind(tenant.as_i64())
        .bind(is_connected)
        .bind(is_logged_in)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_session_status(&self, tenant: TenantId) -> Result<Option<SessionStatusRecord>> {
        let row = sqlx::query(
            "SELECT tenant_id, is_connected, is_logged_in, last_active_at FROM session_status WHERE tenant_id = ?",
        )
        .bind(tenant.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| SessionStatusRecord {
            tenant_id: TenantId::from_i64(r.get("tenant_id")),
            is_connected: r.get("is_connected"),
            is_logged_in: r.get("is_logged_in"),
            last_active_at: r.get("last_active_at"),
        }))
    }

    pub async fn count_session_statuses(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM session_status")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

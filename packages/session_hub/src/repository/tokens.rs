use anyhow::Result;

use super::HubRepository;
use crate::tenant::TenantId;

impl HubRepository {
    /// Store the hash of a freshly minted token for `tenant`
    pub async fn insert_api_token(
        &self,
        token_hash: &str,
        tenant: TenantId,
        label: Option<&str>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO api_tokens (token_hash, tenant_id, label) VALUES (?, ?, ?)")
            .bind(token_hash)
            .bind(tenant.as_i64())
            .bind(label)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Tenant owning an unrevoked token
    pub async fn resolve_api_token(&self, token_hash: &str) -> Result<Option<TenantId>> {
        let tenant: Option<i64> = sqlx::query_scalar(
            "SELECT tenant_id FROM api_tokens WHERE token_hash = ? AND revoked = 0",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tenant.map(TenantId::from_i64))
    }

    /// Returns false when no active token had that hash
    pub async fn revoke_api_token(&self, token_hash: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE api_tokens SET revoked = 1 WHERE token_hash = ? AND revoked = 0")
                .bind(token_hash)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

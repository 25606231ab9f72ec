//! Per-tenant session map with single-flight creation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::debug;

use crate::error::SessionError;
use crate::session::Session;
use crate::tenant::TenantId;

type Slot = Arc<OnceCell<Arc<Session>>>;

/// Tenant id → live session.
///
/// The map lock is only held to insert or remove a slot. Creation runs inside
/// the slot's once-initializer, so concurrent first requests for one tenant
/// share a single initialization while other tenants proceed untouched.
#[derive(Default)]
pub struct SessionRegistry {
    slots: RwLock<HashMap<TenantId, Slot>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lookup(&self, tenant: TenantId) -> Option<Arc<Session>> {
        self.slots
            .read()
            .await
            .get(&tenant)
            .and_then(|slot| slot.get().cloned())
    }

    /// Return the tenant's session, creating it with `init` if absent.
    ///
    /// A failed `init` leaves no entry behind.
    pub async fn get_or_create<F, Fut>(
        &self,
        tenant: TenantId,
        init: F,
    ) -> Result<Arc<Session>, SessionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<Session>, SessionError>>,
    {
        if let Some(session) = self.lookup(tenant).await {
            return Ok(session);
        }

        let slot = {
            let mut slots = self.slots.write().await;
            slots
                .entry(tenant)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        match slot.get_or_try_init(init).await {
            Ok(session) => Ok(session.clone()),
            Err(e) => {
                let mut slots = self.slots.write().await;
                if slots
                    .get(&tenant)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot) && current.get().is_none())
                {
                    slots.remove(&tenant);
                }
                Err(e)
            }
        }
    }

    /// Remove the tenant's entry; idempotent
    pub async fn remove(&self, tenant: TenantId) -> Option<Arc<Session>> {
        let slot = self.slots.write().await.remove(&tenant)?;
        slot.get().cloned()
    }

    /// Remove the tenant's entry only if it still holds this exact session
    pub async fn remove_session(&self, session: &Arc<Session>) -> bool {
        let mut slots = self.slots.write().await;
        let holds_session = slots
            .get(&session.tenant())
            .and_then(|slot| slot.get())
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if holds_session {
            slots.remove(&session.tenant());
        }
        holds_session
    }

    /// Put a session back after pairing completed.
    ///
    /// Only inserts when the tenant has no entry and the session was not torn
    /// down in the meantime; an entry already holding it is left as is.
    pub async fn restore(&self, session: &Arc<Session>) -> bool {
        if session.is_torn_down() {
            return false;
        }
        let mut slots = self.slots.write().await;
        match slots.get(&session.tenant()) {
            Some(_) => false,
            None => {
                debug!(tenant = %session.tenant(), "Restoring session into registry");
                slots.insert(
                    session.tenant(),
                    Arc::new(OnceCell::from(session.clone())),
                );
                true
            }
        }
    }

    /// Number of initialized sessions
    pub async fn len(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Snapshot of tenants with an initialized session, sorted
    pub async fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = self
            .slots
            .read()
            .await
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(tenant, _)| *tenant)
            .collect();
        tenants.sort();
        tenants
    }
}

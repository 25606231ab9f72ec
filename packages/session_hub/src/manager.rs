//! Session lifecycle: creating, pairing, connecting and tearing down tenant
//! sessions, and reporting their status.

use messaging_client::{ContactInfo, MessagingNetwork};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionsConfig;
use crate::error::SessionError;
use crate::events::{install_handler, run_event_loop};
use crate::metrics::HubMetrics;
use crate::pairing::{PairingCode, PairingOutcome, PairingStep, PairingStream};
use crate::registry::SessionRegistry;
use crate::repository::HubRepository;
use crate::session::{EventQueue, PhaseEvent, Session};
use crate::tenant::TenantId;

/// What `current_status` reports for a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    ConnectedAndLoggedIn,
    LoggedInNotMarkedConnected,
    LoggedInTransportDown,
    ConnectedNotLoggedIn,
    SessionDisconnected,
    NotInitialized,
    LoggedInSessionExpired,
    PreviousSessionExpired,
}

impl SessionStatus {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectedAndLoggedIn => "connected_and_logged_in",
            Self::LoggedInNotMarkedConnected => "logged_in_not_marked_connected",
            Self::LoggedInTransportDown => "logged_in_transport_down",
            Self::ConnectedNotLoggedIn => "connected_not_logged_in",
            Self::SessionDisconnected => "session_disconnected",
            Self::NotInitialized => "not_initialized",
            Self::LoggedInSessionExpired => "logged_in_session_expired",
            Self::PreviousSessionExpired => "previous_session_expired",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ConnectedAndLoggedIn => "Connected and logged in",
            Self::LoggedInNotMarkedConnected => "Logged in but session not marked as connected",
            Self::LoggedInTransportDown => "Logged in but websocket disconnected",
            Self::ConnectedNotLoggedIn => "Connected but not logged in",
            Self::SessionDisconnected => "Session exists but disconnected",
            Self::NotInitialized => "Not initialized",
            Self::LoggedInSessionExpired => "Logged in but session expired (restart needed)",
            Self::PreviousSessionExpired => "Previous session existed but expired",
        }
    }
}

/// Answer to a connection check; the phone number is echoed, not looked up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionCheck {
    pub phone_number: String,
    pub connected: bool,
}

#[derive(Clone)]
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    network: Arc<dyn MessagingNetwork>,
    repository: HubRepository,
    pub(crate) metrics: Arc<HubMetrics>,
    pub(crate) config: Arc<SessionsConfig>,
}

impl SessionManager {
    pub fn new(
        network: Arc<dyn MessagingNetwork>,
        repository: HubRepository,
        metrics: Arc<HubMetrics>,
        config: SessionsConfig,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            network,
            repository,
            metrics,
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Build a session for `tenant`: store, device, client, handler, event loop.
    ///
    /// Nothing is left running if any step fails.
    async fn initialize(&self, tenant: TenantId) -> Result<Arc<Session>, SessionError> {
        let label = tenant.store_label();
        let cancel = CancellationToken::new();

        let store = self
            .network
            .open_store(&label, cancel.clone())
            .await
            .map_err(SessionError::Initialization)?;
        let device = match store.first_device().await {
            Ok(device) => device,
            Err(e) => {
                if let Err(close_err) = store.close().await {
                    debug!(tenant = %tenant, "Closing store after failed init: {}", close_err);
                }
                cancel.cancel();
                return Err(SessionError::Initialization(e));
            }
        };
        let client = self.network.new_client(&label, device);

        let (queue, rx) = EventQueue::new(self.config.event_queue_capacity);
        let session = Arc::new(Session::new(tenant, client, store, queue, cancel.clone()));
        install_handler(&session, self.metrics.clone());
        tokio::spawn(run_event_loop(tenant, rx, cancel, self.metrics.clone()));

        self.metrics.session_created();
        self.record_status(tenant, false, false).await;
        info!(tenant = %tenant, "Session initialized");
        Ok(session)
    }

    /// Start (or report on) pairing for `tenant`, creating its session if needed
    pub async fn request_pairing_code(
        &self,
        tenant: TenantId,
    ) -> Result<PairingOutcome, SessionError> {
        if let Some(existing) = self.registry.lookup(tenant).await {
            if existing.authenticated() {
                return Ok(PairingOutcome::AlreadyAuthenticated);
            }
            if existing.pairing_in_flight() {
                return Ok(PairingOutcome::InProgress);
            }
        }

        let session = self
            .registry
            .get_or_create(tenant, || self.initialize(tenant))
            .await?;
        if session.authenticated() {
            return Ok(PairingOutcome::AlreadyAuthenticated);
        }
        if !session.claim_pairing() {
            return Ok(PairingOutcome::InProgress);
        }

        // The channel must exist before connect or the first code is lost
        let rx = match session.client().pairing_channel().await {
            Ok(rx) => rx,
            Err(e) => {
                self.metrics.pairing_failed();
                self.teardown(&session).await;
                return Err(SessionError::Pairing {
                    detail: e.to_string(),
                });
            }
        };
        let mut stream = PairingStream::new(rx);

        if let Err(e) = session.client().connect().await {
            self.metrics.pairing_failed();
            self.teardown(&session).await;
            return Err(SessionError::ConnectFailed(e));
        }

        match stream.next_outcome().await {
            Ok(PairingStep::Code { code, timeout }) => {
                self.code_issued(&session, &code);
                self.record_status(tenant, true, false).await;

                let manager = self.clone();
                let watched = session.clone();
                tokio::spawn(async move { manager.watch_pairing(watched, stream).await });

                Ok(PairingOutcome::CodeIssued(PairingCode::new(code, timeout)))
            }
            Ok(PairingStep::Success) => {
                self.complete_pairing(&session).await;
                Ok(PairingOutcome::Paired)
            }
            Err(e) => {
                warn!(tenant = %tenant, "Pairing failed before a code was issued: {}", e);
                self.metrics.pairing_failed();
                self.teardown(&session).await;
                Err(e)
            }
        }
    }

    fn code_issued(&self, session: &Session, code: &str) {
        session.apply(PhaseEvent::CodeIssued);
        session.set_pairing_code(Some(code.to_string()));
        self.metrics.pairing_code_issued();
        debug!(tenant = %session.tenant(), "Pairing code issued");
    }

    /// Follow the pairing stream after the first code went out
    async fn watch_pairing(&self, session: Arc<Session>, mut stream: PairingStream) {
        let cancel = session.cancel_token().clone();
        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                step = stream.next_outcome() => step,
            };
            match step {
                Ok(PairingStep::Code { code, .. }) => self.code_issued(&session, &code),
                Ok(PairingStep::Success) => {
                    self.complete_pairing(&session).await;
                    return;
                }
                Err(e) => {
                    warn!(tenant = %session.tenant(), "Pairing failed: {}", e);
                    self.metrics.pairing_failed();
                    session.apply(PhaseEvent::PairingAbandoned);
                    self.teardown(&session).await;
                    return;
                }
            }
        }
    }

    async fn complete_pairing(&self, session: &Arc<Session>) {
        if session.is_torn_down() {
            debug!(tenant = %session.tenant(), "Pairing finished on a torn-down session");
            return;
        }
        session.set_pairing_code(None);
        self.metrics.pairing_completed();
        self.registry.restore(session).await;
        session.apply(PhaseEvent::Paired);
        // a disconnect may have landed since the first check; its row wins
        if session.is_torn_down() {
            debug!(tenant = %session.tenant(), "Session torn down while pairing completed");
            return;
        }
        self.record_status(session.tenant(), true, true).await;
        info!(tenant = %session.tenant(), "Pairing completed");
    }

    /// Bring an authenticated session's transport up and mark it connected
    pub async fn connect(&self, tenant: TenantId) -> Result<(), SessionError> {
        let session = self
            .registry
            .lookup(tenant)
            .await
            .ok_or(SessionError::NoSession)?;
        let client = session.client();

        if client.is_connected() && session.authenticated() && session.phase().is_marked_connected()
        {
            return Ok(());
        }
        if !session.authenticated() {
            return Err(SessionError::NotAuthenticated);
        }
        if !client.is_connected() {
            client.connect().await.map_err(SessionError::ConnectFailed)?;
        }

        session.apply(PhaseEvent::Connected);
        self.record_status(tenant, true, true).await;
        info!(tenant = %tenant, "Session connected");
        Ok(())
    }

    /// Tear down the tenant's session, if any, and record it as offline
    pub async fn disconnect(&self, tenant: TenantId) -> Result<(), SessionError> {
        if let Some(session) = self.registry.lookup(tenant).await {
            self.teardown(&session).await;
        }
        self.record_status(tenant, false, false).await;
        Ok(())
    }

    pub async fn is_connected(&self, tenant: TenantId, phone_number: &str) -> ConnectionCheck {
        let connected = match self.registry.lookup(tenant).await {
            Some(session) => session.client().is_connected() && session.authenticated(),
            None => false,
        };
        ConnectionCheck {
            phone_number: phone_number.to_string(),
            connected,
        }
    }

    /// Live status when a session exists, otherwise what the durable record says
    pub async fn current_status(&self, tenant: TenantId) -> Result<SessionStatus, SessionError> {
        if let Some(session) = self.registry.lookup(tenant).await {
            let identity = session.authenticated();
            let transport = session.client().is_connected();
            let marked = session.phase().is_marked_connected();

            let (status, connected, logged_in) = match (identity, transport) {
                (true, true) if marked => (SessionStatus::ConnectedAndLoggedIn, true, true),
                (true, true) => (SessionStatus::LoggedInNotMarkedConnected, true, true),
                (true, false) => (SessionStatus::LoggedInTransportDown, false, true),
                (false, true) => (SessionStatus::ConnectedNotLoggedIn, true, false),
                (false, false) => (SessionStatus::SessionDisconnected, false, false),
            };
            self.record_status(tenant, connected, logged_in).await;
            return Ok(status);
        }

        let status = match self.repository.get_session_status(tenant).await? {
            None => SessionStatus::NotInitialized,
            Some(record) if record.is_logged_in => SessionStatus::LoggedInSessionExpired,
            Some(record) if record.is_connected => SessionStatus::PreviousSessionExpired,
            Some(_) => SessionStatus::NotInitialized,
        };
        Ok(status)
    }

    pub async fn list_contacts(&self, tenant: TenantId) -> Result<Vec<ContactInfo>, SessionError> {
        let session = self.ensure_ready(tenant).await?;
        session
            .client()
            .contacts()
            .await
            .map_err(SessionError::ContactsFailed)
    }

    /// Fetch a session that can send right now.
    ///
    /// Checks run in a fixed order and the first failing one decides the error.
    pub(crate) async fn ensure_ready(&self, tenant: TenantId) -> Result<Arc<Session>, SessionError> {
        let session = self
            .registry
            .lookup(tenant)
            .await
            .ok_or(SessionError::NotConnected)?;
        if !session.authenticated() {
            return Err(SessionError::NotAuthenticated);
        }
        if !session.client().is_connected() {
            return Err(SessionError::TransportDown);
        }
        if !session.phase().is_marked_connected() {
            return Err(SessionError::SessionNotMarkedConnected);
        }
        Ok(session)
    }

    /// Release everything a session holds.
    ///
    /// Only the first caller does the work; later callers just make sure the
    /// registry no longer points at it.
    pub(crate) async fn teardown(&self, session: &Arc<Session>) {
        let first = session.begin_teardown();
        self.registry.remove_session(session).await;
        if !first {
            return;
        }

        session.cancel_token().cancel();
        session.queue().close();
        if let Some(id) = session.take_handler_id() {
            session.client().remove_event_handler(id);
        }
        session.client().disconnect();
        if let Err(e) = session.store().close().await {
            debug!(tenant = %session.tenant(), "Credential store close failed: {}", e);
        }
        session.set_pairing_code(None);

        self.metrics.session_torn_down();
        info!(
            tenant = %session.tenant(),
            dropped = session.queue().dropped(),
            age_secs = (chrono::Utc::now() - session.created_at()).num_seconds(),
            "Session torn down"
        );
    }

    /// Tear down every session; used on server shutdown
    pub async fn shutdown_all(&self) {
        let tenants = self.registry.tenants().await;
        if !tenants.is_empty() {
            info!("Shutting down {} session(s)", tenants.len());
        }
        for tenant in tenants {
            if let Some(session) = self.registry.remove(tenant).await {
                self.teardown(&session).await;
            }
        }
    }

    /// (registered, connected) session counts for health reporting
    pub async fn session_counts(&self) -> (u64, u64) {
        let mut registered = 0;
        let mut connected = 0;
        for tenant in self.registry.tenants().await {
            if let Some(session) = self.registry.lookup(tenant).await {
                registered += 1;
                if session.phase().is_marked_connected() && session.client().is_connected() {
                    connected += 1;
                }
            }
        }
        (registered, connected)
    }

    async fn record_status(&self, tenant: TenantId, connected: bool, logged_in: bool) {
        if let Err(e) = self
            .repository
            .upsert_session_status(tenant, connected, logged_in)
            .await
        {
            warn!(tenant = %tenant, "Failed to record session status: {:#}", e);
        }
    }
}

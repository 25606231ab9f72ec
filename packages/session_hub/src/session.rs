//! A tenant's live session: the client it owns, its phase, its inbound queue.

use messaging_client::{CredentialStore, MessageEvent, MessagingClient};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::tenant::TenantId;

/// Where a session stands in the pairing/connection lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SessionPhase {
    /// No identity and no pairing code issued yet
    Unpaired,
    /// A pairing code was handed out and not yet scanned
    CodeIssued,
    /// The device holds an identity; `connected` is the session's own mark
    Authenticated { connected: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseEvent {
    CodeIssued,
    Paired,
    /// Applied only after the client reported an identity
    Connected,
    /// Clears the connected mark while keeping the identity
    #[cfg(test)]
    Unmarked,
    PairingAbandoned,
}

impl SessionPhase {
    pub fn apply(self, event: PhaseEvent) -> SessionPhase {
        use SessionPhase::*;
        match (self, event) {
            (_, PhaseEvent::Paired | PhaseEvent::Connected) => Authenticated { connected: true },
            (Unpaired | CodeIssued, PhaseEvent::CodeIssued) => CodeIssued,
            #[cfg(test)]
            (Authenticated { .. }, PhaseEvent::Unmarked) => Authenticated { connected: false },
            (CodeIssued, PhaseEvent::PairingAbandoned) => Unpaired,
            (phase, _) => phase,
        }
    }

    pub fn is_marked_connected(&self) -> bool {
        matches!(self, SessionPhase::Authenticated { connected: true })
    }
}

/// Result of offering an event to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Queued,
    /// Queue full, event dropped
    Dropped,
    /// Queue closed by teardown
    Closed,
}

/// Bounded producer side of a session's inbound queue.
///
/// Producers never block: a full queue drops the event, a closed queue
/// ignores it.
pub struct EventQueue {
    tx: Mutex<Option<mpsc::Sender<MessageEvent>>>,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MessageEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Mutex::new(Some(tx)),
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn offer(&self, event: MessageEvent) -> Offer {
        if self.closed.load(Ordering::Acquire) {
            return Offer::Closed;
        }
        let guard = lock(&self.tx);
        let Some(tx) = guard.as_ref() else {
            return Offer::Closed;
        };
        match tx.try_send(event) {
            Ok(()) => Offer::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Offer::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    /// Close the queue; idempotent
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        lock(&self.tx).take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct Session {
    tenant: TenantId,
    client: Arc<dyn MessagingClient>,
    store: Arc<dyn CredentialStore>,
    phase: Mutex<SessionPhase>,
    queue: EventQueue,
    cancel: CancellationToken,
    handler_id: AtomicU32,
    pairing_claimed: AtomicBool,
    pairing_code: Mutex<Option<String>>,
    torn_down: AtomicBool,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl Session {
    pub fn new(
        tenant: TenantId,
        client: Arc<dyn MessagingClient>,
        store: Arc<dyn CredentialStore>,
        queue: EventQueue,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tenant,
            client,
            store,
            phase: Mutex::new(SessionPhase::Unpaired),
            queue,
            cancel,
            handler_id: AtomicU32::new(0),
            pairing_claimed: AtomicBool::new(false),
            pairing_code: Mutex::new(None),
            torn_down: AtomicBool::new(false),
            created_at: chrono::Utc::now(),
        }
    }

    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    pub fn client(&self) -> &Arc<dyn MessagingClient> {
        &self.client
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.created_at
    }

    pub fn phase(&self) -> SessionPhase {
        *lock(&self.phase)
    }

    /// Apply a transition and return the new phase
    pub fn apply(&self, event: PhaseEvent) -> SessionPhase {
        let mut phase = lock(&self.phase);
        *phase = phase.apply(event);
        *phase
    }

    pub fn authenticated(&self) -> bool {
        self.client.has_identity()
    }

    pub(crate) fn set_handler_id(&self, id: u32) {
        self.handler_id.store(id, Ordering::SeqCst);
    }

    pub(crate) fn take_handler_id(&self) -> Option<u32> {
        match self.handler_id.swap(0, Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    /// First caller wins the right to run pairing on this session
    pub(crate) fn claim_pairing(&self) -> bool {
        !self.pairing_claimed.swap(true, Ordering::SeqCst)
    }

    pub fn pairing_in_flight(&self) -> bool {
        self.pairing_claimed.load(Ordering::SeqCst) && !self.client.has_identity()
    }

    pub(crate) fn set_pairing_code(&self, code: Option<String>) {
        *lock(&self.pairing_code) = code;
    }

    pub fn pairing_code(&self) -> Option<String> {
        lock(&self.pairing_code).clone()
    }

    /// Marks the session as torn down; true only for the first caller
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::SeqCst)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("tenant", &self.tenant)
            .field("phase", &self.phase())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

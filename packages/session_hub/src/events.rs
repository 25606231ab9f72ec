//! Inbound event handling: the client callback feeding a session's queue and
//! the per-session loop draining it.

use messaging_client::{ClientEvent, Message, MessageEvent};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::HubMetrics;
use crate::session::{Offer, Session};
use crate::tenant::TenantId;

/// Shown in place of content the hub cannot render as text
pub const UNSUPPORTED_CONTENT: &str = "[Media or unsupported message type]";

/// Best-effort text of an inbound message
pub fn message_text(message: Option<&Message>) -> String {
    match message {
        Some(m) if !m.conversation().is_empty() => m.conversation().to_string(),
        Some(m) => match m.extended_text() {
            Some(ext) => ext.text.clone(),
            None => UNSUPPORTED_CONTENT.to_string(),
        },
        None => UNSUPPORTED_CONTENT.to_string(),
    }
}

/// Register the session's event handler on its client.
///
/// The handler only holds a weak reference, so the client never keeps its
/// own session alive.
pub fn install_handler(session: &Arc<Session>, metrics: Arc<HubMetrics>) {
    let weak: Weak<Session> = Arc::downgrade(session);
    let id = session.client().add_event_handler(Box::new(move |event| {
        if let Some(session) = weak.upgrade() {
            handle_client_event(&session, event, &metrics);
        }
    }));
    session.set_handler_id(id);
}

fn handle_client_event(session: &Session, event: ClientEvent, metrics: &HubMetrics) {
    let tenant = session.tenant();
    match event {
        ClientEvent::Message(message) => match session.queue().offer(message) {
            Offer::Queued => {}
            Offer::Dropped => {
                metrics.inbound_dropped();
                warn!(tenant = %tenant, "Inbound queue full, dropping message");
            }
            Offer::Closed => debug!(tenant = %tenant, "Inbound message after teardown ignored"),
        },
        ClientEvent::Receipt(receipt) => {
            debug!(
                tenant = %tenant,
                chat = %receipt.chat,
                kind = ?receipt.kind,
                "Message receipt for {:?}",
                receipt.message_ids
            );
        }
        ClientEvent::Connected => debug!(tenant = %tenant, "Transport connected"),
        ClientEvent::Disconnected => {
            info!(tenant = %tenant, phase = ?session.phase(), "Transport disconnected");
        }
        ClientEvent::PairSuccess { id } => info!(tenant = %tenant, device = %id, "Device paired"),
        ClientEvent::LoggedOut { reason } => {
            warn!(tenant = %tenant, "Logged out by the network: {}", reason);
        }
    }
}

fn log_message(tenant: TenantId, event: &MessageEvent) {
    let text = message_text(event.message.as_ref());
    info!(
        tenant = %tenant,
        from = %event.info.source_string(),
        timestamp = %event.info.timestamp.to_rfc3339(),
        "Message received: {}",
        text
    );
}

/// Drain a session's inbound queue until cancelled.
///
/// Cancellation is checked before every read, so once it fires no further
/// events are handled even if some are still queued.
pub async fn run_event_loop(
    tenant: TenantId,
    mut rx: mpsc::Receiver<MessageEvent>,
    cancel: CancellationToken,
    metrics: Arc<HubMetrics>,
) {
    debug!(tenant = %tenant, "Event loop started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => {
                    log_message(tenant, &event);
                    metrics.inbound_processed();
                }
                None => break,
            },
        }
    }
    debug!(tenant = %tenant, "Event loop stopped");
}

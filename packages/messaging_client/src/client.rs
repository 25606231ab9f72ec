use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::types::{
    ClientEvent, ContactInfo, Jid, MediaType, Message, PairingEvent, SendResponse, UploadResponse,
};

/// Callback invoked synchronously for every event a client reports.
///
/// Handlers run on the client's own task and must not block.
pub type EventHandler = Box<dyn Fn(ClientEvent) + Send + Sync>;

/// Entry point of a messaging-network implementation
#[async_trait]
pub trait MessagingNetwork: Send + Sync {
    /// Open a fresh ephemeral credential store.
    ///
    /// The store lives until `close` is called or `scope` is cancelled.
    async fn open_store(
        &self,
        label: &str,
        scope: CancellationToken,
    ) -> Result<Arc<dyn CredentialStore>, ClientError>;

    /// Build a client bound to a device identity
    fn new_client(&self, label: &str, device: Arc<dyn DeviceStore>) -> Arc<dyn MessagingClient>;
}

/// Holds device identities for one or more accounts
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Return the first stored device, creating an unpaired one if none exists
    async fn first_device(&self) -> Result<Arc<dyn DeviceStore>, ClientError>;

    /// Release the store; later calls fail with `StoreClosed`
    async fn close(&self) -> Result<(), ClientError>;
}

/// A single device identity inside a credential store
pub trait DeviceStore: Send + Sync {
    /// Paired identity, `None` until pairing succeeds
    fn id(&self) -> Option<Jid>;

    fn set_id(&self, id: Option<Jid>);
}

/// Connection to the messaging network on behalf of one device
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Register an event handler, returning its handle
    fn add_event_handler(&self, handler: EventHandler) -> u32;

    fn remove_event_handler(&self, id: u32) -> bool;

    /// Open the transport
    async fn connect(&self) -> Result<(), ClientError>;

    /// Close the transport; a no-op when already closed
    fn disconnect(&self);

    /// Whether the transport is currently open
    fn is_connected(&self) -> bool;

    /// Whether the device store holds a paired identity
    fn has_identity(&self) -> bool;

    /// Subscribe to pairing events.
    ///
    /// Must be called before `connect`; the channel closes after a terminal event.
    async fn pairing_channel(&self) -> Result<mpsc::Receiver<PairingEvent>, ClientError>;

    async fn send_message(&self, to: &Jid, message: Message) -> Result<SendResponse, ClientError>;

    async fn upload(
        &self,
        data: &[u8],
        media_type: MediaType,
    ) -> Result<UploadResponse, ClientError>;

    async fn contacts(&self) -> Result<Vec<ContactInfo>, ClientError>;
}

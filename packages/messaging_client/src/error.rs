/// Errors surfaced by a messaging-network client or its credential store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Credential store could not be opened
    #[error("failed to open credential store: {0}")]
    StoreOpen(String),
    /// Credential store was closed (or its scope cancelled)
    #[error("credential store is closed")]
    StoreClosed,
    /// Operation needs an open transport
    #[error("websocket not connected")]
    NotConnected,
    /// Operation needs a paired device identity
    #[error("not logged in")]
    NotLoggedIn,
    /// Pairing channel requested for a store that already holds an identity
    #[error("store already contains a device identity")]
    AlreadyLoggedIn,
    /// Pairing channel requested after the transport was opened
    #[error("pairing channel must be requested before connecting")]
    AlreadyConnected,
    /// Transport could not be established
    #[error("connect failed: {0}")]
    Connect(String),
    /// Message was rejected by the network
    #[error("send failed: {0}")]
    Send(String),
    /// Media upload was rejected
    #[error("upload failed: {0}")]
    Upload(String),
    /// Contact store could not be read
    #[error("contact lookup failed: {0}")]
    Contacts(String),
}

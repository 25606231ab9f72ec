//! Messaging Client - boundary to the messaging network
//!
//! This crate defines the traits a session hub talks to (credential stores,
//! device identities, clients) and ships an in-process [`sandbox`] network that
//! implements them. It has no HTTP dependencies and knows nothing about tenants.
//!
//! # Example
//!
//! ```no_run
//! use messaging_client::sandbox::SandboxNetwork;
//! use messaging_client::{Jid, Message, MessagingNetwork, PairingEvent};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let network = SandboxNetwork::default();
//!
//!     let store = network.open_store("demo", CancellationToken::new()).await.unwrap();
//!     let device = store.first_device().await.unwrap();
//!     let client = network.new_client("demo", device);
//!
//!     // Pairing events must be requested before connecting
//!     let mut pairing = client.pairing_channel().await.unwrap();
//!     client.connect().await.unwrap();
//!
//!     while let Some(event) = pairing.recv().await {
//!         match event {
//!             PairingEvent::Code { code, .. } => println!("scan: {}", code),
//!             PairingEvent::Success => break,
//!             other => println!("pairing: {:?}", other),
//!         }
//!     }
//!
//!     let to = Jid::user("15551234567");
//!     let resp = client.send_message(&to, Message::text("hello")).await.unwrap();
//!     println!("sent {} at {}", resp.id, resp.timestamp);
//! }
//! ```

mod client;
mod error;
pub mod sandbox;
mod types;

pub use client::{CredentialStore, DeviceStore, EventHandler, MessagingClient, MessagingNetwork};
pub use error::ClientError;
pub use types::{
    AudioMessage, ClientEvent, ContactInfo, DEFAULT_USER_SERVER, DocumentMessage,
    ExtendedTextMessage, GROUP_SERVER, ImageMessage, Jid, MediaType, Message, MessageEvent,
    MessageInfo, PairingEvent, Receipt, ReceiptKind, SendResponse, UploadResponse, VideoMessage,
};

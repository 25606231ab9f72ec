//! In-process stand-in for the messaging network.
//!
//! Behaves like the real library at the trait boundary: unpaired clients get a
//! pairing code on connect, pairing completes asynchronously (`scan`), uploads
//! return key material, sends are acknowledged with an id and timestamp. Tests
//! and operators drive it through the inherent methods on [`SandboxNetwork`]
//! and [`SandboxClient`].

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{CredentialStore, DeviceStore, EventHandler, MessagingClient, MessagingNetwork};
use crate::error::ClientError;
use crate::types::{
    ClientEvent, ContactInfo, Jid, MediaType, Message, MessageEvent, PairingEvent, Receipt,
    SendResponse, UploadResponse,
};

/// Pairing events buffered per channel; scripted pairings must fit
const PAIRING_CHANNEL_CAPACITY: usize = 8;

#[derive(Clone, Debug)]
pub struct SandboxConfig {
    /// How long an issued pairing code stays valid before `Timeout` is emitted
    pub pairing_code_ttl: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            pairing_code_ttl: Duration::from_secs(60),
        }
    }
}

struct NetworkInner {
    config: SandboxConfig,
    clients: Mutex<HashMap<String, Weak<SandboxClient>>>,
    pairing_scripts: Mutex<HashMap<String, Vec<PairingEvent>>>,
    failing_stores: Mutex<HashSet<String>>,
    stores_opened: AtomicU64,
    clients_created: AtomicU64,
}

/// Sandbox network; cheap to clone, all clones share state
#[derive(Clone)]
pub struct SandboxNetwork {
    inner: Arc<NetworkInner>,
}

impl Default for SandboxNetwork {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

impl SandboxNetwork {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                config,
                clients: Mutex::new(HashMap::new()),
                pairing_scripts: Mutex::new(HashMap::new()),
                failing_stores: Mutex::new(HashSet::new()),
                stores_opened: AtomicU64::new(0),
                clients_created: AtomicU64::new(0),
            }),
        }
    }

    /// Replace the default pairing flow of the next client created for `label`.
    ///
    /// The events are emitted in order on connect and the channel is then closed.
    /// `Success` also pairs the device.
    pub fn script_pairing(&self, label: &str, events: Vec<PairingEvent>) {
        lock(&self.inner.pairing_scripts).insert(label.to_string(), events);
    }

    /// Make the next `open_store` for `label` fail
    pub fn fail_next_store(&self, label: &str) {
        lock(&self.inner.failing_stores).insert(label.to_string());
    }

    /// Live client for `label`, if one was created and is still referenced
    pub fn client(&self, label: &str) -> Option<Arc<SandboxClient>> {
        lock(&self.inner.clients).get(label).and_then(Weak::upgrade)
    }

    pub fn stores_opened(&self) -> u64 {
        self.inner.stores_opened.load(Ordering::Relaxed)
    }

    pub fn clients_created(&self) -> u64 {
        self.inner.clients_created.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessagingNetwork for SandboxNetwork {
    async fn open_store(
        &self,
        label: &str,
        scope: CancellationToken,
    ) -> Result<Arc<dyn CredentialStore>, ClientError> {
        if lock(&self.inner.failing_stores).remove(label) {
            warn!("Sandbox refusing to open store for '{}'", label);
            return Err(ClientError::StoreOpen(format!(
                "sandbox store for '{}' is unavailable",
                label
            )));
        }
        self.inner.stores_opened.fetch_add(1, Ordering::Relaxed);
        debug!("Opened sandbox store for '{}'", label);
        Ok(Arc::new(SandboxStore {
            device: Mutex::new(None),
            closed: AtomicBool::new(false),
            scope,
        }))
    }

    fn new_client(&self, label: &str, device: Arc<dyn DeviceStore>) -> Arc<dyn MessagingClient> {
        let script = lock(&self.inner.pairing_scripts).remove(label);
        let client = Arc::new(SandboxClient {
            label: label.to_string(),
            device,
            config: self.inner.config.clone(),
            connected: AtomicBool::new(false),
            handlers: Mutex::new(Vec::new()),
            next_handler_id: AtomicU32::new(1),
            pairing: Arc::new(Mutex::new(None)),
            pairing_generation: Arc::new(AtomicU64::new(0)),
            script: Mutex::new(script),
            sent: Mutex::new(Vec::new()),
            contacts: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
            connect_calls: AtomicU64::new(0),
            send_calls: AtomicU64::new(0),
            upload_calls: AtomicU64::new(0),
        });
        self.inner.clients_created.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.clients).insert(label.to_string(), Arc::downgrade(&client));
        client
    }
}

/// Ephemeral store holding at most one device
pub struct SandboxStore {
    device: Mutex<Option<Arc<SandboxDevice>>>,
    closed: AtomicBool,
    scope: CancellationToken,
}

#[async_trait]
impl CredentialStore for SandboxStore {
    async fn first_device(&self) -> Result<Arc<dyn DeviceStore>, ClientError> {
        if self.closed.load(Ordering::SeqCst) || self.scope.is_cancelled() {
            return Err(ClientError::StoreClosed);
        }
        let mut device = lock(&self.device);
        let device = device.get_or_insert_with(|| Arc::new(SandboxDevice::default()));
        Ok(device.clone())
    }

    async fn close(&self) -> Result<(), ClientError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(device) = lock(&self.device).take() {
            device.set_id(None);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct SandboxDevice {
    id: Mutex<Option<Jid>>,
}

impl DeviceStore for SandboxDevice {
    fn id(&self) -> Option<Jid> {
        lock(&self.id).clone()
    }

    fn set_id(&self, id: Option<Jid>) {
        *lock(&self.id) = id;
    }
}

#[derive(Default)]
struct Faults {
    connect: Option<String>,
    send: Option<String>,
    upload: Option<String>,
    contacts: Option<String>,
}

type PairingSlot = Arc<Mutex<Option<mpsc::Sender<PairingEvent>>>>;

pub struct SandboxClient {
    label: String,
    device: Arc<dyn DeviceStore>,
    config: SandboxConfig,
    connected: AtomicBool,
    handlers: Mutex<Vec<(u32, Arc<dyn Fn(ClientEvent) + Send + Sync>)>>,
    next_handler_id: AtomicU32,
    pairing: PairingSlot,
    pairing_generation: Arc<AtomicU64>,
    script: Mutex<Option<Vec<PairingEvent>>>,
    sent: Mutex<Vec<(Jid, Message)>>,
    contacts: Mutex<Vec<ContactInfo>>,
    faults: Mutex<Faults>,
    connect_calls: AtomicU64,
    send_calls: AtomicU64,
    upload_calls: AtomicU64,
}

impl SandboxClient {
    fn emit(&self, event: ClientEvent) {
        let handlers: Vec<_> = lock(&self.handlers)
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(event.clone());
        }
    }

    fn pair_device(&self) -> Jid {
        let id = Jid::user(format!("1555{:07}", rand::random_range(0..10_000_000u32)));
        self.device.set_id(Some(id.clone()));
        info!("Sandbox device for '{}' paired as {}", self.label, id);
        self.emit(ClientEvent::PairSuccess { id: id.clone() });
        id
    }

    /// Simulate the user scanning the current pairing code
    pub fn scan(&self) -> Result<Jid, ClientError> {
        if self.device.id().is_some() {
            return Err(ClientError::AlreadyLoggedIn);
        }
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let sender = lock(&self.pairing).take();
        let id = self.pair_device();
        if let Some(tx) = sender {
            let _ = tx.try_send(PairingEvent::Success);
        }
        Ok(id)
    }

    /// Simulate the network dropping the socket
    pub fn drop_transport(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!("Sandbox transport for '{}' dropped", self.label);
            self.emit(ClientEvent::Disconnected);
        }
    }

    pub fn deliver(&self, event: MessageEvent) {
        self.emit(ClientEvent::Message(event));
    }

    pub fn deliver_receipt(&self, receipt: Receipt) {
        self.emit(ClientEvent::Receipt(receipt));
    }

    pub fn set_contacts(&self, contacts: Vec<ContactInfo>) {
        *lock(&self.contacts) = contacts;
    }

    pub fn fail_next_connect(&self, reason: &str) {
        lock(&self.faults).connect = Some(reason.to_string());
    }

    pub fn fail_next_send(&self, reason: &str) {
        lock(&self.faults).send = Some(reason.to_string());
    }

    pub fn fail_next_upload(&self, reason: &str) {
        lock(&self.faults).upload = Some(reason.to_string());
    }

    pub fn fail_next_contacts(&self, reason: &str) {
        lock(&self.faults).contacts = Some(reason.to_string());
    }

    pub fn sent_messages(&self) -> Vec<(Jid, Message)> {
        lock(&self.sent).clone()
    }

    pub fn connect_calls(&self) -> u64 {
        self.connect_calls.load(Ordering::Relaxed)
    }

    pub fn send_calls(&self) -> u64 {
        self.send_calls.load(Ordering::Relaxed)
    }

    pub fn upload_calls(&self) -> u64 {
        self.upload_calls.load(Ordering::Relaxed)
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.handlers).len()
    }

    fn start_pairing(&self) {
        if let Some(script) = lock(&self.script).take() {
            let Some(tx) = lock(&self.pairing).take() else {
                return;
            };
            for event in script {
                if event == PairingEvent::Success {
                    self.pair_device();
                }
                if tx.try_send(event).is_err() {
                    warn!("Sandbox pairing script for '{}' overflowed", self.label);
                    break;
                }
            }
            return;
        }

        let Some(tx) = lock(&self.pairing).clone() else {
            return;
        };
        let code = pairing_code();
        debug!("Sandbox issued pairing code for '{}'", self.label);
        let _ = tx.try_send(PairingEvent::Code {
            code,
            timeout: self.config.pairing_code_ttl,
        });

        let generation = self.pairing_generation.load(Ordering::SeqCst);
        let current = self.pairing_generation.clone();
        let slot = self.pairing.clone();
        let ttl = self.config.pairing_code_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            if let Some(tx) = lock(&slot).take() {
                let _ = tx.try_send(PairingEvent::Timeout);
            }
        });
    }
}

#[async_trait]
impl MessagingClient for SandboxClient {
    fn add_event_handler(&self, handler: EventHandler) -> u32 {
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.handlers).push((id, Arc::from(handler)));
        id
    }

    fn remove_event_handler(&self, id: u32) -> bool {
        let mut handlers = lock(&self.handlers);
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    async fn connect(&self) -> Result<(), ClientError> {
        self.connect_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(reason) = lock(&self.faults).connect.take() {
            return Err(ClientError::Connect(reason));
        }
        self.connected.store(true, Ordering::SeqCst);
        self.emit(ClientEvent::Connected);
        if self.device.id().is_none() {
            self.start_pairing();
        }
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.pairing_generation.fetch_add(1, Ordering::SeqCst);
        lock(&self.pairing).take();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn has_identity(&self) -> bool {
        self.device.id().is_some()
    }

    async fn pairing_channel(&self) -> Result<mpsc::Receiver<PairingEvent>, ClientError> {
        if self.has_identity() {
            return Err(ClientError::AlreadyLoggedIn);
        }
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }
        let (tx, rx) = mpsc::channel(PAIRING_CHANNEL_CAPACITY);
        self.pairing_generation.fetch_add(1, Ordering::SeqCst);
        *lock(&self.pairing) = Some(tx);
        Ok(rx)
    }

    async fn send_message(&self, to: &Jid, message: Message) -> Result<SendResponse, ClientError> {
        self.send_calls.fetch_add(1, Ordering::Relaxed);
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        if !self.has_identity() {
            return Err(ClientError::NotLoggedIn);
        }
        if let Some(reason) = lock(&self.faults).send.take() {
            return Err(ClientError::Send(reason));
        }
        debug!("Sandbox '{}' sending {} to {}", self.label, message.kind(), to);
        lock(&self.sent).push((to.clone(), message));
        Ok(SendResponse {
            id: format!("3EB0{:016X}", rand::random::<u64>()),
            timestamp: Utc::now(),
        })
    }

    async fn upload(
        &self,
        data: &[u8],
        media_type: MediaType,
    ) -> Result<UploadResponse, ClientError> {
        self.upload_calls.fetch_add(1, Ordering::Relaxed);
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        if let Some(reason) = lock(&self.faults).upload.take() {
            return Err(ClientError::Upload(reason));
        }

        let media_key: [u8; 32] = rand::random();
        let file_sha256 = Sha256::digest(data).to_vec();
        let mut enc = Sha256::new();
        enc.update(media_key);
        enc.update(data);
        let file_enc_sha256 = enc.finalize().to_vec();
        let token = hex(&file_enc_sha256[..8]);

        debug!(
            "Sandbox '{}' uploaded {} bytes of {}",
            self.label,
            data.len(),
            media_type
        );
        Ok(UploadResponse {
            url: format!("https://mmg.sandbox.invalid/{}/{}.enc", media_type, token),
            direct_path: format!("/v/t62/{}/{}.enc", media_type, token),
            media_key: media_key.to_vec(),
            file_enc_sha256,
            file_sha256,
            file_length: data.len() as u64,
        })
    }

    async fn contacts(&self) -> Result<Vec<ContactInfo>, ClientError> {
        if !self.has_identity() {
            return Err(ClientError::NotLoggedIn);
        }
        if let Some(reason) = lock(&self.faults).contacts.take() {
            return Err(ClientError::Contacts(reason));
        }
        Ok(lock(&self.contacts).clone())
    }
}

fn pairing_code() -> String {
    let ref_part: [u8; 12] = rand::random();
    let key_part: [u8; 16] = rand::random();
    format!("2@{},{}", hex(&ref_part), hex(&key_part))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Lock a std mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    async fn new_client(network: &SandboxNetwork, label: &str) -> Arc<dyn MessagingClient> {
        let store = network
            .open_store(label, CancellationToken::new())
            .await
            .unwrap();
        let device = store.first_device().await.unwrap();
        network.new_client(label, device)
    }

    #[tokio::test]
    async fn default_pairing_issues_code_then_scan_succeeds() {
        let network = SandboxNetwork::default();
        let client = new_client(&network, "t1").await;

        let mut rx = client.pairing_channel().await.unwrap();
        client.connect().await.unwrap();

        match rx.recv().await.unwrap() {
            PairingEvent::Code { code, .. } => assert!(code.starts_with("2@")),
            other => panic!("expected code, got {:?}", other),
        }
        assert!(!client.has_identity());

        let id = network.client("t1").unwrap().scan().unwrap();
        assert_eq!(rx.recv().await.unwrap(), PairingEvent::Success);
        assert!(rx.recv().await.is_none());
        assert!(client.has_identity());
        assert_eq!(id.server, crate::DEFAULT_USER_SERVER);
    }

    #[tokio::test]
    async fn pairing_code_times_out() {
        let network = SandboxNetwork::new(SandboxConfig {
            pairing_code_ttl: Duration::from_millis(20),
        });
        let client = new_client(&network, "t1").await;
        let mut rx = client.pairing_channel().await.unwrap();
        client.connect().await.unwrap();

        assert!(matches!(rx.recv().await, Some(PairingEvent::Code { .. })));
        assert_eq!(rx.recv().await, Some(PairingEvent::Timeout));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn scripted_pairing_is_replayed_then_closed() {
        let network = SandboxNetwork::default();
        network.script_pairing(
            "t1",
            vec![PairingEvent::Other("noise".into()), PairingEvent::Success],
        );
        let client = new_client(&network, "t1").await;
        let mut rx = client.pairing_channel().await.unwrap();
        client.connect().await.unwrap();

        assert_eq!(rx.recv().await, Some(PairingEvent::Other("noise".into())));
        assert_eq!(rx.recv().await, Some(PairingEvent::Success));
        assert!(rx.recv().await.is_none());
        assert!(client.has_identity());
    }

    #[tokio::test]
    async fn pairing_channel_rules() {
        let network = SandboxNetwork::default();
        network.script_pairing("t1", vec![PairingEvent::Success]);
        let client = new_client(&network, "t1").await;

        let _rx = client.pairing_channel().await.unwrap();
        client.connect().await.unwrap();
        assert_eq!(
            client.pairing_channel().await.unwrap_err(),
            ClientError::AlreadyLoggedIn
        );

        let other = new_client(&network, "t2").await;
        other.connect().await.unwrap();
        assert_eq!(
            other.pairing_channel().await.unwrap_err(),
            ClientError::AlreadyConnected
        );
    }

    #[tokio::test]
    async fn send_requires_transport_and_identity() {
        let network = SandboxNetwork::default();
        let client = new_client(&network, "t1").await;
        let to = Jid::user("15551234567");

        assert_eq!(
            client
                .send_message(&to, Message::text("hi"))
                .await
                .unwrap_err(),
            ClientError::NotConnected
        );

        client.connect().await.unwrap();
        assert_eq!(
            client
                .send_message(&to, Message::text("hi"))
                .await
                .unwrap_err(),
            ClientError::NotLoggedIn
        );

        let sandbox = network.client("t1").unwrap();
        sandbox.scan().unwrap();
        let resp = client.send_message(&to, Message::text("hi")).await.unwrap();
        assert!(resp.id.starts_with("3EB0"));
        assert_eq!(sandbox.sent_messages(), vec![(to, Message::text("hi"))]);
        assert_eq!(sandbox.send_calls(), 3);
    }

    #[tokio::test]
    async fn upload_returns_hashes_and_length() {
        let network = SandboxNetwork::default();
        let client = new_client(&network, "t1").await;
        client.connect().await.unwrap();

        let data = b"fake png bytes";
        let uploaded = client.upload(data, MediaType::Image).await.unwrap();
        assert_eq!(uploaded.file_length, data.len() as u64);
        assert_eq!(uploaded.file_sha256, Sha256::digest(data).to_vec());
        assert_eq!(uploaded.media_key.len(), 32);
        assert_eq!(uploaded.file_enc_sha256.len(), 32);
        assert!(uploaded.url.contains("/image/"));

        network.client("t1").unwrap().fail_next_upload("quota");
        assert_eq!(
            client.upload(data, MediaType::Image).await.unwrap_err(),
            ClientError::Upload("quota".into())
        );
    }

    #[tokio::test]
    async fn handlers_receive_events_until_removed() {
        let network = SandboxNetwork::default();
        let client = new_client(&network, "t1").await;
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let id = client.add_event_handler(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        client.connect().await.unwrap();
        network.client("t1").unwrap().drop_transport();
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        assert!(client.remove_event_handler(id));
        assert!(!client.remove_event_handler(id));
        client.connect().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn store_failures_and_close() {
        let network = SandboxNetwork::default();
        network.fail_next_store("t1");
        assert!(matches!(
            network.open_store("t1", CancellationToken::new()).await,
            Err(ClientError::StoreOpen(_))
        ));

        let scope = CancellationToken::new();
        let store = network.open_store("t1", scope.clone()).await.unwrap();
        let device = store.first_device().await.unwrap();
        device.set_id(Some(Jid::user("1")));
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(device.id().is_none());
        assert!(matches!(
            store.first_device().await,
            Err(ClientError::StoreClosed)
        ));

        let scoped = network.open_store("t2", scope.clone()).await.unwrap();
        scope.cancel();
        assert!(matches!(
            scoped.first_device().await,
            Err(ClientError::StoreClosed)
        ));
        assert_eq!(network.stores_opened(), 2);
    }
}

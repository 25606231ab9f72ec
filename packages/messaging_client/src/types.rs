use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Server part of an address for regular user accounts
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

/// Server part of an address for group chats
pub const GROUP_SERVER: &str = "g.us";

/// Network address of a user, group or device
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Jid {
    pub user: String,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
        }
    }

    /// Address of a regular user on the default server
    pub fn user(user: impl Into<String>) -> Self {
        Self::new(user, DEFAULT_USER_SERVER)
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            write!(f, "{}", self.server)
        } else {
            write!(f, "{}@{}", self.user, self.server)
        }
    }
}

impl FromStr for Jid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((user, server)) if !server.is_empty() => Ok(Jid::new(user, server)),
            Some(_) => Err(format!("missing server in address '{}'", s)),
            None if s.contains('.') => Ok(Jid::new("", s)),
            None => Err(format!("invalid address '{}'", s)),
        }
    }
}

/// Upload category, decides which key derivation the network applies
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Document => "document",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a media upload; every field is opaque to callers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadResponse {
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_length: u64,
}

/// Acknowledgement for an accepted outbound message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendResponse {
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtendedTextMessage {
    pub text: String,
    pub matched_text: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageMessage {
    pub url: String,
    pub mimetype: String,
    pub caption: String,
    pub file_sha256: Vec<u8>,
    pub file_length: u64,
    pub height: u32,
    pub width: u32,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VideoMessage {
    pub url: String,
    pub mimetype: String,
    pub caption: String,
    pub file_sha256: Vec<u8>,
    pub file_length: u64,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AudioMessage {
    pub url: String,
    pub mimetype: String,
    pub file_sha256: Vec<u8>,
    pub file_length: u64,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentMessage {
    pub url: String,
    pub mimetype: String,
    pub title: String,
    pub file_sha256: Vec<u8>,
    pub file_length: u64,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
}

/// Message payload as carried on the wire
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Plain text body
    Conversation(String),
    ExtendedText(ExtendedTextMessage),
    Image(ImageMessage),
    Video(VideoMessage),
    Audio(AudioMessage),
    Document(DocumentMessage),
}

impl Message {
    pub fn text(body: impl Into<String>) -> Self {
        Message::Conversation(body.into())
    }

    /// Plain conversation body, empty for any other payload
    pub fn conversation(&self) -> &str {
        match self {
            Message::Conversation(body) => body,
            _ => "",
        }
    }

    pub fn extended_text(&self) -> Option<&ExtendedTextMessage> {
        match self {
            Message::ExtendedText(ext) => Some(ext),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Conversation(_) => "conversation",
            Message::ExtendedText(_) => "extended_text",
            Message::Image(_) => "image",
            Message::Video(_) => "video",
            Message::Audio(_) => "audio",
            Message::Document(_) => "document",
        }
    }
}

/// Metadata attached to every inbound message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageInfo {
    pub id: String,
    pub chat: Jid,
    pub sender: Jid,
    pub is_from_me: bool,
    pub push_name: String,
    pub timestamp: DateTime<Utc>,
}

impl MessageInfo {
    /// Human-readable origin: `sender in chat` for groups, the chat otherwise
    pub fn source_string(&self) -> String {
        if self.sender != self.chat {
            format!("{} in {}", self.sender, self.chat)
        } else {
            self.chat.to_string()
        }
    }
}

/// An inbound message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub info: MessageInfo,
    pub message: Option<Message>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiptKind {
    Delivered,
    Read,
    Played,
}

/// Delivery/read acknowledgement for messages we sent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub chat: Jid,
    pub sender: Jid,
    pub message_ids: Vec<String>,
    pub kind: ReceiptKind,
    pub timestamp: DateTime<Utc>,
}

/// Everything a client reports through registered event handlers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    Message(MessageEvent),
    Receipt(Receipt),
    Connected,
    Disconnected,
    PairSuccess { id: Jid },
    LoggedOut { reason: String },
}

/// One item of the pairing-code stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PairingEvent {
    /// A scannable code, valid for `timeout`
    Code { code: String, timeout: Duration },
    /// The device was paired; the store now holds an identity
    Success,
    /// The last code expired without being scanned
    Timeout,
    /// The network rejected the pairing attempt
    Error(String),
    /// Any event this version does not understand
    Other(String),
}

/// Entry of the client's contact store
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContactInfo {
    pub jid: Option<Jid>,
    pub found: bool,
    pub first_name: String,
    pub full_name: String,
    pub push_name: String,
    pub business_name: String,
}

//! Outbound messages: recipient normalization, media payloads, sending.

use messaging_client::{
    AudioMessage, DocumentMessage, ImageMessage, Jid, MediaType, Message, UploadResponse,
    VideoMessage,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::SessionError;
use crate::manager::SessionManager;
use crate::tenant::TenantId;

/// Media to send, as received from the caller
#[derive(Debug, Clone, Default)]
pub struct OutboundMedia {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub caption: String,
    /// Only meaningful for images; zero means unknown
    pub height: u32,
    pub width: u32,
}

/// Acknowledgement returned to the caller for an accepted message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentMessage {
    pub message_id: String,
    /// RFC 3339, second precision
    pub timestamp: String,
    pub status: &'static str,
    /// The phone number exactly as the caller supplied it
    pub to: String,
}

/// Turn a loosely formatted phone number into a user address.
///
/// A leading `+` is dropped, then everything but digits.
pub fn normalize_phone(raw: &str, min_digits: usize, server: &str) -> Result<Jid, SessionError> {
    let trimmed = raw.trim_start();
    let number: String = trimmed
        .strip_prefix('+')
        .unwrap_or(trimmed)
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    if number.len() < min_digits {
        return Err(SessionError::InvalidPhoneNumber(raw.to_string()));
    }
    Ok(Jid::new(number, server))
}

pub fn classify_mime(mime_type: &str) -> MediaType {
    if mime_type.starts_with("image/") {
        MediaType::Image
    } else if mime_type.starts_with("video/") {
        MediaType::Video
    } else if mime_type.starts_with("audio/") {
        MediaType::Audio
    } else {
        MediaType::Document
    }
}

/// Payload for uploaded media; upload fields are copied through untouched
pub fn build_media_message(
    media_type: MediaType,
    uploaded: UploadResponse,
    media: &OutboundMedia,
) -> Message {
    let UploadResponse {
        url,
        direct_path,
        media_key,
        file_enc_sha256,
        file_sha256,
        file_length,
    } = uploaded;
    let mimetype = media.mime_type.clone();

    match media_type {
        MediaType::Image => Message::Image(ImageMessage {
            url,
            mimetype,
            caption: media.caption.clone(),
            file_sha256,
            file_length,
            height: media.height,
            width: media.width,
            direct_path,
            media_key,
            file_enc_sha256,
        }),
        MediaType::Video => Message::Video(VideoMessage {
            url,
            mimetype,
            caption: media.caption.clone(),
            file_sha256,
            file_length,
            direct_path,
            media_key,
            file_enc_sha256,
        }),
        MediaType::Audio => Message::Audio(AudioMessage {
            url,
            mimetype,
            file_sha256,
            file_length,
            direct_path,
            media_key,
            file_enc_sha256,
        }),
        MediaType::Document => Message::Document(DocumentMessage {
            url,
            mimetype,
            title: media.caption.clone(),
            file_sha256,
            file_length,
            direct_path,
            media_key,
            file_enc_sha256,
        }),
    }
}

impl SessionManager {
    fn recipient(&self, phone_number: &str) -> Result<Jid, SessionError> {
        normalize_phone(
            phone_number,
            self.config.min_phone_digits,
            &self.config.default_user_server,
        )
    }

    pub async fn send_text(
        &self,
        tenant: TenantId,
        phone_number: &str,
        body: &str,
    ) -> Result<SentMessage, SessionError> {
        let session = self.ensure_ready(tenant).await?;
        let to = self.recipient(phone_number)?;
        self.send(tenant, &session, &to, phone_number, Message::text(body))
            .await
    }

    pub async fn send_media(
        &self,
        tenant: TenantId,
        phone_number: &str,
        media: OutboundMedia,
    ) -> Result<SentMessage, SessionError> {
        let session = self.ensure_ready(tenant).await?;
        let to = self.recipient(phone_number)?;

        let media_type = classify_mime(&media.mime_type);
        let uploaded = session
            .client()
            .upload(&media.data, media_type)
            .await
            .map_err(|e| {
                warn!(tenant = %tenant, "Media upload failed: {}", e);
                self.metrics.send_failed();
                SessionError::UploadFailed(e)
            })?;
        let message = build_media_message(media_type, uploaded, &media);
        self.send(tenant, &session, &to, phone_number, message).await
    }

    async fn send(
        &self,
        tenant: TenantId,
        session: &crate::session::Session,
        to: &Jid,
        phone_number: &str,
        message: Message,
    ) -> Result<SentMessage, SessionError> {
        let kind = message.kind();
        match session.client().send_message(to, message).await {
            Ok(resp) => {
                self.metrics.message_sent();
                info!(tenant = %tenant, to = %to, kind, id = %resp.id, "Message sent");
                Ok(SentMessage {
                    message_id: resp.id,
                    timestamp: resp
                        .timestamp
                        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                    status: "sent",
                    to: phone_number.to_string(),
                })
            }
            Err(e) => {
                self.metrics.send_failed();
                warn!(tenant = %tenant, to = %to, kind, "Send failed: {}", e);
                Err(SessionError::SendFailed(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PhaseEvent;
    use crate::test_helpers::{paired_session, test_manager};
    use messaging_client::sandbox::SandboxNetwork;
    use messaging_client::DEFAULT_USER_SERVER;

    fn upload() -> UploadResponse {
        UploadResponse {
            url: "https://mmg.example/u".into(),
            direct_path: "/v/t62/u".into(),
            media_key: vec![1; 32],
            file_enc_sha256: vec![2; 32],
            file_sha256: vec![3; 32],
            file_length: 2048,
        }
    }

    #[test]
    fn phone_normalization() {
        let jid = normalize_phone("+1 (555) 123-4567", 10, DEFAULT_USER_SERVER).unwrap();
        assert_eq!(jid.user, "15551234567");
        assert_eq!(jid.to_string(), "15551234567@s.whatsapp.net");

        assert!(matches!(
            normalize_phone("123", 10, DEFAULT_USER_SERVER),
            Err(SessionError::InvalidPhoneNumber(raw)) if raw == "123"
        ));
        // only the leading plus is dropped, and it does not count as a digit
        assert!(normalize_phone("+123456789", 10, DEFAULT_USER_SERVER).is_err());
        assert!(normalize_phone("1234567890", 10, DEFAULT_USER_SERVER).is_ok());

        let jid = normalize_phone("555+123+4567", 10, DEFAULT_USER_SERVER).unwrap();
        assert_eq!(jid.user, "5551234567");
        assert!(matches!(
            normalize_phone("+12345+6789", 10, DEFAULT_USER_SERVER),
            Err(SessionError::InvalidPhoneNumber(_))
        ));
    }

    #[test]
    fn mime_classification() {
        assert_eq!(classify_mime("image/png"), MediaType::Image);
        assert_eq!(classify_mime("video/mp4"), MediaType::Video);
        assert_eq!(classify_mime("audio/ogg; codecs=opus"), MediaType::Audio);
        assert_eq!(classify_mime("application/pdf"), MediaType::Document);
        assert_eq!(classify_mime(""), MediaType::Document);
    }

    #[test]
    fn image_payload_carries_dimensions() {
        let media = OutboundMedia {
            mime_type: "image/png".into(),
            caption: "look".into(),
            height: 480,
            width: 640,
            ..Default::default()
        };
        match build_media_message(MediaType::Image, upload(), &media) {
            Message::Image(img) => {
                assert_eq!((img.height, img.width), (480, 640));
                assert_eq!(img.caption, "look");
                assert_eq!(img.mimetype, "image/png");
                assert_eq!(img.file_length, 2048);
                assert_eq!(img.media_key, vec![1; 32]);
            }
            other => panic!("expected image, got {:?}", other),
        }
    }

    #[test]
    fn document_uses_caption_as_title() {
        let media = OutboundMedia {
            mime_type: "application/pdf".into(),
            caption: "invoice.pdf".into(),
            height: 480,
            width: 640,
            ..Default::default()
        };
        match build_media_message(classify_mime(&media.mime_type), upload(), &media) {
            Message::Document(doc) => {
                assert_eq!(doc.title, "invoice.pdf");
                assert_eq!(doc.direct_path, "/v/t62/u");
            }
            other => panic!("expected document, got {:?}", other),
        }
    }

    #[test]
    fn audio_has_no_caption() {
        let media = OutboundMedia {
            mime_type: "audio/ogg".into(),
            caption: "ignored".into(),
            ..Default::default()
        };
        assert!(matches!(
            build_media_message(MediaType::Audio, upload(), &media),
            Message::Audio(_)
        ));
    }

    #[tokio::test]
    async fn send_text_without_session() {
        let (manager, _network) = test_manager(SandboxNetwork::default()).await;
        assert!(matches!(
            manager.send_text(TenantId(1), "15551234567", "hi").await,
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn send_text_not_marked_connected_makes_no_call() {
        let (manager, network) = test_manager(SandboxNetwork::default()).await;
        let (session, sandbox) = paired_session(&manager, &network, TenantId(2)).await;
        session.apply(PhaseEvent::Unmarked);
        let before = sandbox.send_calls();

        assert!(matches!(
            manager.send_text(TenantId(2), "15551234567", "hi").await,
            Err(SessionError::SessionNotMarkedConnected)
        ));
        assert_eq!(sandbox.send_calls(), before);
    }

    #[tokio::test]
    async fn send_text_after_client_reconnects_on_its_own() {
        let (manager, network) = test_manager(SandboxNetwork::default()).await;
        let (session, sandbox) = paired_session(&manager, &network, TenantId(7)).await;

        sandbox.drop_transport();
        assert!(matches!(
            manager.send_text(TenantId(7), "15551234567", "hi").await,
            Err(SessionError::TransportDown)
        ));

        session.client().connect().await.unwrap();
        let sent = manager
            .send_text(TenantId(7), "15551234567", "hi")
            .await
            .unwrap();
        assert_eq!(sent.status, "sent");
        assert_eq!(sandbox.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn send_text_checks_readiness_before_phone() {
        let (manager, network) = test_manager(SandboxNetwork::default()).await;
        assert!(matches!(
            manager.send_text(TenantId(3), "123", "hi").await,
            Err(SessionError::NotConnected)
        ));

        let (_session, sandbox) = paired_session(&manager, &network, TenantId(3)).await;
        assert!(matches!(
            manager.send_text(TenantId(3), "123", "hi").await,
            Err(SessionError::InvalidPhoneNumber(_))
        ));
        assert_eq!(sandbox.send_calls(), 0);
    }

    #[tokio::test]
    async fn send_text_success() {
        let (manager, network) = test_manager(SandboxNetwork::default()).await;
        let (_session, sandbox) = paired_session(&manager, &network, TenantId(4)).await;

        let sent = manager
            .send_text(TenantId(4), "+1 (555) 123-4567", "hello")
            .await
            .unwrap();
        assert_eq!(sent.status, "sent");
        assert_eq!(sent.to, "+1 (555) 123-4567");
        assert!(sent.message_id.starts_with("3EB0"));
        assert!(chrono::DateTime::parse_from_rfc3339(&sent.timestamp).is_ok());

        let messages = sandbox.sent_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, Jid::user("15551234567"));
        assert_eq!(messages[0].1, Message::text("hello"));
    }

    #[tokio::test]
    async fn send_failures_keep_their_cause() {
        let (manager, network) = test_manager(SandboxNetwork::default()).await;
        let (_session, sandbox) = paired_session(&manager, &network, TenantId(5)).await;

        sandbox.fail_next_send("rate limited");
        let err = manager
            .send_text(TenantId(5), "15551234567", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::SendFailed(_)));
        assert!(std::error::Error::source(&err).is_some());

        sandbox.fail_next_upload("too large");
        let media = OutboundMedia {
            data: b"%PDF-1.4".to_vec(),
            mime_type: "application/pdf".into(),
            ..Default::default()
        };
        assert!(matches!(
            manager.send_media(TenantId(5), "15551234567", media).await,
            Err(SessionError::UploadFailed(_))
        ));
    }

    #[tokio::test]
    async fn send_media_uploads_then_sends() {
        let (manager, network) = test_manager(SandboxNetwork::default()).await;
        let (_session, sandbox) = paired_session(&manager, &network, TenantId(6)).await;

        let media = OutboundMedia {
            data: vec![0x89, b'P', b'N', b'G'],
            mime_type: "image/png".into(),
            caption: "chart".into(),
            height: 100,
            width: 200,
        };
        manager
            .send_media(TenantId(6), "15551234567", media)
            .await
            .unwrap();
        assert_eq!(sandbox.upload_calls(), 1);
        match &sandbox.sent_messages()[0].1 {
            Message::Image(img) => {
                assert_eq!(img.caption, "chart");
                assert_eq!((img.height, img.width), (100, 200));
                assert_eq!(img.file_length, 4);
            }
            other => panic!("expected image, got {:?}", other),
        }
    }
}

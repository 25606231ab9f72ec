use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use messaging_client::ClientError;

/// Everything a session operation can fail with.
///
/// Library and storage causes are kept as the error source.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no active session found, scan the pairing code first")]
    NoSession,
    #[error("messaging client not connected")]
    NotConnected,
    #[error("not logged in, scan the pairing code first")]
    NotAuthenticated,
    #[error("websocket not connected, call /connect first")]
    TransportDown,
    #[error("session not marked as connected, call /connect first")]
    SessionNotMarkedConnected,
    #[error("pairing code expired")]
    PairingExpired,
    #[error("pairing failed: {detail}")]
    Pairing { detail: String },
    #[error("pairing channel closed unexpectedly")]
    StreamClosed,
    #[error("invalid phone number format: {0}")]
    InvalidPhoneNumber(String),
    #[error("failed to upload media")]
    UploadFailed(#[source] ClientError),
    #[error("failed to send message")]
    SendFailed(#[source] ClientError),
    #[error("failed to initialize messaging client")]
    Initialization(#[source] ClientError),
    #[error("authentication required")]
    AuthenticationRequired,
    /// Malformed or incomplete request input
    #[error("{0}")]
    InvalidRequest(String),
    #[error("failed to connect")]
    ConnectFailed(#[source] ClientError),
    #[error("failed to get contacts")]
    ContactsFailed(#[source] ClientError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SessionError {
    /// Stable machine-readable code, returned alongside the message
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::NotConnected => "not_connected",
            Self::NotAuthenticated => "not_authenticated",
            Self::TransportDown => "transport_down",
            Self::SessionNotMarkedConnected => "session_not_marked_connected",
            Self::PairingExpired => "pairing_expired",
            Self::Pairing { .. } => "pairing_failed",
            Self::StreamClosed => "stream_closed",
            Self::InvalidPhoneNumber(_) => "invalid_phone_number",
            Self::UploadFailed(_) => "upload_failed",
            Self::SendFailed(_) => "send_failed",
            Self::Initialization(_) => "initialization_failed",
            Self::AuthenticationRequired => "authentication_required",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ConnectFailed(_) => "connect_failed",
            Self::ContactsFailed(_) => "contacts_failed",
            Self::Storage(_) => "storage_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoSession => StatusCode::NOT_FOUND,
            Self::NotConnected
            | Self::NotAuthenticated
            | Self::TransportDown
            | Self::SessionNotMarkedConnected => StatusCode::CONFLICT,
            Self::PairingExpired => StatusCode::GONE,
            Self::Pairing { .. }
            | Self::StreamClosed
            | Self::UploadFailed(_)
            | Self::SendFailed(_)
            | Self::ConnectFailed(_)
            | Self::ContactsFailed(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidPhoneNumber(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            Self::Initialization(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message including the underlying cause, if any
    fn detailed_message(&self) -> String {
        match self {
            Self::UploadFailed(e)
            | Self::SendFailed(e)
            | Self::Initialization(e)
            | Self::ConnectFailed(e)
            | Self::ContactsFailed(e) => format!("{}: {}", self, e),
            Self::Storage(e) => format!("{:#}", e),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.detailed_message();
        if status.is_server_error() {
            tracing::warn!(code = self.error_code(), "{}", message);
        }
        (
            status,
            Json(serde_json::json!({
                "error": message,
                "code": self.error_code(),
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(SessionError::NoSession.error_code(), "no_session");
        assert_eq!(
            SessionError::SessionNotMarkedConnected.error_code(),
            "session_not_marked_connected"
        );
        assert_eq!(
            SessionError::Pairing {
                detail: "bad".into()
            }
            .error_code(),
            "pairing_failed"
        );
        assert_eq!(
            SessionError::Storage(anyhow::anyhow!("disk")).error_code(),
            "storage_error"
        );
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            SessionError::AuthenticationRequired.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            SessionError::InvalidPhoneNumber("123".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SessionError::TransportDown.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            SessionError::SendFailed(ClientError::NotConnected).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn source_is_preserved() {
        use std::error::Error;
        let err = SessionError::SendFailed(ClientError::Send("rejected".into()));
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "send failed: rejected");
        assert_eq!(err.detailed_message(), "failed to send message: send failed: rejected");
    }

    #[tokio::test]
    async fn into_response_carries_code() {
        let resp = SessionError::NoSession.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "no_session");
        assert!(json["error"].as_str().unwrap().contains("pairing code"));
    }
}

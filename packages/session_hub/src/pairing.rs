//! Interpreting a client's pairing-event stream.

use messaging_client::PairingEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::SessionError;

/// A step of the pairing handshake that callers act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingStep {
    Code { code: String, timeout: Duration },
    Success,
}

/// Pairing events as seen by the hub: unknown events are skipped, terminal
/// failures become errors.
pub struct PairingStream {
    rx: mpsc::Receiver<PairingEvent>,
}

impl PairingStream {
    pub fn new(rx: mpsc::Receiver<PairingEvent>) -> Self {
        Self { rx }
    }

    /// Next actionable step; a stream ending without a terminal event is an error
    pub async fn next_outcome(&mut self) -> Result<PairingStep, SessionError> {
        loop {
            match self.rx.recv().await {
                Some(PairingEvent::Code { code, timeout }) => {
                    return Ok(PairingStep::Code { code, timeout });
                }
                Some(PairingEvent::Success) => return Ok(PairingStep::Success),
                Some(PairingEvent::Timeout) => return Err(SessionError::PairingExpired),
                Some(PairingEvent::Error(detail)) => {
                    return Err(SessionError::Pairing { detail });
                }
                Some(PairingEvent::Other(event)) => {
                    debug!("Ignoring pairing event: {}", event);
                }
                None => return Err(SessionError::StreamClosed),
            }
        }
    }
}

/// A code handed to the caller for scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingCode {
    pub code: String,
    pub expires_in_secs: u64,
    /// Terminal rendering of the code, if it fits in a QR symbol
    pub qr: Option<String>,
}

impl PairingCode {
    pub fn new(code: String, timeout: Duration) -> Self {
        let qr = render_qr(&code);
        Self {
            code,
            expires_in_secs: timeout.as_secs(),
            qr,
        }
    }
}

/// Result of asking for a pairing code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    CodeIssued(PairingCode),
    /// The stream reported success before any code was needed
    Paired,
    AlreadyAuthenticated,
    /// Another request is already driving pairing for this tenant
    InProgress,
}

/// Render a QR code as text using Unicode half-blocks.
///
/// Each character covers two modules vertically.
pub fn render_qr(data: &str) -> Option<String> {
    use qrcode::QrCode;

    let code = match QrCode::new(data.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            debug!("QR code generation failed: {}", e);
            return None;
        }
    };

    Some(
        code.render::<char>()
            .quiet_zone(true)
            .module_dimensions(2, 1)
            .build(),
    )
}

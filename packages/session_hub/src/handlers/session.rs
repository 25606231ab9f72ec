use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use messaging_client::ContactInfo;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppState;
use crate::dispatch::OutboundMedia;
use crate::error::SessionError;
use crate::pairing::PairingOutcome;
use crate::tenant::TenantContext;

pub async fn connect_handler(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<impl IntoResponse, SessionError> {
    state.manager.connect(ctx.tenant).await?;
    Ok(Json(json!({ "message": "Session connected successfully" })))
}

pub async fn disconnect_handler(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<impl IntoResponse, SessionError> {
    state.manager.disconnect(ctx.tenant).await?;
    Ok(Json(json!({ "message": "Session disconnected successfully" })))
}

pub async fn qr_code_handler(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Response, SessionError> {
    let response = match state.manager.request_pairing_code(ctx.tenant).await? {
        PairingOutcome::CodeIssued(code) => Json(json!({
            "qr_code": code.code,
            "qr_terminal": code.qr,
            "expires_in_secs": code.expires_in_secs,
            "message": "Scan this QR code with your phone to log in",
        }))
        .into_response(),
        PairingOutcome::Paired => {
            Json(json!({ "message": "Device paired successfully" })).into_response()
        }
        PairingOutcome::AlreadyAuthenticated => {
            Json(json!({ "message": "Already logged in" })).into_response()
        }
        PairingOutcome::InProgress => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "pairing already in progress, scan the code issued earlier",
                "code": "pairing_in_progress",
            })),
        )
            .into_response(),
    };
    Ok(response)
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    phone_number: String,
    #[serde(default)]
    message: String,
}

pub async fn send_message_handler(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, SessionError> {
    if req.phone_number.is_empty() || req.message.is_empty() {
        return Err(SessionError::InvalidRequest(
            "phone_number and message are required".into(),
        ));
    }
    let sent = state
        .manager
        .send_text(ctx.tenant, &req.phone_number, &req.message)
        .await?;
    Ok(Json(json!({
        "message": "Message sent successfully",
        "data": sent,
    })))
}

/// Fields of a send-media form, before validation
#[derive(Default)]
struct MediaForm {
    phone_number: String,
    caption: String,
    mime_type: String,
    height: String,
    width: String,
    file: Option<(String, Vec<u8>)>,
}

async fn read_media_form(mut multipart: Multipart) -> Result<MediaForm, SessionError> {
    let invalid = |e: axum::extract::multipart::MultipartError| {
        SessionError::InvalidRequest(format!("Invalid multipart body: {}", e))
    };

    let mut form = MediaForm::default();
    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "media" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let data = field.bytes().await.map_err(invalid)?;
                form.file = Some((filename, data.to_vec()));
            }
            "phone_number" => form.phone_number = field.text().await.map_err(invalid)?,
            "caption" => form.caption = field.text().await.map_err(invalid)?,
            "mime_type" => form.mime_type = field.text().await.map_err(invalid)?,
            "height" => form.height = field.text().await.map_err(invalid)?,
            "width" => form.width = field.text().await.map_err(invalid)?,
            _ => {}
        }
    }
    Ok(form)
}

/// Empty means unknown (zero); anything else must be a number
fn parse_dimension(raw: &str, name: &str) -> Result<u32, SessionError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse()
        .map_err(|_| SessionError::InvalidRequest(format!("Invalid {} value", name)))
}

pub async fn send_media_handler(
    State(state): State<AppState>,
    ctx: TenantContext,
    multipart: Multipart,
) -> Result<impl IntoResponse, SessionError> {
    let form = read_media_form(multipart).await?;

    if form.phone_number.is_empty() || form.mime_type.is_empty() {
        return Err(SessionError::InvalidRequest(
            "phone_number and mime_type are required".into(),
        ));
    }
    let Some((filename, data)) = form.file else {
        return Err(SessionError::InvalidRequest(
            "media file is required".into(),
        ));
    };
    let height = parse_dimension(&form.height, "height")?;
    let width = parse_dimension(&form.width, "width")?;

    let media = OutboundMedia {
        data,
        mime_type: form.mime_type,
        caption: form.caption,
        height,
        width,
    };
    let sent = state
        .manager
        .send_media(ctx.tenant, &form.phone_number, media)
        .await?;
    Ok(Json(json!({
        "message": format!("Media message sent successfully. File: {}", filename),
        "data": sent,
    })))
}

#[derive(Deserialize)]
pub struct CheckConnectionRequest {
    #[serde(default)]
    phone_number: String,
}

pub async fn check_connection_handler(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(req): Json<CheckConnectionRequest>,
) -> impl IntoResponse {
    Json(state.manager.is_connected(ctx.tenant, &req.phone_number).await)
}

pub async fn status_handler(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<impl IntoResponse, SessionError> {
    let status = state.manager.current_status(ctx.tenant).await?;
    Ok(Json(json!({
        "status": status.description(),
        "kind": status.kind(),
    })))
}

/// Contact as returned to API callers
#[derive(Debug, Serialize)]
pub struct ContactEntry {
    pub jid: String,
    pub name: String,
    pub first_name: String,
    pub full_name: String,
    pub business_name: String,
    pub found: bool,
}

impl From<ContactInfo> for ContactEntry {
    fn from(c: ContactInfo) -> Self {
        Self {
            jid: c.jid.map(|j| j.to_string()).unwrap_or_default(),
            name: c.push_name,
            first_name: c.first_name,
            full_name: c.full_name,
            business_name: c.business_name,
            found: c.found,
        }
    }
}

pub async fn contacts_handler(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<impl IntoResponse, SessionError> {
    let contacts: Vec<ContactEntry> = state
        .manager
        .list_contacts(ctx.tenant)
        .await?
        .into_iter()
        .map(ContactEntry::from)
        .collect();
    Ok(Json(json!({ "contacts": contacts })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::TenantId;
    use crate::test_helpers::paired_session;
    use axum::{
        Router,
        body::Body,
        http::Request,
        routing::{get, post},
    };
    use messaging_client::{Jid, Message};
    use tower::ServiceExt;

    const BOUNDARY: &str = "hubtestboundary";

    fn router(state: AppState) -> Router {
        Router::new()
            .route("/connect", post(connect_handler))
            .route("/disconnect", post(disconnect_handler))
            .route("/qr-code", get(qr_code_handler))
            .route("/send-message", post(send_message_handler))
            .route("/send-media", post(send_media_handler))
            .route("/check-connection", post(check_connection_handler))
            .route("/status", get(status_handler))
            .route("/contacts", get(contacts_handler))
            .with_state(state)
    }

    fn request(method: &str, uri: &str, tenant: u64, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .extension(TenantContext {
                tenant: TenantId(tenant),
            });
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn multipart_request(tenant: u64, fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        if let Some((filename, data)) = file {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"media\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    BOUNDARY, filename
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/send-media")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .extension(TenantContext {
                tenant: TenantId(tenant),
            })
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_missing_tenant_context_is_unauthorized() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let resp = router(state)
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status_not_initialized() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let resp = router(state)
            .oneshot(request("GET", "/status", 1, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["status"], "Not initialized");
        assert_eq!(json["kind"], "not_initialized");
    }

    #[tokio::test]
    async fn test_connect_without_session() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let resp = router(state)
            .oneshot(request("POST", "/connect", 1, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(resp).await["code"], "no_session");
    }

    #[tokio::test]
    async fn test_qr_code_then_in_progress() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let app = router(state);

        let resp = app
            .clone()
            .oneshot(request("GET", "/qr-code", 2, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert!(json["qr_code"].as_str().unwrap().starts_with("2@"));
        assert!(json["qr_terminal"].is_string());
        assert_eq!(json["expires_in_secs"], 60);

        let resp = app
            .oneshot(request("GET", "/qr-code", 2, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(resp).await["code"], "pairing_in_progress");
    }

    #[tokio::test]
    async fn test_send_message_flow() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let network = state.sandbox.clone().unwrap();
        let app = router(state.clone());

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                "/send-message",
                3,
                Some(json!({ "phone_number": "15551234567", "message": "hi" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(resp).await["code"], "not_connected");

        let (_session, sandbox) = paired_session(&state.manager, &network, TenantId(3)).await;
        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                "/send-message",
                3,
                Some(json!({ "phone_number": "+1 (555) 123-4567", "message": "hi" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["message"], "Message sent successfully");
        assert_eq!(json["data"]["status"], "sent");
        assert_eq!(json["data"]["to"], "+1 (555) 123-4567");
        assert_eq!(
            sandbox.sent_messages(),
            vec![(Jid::user("15551234567"), Message::text("hi"))]
        );

        let resp = app
            .oneshot(request(
                "POST",
                "/send-message",
                3,
                Some(json!({ "phone_number": "123", "message": "hi" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["code"], "invalid_phone_number");
    }

    #[tokio::test]
    async fn test_send_message_requires_fields() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let resp = router(state)
            .oneshot(request(
                "POST",
                "/send-message",
                3,
                Some(json!({ "phone_number": "15551234567" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_send_media_validation() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let app = router(state);

        let resp = app
            .clone()
            .oneshot(multipart_request(4, &[("phone_number", "15551234567")], Some(("a.png", &b"png"[..]))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(resp).await["error"],
            "phone_number and mime_type are required"
        );

        let resp = app
            .clone()
            .oneshot(multipart_request(
                4,
                &[("phone_number", "15551234567"), ("mime_type", "image/png")],
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "media file is required");

        let resp = app
            .oneshot(multipart_request(
                4,
                &[
                    ("phone_number", "15551234567"),
                    ("mime_type", "image/png"),
                    ("height", "tall"),
                ],
                Some(("a.png", &b"png"[..])),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "Invalid height value");
    }

    #[tokio::test]
    async fn test_send_media_success() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let network = state.sandbox.clone().unwrap();
        let (_session, sandbox) = paired_session(&state.manager, &network, TenantId(5)).await;

        let resp = router(state)
            .oneshot(multipart_request(
                5,
                &[
                    ("phone_number", "15551234567"),
                    ("mime_type", "image/jpeg"),
                    ("caption", "sunset"),
                    ("height", "0"),
                    ("width", "1024"),
                ],
                Some(("sunset.jpg", &b"\xff\xd8\xff\xe0"[..])),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(
            json["message"],
            "Media message sent successfully. File: sunset.jpg"
        );
        match &sandbox.sent_messages()[0].1 {
            Message::Image(img) => {
                assert_eq!(img.caption, "sunset");
                assert_eq!((img.height, img.width), (0, 1024));
            }
            other => panic!("expected image, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_check_connection_and_contacts() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let network = state.sandbox.clone().unwrap();
        let app = router(state.clone());

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                "/check-connection",
                6,
                Some(json!({ "phone_number": "15551234567" })),
            ))
            .await
            .unwrap();
        let json = json_body(resp).await;
        assert_eq!(json["phone_number"], "15551234567");
        assert_eq!(json["connected"], false);

        let (_session, sandbox) = paired_session(&state.manager, &network, TenantId(6)).await;
        sandbox.set_contacts(vec![ContactInfo {
            jid: Some(Jid::user("15550002222")),
            found: true,
            push_name: "Bob".into(),
            full_name: "Bob Builder".into(),
            ..Default::default()
        }]);
        let resp = app
            .oneshot(request("GET", "/contacts", 6, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["contacts"][0]["jid"], "15550002222@s.whatsapp.net");
        assert_eq!(json["contacts"][0]["name"], "Bob");
        assert_eq!(json["contacts"][0]["full_name"], "Bob Builder");
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let app = router(state);
        for _ in 0..2 {
            let resp = app
                .clone()
                .oneshot(request("POST", "/disconnect", 7, None))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
    }

    #[test]
    fn test_parse_dimension() {
        assert_eq!(parse_dimension("", "height").unwrap(), 0);
        assert_eq!(parse_dimension(" 720 ", "height").unwrap(), 720);
        assert_eq!(parse_dimension("0", "width").unwrap(), 0);
        assert!(parse_dimension("-1", "width").is_err());
    }
}

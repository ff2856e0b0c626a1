use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ Path, State };
use axum::http::header::AUTHORIZATION;
use axum::http::{ HeaderMap, StatusCode };
use axum::response::{ IntoResponse, Response };
use axum::routing::{ get, post };
use axum::{ Json, Router };
use chrono::{ DateTime, NaiveDate, NaiveTime, TimeZone, Utc };
use log::{ error, info, warn };
use serde::{ Deserialize, Serialize };
use serde_json::json;
use tower_http::cors::{ Any, CorsLayer };

use crate::attribution::ContactInput;
use crate::booking::SlotDecision;
use crate::cli::Args;
use crate::error::CoreError;
use crate::models::core::{ Appointment, AppointmentStatus, Message, ProjectStatus, SenderType };
use crate::models::websocket::ServerMessage;
use crate::realtime::Notification;
use crate::server::AppState;
use crate::storage::Storage;

const SLOT_TIME_FORMAT: &str = "%I:%M %p";

pub async fn start_http_server(
    http_port: u16,
    state: Arc<AppState>,
    args: Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", http_port).parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);

    let app = build_router(state);

    if args.enable_tls && args.tls_cert_path.is_some() && args.tls_key_path.is_some() {
        let cert_path = args.tls_cert_path.as_ref().unwrap();
        let key_path = args.tls_key_path.as_ref().unwrap();

        let tls_config = axum_server::tls_rustls::RustlsConfig
            ::from_pem_file(cert_path, key_path).await?;

        tokio::spawn(async move {
            let result = axum_server
                ::bind_rustls(addr, tls_config)
                .serve(app.into_make_service()).await;

            if let Err(e) = result {
                error!("HTTPS server error: {}", e);
            }
        });

        info!("HTTPS server started with TLS enabled");
    } else {
        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => {
                    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                        error!("HTTP server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
                }
            }
        });

        info!("HTTP server started");
    }

    Ok(())
}

/// The single authoritative route table, built once at startup. axum panics
/// on a second registration for the same method/path, so a duplicate route is
/// a boot failure rather than silent last-wins behavior.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/token", post(token_handler))
        .route(
            "/api/public/project/{token}/messages",
            get(get_public_messages).post(post_public_message)
        )
        .route("/api/admin/project/{token}/messages", post(post_admin_message))
        .route("/api/admin/project/{token}/read", post(mark_project_read))
        .route("/api/admin/notifications", get(get_notifications))
        .route("/api/book-appointment", post(book_appointment))
        .route("/api/availability/{date}", get(get_availability))
        .route("/api/webhooks/acuity", post(acuity_webhook))
        .route("/api/webhooks/squarespace", post(squarespace_webhook))
        .layer(cors)
        .with_state(state)
}

fn require_admin(args: &Args, provided: Option<&str>) -> Result<(), CoreError> {
    let expected = args.admin_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CoreError::Auth("admin access is not configured".to_string()))?;
    match provided {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(CoreError::Auth("bad admin token".to_string())),
        None => Err(CoreError::Auth("missing admin token".to_string())),
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

// --- POST /api/token ---

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum TokenRequestKind {
    Admin,
    Member,
    Project,
    Validate,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest {
    #[serde(rename = "type")]
    kind: TokenRequestKind,
    email: Option<String>,
    name: Option<String>,
    phone: Option<String>,
    project_id: Option<String>,
    token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    #[serde(rename = "type")]
    kind: &'static str,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    existing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    company_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f32>,
}

async fn token_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TokenRequest>
) -> Result<Response, CoreError> {
    match req.kind {
        TokenRequestKind::Admin => {
            require_admin(&state.args, req.token.as_deref())?;
            Ok(
                Json(TokenResponse {
                    kind: "admin",
                    valid: true,
                    token: req.token,
                    existing: None,
                    project_id: None,
                    company_id: None,
                    confidence: None,
                }).into_response()
            )
        }
        TokenRequestKind::Member => {
            let contact = ContactInput::new(
                req.email.as_deref().unwrap_or(""),
                req.name.as_deref().unwrap_or(""),
                req.phone.as_deref()
            );
            let routed = state.router.route_member(&contact).await?;
            Ok(
                Json(TokenResponse {
                    kind: "member",
                    valid: true,
                    token: Some(routed.project.access_token),
                    existing: Some(routed.existing),
                    project_id: Some(routed.project.id),
                    company_id: Some(routed.company.id),
                    confidence: Some(routed.confidence),
                }).into_response()
            )
        }
        TokenRequestKind::Project => {
            let project_id = req.project_id.ok_or_else(||
                CoreError::Validation("projectId is required".to_string())
            )?;
            let project = state.storage
                .find_project(&project_id).await?
                .ok_or_else(|| CoreError::NotFound(format!("project {}", project_id)))?;
            Ok(
                Json(TokenResponse {
                    kind: "project",
                    valid: true,
                    token: Some(project.access_token),
                    existing: None,
                    project_id: Some(project.id),
                    company_id: Some(project.company_id),
                    confidence: None,
                }).into_response()
            )
        }
        TokenRequestKind::Validate => {
            let token = req.token.ok_or_else(||
                CoreError::Validation("token is required".to_string())
            )?;
            let live = match state.storage.find_project_by_token(token.trim()).await? {
                Some(project) => project.status == ProjectStatus::Active,
                None => false,
            };
            Ok(
                Json(TokenResponse {
                    kind: "validate",
                    valid: live,
                    token: Some(token),
                    existing: None,
                    project_id: None,
                    company_id: None,
                    confidence: None,
                }).into_response()
            )
        }
    }
}

// --- Message surfaces ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    sender_name: Option<String>,
    content: String,
    #[serde(default)]
    attachments: Vec<String>,
}

async fn live_project_for_token(
    state: &AppState,
    token: &str
) -> Result<crate::models::core::Project, CoreError> {
    let project = state.router.resolve_token(token).await?;
    if project.status != ProjectStatus::Active {
        // Archiving a conversation revokes its token.
        return Err(CoreError::NotFound("conversation is no longer available".to_string()));
    }
    Ok(project)
}

async fn get_public_messages(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>
) -> Result<Response, CoreError> {
    let project = live_project_for_token(&state, &token).await?;
    let messages = state.storage
        .messages_for_project(&project.id, state.args.history_limit).await?;
    Ok(Json(json!({ "projectId": project.id, "title": project.title, "messages": messages })).into_response())
}

async fn persist_and_fan_out(
    state: &AppState,
    project_token: &str,
    message: Message
) -> Result<Message, CoreError> {
    state.storage.append_message(&message).await?;
    state.hub.broadcast(project_token, &(ServerMessage::NewMessage {
        message: message.clone(),
    })).await;
    state.hub.notify(
        Notification::new("message", &format!("New message from {}", message.sender_name), &message.content)
    ).await;
    Ok(message)
}

async fn post_public_message(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(req): Json<SendMessageRequest>
) -> Result<Response, CoreError> {
    if req.content.trim().is_empty() {
        return Err(CoreError::Validation("message content is required".to_string()));
    }
    let project = live_project_for_token(&state, &token).await?;
    let message = Message::new(
        &project.id,
        SenderType::Client,
        req.sender_name.as_deref().unwrap_or("Client"),
        req.content.trim(),
        req.attachments
    );
    let message = persist_and_fan_out(&state, &project.access_token, message).await?;
    Ok(Json(message).into_response())
}

async fn post_admin_message(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>
) -> Result<Response, CoreError> {
    require_admin(&state.args, bearer(&headers))?;
    if req.content.trim().is_empty() {
        return Err(CoreError::Validation("message content is required".to_string()));
    }
    let project = state.router.resolve_token(&token).await?;
    let message = Message::new(
        &project.id,
        SenderType::Admin,
        req.sender_name.as_deref().unwrap_or("Studio"),
        req.content.trim(),
        req.attachments
    );
    let message = persist_and_fan_out(&state, &project.access_token, message).await?;
    Ok(Json(message).into_response())
}

async fn mark_project_read(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap
) -> Result<Response, CoreError> {
    require_admin(&state.args, bearer(&headers))?;
    let project = state.router.resolve_token(&token).await?;
    let updated = state.storage.mark_messages_read(&project.id, Utc::now()).await?;
    Ok(Json(json!({ "projectId": project.id, "updated": updated })).into_response())
}

async fn get_notifications(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap
) -> Result<Response, CoreError> {
    require_admin(&state.args, bearer(&headers))?;
    let notifications = state.hub.recent_notifications().await;
    Ok(Json(json!({ "notifications": notifications })).into_response())
}

// --- Booking surfaces ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookingRequest {
    date: String,
    time: String,
    duration_minutes: Option<i64>,
    name: String,
    email: String,
    phone: Option<String>,
    notes: Option<String>,
}

fn parse_slot_instant(date: &str, time: &str) -> Result<DateTime<Utc>, CoreError> {
    let date: NaiveDate = date
        .parse()
        .map_err(|_| CoreError::Validation(format!("invalid date '{}'", date)))?;
    let time = NaiveTime::parse_from_str(time.trim(), SLOT_TIME_FORMAT).map_err(|_|
        CoreError::Validation(format!("invalid time '{}'", time))
    )?;
    Ok(Utc.from_utc_datetime(&date.and_time(time)))
}

async fn book_appointment(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BookingRequest>
) -> Result<Response, CoreError> {
    let proposed = parse_slot_instant(&req.date, &req.time)?;

    match state.guard.check(proposed, None).await? {
        SlotDecision::Conflict { alternatives } => {
            info!("Rejected booking at {}: slot taken", proposed);
            Ok(
                (
                    StatusCode::CONFLICT,
                    Json(
                        json!({
                        "error": "TIME_SLOT_UNAVAILABLE",
                        "availableAlternatives": alternatives,
                    })
                    ),
                ).into_response()
            )
        }
        SlotDecision::Free => {
            let contact = ContactInput::new(&req.email, &req.name, req.phone.as_deref());
            let routed = state.router.route_always_new(&contact, "Booking").await?;

            let mut appointment = Appointment::new(
                proposed,
                req.duration_minutes.unwrap_or(60)
            );
            appointment.company_id = Some(routed.company.id.clone());
            appointment.project_id = Some(routed.project.id.clone());
            appointment.notes = req.notes.clone();
            state.storage.create_appointment(&appointment).await?;

            state.hub.notify(
                Notification::new(
                    "appointment",
                    &format!("New appointment for {}", routed.company.name),
                    &format!("{} at {}", req.date, req.time)
                )
            ).await;
            if
                let Err(e) = state.notifier.send(
                    &format!("New appointment: {}", routed.company.name),
                    &format!("{} booked {} {} ({} min)", req.email, req.date, req.time, appointment.duration_minutes)
                ).await
            {
                warn!("Booking confirmation email failed: {}", e);
            }

            Ok(
                Json(
                    json!({
                    "appointment": appointment,
                    "token": routed.project.access_token,
                })
                ).into_response()
            )
        }
    }
}

async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(date): Path<String>
) -> Result<Response, CoreError> {
    let date: NaiveDate = date
        .parse()
        .map_err(|_| CoreError::Validation(format!("invalid date '{}'", date)))?;
    let slots = state.guard.availability(date).await?;
    Ok(Json(json!({ "date": date.to_string(), "availableSlots": slots })).into_response())
}

// --- Webhooks ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcuityWebhook {
    id: serde_json::Value,
    action: Option<String>,
    datetime: Option<DateTime<Utc>>,
    duration: Option<i64>,
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
    notes: Option<String>,
}

fn json_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Acuity retries aggressively: the handler is idempotent on the provider
/// event id and returns 200 once our own records are durable, even when the
/// email step fails, so the provider never retry-storms us.
async fn acuity_webhook(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AcuityWebhook>
) -> Result<Response, CoreError> {
    let provider_id = json_id(&req.id).ok_or_else(||
        CoreError::Validation("missing appointment id".to_string())
    )?;
    let event_id = format!("acuity:{}", provider_id);

    if !state.storage.claim_event(&event_id).await? {
        info!("Duplicate Acuity event {}", event_id);
        let existing = state.storage.find_appointment_by_external_id(&provider_id).await?;
        return Ok(Json(json!({ "duplicate": true, "appointment": existing })).into_response());
    }

    let action = req.action.as_deref().unwrap_or("scheduled");
    if action.eq_ignore_ascii_case("canceled") || action.eq_ignore_ascii_case("cancelled") {
        if let Some(mut appointment) =
            state.storage.find_appointment_by_external_id(&provider_id).await?
        {
            appointment.status = AppointmentStatus::Cancelled;
            state.storage.update_appointment(&appointment).await?;
            return Ok(Json(json!({ "cancelled": true })).into_response());
        }
        return Ok(Json(json!({ "ignored": true })).into_response());
    }

    let datetime = req.datetime.ok_or_else(||
        CoreError::Validation("missing appointment datetime".to_string())
    )?;

    let name = match (&req.first_name, &req.last_name) {
        (Some(first), Some(last)) => format!("{} {}", first, last),
        (Some(first), None) => first.clone(),
        (None, Some(last)) => last.clone(),
        (None, None) => String::new(),
    };

    let mut appointment = Appointment::new(datetime, req.duration.unwrap_or(60));
    appointment.external_id = Some(provider_id);
    appointment.notes = req.notes.clone();

    // Webhook leads follow the same privacy-preserving policy as public
    // form submissions.
    if let Some(email) = req.email.as_deref().filter(|e| !e.trim().is_empty()) {
        if !name.trim().is_empty() {
            let contact = ContactInput::new(email, &name, req.phone.as_deref());
            match state.router.route_always_new(&contact, "Appointment").await {
                Ok(routed) => {
                    appointment.company_id = Some(routed.company.id);
                    appointment.project_id = Some(routed.project.id);
                }
                Err(e) => warn!("Could not route Acuity lead to a conversation: {}", e),
            }
        }
    }

    state.storage.create_appointment(&appointment).await?;

    state.hub.notify(
        Notification::new("appointment", "Appointment scheduled", &appointment.datetime.to_rfc3339())
    ).await;
    if
        let Err(e) = state.notifier.send(
            "Appointment scheduled",
            &format!("Acuity appointment at {}", appointment.datetime)
        ).await
    {
        warn!("Appointment email failed: {}", e);
    }

    Ok(Json(json!({ "received": true, "appointmentId": appointment.id })).into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SquarespaceWebhook {
    #[serde(alias = "id")]
    submission_id: Option<String>,
    form_id: Option<String>,
    email: Option<String>,
    name: Option<String>,
    phone: Option<String>,
    message: Option<String>,
}

async fn squarespace_webhook(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SquarespaceWebhook>
) -> Result<Response, CoreError> {
    let submission_id = req.submission_id
        .clone()
        .or_else(|| req.form_id.clone())
        .ok_or_else(|| CoreError::Validation("missing submission id".to_string()))?;
    let event_id = format!("squarespace:{}", submission_id);

    if !state.storage.claim_event(&event_id).await? {
        info!("Duplicate Squarespace submission {}", event_id);
        return Ok(Json(json!({ "duplicate": true })).into_response());
    }

    let contact = ContactInput::new(
        req.email.as_deref().unwrap_or(""),
        req.name.as_deref().unwrap_or(""),
        req.phone.as_deref()
    );
    let routed = state.router.route_always_new(&contact, "Website Inquiry").await?;

    if let Some(text) = req.message.as_deref().filter(|m| !m.trim().is_empty()) {
        let message = Message::new(
            &routed.project.id,
            SenderType::Client,
            req.name.as_deref().unwrap_or("Client"),
            text.trim(),
            Vec::new()
        );
        persist_and_fan_out(&state, &routed.project.access_token, message).await?;
    }

    if
        let Err(e) = state.notifier.send(
            &format!("New inquiry from {}", routed.company.name),
            req.message.as_deref().unwrap_or("(no message)")
        ).await
    {
        warn!("Inquiry email failed: {}", e);
    }

    Ok(
        Json(
            json!({
            "received": true,
            "projectId": routed.project.id,
            "identityCreated": routed.identity_created,
        })
        ).into_response()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{ to_bytes, Body };
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::booking::BookingGuard;
    use crate::notify::NoopNotifier;
    use crate::realtime::RealtimeHub;
    use crate::routing::ConversationRouter;
    use crate::storage::MemoryStorage;

    fn test_state() -> Arc<AppState> {
        let mut args = Args::default();
        args.admin_token = Some("secret-admin".to_string());
        args.storage_type = "memory".to_string();
        args.booking_slots = vec!["8:30 AM".to_string(), "9:00 AM".to_string()];

        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let hub = Arc::new(RealtimeHub::new());
        let router = Arc::new(ConversationRouter::new(storage.clone()));
        let guard = Arc::new(
            BookingGuard::new(storage.clone(), args.collision_window_minutes, &args.booking_slots)
        );
        Arc::new(AppState {
            storage,
            hub,
            router,
            guard,
            notifier: Arc::new(NoopNotifier),
            args,
        })
    }

    async fn send_json(
        app: &Router,
        method: &str,
        uri: &str,
        body: serde_json::Value,
        bearer: Option<&str>
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn member_token_is_stable_across_calls() {
        let state = test_state();
        let app = build_router(state);

        let body =
            json!({ "type": "member", "email": "alice@client.com", "name": "Alice Smith" });
        let (status, first) = send_json(&app, "POST", "/api/token", body.clone(), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["existing"], json!(false));

        let (_, second) = send_json(&app, "POST", "/api/token", body, None).await;
        assert_eq!(second["existing"], json!(true));
        assert_eq!(first["token"], second["token"]);
    }

    #[tokio::test]
    async fn admin_type_rejects_bad_bearer() {
        let state = test_state();
        let app = build_router(state);

        let (status, _) = send_json(
            &app,
            "POST",
            "/api/token",
            json!({ "type": "admin", "token": "wrong" }),
            None
        ).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send_json(
            &app,
            "POST",
            "/api/token",
            json!({ "type": "admin", "token": "secret-admin" }),
            None
        ).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], json!(true));
    }

    #[tokio::test]
    async fn validate_type_reports_liveness_without_erroring() {
        let state = test_state();
        let app = build_router(state.clone());

        let routed = state.router
            .route_always_new(
                &ContactInput::new("a@b.com", "Alice", None),
                "Website Inquiry"
            ).await
            .unwrap();

        let (status, body) = send_json(
            &app,
            "POST",
            "/api/token",
            json!({ "type": "validate", "token": routed.project.access_token }),
            None
        ).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], json!(true));

        state.storage
            .update_project_status(&routed.project.id, ProjectStatus::Archived).await
            .unwrap();
        let (_, body) = send_json(
            &app,
            "POST",
            "/api/token",
            json!({ "type": "validate", "token": routed.project.access_token }),
            None
        ).await;
        assert_eq!(body["valid"], json!(false));
    }

    #[tokio::test]
    async fn public_message_round_trip() {
        let state = test_state();
        let app = build_router(state.clone());

        let routed = state.router
            .route_always_new(
                &ContactInput::new("a@b.com", "Alice", None),
                "Website Inquiry"
            ).await
            .unwrap();
        let uri = format!("/api/public/project/{}/messages", routed.project.access_token);

        let (status, _) = send_json(
            &app,
            "POST",
            &uri,
            json!({ "senderName": "Alice", "content": "Hello there" }),
            None
        ).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send_json(&app, "GET", &uri, json!({}), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["content"], json!("Hello there"));
    }

    #[tokio::test]
    async fn booking_conflict_returns_409_with_alternatives() {
        let state = test_state();
        let app = build_router(state);

        let first =
            json!({
            "date": "2025-06-10", "time": "8:30 AM",
            "name": "Alice", "email": "alice@client.com"
        });
        let (status, _) = send_json(&app, "POST", "/api/book-appointment", first, None).await;
        assert_eq!(status, StatusCode::OK);

        let second =
            json!({
            "date": "2025-06-10", "time": "8:45 AM",
            "name": "Bob", "email": "bob@client.com"
        });
        let (status, body) = send_json(&app, "POST", "/api/book-appointment", second, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], json!("TIME_SLOT_UNAVAILABLE"));
        assert_eq!(body["availableAlternatives"], json!(["9:00 AM"]));
    }

    #[tokio::test]
    async fn availability_subtracts_booked_slots() {
        let state = test_state();
        let app = build_router(state);

        let booking =
            json!({
            "date": "2025-06-10", "time": "8:30 AM",
            "name": "Alice", "email": "alice@client.com"
        });
        send_json(&app, "POST", "/api/book-appointment", booking, None).await;

        let (status, body) = send_json(
            &app,
            "GET",
            "/api/availability/2025-06-10",
            json!({}),
            None
        ).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["availableSlots"], json!(["9:00 AM"]));
    }

    #[tokio::test]
    async fn acuity_webhook_is_idempotent_on_the_event_id() {
        let state = test_state();
        let app = build_router(state.clone());

        let event =
            json!({
            "id": 4411, "action": "scheduled",
            "datetime": "2025-06-10T08:30:00Z", "duration": 60,
            "email": "alice@client.com", "firstName": "Alice", "lastName": "Smith"
        });
        let (status, _) = send_json(&app, "POST", "/api/webhooks/acuity", event.clone(), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send_json(&app, "POST", "/api/webhooks/acuity", event, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["duplicate"], json!(true));

        let appointments = state.storage.list_appointments().await.unwrap();
        assert_eq!(appointments.len(), 1);
        assert_eq!(appointments[0].external_id.as_deref(), Some("4411"));
    }

    #[tokio::test]
    async fn squarespace_submissions_get_isolated_conversations() {
        let state = test_state();
        let app = build_router(state.clone());

        let first =
            json!({
            "submissionId": "form-1", "email": "a.smith@gmail.com",
            "name": "Alice Smith", "message": "I need a logo"
        });
        let second =
            json!({
            "submissionId": "form-2", "email": "a.smith@gmail.com",
            "name": "Alice Smith", "message": "Another request"
        });

        let (status, body_a) = send_json(&app, "POST", "/api/webhooks/squarespace", first, None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body_b) = send_json(&app, "POST", "/api/webhooks/squarespace", second, None).await;

        assert_ne!(body_a["projectId"], body_b["projectId"]);
        assert_eq!(body_a["identityCreated"], json!(true));
        assert_eq!(body_b["identityCreated"], json!(false));
        assert_eq!(state.storage.list_companies().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn admin_routes_require_the_bearer() {
        let state = test_state();
        let app = build_router(state.clone());

        let routed = state.router
            .route_always_new(
                &ContactInput::new("a@b.com", "Alice", None),
                "Website Inquiry"
            ).await
            .unwrap();
        let uri = format!("/api/admin/project/{}/messages", routed.project.access_token);

        let (status, _) = send_json(
            &app,
            "POST",
            &uri,
            json!({ "content": "hi" }),
            None
        ).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send_json(
            &app,
            "POST",
            &uri,
            json!({ "content": "hi" }),
            Some("secret-admin")
        ).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["senderType"], json!("admin"));
    }
}

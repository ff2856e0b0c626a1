use crate::models::core::ProjectStatus;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::realtime::ADMIN_ROOM;
use crate::server::AppState;

use std::collections::HashMap;
use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::net::TcpListener;
use tokio::sync::mpsc::unbounded_channel;

use tokio_tungstenite::{ accept_hdr_async, WebSocketStream };
use tokio_tungstenite::tungstenite::handshake::server::{ ErrorResponse, Request, Response };
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_rustls::TlsAcceptor;

use rustls::pki_types::{ CertificateDer, PrivateKeyDer };
use rustls::ServerConfig;
use rustls_pemfile::{ certs, pkcs8_private_keys };

use governor::{ clock::DefaultClock, state::{ InMemoryState, NotKeyed }, Quota, RateLimiter };
use lazy_static::lazy_static;

use url::form_urlencoded;

use futures::{ SinkExt, StreamExt };
use log::{ error, info, warn };

use crate::cli::Args;

const MAX_MESSAGE_SIZE: usize = 64 * 1024;

lazy_static! {
    static ref CONNECTION_LIMITER: RateLimiter<NotKeyed, InMemoryState, DefaultClock> =
        RateLimiter::direct(Quota::per_second(NonZeroU32::new(10).unwrap()));
}

fn load_tls_config(
    cert_path: &str,
    key_path: &str
) -> Result<Arc<ServerConfig>, Box<dyn Error + Send + Sync>> {
    let cert_file = File::open(cert_path).map_err(|e|
        format!("Failed to open TLS certificate file '{}': {}", cert_path, e)
    )?;
    let key_file = File::open(key_path).map_err(|e|
        format!("Failed to open TLS key file '{}': {}", key_path, e)
    )?;

    let mut cert_reader = BufReader::new(cert_file);
    let mut key_reader = BufReader::new(key_file);
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| format!("Failed to read certificate(s): {}", e))?;

    let mut keys = pkcs8_private_keys(&mut key_reader);
    let key = match keys.next() {
        Some(Ok(k)) => PrivateKeyDer::Pkcs8(k),
        Some(Err(e)) => {
            return Err(format!("Error reading private key: {}", e).into());
        }
        None => {
            return Err("No PKCS8 private key found in key file".into());
        }
    };

    let config = ServerConfig::builder().with_no_client_auth().with_single_cert(cert_chain, key)?;
    Ok(Arc::new(config))
}

pub async fn start_ws_server(
    addr: &str,
    state: Arc<AppState>,
    api_key: Option<String>,
    args: Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    let protocol = if
        args.enable_tls &&
        args.tls_cert_path.is_some() &&
        args.tls_key_path.is_some()
    {
        "wss"
    } else {
        "ws"
    };
    info!("{} server listening on: {}", protocol.to_uppercase(), addr);

    let tls_acceptor = if args.enable_tls {
        match (&args.tls_cert_path, &args.tls_key_path) {
            (Some(cert_path), Some(key_path)) => {
                info!(
                    "TLS enabled. Loading certificate from '{}' and key from '{}'",
                    cert_path,
                    key_path
                );
                let config = load_tls_config(cert_path, key_path)?;
                Some(TlsAcceptor::from(config))
            }
            (Some(_), None) | (None, Some(_)) => {
                error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                return Err("Missing TLS certificate or key path".into());
            }
            (None, None) => {
                error!("--enable-tls was set but no certificate/key paths provided.");
                return Err("TLS enabled without cert/key".into());
            }
        }
    } else {
        info!("TLS not enabled. Running plain WebSocket (WS) server.");
        None
    };

    loop {
        let (stream, peer) = listener.accept().await?;

        if CONNECTION_LIMITER.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let state_clone = Arc::clone(&state);
        let required_api_key = api_key.clone();
        let tls_acceptor_clone = tls_acceptor.clone();

        tokio::spawn(async move {
            let process_result = if let Some(acceptor) = tls_acceptor_clone {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        info!("TLS handshake successful for {}", peer);
                        process_connection(peer, tls_stream, state_clone, required_api_key).await
                    }
                    Err(e) => {
                        error!("TLS handshake error for {}: {}", peer, e);
                        Err(Box::new(e) as Box<dyn Error + Send + Sync>)
                    }
                }
            } else {
                process_connection(peer, stream, state_clone, required_api_key).await
            };

            if let Err(e) = process_result {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    state: Arc<AppState>,
    required_api_key: Option<String>
)
    -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let auth_callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let secret = match &required_api_key {
            Some(k) if !k.is_empty() => k,
            _ => {
                return Ok(response);
            }
        };

        let qs = req.uri().query().unwrap_or("");
        let params: HashMap<String, String> = form_urlencoded
            ::parse(qs.as_bytes())
            .into_owned()
            .collect();

        match params.get("key") {
            Some(key) if key == secret => Ok(response),
            _ => {
                let res = Response::builder()
                    .status(401)
                    .body(Some("missing or bad api key".into()))
                    .unwrap();
                Err(ErrorResponse::from(res))
            }
        }
    };

    match accept_hdr_async(stream, auth_callback).await {
        Ok(ws) => {
            handle_connection(peer, ws, state).await;
            Ok(())
        }
        Err(e) => {
            error!("Handshake failed for {}: {}", peer, e);
            Err(Box::new(e) as _)
        }
    }
}

/// One loop owns both directions: inbound frames from the socket and outbound
/// fan-out from the hub. Join failures surface as socket-level error events
/// and never tear down the process.
pub async fn handle_connection<S>(
    peer: SocketAddr,
    websocket: WebSocketStream<S>,
    state: Arc<AppState>
)
    where S: AsyncRead + AsyncWrite + Unpin
{
    info!("New WebSocket connection: {}", peer);

    let (mut tx, mut rx) = websocket.split();
    let (hub_tx, mut hub_rx) = unbounded_channel::<ServerMessage>();
    let connection_id = state.hub.register(hub_tx).await;
    info!("Assigned connection ID {} to {}", connection_id, peer);

    loop {
        tokio::select! {
            outbound = hub_rx.recv() => {
                let message = match outbound {
                    Some(message) => message,
                    None => break,
                };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to encode outbound message for {}: {}", peer, e);
                        continue;
                    }
                };
                if tx.send(Message::Text(json)).await.is_err() {
                    error!("Failed to deliver message to {}", peer);
                    break;
                }
            }
            inbound = rx.next() => {
                let msg = match inbound {
                    Some(msg) => msg,
                    None => break,
                };
                match msg {
                    Ok(message) => {
                        if message.len() > MAX_MESSAGE_SIZE {
                            warn!(
                                "Message from {} exceeds size limit ({} > {})",
                                peer,
                                message.len(),
                                MAX_MESSAGE_SIZE
                            );
                            if send_error(&mut tx, "Message too large").await.is_err() {
                                error!("Failed to send size limit error to {}", peer);
                            }
                            break;
                        }

                        match message {
                            Message::Text(text) => {
                                match serde_json::from_str::<ClientMessage>(&text) {
                                    Ok(ClientMessage::Join { token }) => {
                                        handle_join(
                                            &state,
                                            &connection_id,
                                            &token,
                                            &mut tx,
                                            peer
                                        ).await;
                                    }
                                    Err(e) => {
                                        error!("Failed to parse message from {}: {}", peer, e);
                                        let text = format!("Failed to parse message: {}", e);
                                        if send_error(&mut tx, &text).await.is_err() {
                                            error!("Error sending parse error to {}", peer);
                                            break;
                                        }
                                    }
                                }
                            }
                            Message::Close(_) => {
                                info!("Received close frame from {}", peer);
                                break;
                            }
                            Message::Ping(ping_data) => {
                                if tx.send(Message::Pong(ping_data)).await.is_err() {
                                    error!("Failed to send pong to {}", peer);
                                    break;
                                }
                            }
                            Message::Pong(_) => {/* Usually ignore pongs */}
                            Message::Binary(_) => {
                                warn!("Ignoring binary message from {}", peer);
                            }
                            Message::Frame(_) => {/* Usually ignore raw frames */}
                        }
                    }
                    Err(e) => {
                        match e {
                            | tokio_tungstenite::tungstenite::Error::ConnectionClosed
                            | tokio_tungstenite::tungstenite::Error::Protocol(_)
                            | tokio_tungstenite::tungstenite::Error::Utf8 => {
                                info!("WebSocket connection closed or protocol error for {}: {}", peer, e);
                            }
                            tokio_tungstenite::tungstenite::Error::Io(ref io_err) if
                                io_err.kind() == std::io::ErrorKind::ConnectionReset
                            => {
                                info!("WebSocket connection reset by peer {}", peer);
                            }
                            _ => {
                                error!("Error receiving message from {}: {}", peer, e);
                            }
                        }
                        break;
                    }
                }
            }
        }
    }

    state.hub.disconnect(&connection_id).await;
    info!("WebSocket connection closed for {} (Connection ID: {})", peer, connection_id);
}

/// Joining the admin bearer value enters the admin room; anything else must
/// be a well-formed token resolving to a live conversation.
async fn handle_join<S>(
    state: &AppState,
    connection_id: &str,
    token: &str,
    tx: &mut S,
    peer: SocketAddr
)
    where S: SinkExt<Message> + Unpin, S::Error: std::fmt::Display
{
    let is_admin = state.args.admin_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(|t| t == token)
        .unwrap_or(false);

    let room = if is_admin {
        ADMIN_ROOM.to_string()
    } else {
        match state.router.resolve_token(token).await {
            Ok(project) if project.status == ProjectStatus::Active => project.access_token,
            Ok(_) => {
                warn!("Join rejected for {}: conversation not active", peer);
                if let Err(e) = send_error(tx, "Conversation is no longer available").await {
                    error!("Error sending join rejection to {}: {}", peer, e);
                }
                return;
            }
            Err(e) => {
                warn!("Join rejected for {}: {}", peer, e);
                if let Err(e) = send_error(tx, "Invalid conversation token").await {
                    error!("Error sending join rejection to {}: {}", peer, e);
                }
                return;
            }
        }
    };

    if !state.hub.join(connection_id, &room).await {
        error!("Join failed for unregistered connection {}", connection_id);
        return;
    }

    let joined = ServerMessage::Joined {
        token: room,
        connection_id: connection_id.to_string(),
    };
    match serde_json::to_string(&joined) {
        Ok(json) => {
            if let Err(e) = tx.send(Message::Text(json)).await {
                error!("Error sending joined ack to {}: {}", peer, e);
            }
        }
        Err(e) => error!("Failed to encode joined ack: {}", e),
    }
}

async fn send_error<S>(tx: &mut S, text: &str) -> Result<(), String>
    where S: SinkExt<Message> + Unpin, S::Error: std::fmt::Display
{
    let message = ServerMessage::Error { message: text.to_string() };
    let json = serde_json::to_string(&message).map_err(|e| e.to_string())?;
    tx.send(Message::Text(json)).await.map_err(|e| e.to_string())
}

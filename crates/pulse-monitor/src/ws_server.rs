// WebSocket endpoint for realtime dashboard updates, plus the plain-HTTP
// `/health` and `/health/ready` checks on the same port.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::auth::hash_token;
use crate::db::Database;
use crate::realtime::{ConnectionManager, Event};
use crate::scheduler::Scheduler;

pub const WS_PATH: &str = "/ws";
pub const HEALTH_PATH: &str = "/health";
pub const READY_PATH: &str = "/health/ready";

/// Longest request head read for a health check.
const MAX_HEAD_BYTES: usize = 8 * 1024;
const HEAD_WAIT: Duration = Duration::from_secs(5);

/// Shared handles every connection task needs.
#[derive(Clone)]
pub struct ServerState {
    pub db: Arc<Database>,
    pub realtime: Arc<ConnectionManager>,
    pub scheduler: Arc<Scheduler>,
}

/// Messages a client may send. Anything else is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping,
    Subscribe {
        #[serde(default)]
        channel: Option<String>,
    },
    Echo {
        #[serde(default)]
        data: Value,
    },
}

/// Reply to one text frame from a client, if it warrants one.
pub fn handle_client_message(text: &str) -> Option<Event> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Some(Event::error("Invalid JSON")),
    };
    match serde_json::from_value::<ClientMessage>(value) {
        Ok(ClientMessage::Ping) => Some(Event::Pong),
        Ok(ClientMessage::Subscribe { channel }) => Some(Event::subscribed(channel)),
        Ok(ClientMessage::Echo { data }) => Some(Event::Echo { data }),
        Err(e) => {
            debug!("ignoring client message: {e}");
            None
        }
    }
}

/// `token` query parameter of a request target such as `/ws?token=abc`,
/// percent-decoded.
pub fn token_from_query(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// Bind `host:port` and serve until the task is cancelled.
pub async fn run(host: &str, port: u16, state: ServerState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    serve(listener, state).await
}

/// Accept connections on `listener`, one task per client.
pub async fn serve(listener: TcpListener, state: ServerState) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on ws://{local_addr}{WS_PATH}");

    loop {
        let (stream, addr) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            handle_connection(stream, addr.to_string(), state).await;
        });
    }
}

/// Status code and JSON body for a health path, `None` for any other path.
pub fn health_response(path: &str, state: &ServerState) -> Option<(StatusCode, Value)> {
    match path {
        HEALTH_PATH => Some((StatusCode::OK, json!({ "status": "healthy" }))),
        READY_PATH => {
            let database = state.db.ping();
            let scheduler = state.scheduler.is_running();
            let ready = database && scheduler;
            let body = json!({
                "status": if ready { "ready" } else { "not_ready" },
                "checks": {
                    "database": database,
                    // No cache tier in this deployment.
                    "redis": false,
                    "scheduler": scheduler,
                },
            });
            let code = if ready {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            Some((code, body))
        }
        _ => None,
    }
}

/// Method and path of an HTTP request line. `None` until `buf` holds a
/// complete line.
fn request_line(buf: &[u8]) -> Option<(&str, String)> {
    let end = buf.windows(2).position(|w| w == b"\r\n")?;
    let line = std::str::from_utf8(&buf[..end]).ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let target: Uri = parts.next()?.parse().ok()?;
    Some((method, target.path().to_string()))
}

/// Wait for the request line. Data stays in the socket so the WebSocket
/// handshake can still read it. Returns whether it is a GET, and the path.
async fn peek_request_path(stream: &TcpStream) -> Option<(bool, String)> {
    tokio::time::timeout(HEAD_WAIT, wait_for_request_line(stream))
        .await
        .ok()
        .flatten()
}

async fn wait_for_request_line(stream: &TcpStream) -> Option<(bool, String)> {
    let mut buf = vec![0u8; MAX_HEAD_BYTES];
    loop {
        let n = stream.peek(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        if let Some((method, path)) = request_line(&buf[..n]) {
            return Some((method == "GET", path));
        }
        if n == buf.len() {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Read the rest of the request head, write a JSON response and close.
async fn answer_health(mut stream: TcpStream, code: StatusCode, body: Value) -> std::io::Result<()> {
    let mut head: Vec<u8> = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") && head.len() < MAX_HEAD_BYTES {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..n]);
    }

    let body = body.to_string();
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        code.as_u16(),
        code.canonical_reason().unwrap_or(""),
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

async fn handle_connection(stream: TcpStream, addr: String, state: ServerState) {
    if let Some((true, path)) = peek_request_path(&stream).await {
        if let Some((code, body)) = health_response(&path, &state) {
            debug!("health check {path} from {addr}: {code}");
            if let Err(e) = answer_health(stream, code, body).await {
                debug!("health reply to {addr} failed: {e}");
            }
            return;
        }
    }

    let ServerState { db, realtime, .. } = state;
    let mut token = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() != WS_PATH {
            let mut err = ErrorResponse::new(Some("not found".into()));
            *err.status_mut() = StatusCode::NOT_FOUND;
            return Err(err);
        }
        token = token_from_query(req.uri().query());
        Ok(resp)
    };

    let mut ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };

    let user = match token.map(|t| db.user_by_token_hash(&hash_token(&t))) {
        Some(Ok(Some(user))) => user,
        Some(Err(e)) => {
            warn!("token lookup failed for {addr}: {e:#}");
            close_policy(&mut ws, &addr).await;
            return;
        }
        _ => {
            info!("rejecting {addr}: missing or unknown token");
            close_policy(&mut ws, &addr).await;
            return;
        }
    };

    let user_id = user.id;
    let (conn_id, mut events) = realtime.connect(user_id);
    info!(user_id, "client {addr} connected");

    let (mut write, read) = ws.split();
    let (reply_tx, mut replies) = mpsc::channel::<Event>(32);

    let writer = tokio::spawn(async move {
        if write
            .send(Message::Text(Event::connection_established(user_id).to_json().into()))
            .await
            .is_err()
        {
            return;
        }
        loop {
            let event = tokio::select! {
                Some(e) = events.recv() => e,
                Some(e) = replies.recv() => e,
                else => break,
            };
            if write.send(Message::Text(event.to_json().into())).await.is_err() {
                break;
            }
        }
    });

    let _ = process_message_stream(read, &reply_tx, &addr).await;

    drop(reply_tx);
    realtime.disconnect(user_id, conn_id);
    let _ = writer.await;
    info!(user_id, "client {addr} disconnected");
}

async fn close_policy(ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>, addr: &str) {
    let frame = CloseFrame {
        code: CloseCode::Policy,
        reason: "Invalid token".into(),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        debug!("close for {addr} failed: {e}");
    }
}

/// Answer text frames from `stream`, sending replies through `tx`. Stops on
/// a close frame or read error. Returns `Err(())` if the reply channel is
/// closed.
pub async fn process_message_stream<St>(
    mut stream: St,
    tx: &mpsc::Sender<Event>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if let Some(reply) = handle_client_message(&text) {
                    if tx.send(reply).await.is_err() {
                        return Err(());
                    }
                }
            }
            Ok(Message::Close(_)) => {
                debug!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {}
        }
    }
    Ok(())
}

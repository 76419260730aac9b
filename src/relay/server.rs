use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt, sink, stream};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HandshakeRequest, Response as HandshakeResponse,
};
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};

use super::messages::{Call, ChatFrame, Request, ServerMessage};
use super::metadata::{CallMetadata, PARTICIPANT_ID_KEY, ROOM_ID_KEY};
use super::registry::RegistryHandle;
use super::service::ChatService;
use super::types::{ChatMessage, RelayError};

pub const DEFAULT_RELAY_PORT: u16 = 8061;

/// Upgrade path that opens a chat stream instead of a request connection
pub const CHAT_PATH: &str = "/chat";

const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub struct RelayServer {
    listener: TcpListener,
    service: ChatService,
}

impl RelayServer {
    /// Bind the listener and start a fresh registry
    pub async fn bind(addr: impl ToSocketAddrs) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::with_service(
            listener,
            ChatService::new(RegistryHandle::spawn()),
        ))
    }

    pub fn with_service(listener: TcpListener, service: ChatService) -> Self {
        Self { listener, service }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn service(&self) -> &ChatService {
        &self.service
    }

    pub async fn run(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let RelayServer { listener, service } = self;
        info!("Relay server listening on {}", listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Relay server shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let service = service.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, service).await {
                                error!("Connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                }
            }
        }

        Ok(())
    }
}

/// What the upgrade request asked for
#[derive(Debug, Default)]
struct Route {
    chat: bool,
    metadata: CallMetadata,
}

impl Route {
    fn from_request(req: &HandshakeRequest) -> Self {
        let metadata = [PARTICIPANT_ID_KEY, ROOM_ID_KEY]
            .into_iter()
            .filter_map(|key| {
                // undecodable bytes survive as U+FFFD and fail to parse as an id
                let value = req.headers().get(key)?;
                Some((key, String::from_utf8_lossy(value.as_bytes()).into_owned()))
            })
            .collect();

        Self {
            chat: req.uri().path() == CHAT_PATH,
            metadata,
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    service: ChatService,
) -> Result<(), BoxError> {
    let mut route = Route::default();
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &HandshakeRequest, resp: HandshakeResponse| {
            route = Route::from_request(req);
            Ok::<_, ErrorResponse>(resp)
        },
    )
    .await?;

    if route.chat {
        info!("Chat stream connection from {}", addr);
        handle_chat(ws_stream, route.metadata, service).await
    } else {
        info!("WebSocket connection from {}", addr);
        handle_calls(ws_stream, addr, service).await
    }
}

async fn write_message(ws_tx: &mut WsSink, msg: &ServerMessage) -> Result<(), BoxError> {
    let json = serde_json::to_string(msg)?;
    ws_tx.send(Message::Text(json.into())).await?;
    Ok(())
}

/// Forward replies and control frames to the socket until both senders are gone
fn spawn_writer(
    mut ws_tx: WsSink,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
    mut ctrl_rx: mpsc::UnboundedReceiver<Message>,
) -> JoinHandle<WsSink> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    if let Err(e) = write_message(&mut ws_tx, &msg).await {
                        debug!("Send failed: {}", e);
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
        ws_tx
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeepaliveEvent {
    /// Time to ping the peer
    Ping,
    /// The last ping went unanswered
    Expired,
}

/// Ping/pong liveness for one connection
struct Keepalive {
    ping: Interval,
    pong_deadline: Option<Instant>,
}

impl Keepalive {
    fn new() -> Self {
        Self {
            ping: tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL),
            pong_deadline: None,
        }
    }

    /// Resolves when a ping is due or the outstanding pong is overdue.
    /// Cancel safe: state only changes once a result is returned.
    async fn tick(&mut self) -> KeepaliveEvent {
        let deadline = self.pong_deadline;
        let overdue = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        let ping_due = tokio::select! {
            _ = self.ping.tick() => true,
            _ = overdue => false,
        };
        if !ping_due || self.pong_deadline.is_some() {
            return KeepaliveEvent::Expired;
        }
        self.pong_deadline = Some(Instant::now() + PONG_TIMEOUT);
        KeepaliveEvent::Ping
    }

    fn pong(&mut self) {
        self.pong_deadline = None;
    }
}

/// Request connection: each text frame is one call
async fn handle_calls(
    ws_stream: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    service: ChatService,
) -> Result<(), BoxError> {
    let (ws_tx, mut ws_rx) = ws_stream.split();

    let (tx, rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<Message>();
    let send_task = spawn_writer(ws_tx, rx, ctrl_rx);
    let mut keepalive = Keepalive::new();

    loop {
        tokio::select! {
            event = keepalive.tick() => match event {
                KeepaliveEvent::Ping => {
                    if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                        break;
                    }
                    debug!("Ping sent to {}", addr);
                }
                KeepaliveEvent::Expired => {
                    warn!("Pong timeout, disconnecting {}", addr);
                    break;
                }
            },

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => handle_request(&text, &tx, &service).await,
                    Message::Pong(_) => {
                        keepalive.pong();
                        debug!("Pong received from {}", addr);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", addr);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // disconnecting is not logging out
    send_task.abort();
    info!("WebSocket disconnected: {}", addr);

    Ok(())
}

async fn handle_request(
    text: &str,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    service: &ChatService,
) {
    let reject = |id: Option<u64>, e: serde_json::Error| {
        let err = RelayError::InvalidArgument(format!("invalid request: {e}"));
        let _ = tx.send(ServerMessage::error(id, &err));
    };

    // read the id on its own so a bad parameter can still be answered
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return reject(None, e),
    };
    let id = value.get("id").and_then(serde_json::Value::as_u64);
    let request: Request = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => return reject(id, e),
    };

    let id = request.id;
    if let Err(e) = dispatch(request, tx, service).await {
        debug!(request_id = id, error = %e, "call failed");
        let _ = tx.send(ServerMessage::error(Some(id), &e));
    }
}

async fn dispatch(
    request: Request,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    service: &ChatService,
) -> Result<(), RelayError> {
    let Request { id, metadata, call } = request;

    let reply = match call {
        Call::Login => {
            let participant_id = service.login().await?;
            ServerMessage::LoggedIn { id, participant_id }
        }

        Call::Logout => {
            service.logout(&metadata).await?;
            ServerMessage::Done { id }
        }

        Call::ListRooms => {
            for room in service.list_rooms().await? {
                let _ = tx.send(ServerMessage::room(id, room));
            }
            ServerMessage::Done { id }
        }

        Call::CreateRoom { room_name } => {
            let room = service.create_room(room_name).await?;
            ServerMessage::room(id, room)
        }

        Call::RemoveRoom { room_id } => {
            service.remove_room(room_id).await?;
            ServerMessage::Done { id }
        }

        Call::EnterRoom { room_id } => {
            service.enter_room(&metadata, room_id).await?;
            ServerMessage::Done { id }
        }

        Call::ExitRoom => {
            service.exit_room(&metadata).await?;
            ServerMessage::Done { id }
        }
    };

    let _ = tx.send(reply);
    Ok(())
}

/// Chat stream connection: relay text frames for one participant in one room
async fn handle_chat(
    ws_stream: WebSocketStream<TcpStream>,
    metadata: CallMetadata,
    service: ChatService,
) -> Result<(), BoxError> {
    let (mut ws_tx, ws_rx) = ws_stream.split();

    let session = match service.open_chat(&metadata).await {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "chat stream rejected");
            write_message(&mut ws_tx, &ServerMessage::error(None, &e)).await?;
            ws_tx.close().await?;
            return Ok(());
        }
    };

    let (tx, rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<Message>();
    let send_task = spawn_writer(ws_tx, rx, ctrl_rx);

    let outbound = sink::unfold(tx, |tx, message: ChatMessage| async move {
        tx.send(ServerMessage::Chat { text: message.text })
            .map_err(|_| RelayError::Unavailable("connection closed".to_string()))?;
        Ok::<_, RelayError>(tx)
    });

    let result = session
        .run(Box::pin(chat_inbound(ws_rx, ctrl_tx)), Box::pin(outbound))
        .await;

    // both senders are gone once the session returns, so the writer drains and stops
    let mut ws_tx = send_task.await?;
    if let Err(e) = &result {
        let _ = write_message(&mut ws_tx, &ServerMessage::error(None, e)).await;
    }
    let _ = ws_tx.close().await;

    Ok(())
}

/// Client frames as chat lines. Ends on `{"end": true}` or a Close frame;
/// a missed pong surfaces as `Unavailable`.
fn chat_inbound(
    ws_rx: WsSource,
    ctrl_tx: mpsc::UnboundedSender<Message>,
) -> impl Stream<Item = Result<ChatMessage, RelayError>> + Send {
    let state = (ws_rx, ctrl_tx, Keepalive::new());
    stream::unfold(state, |(mut ws_rx, ctrl_tx, mut keepalive)| async move {
        loop {
            let frame = tokio::select! {
                event = keepalive.tick() => match event {
                    KeepaliveEvent::Ping => {
                        if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                            return None;
                        }
                        continue;
                    }
                    KeepaliveEvent::Expired => {
                        Err(RelayError::Unavailable("pong timeout".to_string()))
                    }
                },
                msg = ws_rx.next() => match msg? {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ChatFrame>(&text) {
                        Ok(ChatFrame::Line(message)) => Ok(message),
                        Ok(ChatFrame::End { end: true }) => return None,
                        Ok(ChatFrame::End { end: false }) => continue,
                        Err(e) => Err(RelayError::InvalidArgument(format!(
                            "invalid chat frame: {e}"
                        ))),
                    },
                    Ok(Message::Pong(_)) => {
                        keepalive.pong();
                        continue;
                    }
                    Ok(Message::Close(_)) => return None,
                    Ok(_) => continue,
                    Err(e) => Err(RelayError::Unavailable(e.to_string())),
                },
            };
            return Some((frame, (ws_rx, ctrl_tx, keepalive)));
        }
    })
}

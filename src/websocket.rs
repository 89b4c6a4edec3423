//! # WebSocket Spectrogram Endpoint
//!
//! Clients connect to `/spectrogram` (or `/ws`) and exchange hybrid frames:
//! text frames carry JSON-only messages, binary frames carry a JSON header
//! followed by an aligned payload (see `protocol`).
//!
//! ## Connection Lifecycle:
//! 1. **Admission**: the upgrade is refused with 503 when every session slot is taken
//! 2. **Open**: the server sends `status: "Server started"`
//! 3. **Requests**: inbound frames are queued to a per-connection worker on
//!    tokio's blocking pool, which runs the `ConnectionSession` one request
//!    at a time; replies come back through the actor mailbox
//! 4. **Heartbeat**: a ping every 30 seconds, the connection is closed after
//!    60 seconds without hearing from the client
//! 5. **Close**: the session is cancelled and the slot released
//!
//! ## Actor Model:
//! The actor only moves frames. Decoding, routing and computation happen on
//! the worker thread, so a long FFT never blocks pings or other connections.

use crate::audio::WavDecoder;
use crate::error::{AppError, RequestError};
use crate::observer::{SessionObserver, TracingObserver};
use crate::protocol::{ProtocolError, WireFrame};
use crate::session::{ConnectionSession, Outbox, SessionSettings};
use crate::state::AppState;

use actix::prelude::*;
use actix_http::ws::Item;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the server pings the client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Silence after which the connection is considered dead.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// WebSocket actor for one client connection.
pub struct SpectrogramSocket {
    session: Arc<ConnectionSession>,

    /// Feeds the blocking worker; `None` until started and after stop
    queue: Option<mpsc::UnboundedSender<WireFrame>>,

    /// Reassembles fragmented messages
    fragments: FragmentAssembler,

    state: AppState,

    /// Last time anything arrived from the client
    last_heartbeat: Instant,
}

impl SpectrogramSocket {
    pub fn new(session: ConnectionSession, state: AppState, max_message_bytes: usize) -> Self {
        Self {
            session: Arc::new(session),
            queue: None,
            fragments: FragmentAssembler::new(max_message_bytes),
            state,
            last_heartbeat: Instant::now(),
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection = act.session.id(), "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    /// Start the worker that runs the session off the actor's thread.
    fn start_worker(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<WireFrame>();
        let session = self.session.clone();
        let mut outbox = MailboxOutbox {
            addr: ctx.address(),
        };

        session.open(&mut outbox);

        tokio::task::spawn_blocking(move || {
            while let Some(frame) = rx.blocking_recv() {
                if session.is_closed() {
                    break;
                }
                session.receive(frame, &mut outbox);
            }
            debug!(connection = session.id(), "Session worker finished");
        });

        self.queue = Some(tx);
    }

    fn enqueue(&mut self, frame: WireFrame, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(queue) = &self.queue else {
            return;
        };
        if queue.send(frame).is_err() {
            error!(connection = self.session.id(), "Session worker stopped unexpectedly");
            ctx.stop();
        }
    }
}

/// A frame produced by the session, to be written to the socket.
#[derive(Message)]
#[rtype(result = "()")]
struct Outgoing(WireFrame);

/// Outbox that posts frames to the actor's mailbox.
struct MailboxOutbox {
    addr: Addr<SpectrogramSocket>,
}

impl Outbox for MailboxOutbox {
    fn send(&mut self, frame: WireFrame) {
        self.addr.do_send(Outgoing(frame));
    }
}

impl Actor for SpectrogramSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.start_heartbeat(ctx);
        self.start_worker(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.session.close();
        self.queue = None;
        self.state.decrement_active_sessions();
    }
}

impl Handler<Outgoing> for SpectrogramSocket {
    type Result = ();

    fn handle(&mut self, msg: Outgoing, ctx: &mut Self::Context) {
        match msg.0 {
            WireFrame::Text(text) => ctx.text(text),
            WireFrame::Binary(bytes) => ctx.binary(bytes),
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SpectrogramSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                error!(connection = self.session.id(), error = %err, "WebSocket protocol error");
                ctx.stop();
                return;
            }
        };

        self.last_heartbeat = Instant::now();
        match msg {
            ws::Message::Text(text) => self.enqueue(WireFrame::Text(text.to_string()), ctx),
            ws::Message::Binary(data) => self.enqueue(WireFrame::Binary(data.to_vec()), ctx),
            ws::Message::Continuation(item) => match self.fragments.push(item) {
                Ok(Some(frame)) => self.enqueue(frame, ctx),
                Ok(None) => {}
                Err(err) => {
                    warn!(connection = self.session.id(), error = %err, "Dropping fragmented message");
                    self.state.increment_frames_dropped();
                }
            },
            ws::Message::Ping(data) => ctx.pong(&data),
            ws::Message::Pong(_) => {}
            ws::Message::Close(reason) => {
                info!(connection = self.session.id(), ?reason, "Client closed WebSocket");
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Nop => {}
        }
    }
}

/// Why a fragmented message could not be reassembled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentError {
    #[error("continuation frame without a message in progress")]
    NotStarted,

    #[error("fragmented message exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("fragmented text message is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FragmentKind {
    Text,
    Binary,
}

/// Joins continuation frames back into one text or binary message.
#[derive(Debug)]
pub struct FragmentAssembler {
    kind: Option<FragmentKind>,
    buffer: Vec<u8>,
    limit: usize,
    /// Set once the message in progress went over `limit`
    discarding: bool,
}

impl FragmentAssembler {
    pub fn new(limit: usize) -> Self {
        Self {
            kind: None,
            buffer: Vec::new(),
            limit,
            discarding: false,
        }
    }

    /// Add one fragment; returns the complete message after the last one.
    pub fn push(&mut self, item: Item) -> Result<Option<WireFrame>, FragmentError> {
        let (first, chunk, last) = match item {
            Item::FirstText(chunk) => (Some(FragmentKind::Text), chunk, false),
            Item::FirstBinary(chunk) => (Some(FragmentKind::Binary), chunk, false),
            Item::Continue(chunk) => (None, chunk, false),
            Item::Last(chunk) => (None, chunk, true),
        };

        let kind = match first.or(self.kind) {
            Some(kind) => kind,
            None => return Err(FragmentError::NotStarted),
        };
        if first.is_some() {
            self.buffer.clear();
            self.discarding = false;
        }
        self.kind = Some(kind);

        if !self.discarding {
            if self.buffer.len() + chunk.len() > self.limit {
                self.discarding = true;
                self.buffer = Vec::new();
            } else {
                self.buffer.extend_from_slice(&chunk);
            }
        }

        if !last {
            return Ok(None);
        }

        self.kind = None;
        let buffer = std::mem::take(&mut self.buffer);
        if std::mem::replace(&mut self.discarding, false) {
            return Err(FragmentError::TooLarge { limit: self.limit });
        }

        match kind {
            FragmentKind::Text => String::from_utf8(buffer)
                .map(|text| Some(WireFrame::Text(text)))
                .map_err(|_| FragmentError::InvalidUtf8),
            FragmentKind::Binary => Ok(Some(WireFrame::Binary(buffer))),
        }
    }
}

/// Logs through `TracingObserver` and keeps the server counters current.
struct MetricsObserver {
    inner: TracingObserver,
    state: AppState,
}

impl SessionObserver for MetricsObserver {
    fn connection_opened(&self, connection: &str) {
        self.inner.connection_opened(connection);
    }

    fn connection_closed(&self, connection: &str) {
        self.inner.connection_closed(connection);
    }

    fn frame_dropped(&self, connection: &str, error: &ProtocolError) {
        self.state.increment_frames_dropped();
        self.inner.frame_dropped(connection, error);
    }

    fn housekeeping(&self, connection: &str, kind: &str, content: &Value) {
        self.inner.housekeeping(connection, kind, content);
    }

    fn unknown_message(&self, connection: &str, kind: &str, content: &Value) {
        self.inner.unknown_message(connection, kind, content);
    }

    fn request_started(&self, connection: &str, kind: &str, source: &str) {
        self.inner.request_started(connection, kind, source);
    }

    fn request_failed(&self, connection: &str, kind: &str, error: &RequestError) {
        self.inner.request_failed(connection, kind, error);
    }

    fn spectrogram_delivered(&self, connection: &str, extent: [usize; 2], elapsed: Duration) {
        self.state.increment_spectrograms_served();
        self.inner.spectrogram_delivered(connection, extent, elapsed);
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Claims a session slot, builds the connection's session from the current
/// configuration and hands the socket to a `SpectrogramSocket` actor with the
/// frame size limit raised to `performance.max_frame_bytes`.
pub async fn spectrogram_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let config = app_state.get_config();
    let max_sessions = config.performance.max_concurrent_sessions;

    if !app_state.try_open_session(max_sessions) {
        warn!(max_sessions, "Refusing WebSocket connection, all session slots in use");
        return Err(AppError::Unavailable(format!(
            "all {} session slots are in use",
            max_sessions
        ))
        .into());
    }

    let connection_id = Uuid::new_v4().to_string();
    let peer = req.connection_info().peer_addr().map(str::to_string);
    info!(connection = %connection_id, ?peer, "New WebSocket connection request");

    let state = app_state.get_ref().clone();
    let observer = Arc::new(MetricsObserver {
        inner: TracingObserver,
        state: state.clone(),
    });
    let session = ConnectionSession::new(
        connection_id,
        SessionSettings::from_config(&config),
        Arc::new(WavDecoder),
        observer,
    );

    let max_frame_bytes = config.performance.max_frame_bytes;
    let socket = SpectrogramSocket::new(session, state, max_frame_bytes);
    let response = ws::WsResponseBuilder::new(socket, &req, stream)
        .frame_size(max_frame_bytes)
        .start();

    if response.is_err() {
        app_state.decrement_active_sessions();
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::http::{header, StatusCode};
    use actix_web::web::Bytes;
    use actix_web::{test as actix_test, App};

    #[test]
    fn test_fragments_reassemble_binary() {
        let mut assembler = FragmentAssembler::new(1024);
        assert_eq!(assembler.push(Item::FirstBinary(Bytes::from_static(b"ab"))), Ok(None));
        assert_eq!(assembler.push(Item::Continue(Bytes::from_static(b"cd"))), Ok(None));
        assert_eq!(
            assembler.push(Item::Last(Bytes::from_static(b"e"))),
            Ok(Some(WireFrame::Binary(b"abcde".to_vec())))
        );
    }

    #[test]
    fn test_fragments_reassemble_text() {
        let mut assembler = FragmentAssembler::new(1024);
        assembler.push(Item::FirstText(Bytes::from_static(b"{\"type\":"))).unwrap();
        let frame = assembler
            .push(Item::Last(Bytes::from_static(b"\"status\",\"content\":null}")))
            .unwrap();
        assert_eq!(
            frame,
            Some(WireFrame::Text(r#"{"type":"status","content":null}"#.to_string()))
        );
    }

    #[test]
    fn test_oversized_message_is_dropped_and_next_one_works() {
        let mut assembler = FragmentAssembler::new(4);
        assembler.push(Item::FirstBinary(Bytes::from_static(b"abc"))).unwrap();
        assembler.push(Item::Continue(Bytes::from_static(b"def"))).unwrap();
        assert_eq!(
            assembler.push(Item::Last(Bytes::from_static(b"g"))),
            Err(FragmentError::TooLarge { limit: 4 })
        );

        assembler.push(Item::FirstBinary(Bytes::from_static(b"ab"))).unwrap();
        assert_eq!(
            assembler.push(Item::Last(Bytes::from_static(b"cd"))),
            Ok(Some(WireFrame::Binary(b"abcd".to_vec())))
        );
    }

    #[test]
    fn test_continuation_without_start() {
        let mut assembler = FragmentAssembler::new(16);
        assert_eq!(
            assembler.push(Item::Continue(Bytes::from_static(b"x"))),
            Err(FragmentError::NotStarted)
        );
        assert_eq!(
            assembler.push(Item::Last(Bytes::from_static(b"x"))),
            Err(FragmentError::NotStarted)
        );
    }

    #[test]
    fn test_invalid_utf8_text() {
        let mut assembler = FragmentAssembler::new(16);
        assembler.push(Item::FirstText(Bytes::from_static(&[0xff]))).unwrap();
        assert_eq!(
            assembler.push(Item::Last(Bytes::from_static(&[0xfe]))),
            Err(FragmentError::InvalidUtf8)
        );
    }

    #[actix_web::test]
    async fn test_upgrade_refused_at_capacity() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 1;
        let state = AppState::new(config);
        assert!(state.try_open_session(1));

        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/spectrogram", web::get().to(spectrogram_websocket)),
        )
        .await;

        let req = actix_test::TestRequest::get()
            .uri("/spectrogram")
            .insert_header((header::UPGRADE, "websocket"))
            .insert_header((header::CONNECTION, "upgrade"))
            .insert_header((header::SEC_WEBSOCKET_VERSION, "13"))
            .insert_header((header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ=="))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.get_metrics_snapshot().active_sessions, 1);
    }

    #[actix_web::test]
    async fn test_failed_handshake_releases_slot() {
        let state = AppState::new(AppConfig::default());
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/spectrogram", web::get().to(spectrogram_websocket)),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/spectrogram").to_request();
        let resp = actix_test::call_service(&app, req).await;

        assert!(resp.status().is_client_error());
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }
}

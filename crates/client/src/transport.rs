//! Session stream transport
//!
//! One WebSocket per active session. The connection task owns the socket,
//! reconnects with a constant delay for as long as the handle is alive, and
//! delivers every inbound frame tagged with the session it belongs to.
//! It knows nothing about what the frames mean.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dossier_protocol::{ClientFrame, ServerEvent};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, ClientResult};

/// Identifies which session switch a frame or response belongs to.
/// `epoch` increments on every switch, so A→B→A still separates the two A's.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionTag {
    pub session_id: String,
    pub epoch: u64,
}

impl SessionTag {
    pub fn new(session_id: impl Into<String>, epoch: u64) -> Self {
        Self {
            session_id: session_id.into(),
            epoch,
        }
    }
}

impl fmt::Display for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.session_id, self.epoch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    #[default]
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    State(ConnectionState),
    Frame(ServerEvent),
}

/// Receives transport output; implementations only enqueue
pub type TransportSink = Arc<dyn Fn(SessionTag, TransportEvent) + Send + Sync>;

/// A live (or reconnecting) stream for one session
pub trait Connection: Send {
    /// Queue a frame; frames sent while reconnecting go out on reopen
    fn send(&self, frame: ClientFrame) -> ClientResult<()>;

    /// Stop delivery and tear down. Idempotent; nothing reaches the sink afterwards.
    fn close(&mut self);
}

pub trait Connector {
    type Conn: Connection;

    fn connect(&self, tag: SessionTag, sink: TransportSink) -> Self::Conn;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WsConnector {
    ws_base: String,
    reconnect_delay: Duration,
}

impl WsConnector {
    pub fn new(ws_base: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            ws_base: ws_base.into(),
            reconnect_delay,
        }
    }

    fn url_for(&self, session_id: &str) -> String {
        format!("{}/ws/{}", self.ws_base.trim_end_matches('/'), session_id)
    }
}

impl Connector for WsConnector {
    type Conn = WsConnection;

    fn connect(&self, tag: SessionTag, sink: TransportSink) -> WsConnection {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let closed = Arc::new(AtomicBool::new(false));

        let task = ConnectionTask {
            url: self.url_for(&tag.session_id),
            tag: tag.clone(),
            sink,
            closed: closed.clone(),
            reconnect_delay: self.reconnect_delay,
        };
        tokio::spawn(task.run(outbound_rx, shutdown_rx));

        WsConnection {
            tag,
            outbound_tx,
            shutdown_tx,
            closed,
        }
    }
}

pub struct WsConnection {
    tag: SessionTag,
    outbound_tx: mpsc::UnboundedSender<ClientFrame>,
    shutdown_tx: watch::Sender<bool>,
    closed: Arc<AtomicBool>,
}

impl Connection for WsConnection {
    fn send(&self, frame: ClientFrame) -> ClientResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionClosed);
        }
        self.outbound_tx
            .send(frame)
            .map_err(|_| ClientError::ConnectionClosed)
    }

    fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        debug!(
            component = "transport",
            event = "ws.close_requested",
            session = %self.tag,
        );
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.close();
    }
}

struct ConnectionTask {
    url: String,
    tag: SessionTag,
    sink: TransportSink,
    closed: Arc<AtomicBool>,
    reconnect_delay: Duration,
}

/// Why an open socket stopped
enum SocketEnd {
    Shutdown,
    Dropped,
}

impl ConnectionTask {
    fn deliver(&self, event: TransportEvent) {
        if !self.closed.load(Ordering::SeqCst) {
            (self.sink)(self.tag.clone(), event);
        }
    }

    async fn run(
        self,
        mut outbound_rx: mpsc::UnboundedReceiver<ClientFrame>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        // Frame that failed mid-send; retried first after reconnecting
        let mut pending: Option<ClientFrame> = None;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            self.deliver(TransportEvent::State(ConnectionState::Connecting));

            let connected = tokio::select! {
                result = tokio_tungstenite::connect_async(self.url.as_str()) => result,
                _ = shutdown_rx.changed() => break,
            };

            match connected {
                Ok((socket, _)) => {
                    info!(
                        component = "transport",
                        event = "ws.connection.opened",
                        session = %self.tag,
                        url = %self.url,
                    );
                    self.deliver(TransportEvent::State(ConnectionState::Open));
                    let (mut ws_tx, mut ws_rx) = socket.split();

                    let end = loop {
                        if let Some(frame) = pending.take() {
                            if let Err(frame) = send_frame(&mut ws_tx, frame).await {
                                pending = Some(frame);
                                break SocketEnd::Dropped;
                            }
                        }

                        tokio::select! {
                            _ = shutdown_rx.changed() => {
                                let _ = ws_tx.send(WsMessage::Close(None)).await;
                                break SocketEnd::Shutdown;
                            }
                            frame = outbound_rx.recv() => match frame {
                                Some(frame) => {
                                    if let Err(frame) = send_frame(&mut ws_tx, frame).await {
                                        pending = Some(frame);
                                        break SocketEnd::Dropped;
                                    }
                                }
                                None => break SocketEnd::Shutdown,
                            },
                            inbound = ws_rx.next() => match inbound {
                                Some(Ok(WsMessage::Text(text))) => {
                                    match serde_json::from_str::<ServerEvent>(text.as_str()) {
                                        Ok(event) => self.deliver(TransportEvent::Frame(event)),
                                        Err(e) => warn!(
                                            component = "transport",
                                            event = "ws.frame.decode_failed",
                                            session = %self.tag,
                                            error = %e,
                                            "Dropping undecodable frame"
                                        ),
                                    }
                                }
                                Some(Ok(WsMessage::Close(_))) | None => break SocketEnd::Dropped,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!(
                                        component = "transport",
                                        event = "ws.receive_failed",
                                        session = %self.tag,
                                        error = %e,
                                    );
                                    break SocketEnd::Dropped;
                                }
                            },
                        }
                    };

                    if matches!(end, SocketEnd::Shutdown) {
                        break;
                    }
                    info!(
                        component = "transport",
                        event = "ws.connection.dropped",
                        session = %self.tag,
                        retry_in_ms = self.reconnect_delay.as_millis() as u64,
                    );
                }
                Err(e) => {
                    warn!(
                        component = "transport",
                        event = "ws.connect_failed",
                        session = %self.tag,
                        url = %self.url,
                        error = %e,
                        retry_in_ms = self.reconnect_delay.as_millis() as u64,
                    );
                }
            }

            self.deliver(TransportEvent::State(ConnectionState::Closed));
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        debug!(
            component = "transport",
            event = "ws.task.exited",
            session = %self.tag,
        );
    }
}

/// Serialize and write one frame; hands the frame back if the socket failed
async fn send_frame<S>(ws_tx: &mut S, frame: ClientFrame) -> Result<(), ClientFrame>
where
    S: futures::Sink<WsMessage> + Unpin,
    S::Error: fmt::Display,
{
    let json = match serde_json::to_string(&frame) {
        Ok(json) => json,
        Err(e) => {
            error!(
                component = "transport",
                event = "ws.send.serialize_failed",
                error = %e,
            );
            return Ok(());
        }
    };

    match ws_tx.send(WsMessage::Text(json.into())).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(
                component = "transport",
                event = "ws.send_failed",
                error = %e,
            );
            Err(frame)
        }
    }
}

//! Detection channel: the persistent connection to the remote detector.
//!
//! [`DetectionChannel`] is the state machine
//! `Closed -> Connecting -> Open -> Closed`. The transport behind it is
//! reached through a [`Connector`], which reports lifecycle and inbound
//! messages back to the session through a [`ChannelEventSink`].

mod ws;

pub use ws::{WsConnector, DEFAULT_CONNECT_TIMEOUT, DEFAULT_ENDPOINT};

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::sampler::EncodedFrame;
use crate::session::{Epoch, SessionEvent};

/// Connection state of a [`DetectionChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Closed => write!(f, "closed"),
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Open => write!(f, "open"),
        }
    }
}

/// Why a channel ended up closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// Closed by this side.
    Local,
    /// The detector closed the connection.
    Remote,
    /// Read or write failed mid-session.
    TransportError(String),
    /// The handshake failed.
    ConnectFailed(String),
    /// The handshake did not finish in time.
    ConnectTimeout,
}

impl CloseCause {
    /// Whether the close was not requested by this side.
    pub fn is_failure(&self) -> bool {
        !matches!(self, CloseCause::Local)
    }
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseCause::Local => write!(f, "closed locally"),
            CloseCause::Remote => write!(f, "closed by detector"),
            CloseCause::TransportError(msg) => write!(f, "transport error: {}", msg),
            CloseCause::ConnectFailed(msg) => write!(f, "connection failed: {}", msg),
            CloseCause::ConnectTimeout => write!(f, "connection timed out"),
        }
    }
}

/// A raw message received from the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Lifecycle and data notifications from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(InboundMessage),
    Closed(CloseCause),
}

/// Instruction for the connection's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Vec<u8>),
    Close,
}

/// Errors returned by [`DetectionChannel::send`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is {0}, frames can only be sent while open")]
    NotOpen(ChannelState),

    #[error("connection task is gone")]
    Disconnected,
}

/// Where a connection posts its events, tagged with the session epoch.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    epoch: Epoch,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelEventSink {
    pub fn new(epoch: Epoch, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    fn post(&self, event: ChannelEvent) -> bool {
        self.tx
            .send(SessionEvent::Channel {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }

    pub fn opened(&self) -> bool {
        self.post(ChannelEvent::Opened)
    }

    pub fn message(&self, message: InboundMessage) -> bool {
        self.post(ChannelEvent::Message(message))
    }

    pub fn closed(&self, cause: CloseCause) -> bool {
        self.post(ChannelEvent::Closed(cause))
    }

    /// True once the session side has gone away.
    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handle to one live transport connection.
#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>, task: Option<JoinHandle<()>>) -> Self {
        Self { outbound, task }
    }

    fn send(&self, message: Outbound) -> Result<(), ChannelError> {
        self.outbound
            .send(message)
            .map_err(|_| ChannelError::Disconnected)
    }

    /// Ask the writer to close; the connection task then ends on its own.
    fn close(self) {
        let _ = self.outbound.send(Outbound::Close);
        drop(self.task);
    }
}

/// Opens transport connections to a detector endpoint.
pub trait Connector: Send + Sync {
    /// Begin connecting without blocking. Completion, messages and closure
    /// are reported through `events`.
    fn connect(&self, endpoint: &str, events: ChannelEventSink) -> Connection;
}

/// State machine for one connection to the detector.
#[derive(Debug)]
pub struct DetectionChannel {
    endpoint: String,
    epoch: Epoch,
    state: ChannelState,
    connection: Option<Connection>,
    frames_sent: u64,
}

impl DetectionChannel {
    /// Start connecting to `endpoint`. The channel is `Connecting` on return.
    pub fn open(connector: &dyn Connector, endpoint: &str, events: ChannelEventSink) -> Self {
        let epoch = events.epoch();
        log::info!("Connecting to detector at {}", endpoint);
        let connection = connector.connect(endpoint, events);
        Self {
            endpoint: endpoint.to_string(),
            epoch,
            state: ChannelState::Connecting,
            connection: Some(connection),
            frames_sent: 0,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// `Connecting -> Open`. Returns false if the channel was not connecting.
    pub fn on_opened(&mut self) -> bool {
        if self.state != ChannelState::Connecting {
            return false;
        }
        self.state = ChannelState::Open;
        log::info!("Detection channel open ({})", self.endpoint);
        true
    }

    /// Transport reported closure. Returns true only for the first report.
    pub fn on_closed(&mut self, cause: &CloseCause) -> bool {
        if self.state == ChannelState::Closed {
            return false;
        }
        self.state = ChannelState::Closed;
        self.connection = None;
        if cause.is_failure() {
            log::warn!("Detection channel {}", cause);
        } else {
            log::info!("Detection channel {}", cause);
        }
        true
    }

    /// Transmit one frame. Only valid while open.
    pub fn send(&mut self, frame: EncodedFrame) -> Result<(), ChannelError> {
        if self.state != ChannelState::Open {
            return Err(ChannelError::NotOpen(self.state));
        }
        let connection = self.connection.as_ref().ok_or(ChannelError::Disconnected)?;
        connection.send(Outbound::Frame(frame.data))?;
        self.frames_sent += 1;
        log::trace!("Frame {} sent ({}x{})", self.frames_sent, frame.width, frame.height);
        Ok(())
    }

    /// Close from this side. Returns false if already closed.
    pub fn close(&mut self) -> bool {
        if self.state == ChannelState::Closed {
            return false;
        }
        self.state = ChannelState::Closed;
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        log::info!("Detection channel closed locally");
        true
    }
}

impl Drop for DetectionChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingConnector {
        outbound: Mutex<Vec<mpsc::UnboundedReceiver<Outbound>>>,
        endpoints: Mutex<Vec<String>>,
    }

    impl Connector for Arc<RecordingConnector> {
        fn connect(&self, endpoint: &str, _events: ChannelEventSink) -> Connection {
            let (tx, rx) = mpsc::unbounded_channel();
            self.outbound.lock().unwrap().push(rx);
            self.endpoints.lock().unwrap().push(endpoint.to_string());
            Connection::new(tx, None)
        }
    }

    fn frame() -> EncodedFrame {
        EncodedFrame {
            data: vec![0xFF, 0xD8, 0xFF, 0xD9],
            width: 1,
            height: 1,
            captured_at: Instant::now(),
        }
    }

    fn open_channel() -> (DetectionChannel, Arc<RecordingConnector>) {
        let connector = Arc::new(RecordingConnector::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = DetectionChannel::open(
            &connector,
            "ws://localhost/detection",
            ChannelEventSink::new(1, tx),
        );
        (channel, connector)
    }

    #[test]
    fn test_open_starts_connecting() {
        let (channel, connector) = open_channel();
        assert_eq!(channel.state(), ChannelState::Connecting);
        assert_eq!(channel.epoch(), 1);
        assert_eq!(
            connector.endpoints.lock().unwrap().as_slice(),
            ["ws://localhost/detection"]
        );
    }

    #[test]
    fn test_send_before_open_is_rejected() {
        let (mut channel, _connector) = open_channel();
        assert_eq!(
            channel.send(frame()),
            Err(ChannelError::NotOpen(ChannelState::Connecting))
        );
        assert_eq!(channel.frames_sent(), 0);
    }

    #[test]
    fn test_send_while_open_reaches_writer() {
        let (mut channel, connector) = open_channel();
        assert!(channel.on_opened());
        channel.send(frame()).unwrap();

        let mut outbound = connector.outbound.lock().unwrap();
        assert_eq!(
            outbound[0].try_recv().unwrap(),
            Outbound::Frame(vec![0xFF, 0xD8, 0xFF, 0xD9])
        );
        assert_eq!(channel.frames_sent(), 1);
    }

    #[test]
    fn test_on_opened_only_from_connecting() {
        let (mut channel, _connector) = open_channel();
        assert!(channel.on_opened());
        assert!(!channel.on_opened());
        channel.close();
        assert!(!channel.on_opened());
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[test]
    fn test_on_closed_reports_exactly_once() {
        let (mut channel, _connector) = open_channel();
        channel.on_opened();
        assert!(channel.on_closed(&CloseCause::Remote));
        assert!(!channel.on_closed(&CloseCause::Remote));
        assert!(!channel.on_closed(&CloseCause::TransportError("reset".into())));
        assert_eq!(
            channel.send(frame()),
            Err(ChannelError::NotOpen(ChannelState::Closed))
        );
    }

    #[test]
    fn test_connecting_can_close_directly() {
        let (mut channel, _connector) = open_channel();
        assert!(channel.on_closed(&CloseCause::ConnectTimeout));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[test]
    fn test_close_is_idempotent_and_tells_writer() {
        let (mut channel, connector) = open_channel();
        channel.on_opened();
        assert!(channel.close());
        assert!(!channel.close());

        let mut outbound = connector.outbound.lock().unwrap();
        assert_eq!(outbound[0].try_recv().unwrap(), Outbound::Close);
    }

    #[test]
    fn test_close_cause_failure_classification() {
        assert!(!CloseCause::Local.is_failure());
        assert!(CloseCause::Remote.is_failure());
        assert!(CloseCause::ConnectTimeout.is_failure());
        assert_eq!(CloseCause::Remote.to_string(), "closed by detector");
    }
}

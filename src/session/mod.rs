//! Session controller: owns the capture source, detection channel, frame
//! sampler, detection buffer and operator selection, and keeps their
//! lifetimes in step.
//!
//! All state changes happen in [`SessionController::handle`], fed from one
//! event queue. The connection task and the sampler task only post
//! [`SessionEvent`]s; each carries the epoch of the session that produced it,
//! and stopping bumps the epoch so anything still in flight is discarded.

mod retry;

pub use retry::{
    calculate_backoff, ReconnectPolicy, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX,
    DEFAULT_MAX_ATTEMPTS,
};

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::buffer::{DetectionBuffer, DEFAULT_CAPACITY};
use crate::capture::{CaptureError, CaptureSource};
use crate::channel::{
    ChannelEvent, ChannelEventSink, ChannelState, CloseCause, Connector, DetectionChannel,
    InboundMessage, DEFAULT_ENDPOINT,
};
use crate::event::{parse_detection, DetectionEvent};
use crate::sampler::{EncodedFrame, FrameSampler, FrameSink, DEFAULT_INTERVAL, DEFAULT_JPEG_QUALITY};
use crate::selection::SelectionState;

/// Session counter used to tag events.
pub type Epoch = u64;

/// Everything that can happen to a session, in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    Channel { epoch: Epoch, event: ChannelEvent },
    Frame { epoch: Epoch, frame: EncodedFrame },
    CaptureFailed { epoch: Epoch, error: CaptureError },
    Retry { token: u64 },
}

/// Lifecycle state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Detecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Detecting => write!(f, "detecting"),
        }
    }
}

/// Why the last session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopCause {
    /// The operator stopped it.
    User,
    /// The detection channel closed underneath the session.
    ChannelClosed(CloseCause),
    /// The capture source could not be acquired or died.
    CaptureFailed(CaptureError),
    /// The controller was dropped.
    Teardown,
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopCause::User => write!(f, "stopped by operator"),
            StopCause::ChannelClosed(cause) => write!(f, "detection channel {}", cause),
            StopCause::CaptureFailed(e) => write!(f, "feed unavailable: {}", e),
            StopCause::Teardown => write!(f, "console shut down"),
        }
    }
}

/// Errors returned by [`SessionController::start`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("a session is already {0}")]
    AlreadyActive(SessionState),

    #[error("feed unavailable: {0}")]
    Capture(#[from] CaptureError),
}

/// Observable outcome of handling one event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Ignored,
    FrameSent,
    Detecting,
    Detection(DetectionEvent),
    Stopped(StopCause),
    Reconnecting { attempt: u32 },
}

/// Tunables for a controller.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: String,
    pub sample_interval: Duration,
    pub jpeg_quality: u8,
    pub buffer_capacity: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            sample_interval: DEFAULT_INTERVAL,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            buffer_capacity: DEFAULT_CAPACITY,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Forwards sampled frames into the session queue.
struct SessionFrameSink {
    epoch: Epoch,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl FrameSink for SessionFrameSink {
    fn on_frame(&mut self, frame: EncodedFrame) {
        let _ = self.tx.send(SessionEvent::Frame {
            epoch: self.epoch,
            frame,
        });
    }

    fn on_source_failed(&mut self, error: CaptureError) {
        let _ = self.tx.send(SessionEvent::CaptureFailed {
            epoch: self.epoch,
            error,
        });
    }
}

/// Coordinates one capture/transport/sampling pipeline at a time.
pub struct SessionController<S: CaptureSource> {
    config: SessionConfig,
    source: S,
    connector: Arc<dyn Connector>,
    sampler: FrameSampler,
    channel: Option<DetectionChannel>,
    buffer: DetectionBuffer,
    selection: SelectionState,
    state: SessionState,
    epoch: Epoch,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    device: Option<String>,
    last_stop: Option<StopCause>,
    retry_attempts: u32,
    retry_token: u64,
    retry_pending: bool,
}

impl<S: CaptureSource> fmt::Debug for SessionController<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state)
            .field("epoch", &self.epoch)
            .field("endpoint", &self.config.endpoint)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl<S: CaptureSource> SessionController<S> {
    pub fn new(config: SessionConfig, source: S, connector: Arc<dyn Connector>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            sampler: FrameSampler::new(config.jpeg_quality),
            buffer: DetectionBuffer::new(config.buffer_capacity),
            config,
            source,
            connector,
            channel: None,
            selection: SelectionState::new(),
            state: SessionState::Idle,
            epoch: 0,
            events_tx,
            events_rx,
            device: None,
            last_stop: None,
            retry_attempts: 0,
            retry_token: 0,
            retry_pending: false,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_detecting(&self) -> bool {
        self.state == SessionState::Detecting
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel
            .as_ref()
            .map(DetectionChannel::state)
            .unwrap_or(ChannelState::Closed)
    }

    /// Frames the sampler has produced over the controller's lifetime.
    pub fn sampler_ticks(&self) -> u64 {
        self.sampler.ticks()
    }

    /// Delivery counter that outlives the controller.
    pub fn sampler_tick_counter(&self) -> Arc<AtomicU64> {
        self.sampler.tick_counter()
    }

    pub fn is_sampling(&self) -> bool {
        self.sampler.is_running()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn last_stop_cause(&self) -> Option<&StopCause> {
        self.last_stop.as_ref()
    }

    pub fn is_retry_pending(&self) -> bool {
        self.retry_pending
    }

    pub fn buffer(&self) -> &DetectionBuffer {
        &self.buffer
    }

    /// Empty the detection buffer (after a save or an operator reset).
    pub fn clear_detections(&mut self) {
        self.buffer.clear();
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    /// Set the selection to arbitrary operator input.
    pub fn select(&mut self, value: impl Into<String>) {
        self.selection.select(value);
    }

    /// Set the selection to the text of buffer entry `index` (oldest = 0).
    pub fn select_detection(&mut self, index: usize) -> Option<&str> {
        let text = self.buffer.get(index)?.text.clone();
        self.selection.select(text);
        Some(self.selection.current())
    }

    pub fn reset_selection(&mut self) {
        self.selection.reset();
    }

    /// Begin a session. Rejected while one is starting or detecting.
    pub fn start(&mut self, device: Option<&str>) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::AlreadyActive(self.state));
        }
        self.cancel_retry();
        self.retry_attempts = 0;
        self.begin(device)
    }

    fn begin(&mut self, device: Option<&str>) -> Result<(), SessionError> {
        if let Some(mut stale) = self.channel.take() {
            stale.close();
        }

        self.device = device.map(str::to_string);
        self.epoch += 1;
        self.state = SessionState::Starting;
        log::info!("Starting session {} (device: {})", self.epoch, device.unwrap_or("default"));

        if let Err(e) = self.source.attach(device) {
            self.source.detach();
            self.state = SessionState::Idle;
            self.epoch += 1;
            log::warn!("Feed unavailable: {}", e);
            self.last_stop = Some(StopCause::CaptureFailed(e.clone()));
            return Err(e.into());
        }

        let events = ChannelEventSink::new(self.epoch, self.events_tx.clone());
        self.channel = Some(DetectionChannel::open(
            self.connector.as_ref(),
            &self.config.endpoint,
            events,
        ));
        Ok(())
    }

    /// Stop the session. A no-op when idle.
    pub fn stop(&mut self) {
        self.cancel_retry();
        self.teardown(StopCause::User);
    }

    /// Release sampler, channel and source in that order. Returns whether a
    /// session was actually active.
    fn teardown(&mut self, cause: StopCause) -> bool {
        let was_active = self.state != SessionState::Idle;

        self.sampler.stop();
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.source.detach();

        if !was_active {
            return false;
        }
        self.epoch += 1;
        self.state = SessionState::Idle;
        log::info!("Session stopped: {}", cause);
        self.last_stop = Some(cause);
        true
    }

    fn cancel_retry(&mut self) {
        self.retry_token += 1;
        self.retry_pending = false;
    }

    fn schedule_retry(&mut self) -> Option<u32> {
        let Some(delay) = self.config.reconnect.delay_for(self.retry_attempts) else {
            if self.config.reconnect.enabled {
                log::warn!(
                    "Giving up on the detector after {} reconnect attempts",
                    self.retry_attempts
                );
            }
            return None;
        };

        self.retry_token += 1;
        self.retry_pending = true;
        let token = self.retry_token;
        let tx = self.events_tx.clone();
        let attempt = self.retry_attempts + 1;
        log::info!(
            "Reconnecting in {:?} (attempt {}/{})",
            delay,
            attempt,
            self.config.reconnect.max_attempts
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SessionEvent::Retry { token });
        });
        Some(attempt)
    }

    /// Wait for the next queued event.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Handle every event already queued, in order.
    pub fn process_pending(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            updates.push(self.handle(event));
        }
        updates
    }

    /// Apply one event.
    pub fn handle(&mut self, event: SessionEvent) -> SessionUpdate {
        match event {
            SessionEvent::Channel { epoch, .. }
            | SessionEvent::Frame { epoch, .. }
            | SessionEvent::CaptureFailed { epoch, .. }
                if epoch != self.epoch =>
            {
                log::trace!("Discarding event from session {}", epoch);
                SessionUpdate::Ignored
            }
            SessionEvent::Channel { event, .. } => self.handle_channel(event),
            SessionEvent::Frame { frame, .. } => self.handle_frame(frame),
            SessionEvent::CaptureFailed { error, .. } => {
                if self.teardown(StopCause::CaptureFailed(error.clone())) {
                    SessionUpdate::Stopped(StopCause::CaptureFailed(error))
                } else {
                    SessionUpdate::Ignored
                }
            }
            SessionEvent::Retry { token } => self.handle_retry(token),
        }
    }

    fn handle_channel(&mut self, event: ChannelEvent) -> SessionUpdate {
        let Some(channel) = self.channel.as_mut() else {
            return SessionUpdate::Ignored;
        };

        match event {
            ChannelEvent::Opened => {
                if self.state != SessionState::Starting || !channel.on_opened() {
                    return SessionUpdate::Ignored;
                }
                self.retry_attempts = 0;
                let sink = SessionFrameSink {
                    epoch: self.epoch,
                    tx: self.events_tx.clone(),
                };
                self.sampler
                    .start(self.source.surface(), self.config.sample_interval, sink);
                self.state = SessionState::Detecting;
                log::info!("Detecting");
                SessionUpdate::Detecting
            }
            ChannelEvent::Message(message) => {
                if !channel.is_open() {
                    return SessionUpdate::Ignored;
                }
                match message {
                    InboundMessage::Text(text) => match parse_detection(&text) {
                        Ok(Some(detection)) => {
                            log::info!("Detection: {}", detection.text);
                            self.buffer.push(detection.clone());
                            SessionUpdate::Detection(detection)
                        }
                        Ok(None) => {
                            log::trace!("No plate in frame");
                            SessionUpdate::Ignored
                        }
                        Err(e) => {
                            log::warn!("Dropping malformed detection message: {}", e);
                            SessionUpdate::Ignored
                        }
                    },
                    InboundMessage::Binary(data) => {
                        log::warn!(
                            "Dropping malformed detection message: {}",
                            crate::event::EventParseError::UnexpectedBinary(data.len())
                        );
                        SessionUpdate::Ignored
                    }
                }
            }
            ChannelEvent::Closed(cause) => {
                if !channel.on_closed(&cause) {
                    return SessionUpdate::Ignored;
                }
                let failure = cause.is_failure();
                self.teardown(StopCause::ChannelClosed(cause.clone()));
                if failure {
                    if let Some(attempt) = self.schedule_retry() {
                        return SessionUpdate::Reconnecting { attempt };
                    }
                }
                SessionUpdate::Stopped(StopCause::ChannelClosed(cause))
            }
        }
    }

    fn handle_frame(&mut self, frame: EncodedFrame) -> SessionUpdate {
        if self.state != SessionState::Detecting {
            return SessionUpdate::Ignored;
        }
        let Some(channel) = self.channel.as_mut() else {
            return SessionUpdate::Ignored;
        };
        match channel.send(frame) {
            Ok(()) => SessionUpdate::FrameSent,
            Err(e) => {
                log::debug!("Frame not sent: {}", e);
                SessionUpdate::Ignored
            }
        }
    }

    fn handle_retry(&mut self, token: u64) -> SessionUpdate {
        if !self.retry_pending || token != self.retry_token || self.state != SessionState::Idle {
            return SessionUpdate::Ignored;
        }
        self.retry_pending = false;
        self.retry_attempts += 1;
        let attempt = self.retry_attempts;
        let device = self.device.clone();

        match self.begin(device.as_deref()) {
            Ok(()) => SessionUpdate::Reconnecting { attempt },
            Err(e) => {
                log::warn!("Reconnect attempt {} failed: {}", attempt, e);
                if let Some(next) = self.schedule_retry() {
                    return SessionUpdate::Reconnecting { attempt: next };
                }
                match e {
                    SessionError::Capture(error) => {
                        SessionUpdate::Stopped(StopCause::CaptureFailed(error))
                    }
                    SessionError::AlreadyActive(_) => SessionUpdate::Ignored,
                }
            }
        }
    }
}

impl<S: CaptureSource> Drop for SessionController<S> {
    fn drop(&mut self) {
        self.cancel_retry();
        self.teardown(StopCause::Teardown);
    }
}

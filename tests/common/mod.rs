//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use plate_console::capture::{CaptureError, CaptureSource, Frame, Surface};
use plate_console::channel::{ChannelEventSink, Connection, Connector, Outbound};
use plate_console::session::{ReconnectPolicy, SessionConfig, SessionController};
use tokio::sync::mpsc;

/// In-memory camera that publishes a grey frame on attach.
#[derive(Debug, Default)]
pub struct TestSource {
    pub surface: Surface,
    pub attached: bool,
    pub attach_calls: usize,
    pub detach_calls: usize,
    pub fail_with: Option<CaptureError>,
    pub last_device: Option<String>,
}

impl TestSource {
    pub fn failing(error: CaptureError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::default()
        }
    }
}

impl CaptureSource for TestSource {
    fn attach(&mut self, device: Option<&str>) -> Result<(), CaptureError> {
        self.attach_calls += 1;
        self.last_device = device.map(str::to_string);
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        self.surface.publish(Frame::new(vec![90; 16 * 12 * 3], 16, 12));
        self.attached = true;
        Ok(())
    }

    fn detach(&mut self) {
        self.detach_calls += 1;
        self.surface.clear();
        self.attached = false;
    }

    fn is_attached(&self) -> bool {
        self.attached
    }

    fn surface(&self) -> Surface {
        self.surface.clone()
    }
}

/// One connection handed out by [`FakeConnector`].
pub struct FakeConnection {
    pub endpoint: String,
    pub events: ChannelEventSink,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl FakeConnection {
    /// Drain everything the channel has written so far.
    pub fn written(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            out.push(message);
        }
        out
    }
}

/// Connector that never touches the network; tests drive the events.
#[derive(Clone, Default)]
pub struct FakeConnector {
    connections: Arc<Mutex<Vec<FakeConnection>>>,
}

impl FakeConnector {
    pub fn count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Run `f` against connection `index`.
    pub fn with<R>(&self, index: usize, f: impl FnOnce(&mut FakeConnection) -> R) -> R {
        let mut connections = self.connections.lock().unwrap();
        f(&mut connections[index])
    }

    pub fn events(&self, index: usize) -> ChannelEventSink {
        self.with(index, |c| c.events.clone())
    }
}

impl Connector for FakeConnector {
    fn connect(&self, endpoint: &str, events: ChannelEventSink) -> Connection {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.lock().unwrap().push(FakeConnection {
            endpoint: endpoint.to_string(),
            events,
            outbound: rx,
        });
        Connection::new(tx, None)
    }
}

pub fn fast_config() -> SessionConfig {
    SessionConfig {
        endpoint: "ws://detector.test/detection".to_string(),
        sample_interval: Duration::from_millis(10),
        jpeg_quality: 70,
        buffer_capacity: 3,
        reconnect: ReconnectPolicy::disabled(),
    }
}

pub fn controller_with(
    config: SessionConfig,
    source: TestSource,
) -> (SessionController<TestSource>, FakeConnector) {
    let connector = FakeConnector::default();
    let controller = SessionController::new(config, source, Arc::new(connector.clone()));
    (controller, connector)
}

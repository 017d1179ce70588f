//! WebSocket transport for the detection channel.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{ChannelEventSink, CloseCause, Connection, Connector, InboundMessage, Outbound};

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost/detection";

/// Default handshake timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connects to the detector over `ws://` or `wss://`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Connector for WsConnector {
    fn connect(&self, endpoint: &str, events: ChannelEventSink) -> Connection {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(
            endpoint.to_string(),
            self.connect_timeout,
            events,
            rx,
        ));
        Connection::new(tx, Some(task))
    }
}

/// Drive one connection: handshake, then pump frames out and messages in
/// until either side closes.
async fn run_connection(
    endpoint: String,
    connect_timeout: Duration,
    events: ChannelEventSink,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let handshake = tokio::time::timeout(connect_timeout, connect_async(endpoint.as_str()));

    let ws_stream = tokio::select! {
        result = handshake => match result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                events.closed(CloseCause::ConnectFailed(e.to_string()));
                return;
            }
            Err(_) => {
                events.closed(CloseCause::ConnectTimeout);
                return;
            }
        },
        // Closed locally before the handshake finished
        _ = wait_for_close(&mut outbound) => {
            events.closed(CloseCause::Local);
            return;
        }
    };

    events.opened();
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(Outbound::Frame(data)) => {
                    if let Err(e) = write.send(Message::Binary(data)).await {
                        events.closed(CloseCause::TransportError(e.to_string()));
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    let _ = write.close().await;
                    events.closed(CloseCause::Local);
                    return;
                }
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    events.message(InboundMessage::Text(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    events.message(InboundMessage::Binary(data));
                }
                Some(Ok(Message::Close(_))) | None => {
                    // Flushes the queued close reply to the peer
                    let _ = write.close().await;
                    events.closed(CloseCause::Remote);
                    return;
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    events.closed(CloseCause::TransportError(e.to_string()));
                    return;
                }
            },
        }
    }
}

/// Resolve once a close is requested or the channel handle is dropped.
/// Frames cannot be queued before the channel is open, so any other message
/// is ignored.
async fn wait_for_close(outbound: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match outbound.recv().await {
            Some(Outbound::Close) | None => return,
            Some(Outbound::Frame(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelEvent;
    use crate::session::SessionEvent;

    #[tokio::test]
    async fn test_refused_connection_reports_connect_failed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = WsConnector::new(Duration::from_secs(2));
        let _connection = connector.connect(
            &format!("ws://{}/detection", addr),
            ChannelEventSink::new(3, tx),
        );

        match rx.recv().await.unwrap() {
            SessionEvent::Channel {
                epoch,
                event: ChannelEvent::Closed(CloseCause::ConnectFailed(_)),
            } => assert_eq!(epoch, 3),
            other => panic!("Expected ConnectFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Accepts TCP but never answers the websocket handshake
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = WsConnector::new(Duration::from_millis(100));
        let _connection =
            connector.connect(&format!("ws://{}/detection", addr), ChannelEventSink::new(1, tx));

        match rx.recv().await.unwrap() {
            SessionEvent::Channel {
                event: ChannelEvent::Closed(CloseCause::ConnectTimeout),
                ..
            } => {}
            other => panic!("Expected ConnectTimeout, got {:?}", other),
        }
    }

    #[test]
    fn test_default_connector_timeout() {
        assert_eq!(
            WsConnector::default().connect_timeout(),
            Duration::from_secs(10)
        );
        assert_eq!(DEFAULT_ENDPOINT, "ws://localhost/detection");
    }
}

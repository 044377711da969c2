//! Device transport: one WebSocket per light gun
//!
//! The socket is owned by a spawned task. The session loop only sees
//! [`LinkEvent`]s coming in and pushes [`Frame`]s out through a channel.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::players::PlayerId;
use crate::util::time::CONNECT_TIMEOUT;

/// Port the gun firmware listens on
pub const DEVICE_PORT: u16 = 81;
/// Sub-protocol tag the firmware expects
pub const DEVICE_SUBPROTOCOL: &str = "QuackHuntGun";

/// Outbound frames buffered per device before sends start failing
const OUTBOUND_CAPACITY: usize = 32;

/// URL of a gun's link
pub fn device_url(address: &str) -> String {
    format!("ws://{}:{}/", address, DEVICE_PORT)
}

/// A single transport message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
        }
    }
}

/// What a transport reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEventKind {
    Opened,
    Frame(Frame),
    Closed { reason: String },
}

/// Transport event tagged with its connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub player: PlayerId,
    /// Connection attempt this event belongs to
    pub generation: u64,
    pub kind: LinkEventKind,
}

/// Parameters of one connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub player: PlayerId,
    pub generation: u64,
    pub url: String,
}

/// Opens transports on behalf of device links
pub trait Connector: Send + Sync {
    /// Start a connection attempt. The transport reports through `events`
    /// and stops without reporting once `cancel` fires. Returns the outbound
    /// frame channel.
    fn open(
        &self,
        request: ConnectRequest,
        events: mpsc::Sender<LinkEvent>,
        cancel: CancellationToken,
    ) -> mpsc::Sender<Frame>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(
        &self,
        request: ConnectRequest,
        events: mpsc::Sender<LinkEvent>,
        cancel: CancellationToken,
    ) -> mpsc::Sender<Frame> {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        tokio::spawn(run_transport(request, events, outbound_rx, cancel));
        outbound_tx
    }
}

/// Drive one WebSocket until it closes or is cancelled
async fn run_transport(
    request: ConnectRequest,
    events: mpsc::Sender<LinkEvent>,
    mut outbound: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
) {
    let ConnectRequest {
        player,
        generation,
        url,
    } = request;
    let event = |kind| LinkEvent {
        player,
        generation,
        kind,
    };

    let mut ws_request = match url.as_str().into_client_request() {
        Ok(req) => req,
        Err(e) => {
            warn!(player = %player, url = %url, error = %e, "Invalid device URL");
            let _ = events
                .send(event(LinkEventKind::Closed {
                    reason: e.to_string(),
                }))
                .await;
            return;
        }
    };
    ws_request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(DEVICE_SUBPROTOCOL),
    );

    let connect = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(ws_request));
    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = connect => result,
    };

    let socket = match connected {
        Ok(Ok((socket, _))) => socket,
        Ok(Err(e)) => {
            debug!(player = %player, url = %url, error = %e, "Device connection failed");
            let _ = events
                .send(event(LinkEventKind::Closed {
                    reason: e.to_string(),
                }))
                .await;
            return;
        }
        Err(_) => {
            debug!(player = %player, url = %url, "Device connection timed out");
            let _ = events
                .send(event(LinkEventKind::Closed {
                    reason: "connect timeout".to_string(),
                }))
                .await;
            return;
        }
    };

    info!(player = %player, url = %url, generation, "Device link open");
    if events.send(event(LinkEventKind::Opened)).await.is_err() {
        return;
    }

    let (mut sink, mut stream) = socket.split();

    let reason = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
            Some(frame) = outbound.recv() => {
                if let Err(e) = sink.send(frame.into()).await {
                    break e.to_string();
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let frame = Frame::Text(text.as_str().to_owned());
                    if events.send(event(LinkEventKind::Frame(frame))).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let frame = Frame::Binary(bytes.to_vec());
                    if events.send(event(LinkEventKind::Frame(frame))).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(_))) => break "closed by device".to_string(),
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_string(),
            }
        }
    };

    if !cancel.is_cancelled() {
        let _ = events.send(event(LinkEventKind::Closed { reason })).await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// A connection attempt captured by [`RecordingConnector`]
    struct OpenedTransport {
        request: ConnectRequest,
        outbound: Option<mpsc::Receiver<Frame>>,
        cancel: CancellationToken,
    }

    /// Connector that records attempts instead of opening sockets
    #[derive(Clone, Default)]
    pub struct RecordingConnector {
        opened: Arc<Mutex<Vec<OpenedTransport>>>,
    }

    impl RecordingConnector {
        pub fn attempts(&self) -> usize {
            self.opened.lock().map(|o| o.len()).unwrap_or(0)
        }

        pub fn request(&self, index: usize) -> Option<ConnectRequest> {
            let opened = self.opened.lock().ok()?;
            opened.get(index).map(|t| t.request.clone())
        }

        pub fn cancel_token(&self, index: usize) -> Option<CancellationToken> {
            let opened = self.opened.lock().ok()?;
            opened.get(index).map(|t| t.cancel.clone())
        }

        /// Receiving end of the frames the host sent on attempt `index`
        pub fn take_outbound(&self, index: usize) -> Option<mpsc::Receiver<Frame>> {
            let mut opened = self.opened.lock().ok()?;
            opened.get_mut(index).and_then(|t| t.outbound.take())
        }
    }

    impl Connector for RecordingConnector {
        fn open(
            &self,
            request: ConnectRequest,
            _events: mpsc::Sender<LinkEvent>,
            cancel: CancellationToken,
        ) -> mpsc::Sender<Frame> {
            let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
            if let Ok(mut opened) = self.opened.lock() {
                opened.push(OpenedTransport {
                    request,
                    outbound: Some(rx),
                    cancel,
                });
            }
            tx
        }
    }
}

//! Per-player device link state machine
//!
//! `Idle -> Connecting -> Connected -> (close) Reconnecting -> Connecting ...`
//!
//! The link owns the transport handle exclusively. Timers (reconnect,
//! telemetry) are scheduled by the session loop; the link only reports when
//! one is due.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::classifier::{classify, ColorSymbol};
use super::protocol::{
    ColorPacket, Credentials, Packet, PacketDecoder, RawSample, StatusPacket, Telemetry,
};
use super::transport::{device_url, ConnectRequest, Connector, Frame, LinkEvent};
use crate::players::{Calibration, PlayerId};

/// Link lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    /// Dropped; a reconnect is pending
    Reconnecting,
}

/// Connection status shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl From<LinkState> for ConnectionStatus {
    fn from(state: LinkState) -> Self {
        match state {
            LinkState::Idle | LinkState::Reconnecting => ConnectionStatus::Disconnected,
            LinkState::Connecting => ConnectionStatus::Connecting,
            LinkState::Connected => ConnectionStatus::Connected,
        }
    }
}

/// Metadata reported by the gun firmware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub version: String,
    pub wifi: Credentials,
    pub ap: Credentials,
    pub oled_width: u32,
    pub oled_height: u32,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            version: "0.0.0".to_string(),
            wifi: Credentials::default(),
            ap: Credentials::default(),
            oled_width: 0,
            oled_height: 0,
        }
    }
}

impl DeviceInfo {
    fn apply(&mut self, status: StatusPacket) {
        if let Some(version) = status.version {
            self.version = version;
        }
        if let Some(wifi) = status.wifi {
            self.wifi = wifi;
        }
        if let Some(ap) = status.ap {
            self.ap = ap;
        }
        if let Some((width, height)) = status.oled {
            self.oled_width = width;
            self.oled_height = height;
        }
    }
}

/// What an inbound frame amounted to
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Trigger pulled; classified color
    Shot(ColorSymbol),
    /// Color reading without trigger
    Sample,
    /// Device metadata updated
    Status,
    /// Binary telemetry acknowledgement
    Ack(Option<Telemetry>),
    /// Frame from an old connection
    Stale,
}

/// Outbound send failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("Device link is not connected")]
    NotConnected,

    #[error("Device transport is closed")]
    Closed,

    #[error("Device transport is backed up")]
    Full,
}

impl<T> From<mpsc::error::TrySendError<T>> for LinkError {
    fn from(err: mpsc::error::TrySendError<T>) -> Self {
        match err {
            mpsc::error::TrySendError::Full(_) => LinkError::Full,
            mpsc::error::TrySendError::Closed(_) => LinkError::Closed,
        }
    }
}

/// Live transport owned by the link
#[derive(Debug)]
struct TransportHandle {
    outbound: mpsc::Sender<Frame>,
    /// Cancelled when this connection ends
    connection: CancellationToken,
}

/// One player's device link
#[derive(Debug)]
pub struct DeviceLink {
    player: PlayerId,
    state: LinkState,
    /// Bumped on every connection attempt; events tagged with an older
    /// generation are ignored
    generation: u64,
    transport: Option<TransportHandle>,
    decoder: PacketDecoder,
    /// Last text frame received
    last_packet: String,
    /// Last color reading on the current connection
    last_sample: Option<RawSample>,
    device: DeviceInfo,
    /// Cancelled when the player is removed
    lifetime: CancellationToken,
}

impl DeviceLink {
    pub fn new(player: PlayerId) -> Self {
        Self {
            player,
            state: LinkState::Idle,
            generation: 0,
            transport: None,
            decoder: PacketDecoder::new(),
            last_packet: String::new(),
            last_sample: None,
            device: DeviceInfo::default(),
            lifetime: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.into()
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn decoder(&self) -> &PacketDecoder {
        &self.decoder
    }

    pub fn last_packet(&self) -> &str {
        &self.last_packet
    }

    pub fn last_sample(&self) -> Option<RawSample> {
        self.last_sample
    }

    /// Token tied to the player's lifetime
    pub fn lifetime(&self) -> &CancellationToken {
        &self.lifetime
    }

    /// Start a connection attempt. Returns false when one is already open or
    /// in flight.
    pub fn connect(
        &mut self,
        address: &str,
        connector: &dyn Connector,
        events: &mpsc::Sender<LinkEvent>,
    ) -> bool {
        if matches!(self.state, LinkState::Connecting | LinkState::Connected) {
            debug!(player = %self.player, "Connect ignored, link already active");
            return false;
        }
        if self.lifetime.is_cancelled() {
            return false;
        }

        self.generation += 1;
        let connection = self.lifetime.child_token();
        let request = ConnectRequest {
            player: self.player,
            generation: self.generation,
            url: device_url(address),
        };

        info!(player = %self.player, url = %request.url, generation = self.generation, "Connecting device");

        let outbound = connector.open(request, events.clone(), connection.clone());
        self.transport = Some(TransportHandle {
            outbound,
            connection,
        });
        self.state = LinkState::Connecting;
        self.decoder.reset();
        self.last_sample = None;
        true
    }

    /// Transport reported open. Returns the connection token that scopes the
    /// telemetry task, or `None` for a stale event.
    pub fn on_opened(&mut self, generation: u64) -> Option<CancellationToken> {
        if generation != self.generation || self.state != LinkState::Connecting {
            return None;
        }
        self.state = LinkState::Connected;
        self.transport.as_ref().map(|t| t.connection.clone())
    }

    /// Transport reported closed. Returns true when a reconnect should be
    /// scheduled.
    pub fn on_closed(&mut self, generation: u64) -> bool {
        if generation != self.generation
            || !matches!(self.state, LinkState::Connecting | LinkState::Connected)
        {
            return false;
        }

        if let Some(transport) = self.transport.take() {
            transport.connection.cancel();
        }
        self.state = LinkState::Reconnecting;
        !self.lifetime.is_cancelled()
    }

    /// Decode an inbound frame. Color readings are classified against
    /// `calibration`/`threshold` when the trigger flag is set.
    pub fn handle_frame(
        &mut self,
        generation: u64,
        frame: Frame,
        calibration: &Calibration,
        threshold: u8,
    ) -> FrameOutcome {
        if generation != self.generation || self.state != LinkState::Connected {
            return FrameOutcome::Stale;
        }

        match frame {
            Frame::Binary(bytes) => {
                let ack = Telemetry::parse(&String::from_utf8_lossy(&bytes));
                if ack.is_none() {
                    debug!(player = %self.player, len = bytes.len(), "Unrecognized binary frame");
                }
                FrameOutcome::Ack(ack)
            }
            Frame::Text(text) => {
                let outcome = match self.decoder.decode(&text) {
                    Packet::Status(status) => {
                        self.device.apply(status);
                        debug!(player = %self.player, version = %self.device.version, "Device status");
                        FrameOutcome::Status
                    }
                    Packet::Color(packet) => self.handle_color(packet, calibration, threshold),
                };
                self.last_packet = text;
                outcome
            }
        }
    }

    fn handle_color(
        &mut self,
        packet: ColorPacket,
        calibration: &Calibration,
        threshold: u8,
    ) -> FrameOutcome {
        self.last_sample = Some(packet.sample);
        if !packet.shot {
            return FrameOutcome::Sample;
        }

        let symbol = classify(&packet.sample, calibration, threshold);
        debug!(player = %self.player, ?symbol, sample = ?packet.sample, "Shot classified");
        FrameOutcome::Shot(symbol)
    }

    /// Sample to calibrate against; requires a live connection and a reading
    /// received on it
    pub fn calibration_sample(&self) -> Option<RawSample> {
        if !self.is_connected() {
            return None;
        }
        self.last_sample
    }

    /// Push counters to the gun as text, then as raw bytes of the same text
    pub fn send_telemetry(&self, telemetry: &Telemetry) -> Result<(), LinkError> {
        let transport = match (&self.transport, self.state) {
            (Some(transport), LinkState::Connected) => transport,
            _ => return Err(LinkError::NotConnected),
        };

        let text = telemetry.to_string();
        let bytes = text.clone().into_bytes();
        transport.outbound.try_send(Frame::Text(text))?;
        transport.outbound.try_send(Frame::Binary(bytes))?;
        Ok(())
    }

    /// Tear the link down for good (player removed)
    pub fn shutdown(&mut self) {
        self.lifetime.cancel();
        if self.transport.take().is_some() {
            warn!(player = %self.player, "Device link torn down");
        }
        self.state = LinkState::Idle;
    }

    /// Drop the current connection without scheduling a retry
    pub fn disconnect(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.connection.cancel();
        }
        self.state = LinkState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::transport::testing::RecordingConnector;

    fn connected_link(connector: &RecordingConnector) -> (DeviceLink, mpsc::Receiver<LinkEvent>) {
        let (events_tx, events_rx) = mpsc::channel(8);
        let mut link = DeviceLink::new(PlayerId(1));
        assert!(link.connect("192.168.1.2", connector, &events_tx));
        assert!(link.on_opened(link.generation()).is_some());
        (link, events_rx)
    }

    #[test]
    fn connect_is_idempotent_while_active() {
        let connector = RecordingConnector::default();
        let (events_tx, _events_rx) = mpsc::channel(8);
        let mut link = DeviceLink::new(PlayerId(1));

        assert!(link.connect("192.168.1.2", &connector, &events_tx));
        assert_eq!(link.status(), ConnectionStatus::Connecting);
        assert!(!link.connect("192.168.1.2", &connector, &events_tx));

        link.on_opened(1);
        assert!(!link.connect("192.168.1.2", &connector, &events_tx));
        assert_eq!(connector.attempts(), 1);

        let request = connector.request(0).expect("recorded");
        assert_eq!(request.url, "ws://192.168.1.2:81/");
        assert_eq!(request.generation, 1);
    }

    #[test]
    fn close_asks_for_exactly_one_reconnect() {
        let connector = RecordingConnector::default();
        let (mut link, _rx) = connected_link(&connector);
        let connection = connector.cancel_token(0).expect("recorded");

        assert!(link.on_closed(1));
        assert_eq!(link.state(), LinkState::Reconnecting);
        assert_eq!(link.status(), ConnectionStatus::Disconnected);
        assert!(connection.is_cancelled());

        // A second close for the same connection is ignored
        assert!(!link.on_closed(1));
    }

    #[test]
    fn events_from_an_old_connection_are_stale() {
        let connector = RecordingConnector::default();
        let (mut link, _rx) = connected_link(&connector);
        link.on_closed(1);

        let (events_tx, _events_rx) = mpsc::channel(8);
        assert!(link.connect("192.168.1.2", &connector, &events_tx));
        assert!(link.on_opened(1).is_none());
        assert!(!link.on_closed(1));
        assert!(link.on_opened(2).is_some());

        let outcome = link.handle_frame(
            1,
            Frame::Text("300,60,40,1".into()),
            &Calibration::default(),
            50,
        );
        assert_eq!(outcome, FrameOutcome::Stale);
    }

    #[test]
    fn shot_frame_is_classified() {
        let connector = RecordingConnector::default();
        let (mut link, _rx) = connected_link(&connector);
        let calibration = Calibration { r: 300.0, g: 300.0, b: 300.0 };

        let outcome = link.handle_frame(1, Frame::Text("300,60,40,1".into()), &calibration, 30);
        assert_eq!(outcome, FrameOutcome::Shot(ColorSymbol::Red));
        assert_eq!(link.last_packet(), "300,60,40,1");
        assert_eq!(link.last_sample(), Some(RawSample { r: 300.0, g: 60.0, b: 40.0 }));
    }

    #[test]
    fn reading_without_trigger_only_updates_sample() {
        let connector = RecordingConnector::default();
        let (mut link, _rx) = connected_link(&connector);

        let outcome = link.handle_frame(
            1,
            Frame::Text("310,305,298,0".into()),
            &Calibration::default(),
            50,
        );
        assert_eq!(outcome, FrameOutcome::Sample);
        assert_eq!(
            link.calibration_sample(),
            Some(RawSample { r: 310.0, g: 305.0, b: 298.0 })
        );
    }

    #[test]
    fn status_frame_updates_metadata_only() {
        let connector = RecordingConnector::default();
        let (mut link, _rx) = connected_link(&connector);
        link.handle_frame(1, Frame::Text("1,2,3,0".into()), &Calibration::default(), 50);

        let outcome = link.handle_frame(
            1,
            Frame::Text("VERSION:2.1.0;AP:QuackHunt:quackquack;OLED:128,32;".into()),
            &Calibration::default(),
            50,
        );
        assert_eq!(outcome, FrameOutcome::Status);
        assert_eq!(link.device().version, "2.1.0");
        assert_eq!(link.device().ap.ssid, "QuackHunt");
        assert_eq!((link.device().oled_width, link.device().oled_height), (128, 32));
        assert_eq!(link.last_sample(), Some(RawSample { r: 1.0, g: 2.0, b: 3.0 }));
    }

    #[test]
    fn binary_ack_has_no_effect() {
        let connector = RecordingConnector::default();
        let (mut link, _rx) = connected_link(&connector);

        let outcome = link.handle_frame(
            1,
            Frame::Binary(b"Accuracy: 50%\nH|S: 1|2".to_vec()),
            &Calibration::default(),
            50,
        );
        assert_eq!(
            outcome,
            FrameOutcome::Ack(Some(Telemetry { accuracy: 50, hits: 1, shots: 2 }))
        );
        assert_eq!(link.last_sample(), None);
    }

    #[test]
    fn calibration_needs_connection_and_sample() {
        let connector = RecordingConnector::default();
        let (events_tx, _events_rx) = mpsc::channel(8);
        let mut link = DeviceLink::new(PlayerId(1));
        assert_eq!(link.calibration_sample(), None);

        link.connect("10.0.0.5", &connector, &events_tx);
        link.on_opened(1);
        assert_eq!(link.calibration_sample(), None);

        link.handle_frame(1, Frame::Text("400,410,390,0".into()), &Calibration::default(), 50);
        assert!(link.calibration_sample().is_some());

        link.on_closed(1);
        assert_eq!(link.calibration_sample(), None);
    }

    #[test]
    fn telemetry_goes_out_as_text_then_binary() {
        let connector = RecordingConnector::default();
        let (link, _rx) = connected_link(&connector);
        let mut outbound = connector.take_outbound(0).expect("recorded");

        let telemetry = Telemetry { accuracy: 100, hits: 0, shots: 0 };
        link.send_telemetry(&telemetry).expect("sent");

        let expected = "Accuracy: 100%\nH|S: 0|0";
        assert_eq!(outbound.try_recv().ok(), Some(Frame::Text(expected.into())));
        assert_eq!(
            outbound.try_recv().ok(),
            Some(Frame::Binary(expected.as_bytes().to_vec()))
        );
    }

    #[test]
    fn telemetry_requires_connection() {
        let link = DeviceLink::new(PlayerId(3));
        let telemetry = Telemetry { accuracy: 100, hits: 0, shots: 0 };
        assert_eq!(link.send_telemetry(&telemetry), Err(LinkError::NotConnected));
    }

    #[test]
    fn shutdown_cancels_everything() {
        let connector = RecordingConnector::default();
        let (mut link, _rx) = connected_link(&connector);
        let connection = connector.cancel_token(0).expect("recorded");

        link.shutdown();
        assert!(connection.is_cancelled());
        assert!(link.lifetime().is_cancelled());
        assert_eq!(link.state(), LinkState::Idle);

        let (events_tx, _events_rx) = mpsc::channel(8);
        assert!(!link.connect("192.168.1.2", &connector, &events_tx));
    }
}

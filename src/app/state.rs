//! Application state shared across routes

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::runtime::{ControlRequest, SessionRuntime};
use super::session::{Command, Session};
use crate::config::Config;
use crate::device::WsConnector;
use crate::players::OperatorError;
use crate::store::SettingsStore;
use crate::util::time::frame_duration;
use crate::ws::protocol::{ServerMsg, SessionSnapshot};

/// Queued operator commands before senders wait
const CONTROL_CAPACITY: usize = 32;
/// Buffered device events across all links
const LINK_EVENT_CAPACITY: usize = 256;
/// Renderer snapshots a slow client may lag behind
const RENDER_CAPACITY: usize = 64;

/// Failures of a control round-trip
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Rejected(#[from] OperatorError),

    #[error("Session loop is not running")]
    Unavailable,
}

/// Sends commands to the session loop and waits for the outcome
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlRequest>,
}

impl ControlHandle {
    pub fn new(tx: mpsc::Sender<ControlRequest>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, command: Command) -> Result<SessionSnapshot, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControlRequest { command, reply })
            .await
            .map_err(|_| ControlError::Unavailable)?;
        let result = rx.await.map_err(|_| ControlError::Unavailable)?;
        Ok(result?)
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub control: ControlHandle,
    /// Latest session state
    pub state_rx: watch::Receiver<SessionSnapshot>,
    /// Renderer stream
    pub render_tx: broadcast::Sender<ServerMsg>,
}

impl AppState {
    /// Build the shared state and the session loop that serves it
    pub fn new(config: Config) -> (Self, SessionRuntime) {
        let config = Arc::new(config);

        let (link_tx, link_rx) = mpsc::channel(LINK_EVENT_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (render_tx, _) = broadcast::channel(RENDER_CAPACITY);

        let session = Session::new(
            &config,
            SettingsStore::new(config.settings_path.clone()),
            Arc::new(WsConnector),
            link_tx,
        );
        let (state_tx, state_rx) = watch::channel(session.snapshot());

        let runtime = SessionRuntime::new(
            session,
            link_rx,
            control_rx,
            state_tx,
            render_tx.clone(),
            frame_duration(config.frame_rate),
        );

        let state = Self {
            config,
            control: ControlHandle::new(control_tx),
            state_rx,
            render_tx,
        };
        (state, runtime)
    }

    /// Latest published session state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state_rx.borrow().clone()
    }
}

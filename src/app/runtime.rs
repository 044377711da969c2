//! Orchestrator task: the only place session state is touched

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::session::{Command, CommandResult, Session};
use crate::device::transport::LinkEvent;
use crate::ws::protocol::{ServerMsg, SessionSnapshot};

/// Operator command with its reply slot
#[derive(Debug)]
pub struct ControlRequest {
    pub command: Command,
    pub reply: oneshot::Sender<CommandResult>,
}

pub struct SessionRuntime {
    session: Session,
    link_rx: mpsc::Receiver<LinkEvent>,
    control_rx: mpsc::Receiver<ControlRequest>,
    state_tx: watch::Sender<SessionSnapshot>,
    render_tx: broadcast::Sender<ServerMsg>,
    frame_period: Duration,
}

impl SessionRuntime {
    pub fn new(
        session: Session,
        link_rx: mpsc::Receiver<LinkEvent>,
        control_rx: mpsc::Receiver<ControlRequest>,
        state_tx: watch::Sender<SessionSnapshot>,
        render_tx: broadcast::Sender<ServerMsg>,
        frame_period: Duration,
    ) -> Self {
        Self {
            session,
            link_rx,
            control_rx,
            state_tx,
            render_tx,
            frame_period,
        }
    }

    /// Run until `shutdown` fires
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut frames = interval(self.frame_period);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(frame_ms = self.frame_period.as_millis() as u64, "Session loop started");

        loop {
            let next_timer = self.session.next_deadline();

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = frames.tick() => {
                    if let Some(msg) = self.session.tick() {
                        self.publish(msg);
                    }
                }

                Some(event) = self.link_rx.recv() => {
                    self.session.handle_link_event(event, Instant::now());
                }

                Some(request) = self.control_rx.recv() => {
                    debug!(command = ?request.command, "Control request");
                    let result = self.session.handle_command(request.command);
                    if let Ok(state) = &result {
                        self.state_tx.send_replace(state.clone());
                    }
                    let _ = request.reply.send(result);
                }

                _ = sleep_until_deadline(next_timer) => {
                    self.session.fire_due(Instant::now());
                }
            }
        }

        self.session.shutdown();
        info!("Session loop stopped");
    }

    fn publish(&self, msg: ServerMsg) {
        if let ServerMsg::Snapshot { state, .. } = &msg {
            self.state_tx.send_replace(state.clone());
        }
        // No renderer connected is fine
        let _ = self.render_tx.send(msg);
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::Config;
    use crate::device::transport::testing::RecordingConnector;
    use crate::device::transport::LinkEventKind;
    use crate::device::ConnectionStatus;
    use crate::players::PlayerId;
    use crate::store::SettingsStore;

    struct Running {
        control_tx: mpsc::Sender<ControlRequest>,
        link_tx: mpsc::Sender<LinkEvent>,
        render_rx: broadcast::Receiver<ServerMsg>,
        connector: RecordingConnector,
        shutdown: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
        _dir: tempfile::TempDir,
    }

    fn spawn_runtime() -> Running {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            rng_seed: Some(7),
            ..Config::default()
        };
        let connector = RecordingConnector::default();
        let (link_tx, link_rx) = mpsc::channel(16);
        let (control_tx, control_rx) = mpsc::channel(16);
        let (render_tx, render_rx) = broadcast::channel(16);

        let session = Session::new(
            &config,
            SettingsStore::new(dir.path().join("settings.json")),
            Arc::new(connector.clone()),
            link_tx.clone(),
        );
        let (state_tx, _state_rx) = watch::channel(session.snapshot());
        let runtime = SessionRuntime::new(
            session,
            link_rx,
            control_rx,
            state_tx,
            render_tx,
            Duration::from_millis(5),
        );

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(runtime.run(shutdown.clone()));
        Running {
            control_tx,
            link_tx,
            render_rx,
            connector,
            shutdown,
            handle,
            _dir: dir,
        }
    }

    async fn request(running: &Running, command: Command) -> CommandResult {
        let (reply, rx) = oneshot::channel();
        running
            .control_tx
            .send(ControlRequest { command, reply })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn commands_and_link_events_share_one_loop() {
        let running = spawn_runtime();
        let state = request(&running, Command::Connect(None)).await.unwrap();
        assert_eq!(state.players[0].status, ConnectionStatus::Connecting);

        let request_info = running.connector.request(0).unwrap();
        running
            .link_tx
            .send(LinkEvent {
                player: request_info.player,
                generation: request_info.generation,
                kind: LinkEventKind::Opened,
            })
            .await
            .unwrap();

        let state = request(&running, Command::Snapshot).await.unwrap();
        assert_eq!(state.players[0].status, ConnectionStatus::Connected);

        running.shutdown.cancel();
        running.handle.await.unwrap();
        assert!(running.connector.cancel_token(0).unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn frames_publish_snapshots() {
        let mut running = spawn_runtime();
        let msg = running.render_rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMsg::Snapshot { .. }));

        running.shutdown.cancel();
        running.handle.await.unwrap();
    }

    #[tokio::test]
    async fn frames_keep_ticking_while_link_events_pour_in() {
        let mut running = spawn_runtime();
        let link_tx = running.link_tx.clone();
        let flood = tokio::spawn(async move {
            let event = LinkEvent {
                player: PlayerId(999),
                generation: 1,
                kind: LinkEventKind::Opened,
            };
            while link_tx.send(event.clone()).await.is_ok() {}
        });

        let mut snapshots = 0;
        while snapshots < 3 {
            let received = tokio::time::timeout(Duration::from_secs(2), running.render_rx.recv())
                .await
                .expect("frame published");
            match received {
                Ok(ServerMsg::Snapshot { .. }) => snapshots += 1,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("render channel closed"),
            }
        }

        flood.abort();
        running.shutdown.cancel();
        running.handle.await.unwrap();
    }

    #[tokio::test]
    async fn reconnect_fires_after_the_delay() {
        let running = spawn_runtime();
        request(&running, Command::Connect(None)).await.unwrap();
        let first = running.connector.request(0).unwrap();

        running
            .link_tx
            .send(LinkEvent {
                player: first.player,
                generation: first.generation,
                kind: LinkEventKind::Closed {
                    reason: "refused".into(),
                },
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(running.connector.attempts(), 1);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(running.connector.attempts(), 2);

        running.shutdown.cancel();
        running.handle.await.unwrap();
    }
}

//! Session context: the single owner of players, game and timers
//!
//! Every handler runs on the orchestrator task and takes the current instant
//! explicitly, so the whole session can be driven step by step in tests.

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::timers::{TaskKind, TimerQueue};
use crate::config::Config;
use crate::device::transport::{Connector, LinkEvent, LinkEventKind};
use crate::device::FrameOutcome;
use crate::game::difficulty::Difficulty;
use crate::game::field::Playfield;
use crate::game::snapshot::SnapshotBuilder;
use crate::game::GameSession;
use crate::players::registry::PlayerUpdate;
use crate::players::{OperatorError, PlayerId, PlayerRegistry};
use crate::store::{Settings, SettingsStore};
use crate::util::time::{snapshot_interval, RECONNECT_DELAY, TELEMETRY_PERIOD};
use crate::ws::protocol::{GameEvent, ServerMsg, SessionSnapshot};

/// Operator actions
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Current state, no change
    Snapshot,
    AddPlayer,
    /// Remove a player; the last one when `None`
    RemovePlayer(Option<PlayerId>),
    UpdatePlayer { id: PlayerId, update: PlayerUpdate },
    /// Connect one player, or all of them when `None`
    Connect(Option<PlayerId>),
    Calibrate(PlayerId),
    UpdateSettings {
        dark: Option<bool>,
        difficulty: Option<usize>,
    },
    ResetSettings,
    Start { force: bool },
}

impl Command {
    fn mutates_settings(&self) -> bool {
        !matches!(
            self,
            Command::Snapshot
                | Command::Connect(_)
                | Command::Start { .. }
                | Command::ResetSettings
        )
    }
}

pub type CommandResult = Result<SessionSnapshot, OperatorError>;

pub struct Session {
    players: PlayerRegistry,
    game: Option<GameSession>,
    timers: TimerQueue,
    store: SettingsStore,
    dark: bool,
    difficulty: usize,
    field: Playfield,
    rng: ChaCha8Rng,
    snapshots: SnapshotBuilder,
    connector: Arc<dyn Connector>,
    link_events: mpsc::Sender<LinkEvent>,
    frame: u64,
}

impl Session {
    pub fn new(
        config: &Config,
        store: SettingsStore,
        connector: Arc<dyn Connector>,
        link_events: mpsc::Sender<LinkEvent>,
    ) -> Self {
        let settings = store.load();
        let difficulty = if Difficulty::is_valid(settings.difficulty) {
            settings.difficulty
        } else {
            warn!(difficulty = settings.difficulty, "Stored difficulty out of range, using 0");
            0
        };
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        info!(
            players = settings.players.len(),
            difficulty,
            path = %store.path().display(),
            "Settings loaded"
        );

        Self {
            players: PlayerRegistry::from_profiles(&settings.players),
            game: None,
            timers: TimerQueue::new(),
            store,
            dark: settings.dark,
            difficulty,
            field: Playfield::fit(config.window_width, config.window_height, config.field_aspect),
            rng,
            snapshots: SnapshotBuilder::new(snapshot_interval(config.frame_rate, config.snapshot_rate)),
            connector,
            link_events,
            frame: 0,
        }
    }

    pub fn players(&self) -> &PlayerRegistry {
        &self.players
    }

    pub fn is_running(&self) -> bool {
        self.game.is_some()
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.capture(
            self.frame,
            self.field,
            &self.players,
            self.game.as_ref(),
            self.dark,
            self.difficulty,
        )
    }

    /// Apply an operator command. A rejected command changes nothing.
    pub fn handle_command(&mut self, command: Command) -> CommandResult {
        let persist = command.mutates_settings();
        match command {
            Command::Snapshot => return Ok(self.snapshot()),
            Command::AddPlayer => {
                self.players.add_default()?;
            }
            Command::RemovePlayer(id) => self.remove_player(id)?,
            Command::UpdatePlayer { id, update } => self.update_player(id, update)?,
            Command::Connect(id) => self.connect(id)?,
            Command::Calibrate(id) => {
                self.players.calibrate(id)?;
            }
            Command::UpdateSettings { dark, difficulty } => self.update_settings(dark, difficulty)?,
            Command::ResetSettings => self.reset_settings(),
            Command::Start { force } => self.start(force)?,
        }

        if persist {
            self.persist();
        }
        self.snapshots.force_next();
        Ok(self.snapshot())
    }

    fn remove_player(&mut self, id: Option<PlayerId>) -> Result<(), OperatorError> {
        let id = match id.or_else(|| self.players.last_id()) {
            Some(id) => id,
            None => return Err(OperatorError::LastPlayer),
        };
        self.players.remove(id)?;
        self.timers.purge_player(id);
        Ok(())
    }

    fn update_player(&mut self, id: PlayerId, update: PlayerUpdate) -> Result<(), OperatorError> {
        if self.is_running() && (update.name.is_some() || update.address.is_some()) {
            return Err(OperatorError::SessionRunning);
        }
        self.players.update(id, update)
    }

    fn connect(&mut self, id: Option<PlayerId>) -> Result<(), OperatorError> {
        let targets: Vec<PlayerId> = match id {
            Some(id) => vec![id],
            None => self.players.iter().map(|p| p.id).collect(),
        };
        for id in targets {
            self.players
                .connect(id, self.connector.as_ref(), &self.link_events)?;
        }
        Ok(())
    }

    fn update_settings(
        &mut self,
        dark: Option<bool>,
        difficulty: Option<usize>,
    ) -> Result<(), OperatorError> {
        if let Some(level) = difficulty {
            if !Difficulty::is_valid(level) {
                return Err(OperatorError::InvalidDifficulty(level));
            }
        }

        if let Some(dark) = dark {
            self.dark = dark;
        }
        if let Some(level) = difficulty {
            if level != self.difficulty {
                self.difficulty = level;
                if self.is_running() {
                    info!(difficulty = level, "Difficulty changed, restarting game");
                    self.begin_game()?;
                }
            }
        }
        Ok(())
    }

    fn reset_settings(&mut self) {
        if let Err(e) = self.store.reset() {
            warn!(error = %e, "Failed to remove settings file");
        }
        let defaults = Settings::default();
        self.players.reset_to(&defaults.players);
        self.timers.clear();
        self.game = None;
        self.dark = defaults.dark;
        self.difficulty = defaults.difficulty;
        info!("Settings reset to defaults");
    }

    fn start(&mut self, force: bool) -> Result<(), OperatorError> {
        if self.is_running() {
            return Err(OperatorError::AlreadyStarted);
        }
        if !force && !self.players.all_connected() {
            return Err(OperatorError::PlayersNotConnected);
        }
        self.begin_game()
    }

    fn begin_game(&mut self) -> Result<(), OperatorError> {
        let game = GameSession::bird_hunt(self.field, self.difficulty, &mut self.rng)?;
        self.players.reset_counters();
        self.game = Some(game);
        self.snapshots.record([GameEvent::SessionStarted {
            difficulty: self.difficulty,
        }]);
        Ok(())
    }

    fn persist(&self) {
        let settings = Settings {
            dark: self.dark,
            difficulty: self.difficulty,
            players: self.players.profiles(),
            ..Settings::default()
        };
        if let Err(e) = self.store.save(&settings) {
            warn!(error = %e, path = %self.store.path().display(), "Failed to persist settings");
        }
    }

    /// React to a transport event
    pub fn handle_link_event(&mut self, event: LinkEvent, now: Instant) {
        let LinkEvent {
            player: id,
            generation,
            kind,
        } = event;

        if self.players.get(id).is_none() {
            debug!(player = %id, "Event for a removed player ignored");
            return;
        }

        match kind {
            LinkEventKind::Opened => self.on_opened(id, generation, now),
            LinkEventKind::Closed { reason } => self.on_closed(id, generation, &reason, now),
            LinkEventKind::Frame(frame) => match self.players.handle_frame(id, generation, frame) {
                Some(FrameOutcome::Stale) => debug!(player = %id, generation, "Stale frame dropped"),
                Some(FrameOutcome::Shot(symbol)) => debug!(player = %id, ?symbol, "Shot received"),
                _ => {}
            },
        }
    }

    fn on_opened(&mut self, id: PlayerId, generation: u64, now: Instant) {
        let Some(player) = self.players.get_mut(id) else {
            return;
        };
        let Some(connection) = player.link.on_opened(generation) else {
            return;
        };
        info!(player = %player.name, address = %player.address, "Device connected");
        self.timers
            .schedule(id, TaskKind::Telemetry, now + TELEMETRY_PERIOD, connection);
    }

    fn on_closed(&mut self, id: PlayerId, generation: u64, reason: &str, now: Instant) {
        let Some(player) = self.players.get_mut(id) else {
            return;
        };
        if !player.link.on_closed(generation) {
            return;
        }
        warn!(player = %player.name, %reason, "Device link closed, retrying");
        let lifetime = player.link.lifetime().clone();
        self.timers
            .schedule(id, TaskKind::Reconnect, now + RECONNECT_DELAY, lifetime);
    }

    /// Run every timer task due at `now`
    pub fn fire_due(&mut self, now: Instant) {
        for task in self.timers.pop_due(now) {
            if self.players.get(task.player).is_none() {
                continue;
            }
            match task.kind {
                TaskKind::Reconnect => {
                    debug!(player = %task.player, "Reconnecting device");
                    if let Err(e) = self.players.connect(
                        task.player,
                        self.connector.as_ref(),
                        &self.link_events,
                    ) {
                        warn!(error = %e, "Reconnect failed");
                    }
                }
                TaskKind::Telemetry => {
                    if self.push_telemetry(task.player) {
                        self.timers.schedule(
                            task.player,
                            TaskKind::Telemetry,
                            now + TELEMETRY_PERIOD,
                            task.token,
                        );
                    }
                }
            }
        }
    }

    /// Send counters to a connected device while a game runs. Returns false
    /// when the device is no longer connected.
    fn push_telemetry(&self, id: PlayerId) -> bool {
        let Some(player) = self.players.get(id) else {
            return false;
        };
        if !player.link.is_connected() {
            return false;
        }
        if self.game.is_some() {
            if let Err(e) = player.link.send_telemetry(&player.telemetry()) {
                debug!(player = %player.name, error = %e, "Telemetry not sent");
            }
        }
        true
    }

    /// Advance one simulation frame. Returns a renderer snapshot when one is
    /// due.
    pub fn tick(&mut self) -> Option<ServerMsg> {
        self.frame += 1;
        if let Some(game) = self.game.as_mut() {
            let events = game.tick(&mut self.players, &mut self.rng);
            self.snapshots.record(events);
        }

        if !self.snapshots.should_send() {
            return None;
        }
        let state = self.snapshot();
        Some(self.snapshots.build(state))
    }

    /// Tear every device link down
    pub fn shutdown(&mut self) {
        self.players.shutdown_all();
        self.timers.clear();
        info!("Session shut down");
    }
}

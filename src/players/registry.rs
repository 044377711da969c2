//! Registered players and their per-player state

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::calibration::{Calibration, CalibrationStore};
use super::{OperatorError, PlayerId};
use crate::device::protocol::Telemetry;
use crate::device::transport::{Connector, Frame, LinkEvent};
use crate::device::{ColorSymbol, ConnectionStatus, DeviceLink, FrameOutcome};
use crate::store::PlayerProfile;

/// Most players that can share the gallery
pub const MAX_PLAYERS: usize = 3;

/// A registered player
#[derive(Debug)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub address: String,
    /// Detection threshold (0-255)
    pub threshold: u8,
    pub shots: u32,
    pub hits: u32,
    /// Most recent unconsumed shot; a newer shot overwrites it
    pending: Option<ColorSymbol>,
    pub link: DeviceLink,
}

impl Player {
    fn new(id: PlayerId, profile: &PlayerProfile) -> Self {
        Self {
            id,
            name: profile.name.clone(),
            address: profile.ip.clone(),
            threshold: profile.threshold,
            shots: 0,
            hits: 0,
            pending: None,
            link: DeviceLink::new(id),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.link.status()
    }

    /// Hit percentage; 100 before the first shot
    pub fn accuracy(&self) -> u32 {
        if self.shots == 0 {
            return 100;
        }
        (f64::from(self.hits) / f64::from(self.shots) * 100.0).round() as u32
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            accuracy: self.accuracy(),
            hits: self.hits,
            shots: self.shots,
        }
    }

    /// Store a shot in the pending slot. Returns the shot it overwrote.
    pub fn record_shot(&mut self, symbol: ColorSymbol) -> Option<ColorSymbol> {
        self.pending.replace(symbol)
    }

    pub fn pending_shot(&self) -> Option<ColorSymbol> {
        self.pending
    }

    /// Read and clear the pending slot
    pub fn take_pending(&mut self) -> Option<ColorSymbol> {
        self.pending.take()
    }

    pub fn reset_counters(&mut self) {
        self.shots = 0;
        self.hits = 0;
        self.pending = None;
    }
}

/// Requested changes to a player
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerUpdate {
    pub name: Option<String>,
    pub address: Option<String>,
    pub threshold: Option<u8>,
}

/// All registered players, in registration order
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: Vec<Player>,
    calibration: CalibrationStore,
    next_id: u32,
}

impl PlayerRegistry {
    pub fn from_profiles(profiles: &[PlayerProfile]) -> Self {
        let mut registry = Self::default();
        for profile in profiles.iter().take(MAX_PLAYERS) {
            registry.insert(profile);
        }
        registry
    }

    fn insert(&mut self, profile: &PlayerProfile) -> PlayerId {
        self.next_id += 1;
        let id = PlayerId(self.next_id);
        self.calibration.set(id, profile.calibration);
        self.players.push(Player::new(id, profile));
        id
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.iter_mut()
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    fn require(&self, id: PlayerId) -> Result<&Player, OperatorError> {
        self.get(id).ok_or(OperatorError::UnknownPlayer(id))
    }

    pub fn last_id(&self) -> Option<PlayerId> {
        self.players.last().map(|p| p.id)
    }

    pub fn calibration(&self, id: PlayerId) -> Calibration {
        self.calibration.get(id)
    }

    /// Register a player with default settings (`Player N`)
    pub fn add_default(&mut self) -> Result<PlayerId, OperatorError> {
        if self.players.len() >= MAX_PLAYERS {
            return Err(OperatorError::TooManyPlayers(MAX_PLAYERS));
        }

        let mut position = self.players.len() + 1;
        let mut profile = PlayerProfile::numbered(position);
        while self.name_taken(&profile.name, None) {
            position += 1;
            profile.name = format!("Player {}", position);
        }

        let id = self.insert(&profile);
        info!(player = %id, name = %profile.name, "Player added");
        Ok(id)
    }

    /// Remove a player and tear its link down
    pub fn remove(&mut self, id: PlayerId) -> Result<Player, OperatorError> {
        let index = self
            .players
            .iter()
            .position(|p| p.id == id)
            .ok_or(OperatorError::UnknownPlayer(id))?;
        if self.players.len() <= 1 {
            return Err(OperatorError::LastPlayer);
        }

        let mut player = self.players.remove(index);
        player.link.shutdown();
        self.calibration.forget(id);
        info!(player = %id, name = %player.name, "Player removed");
        Ok(player)
    }

    fn name_taken(&self, name: &str, except: Option<PlayerId>) -> bool {
        self.players
            .iter()
            .any(|p| p.name == name && Some(p.id) != except)
    }

    /// Validate and apply `update`; nothing changes when any part is invalid
    pub fn update(&mut self, id: PlayerId, update: PlayerUpdate) -> Result<(), OperatorError> {
        self.require(id)?;

        let name = match update.name {
            Some(name) => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(OperatorError::EmptyName);
                }
                if self.name_taken(&name, Some(id)) {
                    return Err(OperatorError::DuplicateName(name));
                }
                Some(name)
            }
            None => None,
        };

        let player = self.get_mut(id).ok_or(OperatorError::UnknownPlayer(id))?;
        if let Some(name) = name {
            player.name = name;
        }
        if let Some(address) = update.address {
            player.address = address.trim().to_string();
        }
        if let Some(threshold) = update.threshold {
            player.threshold = threshold;
        }
        Ok(())
    }

    /// Start connecting a player's device
    pub fn connect(
        &mut self,
        id: PlayerId,
        connector: &dyn Connector,
        events: &mpsc::Sender<LinkEvent>,
    ) -> Result<bool, OperatorError> {
        let player = self.get_mut(id).ok_or(OperatorError::UnknownPlayer(id))?;
        Ok(player.link.connect(&player.address, connector, events))
    }

    /// Copy the last reading of a connected device into its calibration
    pub fn calibrate(&mut self, id: PlayerId) -> Result<Calibration, OperatorError> {
        let player = self.require(id)?;
        if !player.link.is_connected() {
            return Err(OperatorError::NotConnected(player.name.clone()));
        }
        let sample = player
            .link
            .calibration_sample()
            .ok_or_else(|| OperatorError::NoSample(player.name.clone()))?;
        if !sample.is_finite() {
            return Err(OperatorError::InvalidSample(player.name.clone()));
        }

        let calibration = self.calibration.record(id, sample);
        info!(player = %id, ?calibration, "Calibration recorded");
        Ok(calibration)
    }

    /// Route an inbound frame to its link; a classified shot lands in the
    /// player's pending slot
    pub fn handle_frame(&mut self, id: PlayerId, generation: u64, frame: Frame) -> Option<FrameOutcome> {
        let calibration = self.calibration.get(id);
        let player = self.get_mut(id)?;
        let outcome = player
            .link
            .handle_frame(generation, frame, &calibration, player.threshold);

        if let FrameOutcome::Shot(symbol) = outcome {
            if let Some(lost) = player.record_shot(symbol) {
                debug!(player = %id, ?lost, ?symbol, "Unread shot overwritten");
            }
        }
        Some(outcome)
    }

    pub fn all_connected(&self) -> bool {
        !self.players.is_empty() && self.players.iter().all(|p| p.link.is_connected())
    }

    pub fn reset_counters(&mut self) {
        for player in &mut self.players {
            player.reset_counters();
        }
    }

    /// Tear every link down (settings reset, shutdown)
    pub fn shutdown_all(&mut self) {
        for player in &mut self.players {
            player.link.shutdown();
        }
    }

    /// Replace every player (settings reset). Ids keep counting up, so events
    /// from torn-down links never match a new player.
    pub fn reset_to(&mut self, profiles: &[PlayerProfile]) {
        self.shutdown_all();
        self.players.clear();
        self.calibration = CalibrationStore::new();
        for profile in profiles.iter().take(MAX_PLAYERS) {
            self.insert(profile);
        }
    }

    /// Profiles to persist
    pub fn profiles(&self) -> Vec<PlayerProfile> {
        self.players
            .iter()
            .map(|p| PlayerProfile {
                name: p.name.clone(),
                ip: p.address.clone(),
                threshold: p.threshold,
                calibration: self.calibration.get(p.id),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::transport::testing::RecordingConnector;
    use crate::device::protocol::RawSample;

    fn registry_with(count: usize) -> PlayerRegistry {
        let profiles: Vec<_> = (1..=count).map(PlayerProfile::numbered).collect();
        PlayerRegistry::from_profiles(&profiles)
    }

    fn connect_player(registry: &mut PlayerRegistry, id: PlayerId) -> u64 {
        let connector = RecordingConnector::default();
        let (events_tx, _events_rx) = mpsc::channel(8);
        registry.connect(id, &connector, &events_tx).unwrap();
        let player = registry.get_mut(id).unwrap();
        let generation = player.link.generation();
        player.link.on_opened(generation);
        generation
    }

    #[test]
    fn accuracy_defaults_to_hundred() {
        let mut registry = registry_with(1);
        let player = registry.iter_mut().next().unwrap();
        assert_eq!(player.accuracy(), 100);

        player.shots = 3;
        player.hits = 2;
        assert_eq!(player.accuracy(), 67);
        player.hits = 0;
        assert_eq!(player.accuracy(), 0);
    }

    #[test]
    fn add_stops_at_three_players() {
        let mut registry = registry_with(1);
        registry.add_default().unwrap();
        let third = registry.add_default().unwrap();

        let player = registry.get(third).unwrap();
        assert_eq!(player.name, "Player 3");
        assert_eq!(player.address, "192.168.1.4");
        assert_eq!(player.threshold, 50);
        assert_eq!(registry.calibration(third), Calibration::default());

        assert_eq!(registry.add_default(), Err(OperatorError::TooManyPlayers(3)));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn default_name_skips_taken_names() {
        let mut registry = registry_with(1);
        let first = registry.last_id().unwrap();
        registry
            .update(first, PlayerUpdate { name: Some("Player 2".into()), ..Default::default() })
            .unwrap();

        let added = registry.add_default().unwrap();
        assert_eq!(registry.get(added).unwrap().name, "Player 3");
    }

    #[test]
    fn last_player_cannot_be_removed() {
        let mut registry = registry_with(2);
        let last = registry.last_id().unwrap();
        let removed = registry.remove(last).unwrap();
        assert!(removed.link.lifetime().is_cancelled());

        let only = registry.last_id().unwrap();
        assert_eq!(registry.remove(only).unwrap_err(), OperatorError::LastPlayer);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.remove(PlayerId(99)).unwrap_err(),
            OperatorError::UnknownPlayer(PlayerId(99))
        );
    }

    #[test]
    fn rename_keeps_names_unique() {
        let mut registry = registry_with(2);
        let ids: Vec<_> = registry.iter().map(|p| p.id).collect();

        let duplicate = PlayerUpdate {
            name: Some("Player 2".into()),
            threshold: Some(10),
            ..Default::default()
        };
        assert_eq!(
            registry.update(ids[0], duplicate),
            Err(OperatorError::DuplicateName("Player 2".into()))
        );
        // Rejected update leaves the threshold alone too
        assert_eq!(registry.get(ids[0]).unwrap().threshold, 50);

        let blank = PlayerUpdate { name: Some("  ".into()), ..Default::default() };
        assert_eq!(registry.update(ids[0], blank), Err(OperatorError::EmptyName));

        let rename = PlayerUpdate {
            name: Some(" Duck Dodger ".into()),
            address: Some("10.0.0.9".into()),
            threshold: Some(70),
        };
        registry.update(ids[0], rename).unwrap();
        let player = registry.get(ids[0]).unwrap();
        assert_eq!(player.name, "Duck Dodger");
        assert_eq!(player.address, "10.0.0.9");
        assert_eq!(player.threshold, 70);
    }

    #[test]
    fn calibrate_rejects_without_connection_or_sample() {
        let mut registry = registry_with(1);
        let id = registry.last_id().unwrap();
        assert_eq!(
            registry.calibrate(id),
            Err(OperatorError::NotConnected("Player 1".into()))
        );

        let generation = connect_player(&mut registry, id);
        assert_eq!(registry.calibrate(id), Err(OperatorError::NoSample("Player 1".into())));
        assert_eq!(registry.calibration(id), Calibration::default());

        registry.handle_frame(id, generation, Frame::Text("300,310,305,0".into()));
        let calibration = registry.calibrate(id).unwrap();
        assert_eq!(calibration, Calibration::from(RawSample { r: 300.0, g: 310.0, b: 305.0 }));
        assert_eq!(registry.profiles()[0].calibration, calibration);
    }

    #[test]
    fn garbled_sample_is_not_calibrated() {
        let mut registry = registry_with(2);
        let id = registry.last_id().unwrap();
        let generation = connect_player(&mut registry, id);

        registry.handle_frame(id, generation, Frame::Text("12,13".into()));
        assert_eq!(
            registry.calibrate(id),
            Err(OperatorError::InvalidSample("Player 2".into()))
        );
        assert_eq!(registry.calibration(id), Calibration::default());
        assert!(registry.profiles().iter().all(|p| p.calibration.is_finite()));

        registry.handle_frame(id, generation, Frame::Text("x,1,2,0".into()));
        assert!(registry.calibrate(id).is_err());

        registry.handle_frame(id, generation, Frame::Text("280,300,310,0".into()));
        assert!(registry.calibrate(id).is_ok());
    }

    #[test]
    fn second_shot_before_a_tick_overwrites_the_first() {
        let mut registry = registry_with(1);
        let id = registry.last_id().unwrap();
        let generation = connect_player(&mut registry, id);
        registry.calibration.set(id, Calibration { r: 255.0, g: 255.0, b: 255.0 });

        registry.handle_frame(id, generation, Frame::Text("200,20,20,1".into()));
        registry.handle_frame(id, generation, Frame::Text("20,20,200,1".into()));

        let player = registry.get_mut(id).unwrap();
        assert_eq!(player.take_pending(), Some(ColorSymbol::Blue));
        assert_eq!(player.take_pending(), None);
    }

    #[test]
    fn reset_issues_fresh_ids() {
        let mut registry = registry_with(2);
        let old: Vec<_> = registry.iter().map(|p| p.id).collect();

        registry.reset_to(&[PlayerProfile::numbered(1)]);
        assert_eq!(registry.len(), 1);
        let new = registry.last_id().unwrap();
        assert!(!old.contains(&new));
        assert_eq!(registry.get(new).unwrap().name, "Player 1");
    }

    #[test]
    fn reading_without_trigger_leaves_pending_slot_empty() {
        let mut registry = registry_with(1);
        let id = registry.last_id().unwrap();
        let generation = connect_player(&mut registry, id);

        let outcome = registry.handle_frame(id, generation, Frame::Text("200,20,20,0".into()));
        assert_eq!(outcome, Some(FrameOutcome::Sample));
        assert_eq!(registry.get(id).unwrap().pending_shot(), None);
    }
}

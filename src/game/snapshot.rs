//! Snapshot building for renderers

use super::difficulty::Difficulty;
use super::field::Playfield;
use super::session::GameSession;
use crate::players::PlayerRegistry;
use crate::ws::protocol::{GameEvent, PlayerView, ServerMsg, SessionSnapshot, TargetView};

/// Builds renderer snapshots and collects the events between them
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
    /// Events since the last snapshot
    pending_events: Vec<GameEvent>,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
            pending_events: Vec::new(),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (used for operator changes)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    pub fn record(&mut self, events: impl IntoIterator<Item = GameEvent>) {
        self.pending_events.extend(events);
    }

    pub fn pending_events(&self) -> &[GameEvent] {
        &self.pending_events
    }

    /// Capture the current state
    pub fn capture(
        &self,
        frame: u64,
        field: Playfield,
        players: &PlayerRegistry,
        game: Option<&GameSession>,
        dark: bool,
        difficulty: usize,
    ) -> SessionSnapshot {
        let players = players
            .iter()
            .map(|p| PlayerView::new(p, players.calibration(p.id)))
            .collect();
        let targets = game
            .map(|g| g.targets().into_iter().map(TargetView::from).collect())
            .unwrap_or_default();

        SessionSnapshot {
            frame,
            running: game.is_some(),
            dark,
            difficulty,
            difficulty_label: Difficulty::get(difficulty).map(|d| d.label).unwrap_or_default(),
            field,
            players,
            targets,
        }
    }

    /// Wrap a captured state with the events collected since the last one
    pub fn build(&mut self, state: SessionSnapshot) -> ServerMsg {
        ServerMsg::Snapshot {
            frame: state.frame,
            state,
            events: std::mem::take(&mut self.pending_events),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ColorSymbol;
    use crate::players::PlayerId;
    use crate::store::PlayerProfile;

    #[test]
    fn interval_gates_snapshots() {
        let mut builder = SnapshotBuilder::new(2);
        assert!(!builder.should_send());
        assert!(builder.should_send());
        assert!(!builder.should_send());

        builder.force_next();
        assert!(builder.should_send());
    }

    #[test]
    fn build_drains_collected_events() {
        let mut builder = SnapshotBuilder::new(1);
        builder.record(vec![GameEvent::TargetEscaped { color: ColorSymbol::Blue }]);
        builder.record(vec![GameEvent::ShotFired {
            player: PlayerId(1),
            color: ColorSymbol::None,
            cue: 0,
        }]);

        let players = PlayerRegistry::from_profiles(&[PlayerProfile::numbered(1)]);
        let field = Playfield::fit(800.0, 600.0, 4.0 / 3.0);
        let state = builder.capture(9, field, &players, None, true, 2);
        assert!(!state.running);
        assert_eq!(state.difficulty_label, "Bring 'em on!");
        assert_eq!(state.players.len(), 1);
        assert_eq!(state.players[0].accuracy, 100);

        match builder.build(state) {
            ServerMsg::Snapshot { frame, events, .. } => {
                assert_eq!(frame, 9);
                assert_eq!(events.len(), 2);
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(builder.pending_events().is_empty());
    }

    #[test]
    fn snapshot_hides_device_passwords() {
        let players = PlayerRegistry::from_profiles(&[PlayerProfile::numbered(1)]);
        let builder = SnapshotBuilder::new(1);
        let state = builder.capture(0, Playfield::fit(800.0, 600.0, 1.0), &players, None, false, 0);
        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("pass"));
    }
}

//! A running game: consumes pending shots, drives the mode and keeps score

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use super::birds::BirdHunt;
use super::entity::Entity;
use super::field::Playfield;
use super::{pick_hit_cue, pick_shot_cue, GameMode, ShotEvent};
use crate::players::{OperatorError, PlayerRegistry};
use crate::ws::protocol::GameEvent;

pub struct GameSession {
    mode: Box<dyn GameMode>,
    difficulty: usize,
    frame: u64,
}

impl GameSession {
    pub fn new(mode: Box<dyn GameMode>, difficulty: usize) -> Self {
        Self {
            mode,
            difficulty,
            frame: 0,
        }
    }

    /// Start the bird hunt at `difficulty`
    pub fn bird_hunt(
        field: Playfield,
        difficulty: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, OperatorError> {
        let mode = BirdHunt::new(field, difficulty, rng.gen())
            .ok_or(OperatorError::InvalidDifficulty(difficulty))?;
        info!(mode = mode.name(), difficulty, "Game started");
        Ok(Self::new(Box::new(mode), difficulty))
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn mode_name(&self) -> &'static str {
        self.mode.name()
    }

    /// Ticks run so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn targets(&self) -> Vec<&Entity> {
        self.mode.targets()
    }

    /// Run one tick: every pending shot is read and cleared exactly once,
    /// counted, and scored against the mode's targets
    pub fn tick(&mut self, players: &mut PlayerRegistry, rng: &mut ChaCha8Rng) -> Vec<GameEvent> {
        self.frame += 1;
        let mut events = Vec::new();
        let mut shots = Vec::new();

        for player in players.iter_mut() {
            if let Some(symbol) = player.take_pending() {
                player.shots += 1;
                events.push(GameEvent::ShotFired {
                    player: player.id,
                    color: symbol,
                    cue: pick_shot_cue(rng),
                });
                shots.push(ShotEvent {
                    player: player.id,
                    symbol,
                });
            }
        }

        let outcome = self.mode.tick(&shots, rng);

        for hit in outcome.hits {
            if let Some(player) = players.get_mut(hit.player) {
                player.hits += 1;
                debug!(player = %player.name, color = ?hit.color, accuracy = player.accuracy(), "Target hit");
            }
            events.push(GameEvent::TargetHit {
                player: hit.player,
                color: hit.color,
                cue: pick_hit_cue(rng),
            });
        }

        events.extend(outcome.events);
        events
    }
}

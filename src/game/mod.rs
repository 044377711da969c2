//! Game simulation modules

pub mod birds;
pub mod difficulty;
pub mod entity;
pub mod field;
pub mod session;
pub mod snapshot;

pub use birds::BirdHunt;
pub use session::GameSession;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::device::ColorSymbol;
use crate::players::PlayerId;
use crate::ws::protocol::GameEvent;

use entity::Entity;

/// Shot sound variants
pub const SHOT_CUES: u8 = 3;
/// Hit sound variants
pub const HIT_CUES: u8 = 4;

/// A classified shot consumed by a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShotEvent {
    pub player: PlayerId,
    pub symbol: ColorSymbol,
}

/// A shot that struck a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub player: PlayerId,
    pub color: ColorSymbol,
}

/// Result of one mode tick
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub hits: Vec<Hit>,
    pub events: Vec<GameEvent>,
}

/// A playable mode. The session feeds it each tick's shots and scores the
/// hits it reports.
pub trait GameMode: Send {
    fn name(&self) -> &'static str;

    fn tick(&mut self, shots: &[ShotEvent], rng: &mut ChaCha8Rng) -> TickOutcome;

    /// Targets currently in play
    fn targets(&self) -> Vec<&Entity>;
}

pub fn pick_shot_cue<R: Rng>(rng: &mut R) -> u8 {
    rng.gen_range(0..SHOT_CUES)
}

pub fn pick_hit_cue<R: Rng>(rng: &mut R) -> u8 {
    rng.gen_range(0..HIT_CUES)
}

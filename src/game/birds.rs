//! Bird hunt: colored birds rise from the grass and get shot down
//!
//! Live birds are keyed by color, so at most one bird of each color is ever
//! in play. A shot whose classified color matches a live bird hits it.

use std::collections::BTreeMap;

use noise::Perlin;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::difficulty::Difficulty;
use super::entity::{Entity, EntityPhase};
use super::field::Playfield;
use super::{GameMode, Hit, ShotEvent, TickOutcome};
use crate::device::ColorSymbol;
use crate::ws::protocol::GameEvent;

/// Colors that birds come in
pub const BIRD_VARIETIES: [ColorSymbol; 4] = [
    ColorSymbol::Red,
    ColorSymbol::Yellow,
    ColorSymbol::Blue,
    ColorSymbol::Magenta,
];

/// Chance per tick that a spawn is attempted
pub const SPAWN_CHANCE: f64 = 0.02;

pub struct BirdHunt {
    field: Playfield,
    difficulty: Difficulty,
    mirrored: Difficulty,
    spawn_chance: f64,
    varieties: Vec<ColorSymbol>,
    birds: BTreeMap<ColorSymbol, Entity>,
    noise: Perlin,
}

impl BirdHunt {
    /// Returns `None` for a level outside the difficulty table
    pub fn new(field: Playfield, level: usize, noise_seed: u32) -> Option<Self> {
        Some(Self {
            field,
            difficulty: Difficulty::get(level)?,
            mirrored: Difficulty::mirrored(level)?,
            spawn_chance: SPAWN_CHANCE,
            varieties: BIRD_VARIETIES.to_vec(),
            birds: BTreeMap::new(),
            noise: Perlin::new(noise_seed),
        })
    }

    pub fn with_spawn_chance(mut self, chance: f64) -> Self {
        self.spawn_chance = chance;
        self
    }

    pub fn with_varieties(mut self, varieties: Vec<ColorSymbol>) -> Self {
        self.varieties = varieties;
        self
    }

    pub fn bird(&self, color: ColorSymbol) -> Option<&Entity> {
        self.birds.get(&color)
    }

    /// Put a bird in play unless one of its color already is
    pub fn insert(&mut self, bird: Entity) -> bool {
        if self.birds.contains_key(&bird.color) {
            return false;
        }
        self.birds.insert(bird.color, bird);
        true
    }

    fn resolve_shots(&mut self, shots: &[ShotEvent]) -> Vec<Hit> {
        let mut hits = Vec::new();
        for shot in shots.iter().filter(|s| s.symbol.is_color()) {
            // Birds struck earlier this tick still count until removal
            let struck = self.birds.get_mut(&shot.symbol).is_some_and(|bird| {
                bird.mark_hit();
                bird.phase == EntityPhase::Hit
            });
            if struck {
                hits.push(Hit {
                    player: shot.player,
                    color: shot.symbol,
                });
            }
        }
        hits
    }

    fn remove_struck(&mut self, rng: &mut ChaCha8Rng, events: &mut Vec<GameEvent>) {
        let struck: Vec<ColorSymbol> = self
            .birds
            .values()
            .filter(|b| b.phase == EntityPhase::Hit)
            .map(|b| b.color)
            .collect();

        for color in struck {
            if let Some(mut bird) = self.birds.remove(&color) {
                bird.expire();
                events.push(GameEvent::TargetDestroyed {
                    color,
                    x: bird.x,
                    y: bird.y,
                    vel_x: bird.vel_x,
                    vel_y: bird.vel_y,
                    size: bird.size,
                    feathers: rng.gen_range(5..=7),
                });
            }
        }
    }

    fn try_spawn(&mut self, rng: &mut ChaCha8Rng) -> Option<GameEvent> {
        if !rng.gen_bool(self.spawn_chance.clamp(0.0, 1.0)) {
            return None;
        }
        let color = *self.varieties.choose(rng)?;
        if self.birds.contains_key(&color) {
            return None;
        }

        let bird = Entity::spawn(color, &self.field, &self.difficulty, &self.mirrored, rng);
        debug!(?color, x = bird.x, speed = bird.speed, "Bird spawned");
        let event = GameEvent::TargetSpawned {
            color,
            x: bird.x,
            y: bird.y,
            size: bird.size,
        };
        self.birds.insert(color, bird);
        Some(event)
    }
}

impl GameMode for BirdHunt {
    fn name(&self) -> &'static str {
        "birds"
    }

    fn tick(&mut self, shots: &[ShotEvent], rng: &mut ChaCha8Rng) -> TickOutcome {
        let mut events = Vec::new();

        let hits = self.resolve_shots(shots);
        self.remove_struck(rng, &mut events);
        events.extend(self.try_spawn(rng));

        for bird in self.birds.values_mut() {
            if bird.advance(&self.field, &self.noise) {
                events.push(GameEvent::TargetEscaped { color: bird.color });
            }
        }

        TickOutcome { hits, events }
    }

    fn targets(&self) -> Vec<&Entity> {
        self.birds.values().collect()
    }
}

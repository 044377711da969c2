//! Target entities: rise from the ground, escape, then wander inside the field

use std::f64::consts::PI;

use noise::{NoiseFn, Perlin};
use rand::Rng;
use serde::Serialize;

use super::difficulty::Difficulty;
use super::field::Playfield;
use crate::device::ColorSymbol;

/// Flight animation frames per target
pub const FLIGHT_FRAMES: u8 = 4;

/// Noise input advance per wandering tick
const NOISE_STEP: f64 = 0.06;

/// Largest heading change per tick, in radians, at full noise amplitude
const MAX_TURN: f64 = PI / 10.0;

/// Target lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityPhase {
    /// Rising in a straight line
    Spawned,
    /// Above the escape line and wandering
    Escaped,
    /// Struck this tick; removed before it moves again
    Hit,
    /// Removed from play
    Expired,
}

/// A live target. Its color is its identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub color: ColorSymbol,
    pub x: f64,
    pub y: f64,
    pub vel_x: f64,
    pub vel_y: f64,
    pub size: f64,
    pub speed: f64,
    pub phase: EntityPhase,
    /// Current flight frame, `0..FLIGHT_FRAMES`
    pub frame: u8,
    /// Ticks between flight frame changes
    pub frame_period: u64,
    pub age: u64,
    /// Position along the wander noise curve
    pub noise_seed: f64,
}

impl Entity {
    /// Spawn a target at the bottom of the field with a random speed and an
    /// upward heading
    pub fn spawn<R: Rng>(
        color: ColorSymbol,
        field: &Playfield,
        difficulty: &Difficulty,
        mirrored: &Difficulty,
        rng: &mut R,
    ) -> Self {
        let size = field.field_width * difficulty.size;
        let (left, right) = field.spawn_span();
        let x = rng.gen_range(left..=right);
        let y = field.ground() - size;

        let multiplier: u32 = rng.gen_range(1..=5);
        let speed = f64::from(multiplier) * 5.0 * difficulty.speed / 100.0;
        let wing_speed = 30.0 * mirrored.speed / 100.0;
        let heading = rng.gen_range(-0.6 * PI..=-0.4 * PI);

        Self {
            color,
            x,
            y,
            vel_x: heading.cos() * speed,
            vel_y: heading.sin() * speed,
            size,
            speed,
            phase: EntityPhase::Spawned,
            frame: 0,
            frame_period: ((wing_speed - speed).abs().round() as u64).max(1),
            age: 0,
            noise_seed: rng.gen(),
        }
    }

    /// Still flying (and therefore hittable)
    pub fn is_live(&self) -> bool {
        matches!(self.phase, EntityPhase::Spawned | EntityPhase::Escaped)
    }

    pub fn facing_left(&self) -> bool {
        self.vel_x < 0.0
    }

    /// Strike the target. Returns false when it was not live.
    pub fn mark_hit(&mut self) -> bool {
        if !self.is_live() {
            return false;
        }
        self.phase = EntityPhase::Hit;
        true
    }

    pub fn expire(&mut self) {
        self.phase = EntityPhase::Expired;
    }

    /// Advance one tick. Returns `true` on the tick the target escapes.
    pub fn advance(&mut self, field: &Playfield, noise: &Perlin) -> bool {
        if !self.is_live() {
            return false;
        }

        self.age += 1;
        if self.age % self.frame_period == 0 {
            self.frame = (self.frame + 1) % FLIGHT_FRAMES;
        }

        self.x += self.vel_x;
        self.y += self.vel_y;

        if self.phase == EntityPhase::Spawned {
            if self.y + self.size / 2.0 < field.escape_line() {
                self.phase = EntityPhase::Escaped;
                return true;
            }
            return false;
        }

        self.noise_seed += NOISE_STEP;
        // Perlin output is roughly -1..1; halve it to a -0.5..0.5 swing
        let turn = noise.get([self.noise_seed, 0.5]) * 0.5 * MAX_TURN;
        let (sin, cos) = turn.sin_cos();
        let (vx, vy) = (self.vel_x, self.vel_y);
        self.vel_x = vx * cos - vy * sin;
        self.vel_y = vx * sin + vy * cos;

        let half = self.size / 2.0;
        if self.x + half > field.right() || self.x - half < field.left() {
            self.x -= self.vel_x;
            self.vel_x = -self.vel_x;
        }
        if self.y + half > field.escape_line() || self.y - half < field.top() {
            self.y -= self.vel_y;
            self.vel_y = -self.vel_y;
        }
        false
    }
}

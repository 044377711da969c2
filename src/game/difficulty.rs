//! Difficulty table

use serde::Serialize;

/// Speed and size of one difficulty level
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Difficulty {
    pub label: &'static str,
    /// Speed scale in percent
    pub speed: f64,
    /// Target size as a fraction of the field width
    pub size: f64,
}

pub const DIFFICULTIES: [Difficulty; 6] = [
    Difficulty { label: "Can I play, Daddy?", speed: 20.0, size: 0.15 },
    Difficulty { label: "Don't hurt me.", speed: 20.0, size: 0.1 },
    Difficulty { label: "Bring 'em on!", speed: 40.0, size: 0.1 },
    Difficulty { label: "I am Death incarnate!", speed: 70.0, size: 0.1 },
    Difficulty { label: "Über", speed: 100.0, size: 0.1 },
    Difficulty { label: "Mein Leben", speed: 110.0, size: 0.07 },
];

impl Difficulty {
    pub fn get(index: usize) -> Option<Difficulty> {
        DIFFICULTIES.get(index).copied()
    }

    /// Level at the opposite end of the table; drives the wing-beat rate
    pub fn mirrored(index: usize) -> Option<Difficulty> {
        let last = DIFFICULTIES.len().checked_sub(1)?;
        Self::get(last.checked_sub(index)?)
    }

    pub fn is_valid(index: usize) -> bool {
        index < DIFFICULTIES.len()
    }
}

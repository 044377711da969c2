//! Color classification of calibrated photodiode readings
//!
//! A reading is normalized against the player's calibration baseline and then
//! run through six channel-pair tests, one per color. The first test that
//! holds names the color; when none holds the reading is [`ColorSymbol::None`].

use serde::{Deserialize, Serialize};

use super::protocol::RawSample;
use crate::players::calibration::Calibration;

/// Discrete classification result
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ColorSymbol {
    Red,
    Green,
    Blue,
    Yellow,
    Cyan,
    Magenta,
    None,
}

impl ColorSymbol {
    /// Short hex code used by renderers
    pub fn hex(self) -> &'static str {
        match self {
            ColorSymbol::Red => "f00",
            ColorSymbol::Green => "0f0",
            ColorSymbol::Blue => "00f",
            ColorSymbol::Yellow => "ff0",
            ColorSymbol::Cyan => "0ff",
            ColorSymbol::Magenta => "f0f",
            ColorSymbol::None => "000",
        }
    }

    pub fn is_color(self) -> bool {
        self != ColorSymbol::None
    }
}

const R: usize = 0;
const G: usize = 1;
const B: usize = 2;

/// Channel indices of one color test
#[derive(Debug, Clone, Copy)]
struct ChannelTest {
    hi: usize,
    lo: usize,
    hi2: usize,
    lo2: usize,
    eq1: usize,
    eq2: usize,
}

/// Fixed test order; earlier entries win ties.
const COLOR_TESTS: [(ColorSymbol, ChannelTest); 6] = [
    (ColorSymbol::Red, ChannelTest { hi: R, lo: G, hi2: R, lo2: B, eq1: G, eq2: B }),
    (ColorSymbol::Green, ChannelTest { hi: G, lo: R, hi2: G, lo2: B, eq1: R, eq2: B }),
    (ColorSymbol::Blue, ChannelTest { hi: B, lo: R, hi2: B, lo2: G, eq1: R, eq2: G }),
    (ColorSymbol::Yellow, ChannelTest { hi: R, lo: B, hi2: G, lo2: B, eq1: R, eq2: G }),
    (ColorSymbol::Cyan, ChannelTest { hi: G, lo: R, hi2: B, lo2: R, eq1: G, eq2: B }),
    (ColorSymbol::Magenta, ChannelTest { hi: R, lo: G, hi2: B, lo2: G, eq1: R, eq2: B }),
];

/// Normalized channel values; `None` marks a reading that was not a finite
/// number (missing or garbled packet field, zero baseline).
pub type Channels = [Option<i64>; 3];

/// Scale a raw reading to the 0..255 range of its calibration baseline.
///
/// Values are rounded half-up and deliberately not clamped, so noisy input
/// may land outside 0..=255.
pub fn normalize(sample: &RawSample, calibration: &Calibration) -> Channels {
    let scale = |raw: f64, base: f64| {
        let value = (255.0 * raw / base + 0.5).floor();
        value.is_finite().then_some(value as i64)
    };
    [
        scale(sample.r, calibration.r),
        scale(sample.g, calibration.g),
        scale(sample.b, calibration.b),
    ]
}

fn test_holds(test: &ChannelTest, channels: &Channels, threshold: i64) -> bool {
    let pick = |i: usize| channels[i];
    match (
        pick(test.hi),
        pick(test.lo),
        pick(test.hi2),
        pick(test.lo2),
        pick(test.eq1),
        pick(test.eq2),
    ) {
        (Some(hi), Some(lo), Some(hi2), Some(lo2), Some(eq1), Some(eq2)) => {
            hi - lo >= threshold && hi2 - lo2 >= threshold && (eq1 - eq2).abs() <= threshold
        }
        _ => false,
    }
}

/// Whether the test for `symbol` holds on already-normalized channels.
/// Always false for [`ColorSymbol::None`].
pub fn color_test_holds(symbol: ColorSymbol, channels: &Channels, threshold: u8) -> bool {
    COLOR_TESTS
        .iter()
        .find(|(color, _)| *color == symbol)
        .is_some_and(|(_, test)| test_holds(test, channels, i64::from(threshold)))
}

/// Classify normalized channels
pub fn classify_channels(channels: &Channels, threshold: u8) -> ColorSymbol {
    let threshold = i64::from(threshold);
    COLOR_TESTS
        .iter()
        .find(|(_, test)| test_holds(test, channels, threshold))
        .map(|(color, _)| *color)
        .unwrap_or(ColorSymbol::None)
}

/// Classify a raw reading against a calibration baseline
pub fn classify(sample: &RawSample, calibration: &Calibration, threshold: u8) -> ColorSymbol {
    classify_channels(&normalize(sample, calibration), threshold)
}

/// Order in which colors are tested
pub fn test_order() -> impl Iterator<Item = ColorSymbol> {
    COLOR_TESTS.iter().map(|(color, _)| *color)
}

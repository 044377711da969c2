//! Playfield geometry
//!
//! The field image is scaled to the window width, then shrunk to the window
//! height when that leaves it too tall. Targets rise from its lower edge and
//! wander inside it above the escape line.

use serde::Serialize;

/// Window and field dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Playfield {
    pub window_width: f64,
    pub window_height: f64,
    pub field_width: f64,
    pub field_height: f64,
}

impl Playfield {
    /// Fit a field of the given width/height ratio into the window
    pub fn fit(window_width: f64, window_height: f64, aspect: f64) -> Self {
        let mut field_width = window_width;
        let mut field_height = window_width / aspect;
        if field_height > window_height {
            field_width = field_width * window_height / field_height;
            field_height = window_height;
        }

        Self {
            window_width,
            window_height,
            field_width,
            field_height,
        }
    }

    /// Vertical position above which a rising target has escaped
    pub fn escape_line(&self) -> f64 {
        self.window_height / 2.0 + self.field_height / 2.0 - self.field_height / 6.0
    }

    /// Lower edge of the field
    pub fn ground(&self) -> f64 {
        self.window_height / 2.0 + self.field_height / 2.0
    }

    pub fn left(&self) -> f64 {
        (self.window_width - self.field_width) / 2.0
    }

    pub fn right(&self) -> f64 {
        (self.window_width + self.field_width) / 2.0
    }

    pub fn top(&self) -> f64 {
        (self.window_height - self.field_height) / 2.0
    }

    /// Horizontal spawn band
    pub fn spawn_span(&self) -> (f64, f64) {
        (self.window_width * 0.2, self.window_width * 0.8)
    }
}

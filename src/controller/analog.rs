//! Analog stick shaping: dead zone, inversion and the significance filter

use serde::{Deserialize, Serialize};

pub const DEFAULT_DEAD_ZONE: f32 = 0.15;
/// Minimum per-axis movement that counts as a new position
pub const SIGNIFICANCE_THRESHOLD: f32 = 0.01;

/// Normalized control position, both axes in [-1, 1]
///
/// `alpha` follows the horizontal axis, `beta` grows upward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub alpha: f32,
    pub beta: f32,
}

impl Position {
    pub const CENTER: Position = Position {
        alpha: 0.0,
        beta: 0.0,
    };

    pub fn new(alpha: f32, beta: f32) -> Self {
        Self { alpha, beta }
    }

    pub fn clamped(self) -> Self {
        Self {
            alpha: self.alpha.clamp(-1.0, 1.0),
            beta: self.beta.clamp(-1.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalogSettings {
    pub dead_zone: f32,
    pub invert_horizontal: bool,
    pub invert_vertical: bool,
}

impl Default for AnalogSettings {
    fn default() -> Self {
        Self {
            dead_zone: DEFAULT_DEAD_ZONE,
            invert_horizontal: false,
            invert_vertical: false,
        }
    }
}

impl AnalogSettings {
    pub fn with_dead_zone(mut self, dead_zone: f32) -> Self {
        self.dead_zone = dead_zone.clamp(0.0, 1.0);
        self
    }
}

/// Turns a raw stick vector (screen convention, y grows downward) into a position
///
/// Inside the dead zone the result is exactly the center. Outside, the vector keeps
/// its direction and its magnitude is rescaled so the dead-zone edge maps to 0 and
/// the unit circle stays at 1.
pub fn shape(x: f32, y: f32, settings: &AnalogSettings) -> Position {
    let x = if x.is_finite() { x } else { 0.0 };
    let y = if y.is_finite() { y } else { 0.0 };

    let magnitude = x.hypot(y);
    let dead_zone = settings.dead_zone.clamp(0.0, 1.0);
    if magnitude < dead_zone || magnitude == 0.0 {
        return Position::CENTER;
    }

    // a full dead zone leaves nothing to rescale into
    if dead_zone >= 1.0 {
        return Position::CENTER;
    }

    let scale = ((magnitude - dead_zone) / (1.0 - dead_zone)).min(1.0);
    let mut x = x / magnitude * scale;
    let mut y = y / magnitude * scale;

    if settings.invert_horizontal {
        x = -x;
    }
    if settings.invert_vertical {
        y = -y;
    }

    Position::new(x, -y)
}

/// Drops positions that differ from the last accepted one by jitter only
#[derive(Debug, Clone)]
pub struct PositionFilter {
    threshold: f32,
    last: Position,
}

impl Default for PositionFilter {
    fn default() -> Self {
        Self::new(SIGNIFICANCE_THRESHOLD)
    }
}

impl PositionFilter {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            last: Position::CENTER,
        }
    }

    /// Returns true, and remembers `position`, when either axis moved enough
    pub fn accept(&mut self, position: Position) -> bool {
        let moved = (position.alpha - self.last.alpha).abs() > self.threshold
            || (position.beta - self.last.beta).abs() > self.threshold;
        if moved {
            self.last = position;
        }
        moved
    }

    pub fn last(&self) -> Position {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = Position::CENTER;
    }
}

//! Logical buttons and press/release edge detection

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TRIGGER_THRESHOLD: f32 = 0.5;

// Logical button names, independent of the device backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonId {
    A,
    B,
    X,
    Y,
    Lb,
    Rb,
    Lt,
    Rt,
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
    Start,
    Select,
    L3,
    R3,
}

impl ButtonId {
    pub const ALL: [ButtonId; 16] = [
        ButtonId::A,
        ButtonId::B,
        ButtonId::X,
        ButtonId::Y,
        ButtonId::Lb,
        ButtonId::Rb,
        ButtonId::Lt,
        ButtonId::Rt,
        ButtonId::DpadUp,
        ButtonId::DpadDown,
        ButtonId::DpadLeft,
        ButtonId::DpadRight,
        ButtonId::Start,
        ButtonId::Select,
        ButtonId::L3,
        ButtonId::R3,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ButtonId::A => "a",
            ButtonId::B => "b",
            ButtonId::X => "x",
            ButtonId::Y => "y",
            ButtonId::Lb => "lb",
            ButtonId::Rb => "rb",
            ButtonId::Lt => "lt",
            ButtonId::Rt => "rt",
            ButtonId::DpadUp => "dpad_up",
            ButtonId::DpadDown => "dpad_down",
            ButtonId::DpadLeft => "dpad_left",
            ButtonId::DpadRight => "dpad_right",
            ButtonId::Start => "start",
            ButtonId::Select => "select",
            ButtonId::L3 => "l3",
            ButtonId::R3 => "r3",
        }
    }
}

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown button name: {0}")]
pub struct UnknownButton(pub String);

impl FromStr for ButtonId {
    type Err = UnknownButton;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ButtonId::ALL
            .into_iter()
            .find(|id| id.name() == s)
            .ok_or_else(|| UnknownButton(s.to_string()))
    }
}

/// One poll of a button: discrete flag plus analog pressure, if the device reports one
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ButtonReading {
    pub pressed: bool,
    pub value: f32,
}

impl ButtonReading {
    pub fn digital(pressed: bool) -> Self {
        Self {
            pressed,
            value: if pressed { 1.0 } else { 0.0 },
        }
    }

    pub fn analog(value: f32) -> Self {
        Self {
            pressed: false,
            value,
        }
    }

    pub fn is_down(&self, threshold: f32) -> bool {
        self.pressed || self.value > threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEdge {
    Pressed(ButtonId),
    Released(ButtonId),
}

/// Button state table, compared tick over tick
#[derive(Debug, Clone)]
pub struct ButtonTracker {
    threshold: f32,
    held: HashMap<ButtonId, bool>,
}

impl Default for ButtonTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TRIGGER_THRESHOLD)
    }
}

impl ButtonTracker {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            held: HashMap::new(),
        }
    }

    /// Records this tick's readings and returns one edge per transition
    ///
    /// Buttons missing from `readings` count as released.
    pub fn update(&mut self, readings: &HashMap<ButtonId, ButtonReading>) -> Vec<ButtonEdge> {
        let mut edges = Vec::new();
        for id in ButtonId::ALL {
            let down = readings
                .get(&id)
                .is_some_and(|reading| reading.is_down(self.threshold));
            let was_down = self.held.insert(id, down).unwrap_or(false);
            match (was_down, down) {
                (false, true) => edges.push(ButtonEdge::Pressed(id)),
                (true, false) => edges.push(ButtonEdge::Released(id)),
                _ => {}
            }
        }
        edges
    }

    pub fn is_held(&self, id: ButtonId) -> bool {
        self.held.get(&id).copied().unwrap_or(false)
    }

    /// Forgets every held button without reporting edges
    pub fn clear(&mut self) {
        self.held.clear();
    }
}

//! Per-tick processing: one device snapshot in, zero or more input events out
//!
//! The sampler holds everything that must survive between ticks (the last
//! significant position, the button state table, device presence) and nothing
//! else. It is driven by [`super::controller_handle::SamplerHandle`] but is a
//! plain value, so the whole pipeline can be exercised tick by tick in tests.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info};

use super::analog::{shape, AnalogSettings, Position, PositionFilter};
use super::buttons::{ButtonEdge, ButtonId, ButtonReading, ButtonTracker, DEFAULT_TRIGGER_THRESHOLD};

pub const DEFAULT_TICK: Duration = Duration::from_millis(16);
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(500);

// Raw state of the active device at one instant
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSnapshot {
    /// Left stick in screen convention (y grows downward), if the device has one
    pub left_stick: Option<(f32, f32)>,
    pub buttons: HashMap<ButtonId, ButtonReading>,
}

impl DeviceSnapshot {
    pub fn with_stick(mut self, x: f32, y: f32) -> Self {
        self.left_stick = Some((x, y));
        self
    }

    pub fn with_button(mut self, id: ButtonId, reading: ButtonReading) -> Self {
        self.buttons.insert(id, reading);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// Stick position that passed the significance filter
    PositionChanged(Position),
    ButtonPressed(ButtonId),
    ButtonReleased(ButtonId),
    DeviceConnected(bool),
    SamplingStopped,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerSettings {
    pub analog: AnalogSettings,
    pub trigger_threshold: f32,
    pub tick: Duration,
    /// Poll interval while no device is present
    pub idle_poll: Duration,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            analog: AnalogSettings::default(),
            trigger_threshold: DEFAULT_TRIGGER_THRESHOLD,
            tick: DEFAULT_TICK,
            idle_poll: DEFAULT_IDLE_POLL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sampler {
    analog: AnalogSettings,
    filter: PositionFilter,
    buttons: ButtonTracker,
    device_present: bool,
}

impl Sampler {
    pub fn new(settings: &SamplerSettings) -> Self {
        Self {
            analog: settings.analog,
            filter: PositionFilter::default(),
            buttons: ButtonTracker::new(settings.trigger_threshold),
            device_present: false,
        }
    }

    pub fn device_present(&self) -> bool {
        self.device_present
    }

    pub fn last_position(&self) -> Position {
        self.filter.last()
    }

    /// Runs one sampling tick
    ///
    /// With no device the tick only reports a disconnect transition; no position
    /// or button events are synthesized.
    pub fn tick(&mut self, snapshot: Option<&DeviceSnapshot>) -> Vec<InputEvent> {
        let Some(snapshot) = snapshot else {
            if self.device_present {
                info!("Gamepad disconnected, clearing button state");
                self.device_present = false;
                self.buttons.clear();
                self.filter.reset();
                return vec![InputEvent::DeviceConnected(false)];
            }
            return Vec::new();
        };

        let mut events = Vec::new();
        if !self.device_present {
            info!("Gamepad connected");
            self.device_present = true;
            events.push(InputEvent::DeviceConnected(true));
        }

        let (x, y) = snapshot.left_stick.unwrap_or((0.0, 0.0));
        let position = shape(x, y, &self.analog);
        if self.filter.accept(position) {
            debug!(
                "Position alpha={:.3} beta={:.3}",
                position.alpha, position.beta
            );
            events.push(InputEvent::PositionChanged(position));
        }

        for edge in self.buttons.update(&snapshot.buttons) {
            debug!("Button edge: {:?}", edge);
            events.push(match edge {
                ButtonEdge::Pressed(id) => InputEvent::ButtonPressed(id),
                ButtonEdge::Released(id) => InputEvent::ButtonReleased(id),
            });
        }

        events
    }
}

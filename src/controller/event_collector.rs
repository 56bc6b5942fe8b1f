//! Device backends feeding the sampler
//!
//! [`InputSource`] is the seam: the sampling thread only ever asks for the
//! latest [`DeviceSnapshot`]. The production backend reads gamepads through
//! gilrs; tests script snapshots instead.

use std::collections::VecDeque;

use gilrs::{Axis, Button, Gamepad, GamepadId, Gilrs};
use statum::{machine, state};
use tracing::{debug, error, info};

use super::buttons::{ButtonId, ButtonReading};
use super::event_processor::DeviceSnapshot;

// Sampler errors
#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("Failed to initialize input backend: {0}")]
    InitializationError(String),

    #[error("Sampling thread error: {0}")]
    ThreadError(String),
}

/// Anything that can report the current state of one input device
pub trait InputSource {
    /// Latest state of the active device, or `None` when nothing is plugged in
    fn poll(&mut self) -> Option<DeviceSnapshot>;
}

// Reader states using statum's state macro
#[state]
#[derive(Debug, Clone)]
pub enum ReaderState {
    Detecting,
    Reading,
}

#[machine]
pub struct GamepadReader<S: ReaderState> {
    gilrs: Gilrs,
    active: Option<GamepadId>,
}

impl<S: ReaderState> GamepadReader<S> {
    // Drain pending events so gilrs' cached gamepad state is current
    fn pump(&mut self) {
        while let Some(event) = self.gilrs.next_event() {
            debug!("gilrs event: {:?}", event.event);
        }
    }
}

impl GamepadReader<Detecting> {
    pub fn create() -> Result<Self, SamplerError> {
        info!("Initializing gilrs controller interface");
        let gilrs = Gilrs::new().map_err(|e| {
            error!("Failed to initialize gilrs: {}", e);
            SamplerError::InitializationError(e.to_string())
        })?;
        Ok(Self::new(gilrs, None))
    }

    /// Picks the first connected gamepad, or stays detecting
    pub fn detect(mut self) -> Result<GamepadReader<Reading>, Self> {
        self.pump();
        let found = self
            .gilrs
            .gamepads()
            .next()
            .map(|(id, gamepad)| (id, gamepad.name().to_string()));

        match found {
            Some((id, name)) => {
                info!("Selected gamepad: {} ({})", name, id);
                self.active = Some(id);
                Ok(self.transition())
            }
            None => Err(self),
        }
    }
}

impl GamepadReader<Reading> {
    /// Reads the active gamepad, falling back to detection once it is gone
    pub fn read(mut self) -> Result<(Self, DeviceSnapshot), GamepadReader<Detecting>> {
        self.pump();
        let snapshot = self
            .active
            .and_then(|id| self.gilrs.connected_gamepad(id))
            .map(|gamepad| snapshot_of(&gamepad));

        match snapshot {
            Some(snapshot) => Ok((self, snapshot)),
            None => {
                info!("Active gamepad went away, detecting again");
                self.active = None;
                Err(self.transition())
            }
        }
    }
}

fn snapshot_of(gamepad: &Gamepad<'_>) -> DeviceSnapshot {
    // gilrs reports y up-positive
    let x = gamepad.value(Axis::LeftStickX);
    let y = -gamepad.value(Axis::LeftStickY);

    let mut snapshot = DeviceSnapshot::default().with_stick(x, y);
    for id in ButtonId::ALL {
        let button = gilrs_button(id);
        let reading = match id {
            ButtonId::Lt | ButtonId::Rt => {
                ButtonReading::analog(gamepad.button_data(button).map_or(0.0, |d| d.value()))
            }
            _ => ButtonReading::digital(gamepad.is_pressed(button)),
        };
        snapshot.buttons.insert(id, reading);
    }
    snapshot
}

fn gilrs_button(id: ButtonId) -> Button {
    match id {
        ButtonId::A => Button::South,
        ButtonId::B => Button::East,
        ButtonId::X => Button::West,
        ButtonId::Y => Button::North,
        ButtonId::Lb => Button::LeftTrigger,
        ButtonId::Rb => Button::RightTrigger,
        ButtonId::Lt => Button::LeftTrigger2,
        ButtonId::Rt => Button::RightTrigger2,
        ButtonId::DpadUp => Button::DPadUp,
        ButtonId::DpadDown => Button::DPadDown,
        ButtonId::DpadLeft => Button::DPadLeft,
        ButtonId::DpadRight => Button::DPadRight,
        ButtonId::Start => Button::Start,
        ButtonId::Select => Button::Select,
        ButtonId::L3 => Button::LeftThumb,
        ButtonId::R3 => Button::RightThumb,
    }
}

enum Phase {
    Detecting(GamepadReader<Detecting>),
    Reading(GamepadReader<Reading>),
}

/// Gamepad input through gilrs
///
/// Not `Send` on every platform; build it on the thread that polls it.
pub struct GilrsSource {
    phase: Option<Phase>,
}

impl GilrsSource {
    pub fn open() -> Result<Self, SamplerError> {
        Ok(Self {
            phase: Some(Phase::Detecting(GamepadReader::create()?)),
        })
    }
}

impl InputSource for GilrsSource {
    fn poll(&mut self) -> Option<DeviceSnapshot> {
        let (phase, snapshot) = match self.phase.take()? {
            Phase::Detecting(reader) => match reader.detect() {
                Ok(reader) => match reader.read() {
                    Ok((reader, snapshot)) => (Phase::Reading(reader), Some(snapshot)),
                    Err(reader) => (Phase::Detecting(reader), None),
                },
                Err(reader) => (Phase::Detecting(reader), None),
            },
            Phase::Reading(reader) => match reader.read() {
                Ok((reader, snapshot)) => (Phase::Reading(reader), Some(snapshot)),
                Err(reader) => (Phase::Detecting(reader), None),
            },
        };
        self.phase = Some(phase);
        snapshot
    }
}

/// Replays a fixed sequence of snapshots, then reports the last one forever
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    frames: VecDeque<Option<DeviceSnapshot>>,
    last: Option<DeviceSnapshot>,
}

impl ScriptedSource {
    pub fn new(frames: impl IntoIterator<Item = Option<DeviceSnapshot>>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            last: None,
        }
    }
}

impl InputSource for ScriptedSource {
    fn poll(&mut self) -> Option<DeviceSnapshot> {
        if let Some(frame) = self.frames.pop_front() {
            self.last = frame;
        }
        self.last.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_source_holds_last_frame() {
        let frame = DeviceSnapshot::default().with_stick(0.5, 0.0);
        let mut source = ScriptedSource::new([None, Some(frame.clone())]);
        assert_eq!(source.poll(), None);
        assert_eq!(source.poll(), Some(frame.clone()));
        assert_eq!(source.poll(), Some(frame));
    }

    #[test]
    fn every_logical_button_has_a_gilrs_button() {
        let mut seen: Vec<Button> = Vec::new();
        for id in ButtonId::ALL {
            let button = gilrs_button(id);
            assert!(!seen.contains(&button), "{id} maps to a duplicate");
            seen.push(button);
        }
    }
}

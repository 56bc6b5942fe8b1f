//! Logical control actions and their button bindings

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::MappingError;
use crate::controller::ButtonId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    CarrierUp,
    CarrierDown,
    VolumeUp,
    VolumeDown,
    PulseFreqUp,
    PulseFreqDown,
    PulseWidthUp,
    PulseWidthDown,
    Shock,
    Mute,
}

impl Action {
    pub const ALL: [Action; 10] = [
        Action::CarrierUp,
        Action::CarrierDown,
        Action::VolumeUp,
        Action::VolumeDown,
        Action::PulseFreqUp,
        Action::PulseFreqDown,
        Action::PulseWidthUp,
        Action::PulseWidthDown,
        Action::Shock,
        Action::Mute,
    ];

    /// Stepped actions repeat while held; shock and mute fire once per edge
    pub fn adjustment(self, steps: &StepSizes) -> Option<ControlAction> {
        let (parameter, delta) = match self {
            Action::CarrierUp => (Parameter::Carrier, steps.carrier),
            Action::CarrierDown => (Parameter::Carrier, -steps.carrier),
            Action::VolumeUp => (Parameter::Volume, steps.volume),
            Action::VolumeDown => (Parameter::Volume, -steps.volume),
            Action::PulseFreqUp => (Parameter::PulseFrequency, steps.pulse_frequency),
            Action::PulseFreqDown => (Parameter::PulseFrequency, -steps.pulse_frequency),
            Action::PulseWidthUp => (Parameter::PulseWidth, steps.pulse_width),
            Action::PulseWidthDown => (Parameter::PulseWidth, -steps.pulse_width),
            Action::Shock | Action::Mute => return None,
        };
        Some(ControlAction::Adjust { parameter, delta })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    Carrier,
    Volume,
    PulseFrequency,
    PulseWidth,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlAction {
    /// Signed step, clamped by the parameter owner
    Adjust { parameter: Parameter, delta: f64 },
    Shock { engaged: bool },
    ToggleMute,
}

/// Receives control actions; owns the parameters they change
pub trait ActionSink: Send + Sync {
    fn apply(&self, action: ControlAction);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepSizes {
    pub carrier: f64,
    pub volume: f64,
    pub pulse_frequency: f64,
    pub pulse_width: f64,
}

impl Default for StepSizes {
    fn default() -> Self {
        Self {
            carrier: 10.0,
            volume: 1.0,
            pulse_frequency: 1.0,
            pulse_width: 0.5,
        }
    }
}

pub const UNBOUND: &str = "none";

/// Which actions each button triggers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    by_button: HashMap<ButtonId, Vec<Action>>,
}

impl Bindings {
    pub fn bind(&mut self, action: Action, button: ButtonId) {
        self.unbind(action);
        let actions = self.by_button.entry(button).or_default();
        actions.push(action);
        actions.sort();
    }

    pub fn unbind(&mut self, action: Action) {
        for actions in self.by_button.values_mut() {
            actions.retain(|bound| *bound != action);
        }
        self.by_button.retain(|_, actions| !actions.is_empty());
    }

    pub fn actions_for(&self, button: ButtonId) -> &[Action] {
        self.by_button
            .get(&button)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn button_for(&self, action: Action) -> Option<ButtonId> {
        self.by_button
            .iter()
            .find(|(_, actions)| actions.contains(&action))
            .map(|(button, _)| *button)
    }

    /// Builds bindings from button names as stored in config
    ///
    /// # Errors
    ///
    /// [`MappingError::ConfigError`] for a name that is neither a button nor `none`.
    pub fn from_names(names: &BindingNames) -> Result<Self, MappingError> {
        let mut bindings = Self::default();
        for action in Action::ALL {
            let name = names.get(action);
            if name == UNBOUND || name.is_empty() {
                continue;
            }
            let button = name
                .parse::<ButtonId>()
                .map_err(|e| MappingError::ConfigError(format!("{:?}: {}", action, e)))?;
            bindings.bind(action, button);
        }
        Ok(bindings)
    }

    /// Like [`Bindings::from_names`], but skips bad entries with a warning
    pub fn from_names_lossy(names: &BindingNames) -> Self {
        let mut bindings = Self::default();
        for action in Action::ALL {
            let name = names.get(action);
            if name == UNBOUND || name.is_empty() {
                continue;
            }
            match name.parse::<ButtonId>() {
                Ok(button) => bindings.bind(action, button),
                Err(e) => warn!("Ignoring binding for {:?}: {}", action, e),
            }
        }
        bindings
    }

    pub fn to_names(&self) -> BindingNames {
        let mut names = BindingNames::unbound();
        for action in Action::ALL {
            if let Some(button) = self.button_for(action) {
                names.set(action, button.name());
            }
        }
        names
    }

    pub fn defaults() -> Self {
        let mut bindings = Self::default();
        for (action, button) in [
            (Action::CarrierUp, ButtonId::Rb),
            (Action::CarrierDown, ButtonId::Lb),
            (Action::VolumeUp, ButtonId::DpadUp),
            (Action::VolumeDown, ButtonId::DpadDown),
            (Action::PulseFreqUp, ButtonId::DpadRight),
            (Action::PulseFreqDown, ButtonId::DpadLeft),
            (Action::PulseWidthUp, ButtonId::Rt),
            (Action::PulseWidthDown, ButtonId::Lt),
            (Action::Shock, ButtonId::A),
            (Action::Mute, ButtonId::B),
        ] {
            bindings.bind(action, button);
        }
        bindings
    }
}

/// Button name per action, as written in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingNames {
    pub carrier_up: String,
    pub carrier_down: String,
    pub volume_up: String,
    pub volume_down: String,
    pub pulse_freq_up: String,
    pub pulse_freq_down: String,
    pub pulse_width_up: String,
    pub pulse_width_down: String,
    pub shock: String,
    pub mute: String,
}

impl Default for BindingNames {
    fn default() -> Self {
        Bindings::defaults().to_names()
    }
}

impl BindingNames {
    pub fn unbound() -> Self {
        let none = || UNBOUND.to_string();
        Self {
            carrier_up: none(),
            carrier_down: none(),
            volume_up: none(),
            volume_down: none(),
            pulse_freq_up: none(),
            pulse_freq_down: none(),
            pulse_width_up: none(),
            pulse_width_down: none(),
            shock: none(),
            mute: none(),
        }
    }

    fn slot(&mut self, action: Action) -> &mut String {
        match action {
            Action::CarrierUp => &mut self.carrier_up,
            Action::CarrierDown => &mut self.carrier_down,
            Action::VolumeUp => &mut self.volume_up,
            Action::VolumeDown => &mut self.volume_down,
            Action::PulseFreqUp => &mut self.pulse_freq_up,
            Action::PulseFreqDown => &mut self.pulse_freq_down,
            Action::PulseWidthUp => &mut self.pulse_width_up,
            Action::PulseWidthDown => &mut self.pulse_width_down,
            Action::Shock => &mut self.shock,
            Action::Mute => &mut self.mute,
        }
    }

    pub fn get(&self, action: Action) -> &str {
        match action {
            Action::CarrierUp => &self.carrier_up,
            Action::CarrierDown => &self.carrier_down,
            Action::VolumeUp => &self.volume_up,
            Action::VolumeDown => &self.volume_down,
            Action::PulseFreqUp => &self.pulse_freq_up,
            Action::PulseFreqDown => &self.pulse_freq_down,
            Action::PulseWidthUp => &self.pulse_width_up,
            Action::PulseWidthDown => &self.pulse_width_down,
            Action::Shock => &self.shock,
            Action::Mute => &self.mute,
        }
    }

    pub fn set(&mut self, action: Action, name: impl Into<String>) {
        *self.slot(action) = name.into();
    }
}

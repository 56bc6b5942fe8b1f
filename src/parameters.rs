//! Local mirror of the server's stimulation parameters
//!
//! Control actions land here. Every change is clamped to the configured limits,
//! recorded locally and sent through a per-parameter slider throttle. Server
//! `state_update` frames overwrite the mirror, except for parameters that
//! still have an unsent local change.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use color_eyre::eyre::eyre;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::mapping::{ActionSink, ControlAction, Parameter, Throttle};
use crate::session::protocol::{kinds, PulseCommand, StateSnapshot};
use crate::session::{Command, CommandSink, ServerEvent, Session, SubscriptionId, Topic};

pub const DEFAULT_SLIDER_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub carrier: Range,
    pub volume: Range,
    pub pulse_frequency: Range,
    pub pulse_width: Range,
    /// Volume applied while the shock button is held
    pub shock_volume: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            carrier: Range::new(300.0, 2000.0),
            volume: Range::new(0.0, 100.0),
            pulse_frequency: Range::new(1.0, 200.0),
            pulse_width: Range::new(3.0, 100.0),
            shock_volume: 100.0,
        }
    }
}

impl Limits {
    pub fn range(&self, parameter: Parameter) -> Range {
        match parameter {
            Parameter::Carrier => self.carrier,
            Parameter::Volume => self.volume,
            Parameter::PulseFrequency => self.pulse_frequency,
            Parameter::PulseWidth => self.pulse_width,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParameterValues {
    pub carrier: f64,
    pub volume: f64,
    pub pulse_frequency: f64,
    pub pulse_width: f64,
    pub muted: bool,
    pub shocking: bool,
}

impl ParameterValues {
    pub fn get(&self, parameter: Parameter) -> f64 {
        match parameter {
            Parameter::Carrier => self.carrier,
            Parameter::Volume => self.volume,
            Parameter::PulseFrequency => self.pulse_frequency,
            Parameter::PulseWidth => self.pulse_width,
        }
    }

    fn slot(&mut self, parameter: Parameter) -> &mut f64 {
        match parameter {
            Parameter::Carrier => &mut self.carrier,
            Parameter::Volume => &mut self.volume,
            Parameter::PulseFrequency => &mut self.pulse_frequency,
            Parameter::PulseWidth => &mut self.pulse_width,
        }
    }
}

#[derive(Default)]
struct Mirror {
    // None until the first state_update; steps need a base value
    values: Option<ParameterValues>,
    shock_restore: Option<f64>,
    mute_restore: Option<f64>,
}

struct Sliders {
    carrier: Throttle<f64>,
    volume: Throttle<f64>,
    pulse_frequency: Throttle<f64>,
    pulse_width: Throttle<f64>,
}

impl Sliders {
    fn get(&self, parameter: Parameter) -> &Throttle<f64> {
        match parameter {
            Parameter::Carrier => &self.carrier,
            Parameter::Volume => &self.volume,
            Parameter::PulseFrequency => &self.pulse_frequency,
            Parameter::PulseWidth => &self.pulse_width,
        }
    }
}

pub struct RemoteParameters {
    limits: Limits,
    mirror: Mutex<Mirror>,
    sliders: Sliders,
    changes: watch::Sender<Option<ParameterValues>>,
}

impl RemoteParameters {
    pub fn new(
        limits: Limits,
        slider_window: Duration,
        commands: Arc<dyn CommandSink>,
        runtime: Handle,
    ) -> Self {
        let slider = |name: &str, to_command: fn(f64) -> Command| {
            let commands = Arc::clone(&commands);
            Throttle::new(name, slider_window, runtime.clone(), move |value: f64| {
                let command = to_command(value);
                if !commands.send_command(&command) {
                    debug!("{} dropped, session not open", command.kind());
                }
            })
        };

        let sliders = Sliders {
            carrier: slider("carrier", |frequency| Command::SetCarrier { frequency }),
            volume: slider("volume", |value| Command::SetVolume { value }),
            pulse_frequency: slider("pulse_frequency", |frequency| {
                Command::SetPulseParams(PulseCommand {
                    frequency: Some(frequency),
                    ..Default::default()
                })
            }),
            pulse_width: slider("pulse_width", |width| {
                Command::SetPulseParams(PulseCommand {
                    width: Some(width),
                    ..Default::default()
                })
            }),
        };

        let (changes, _) = watch::channel(None);
        Self {
            limits,
            mirror: Mutex::new(Mirror::default()),
            sliders,
            changes,
        }
    }

    fn mirror(&self) -> MutexGuard<'_, Mirror> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn values(&self) -> Option<ParameterValues> {
        self.mirror().values
    }

    pub fn watch(&self) -> watch::Receiver<Option<ParameterValues>> {
        self.changes.subscribe()
    }

    /// Keeps the mirror in sync with `state_update` frames from `session`
    pub fn attach(self: &Arc<Self>, session: &Session) -> SubscriptionId {
        let params = Arc::downgrade(self);
        session.on(Topic::message(kinds::STATE_UPDATE), move |envelope| {
            let Some(params) = params.upgrade() else {
                return Ok(());
            };
            match ServerEvent::try_from(envelope)? {
                ServerEvent::StateUpdate(snapshot) => {
                    params.apply_snapshot(&snapshot);
                    Ok(())
                }
                other => Err(eyre!("expected a state update, got {:?}", other)),
            }
        })
    }

    pub fn apply_snapshot(&self, snapshot: &StateSnapshot) {
        let values = {
            let mut mirror = self.mirror();
            let mut values = mirror.values.unwrap_or_default();
            for (parameter, remote) in [
                (Parameter::Carrier, snapshot.carrier),
                (Parameter::Volume, snapshot.volume.master),
                (Parameter::PulseFrequency, snapshot.pulse.frequency),
                (Parameter::PulseWidth, snapshot.pulse.width),
            ] {
                if mirror.values.is_some() && self.sliders.get(parameter).has_pending() {
                    continue;
                }
                *values.slot(parameter) = remote;
            }
            mirror.values = Some(values);
            values
        };
        debug!("Parameters synced from server: {:?}", values);
        self.changes.send_replace(Some(values));
    }

    /// Clamps, records and queues one value while the caller holds the mirror
    ///
    /// Queueing under the lock keeps the order on the wire equal to the order of
    /// changes in the mirror.
    fn write(&self, values: &mut ParameterValues, parameter: Parameter, value: f64) -> f64 {
        let value = self.limits.range(parameter).clamp(value);
        *values.slot(parameter) = value;
        self.sliders.get(parameter).submit(value);
        self.changes.send_replace(Some(*values));
        value
    }

    /// Sets one parameter, clamped, and queues it for sending
    ///
    /// Ignored until the first server snapshot has arrived.
    pub fn set(&self, parameter: Parameter, value: f64) -> Option<f64> {
        let mut mirror = self.mirror();
        let values = mirror.values.as_mut()?;
        Some(self.write(values, parameter, value))
    }

    pub fn adjust(&self, parameter: Parameter, delta: f64) -> Option<f64> {
        let mut mirror = self.mirror();
        let Some(values) = mirror.values.as_mut() else {
            debug!("No server state yet, ignoring {:?} step", parameter);
            return None;
        };
        let current = values.get(parameter);
        Some(self.write(values, parameter, current + delta))
    }

    pub fn shock(&self, engaged: bool) {
        let mut guard = self.mirror();
        let mirror = &mut *guard;
        let Some(values) = mirror.values.as_mut() else {
            return;
        };
        values.shocking = engaged;
        let target = if engaged {
            // a second press keeps the volume from before the first one
            mirror.shock_restore.get_or_insert(values.volume);
            Some(self.limits.shock_volume)
        } else {
            mirror.shock_restore.take()
        };
        match target {
            Some(volume) => {
                info!("Shock {}: volume {:.1}", if engaged { "on" } else { "off" }, volume);
                self.write(values, Parameter::Volume, volume);
            }
            None => {
                self.changes.send_replace(Some(*values));
            }
        }
    }

    pub fn toggle_mute(&self) {
        let mut guard = self.mirror();
        let mirror = &mut *guard;
        let Some(values) = mirror.values.as_mut() else {
            return;
        };
        let target = if values.muted {
            values.muted = false;
            mirror.mute_restore.take()
        } else {
            values.muted = true;
            mirror.mute_restore = Some(values.volume);
            Some(0.0)
        };
        match target {
            Some(volume) => {
                info!("Mute toggled, volume {:.1}", volume);
                self.write(values, Parameter::Volume, volume);
            }
            None => {
                self.changes.send_replace(Some(*values));
            }
        }
    }

    /// Drops every unsent slider value
    pub fn cancel_pending(&self) {
        for parameter in [
            Parameter::Carrier,
            Parameter::Volume,
            Parameter::PulseFrequency,
            Parameter::PulseWidth,
        ] {
            self.sliders.get(parameter).cancel();
        }
    }
}

impl ActionSink for RemoteParameters {
    fn apply(&self, action: ControlAction) {
        match action {
            ControlAction::Adjust { parameter, delta } => {
                self.adjust(parameter, delta);
            }
            ControlAction::Shock { engaged } => self.shock(engaged),
            ControlAction::ToggleMute => self.toggle_mute(),
        }
    }
}

//! Typed commands and server events carried inside [`Envelope`]s

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};

use super::envelope::Envelope;
use super::error::ProtocolError;

/// Message type names used on the wire
pub mod kinds {
    pub const SET_POSITION: &str = "set_position";
    pub const SET_VOLUME: &str = "set_volume";
    pub const SET_CARRIER: &str = "set_carrier";
    pub const SET_PATTERN: &str = "set_pattern";
    pub const SET_PULSE_PARAMS: &str = "set_pulse_params";
    pub const SET_VIBRATION: &str = "set_vibration";
    pub const PLAY: &str = "play";
    pub const STOP: &str = "stop";
    pub const GET_STATE: &str = "get_state";

    pub const STATE_UPDATE: &str = "state_update";
    pub const POSITION_UPDATE: &str = "position_update";
    pub const PLAY_STATE_UPDATE: &str = "play_state_update";
    pub const VOLUME_UPDATE: &str = "volume_update";
    pub const CARRIER_UPDATE: &str = "carrier_update";
    pub const PULSE_UPDATE: &str = "pulse_update";
    pub const PATTERN_UPDATE: &str = "pattern_update";
    pub const VIBRATION_UPDATE: &str = "vibration_update";
    pub const ERROR: &str = "error";
    pub const WELCOME: &str = "connected";
}

// ── Outbound ─────────────────────────────────────────────────────

/// Outbound control command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetPosition(PositionCommand),
    SetVolume { value: f64 },
    SetCarrier { frequency: f64 },
    SetPattern(PatternCommand),
    SetPulseParams(PulseCommand),
    SetVibration(VibrationCommand),
    Play,
    Stop,
    GetState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PositionCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    /// Seconds the server should take to reach the new position
    pub interval: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatternCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PulseCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rise_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_random: Option<f64>,
}

/// The server exposes exactly two vibration channels, numbered 1 and 2 on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VibrationChannel {
    One,
    Two,
}

impl Serialize for VibrationChannel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            VibrationChannel::One => serializer.serialize_u8(1),
            VibrationChannel::Two => serializer.serialize_u8(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VibrationCommand {
    pub channel: VibrationChannel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::SetPosition(_) => kinds::SET_POSITION,
            Command::SetVolume { .. } => kinds::SET_VOLUME,
            Command::SetCarrier { .. } => kinds::SET_CARRIER,
            Command::SetPattern(_) => kinds::SET_PATTERN,
            Command::SetPulseParams(_) => kinds::SET_PULSE_PARAMS,
            Command::SetVibration(_) => kinds::SET_VIBRATION,
            Command::Play => kinds::PLAY,
            Command::Stop => kinds::STOP,
            Command::GetState => kinds::GET_STATE,
        }
    }

    pub fn payload(&self) -> Result<Value, ProtocolError> {
        let payload = match self {
            Command::SetPosition(position) => serde_json::to_value(position)?,
            Command::SetVolume { value } => json!({ "value": value }),
            Command::SetCarrier { frequency } => json!({ "frequency": frequency }),
            Command::SetPattern(pattern) => serde_json::to_value(pattern)?,
            Command::SetPulseParams(pulse) => serde_json::to_value(pulse)?,
            Command::SetVibration(vibration) => serde_json::to_value(vibration)?,
            Command::Play | Command::Stop | Command::GetState => json!({}),
        };
        Ok(payload)
    }
}

// ── Inbound ──────────────────────────────────────────────────────

/// Full state snapshot pushed by the server after connect and after most commands
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StateSnapshot {
    pub play_state: String,
    pub position: PositionState,
    pub volume: VolumeState,
    pub carrier: f64,
    pub pulse: PulseState,
    pub vibration: VibrationState,
    pub pattern: PatternState,
    pub device: DeviceDescriptor,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PositionState {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VolumeState {
    pub master: f64,
    pub effective: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PulseState {
    pub carrier: f64,
    pub frequency: f64,
    pub width: f64,
    pub rise_time: f64,
    pub interval_random: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VibrationState {
    pub vibration1: VibrationChannelState,
    pub vibration2: VibrationChannelState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VibrationChannelState {
    pub enabled: bool,
    pub frequency: f64,
    pub strength: f64,
    pub left_right_bias: f64,
    pub high_low_bias: f64,
    pub random: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PatternState {
    pub name: String,
    pub velocity: f64,
    pub available: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceDescriptor {
    #[serde(rename = "type")]
    pub device_type: String,
    pub waveform_type: String,
}

/// Partial position push; absent axes are unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct PositionUpdate {
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub gamma: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Welcome {
    pub version: Option<String>,
    pub ws_port: Option<u16>,
}

#[derive(Deserialize)]
struct PlayStatePayload {
    state: String,
}

#[derive(Deserialize)]
struct ErrorPayload {
    error: String,
}

/// Inbound message with a typed payload
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    StateUpdate(Box<StateSnapshot>),
    PositionUpdate(PositionUpdate),
    PlayStateUpdate { state: String },
    Error { error: String },
    Welcome(Welcome),
    /// Recognized type whose payload is passed through untouched
    /// (`volume_update`, `carrier_update`, ...), or a type this client does not know
    Other { kind: String, payload: Value },
}

impl TryFrom<&Envelope> for ServerEvent {
    type Error = ProtocolError;

    fn try_from(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let kind = envelope.kind.as_str();
        let payload = envelope.payload.clone();
        let unexpected = |e: serde_json::Error| ProtocolError::UnexpectedPayload {
            kind: kind.to_string(),
            reason: e.to_string(),
        };

        let event = match kind {
            kinds::STATE_UPDATE => {
                ServerEvent::StateUpdate(Box::new(serde_json::from_value(payload).map_err(unexpected)?))
            }
            kinds::POSITION_UPDATE => {
                ServerEvent::PositionUpdate(serde_json::from_value(payload).map_err(unexpected)?)
            }
            kinds::PLAY_STATE_UPDATE => {
                let PlayStatePayload { state } =
                    serde_json::from_value(payload).map_err(unexpected)?;
                ServerEvent::PlayStateUpdate { state }
            }
            kinds::ERROR => {
                let ErrorPayload { error } = serde_json::from_value(payload).map_err(unexpected)?;
                ServerEvent::Error { error }
            }
            kinds::WELCOME => ServerEvent::Welcome(serde_json::from_value(payload).map_err(unexpected)?),
            _ => ServerEvent::Other {
                kind: kind.to_string(),
                payload,
            },
        };
        Ok(event)
    }
}

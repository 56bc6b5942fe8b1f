//! Input sampler for gamepad and pointer input
//!
//! Implements a three-stage pipeline:
//!
//! 1. [`event_collector`] - Device backends producing raw snapshots
//! 2. [`event_processor`] - Dead zone, inversion, significance filter, button edges
//! 3. [`controller_handle`] - Sampling thread lifecycle
//!
//! # Architecture
//!
//! ```text
//! Gamepad ──► InputSource ──► Sampler ──► InputSink
//!             (Snapshots)     (Events)
//! ```
//!
//! The sampling thread ticks every 16ms while a device is present and idles at
//! 500ms otherwise.

pub mod analog;
pub mod buttons;
pub mod controller_handle;
pub mod event_collector;
pub mod event_processor;

pub use analog::{AnalogSettings, Position, PositionFilter};
pub use buttons::{ButtonId, ButtonReading, ButtonTracker};
pub use controller_handle::{InputSink, SamplerHandle};
pub use event_collector::{GilrsSource, InputSource, SamplerError, ScriptedSource};
pub use event_processor::{DeviceSnapshot, InputEvent, Sampler, SamplerSettings};

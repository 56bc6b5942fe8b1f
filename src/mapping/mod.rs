//! Command throttler: turns sampled input into a bounded stream of commands
//!
//! Continuous values (stick and pointer positions, slider drags) go through a
//! leading+trailing [`Throttle`]. Held buttons become repeating control actions
//! through [`RepeatTimers`]. The [`MappingEngine`] wires both to the sampler.

pub mod actions;
pub mod engine;
pub mod error;
pub mod repeat;
pub mod throttle;

pub use actions::{
    Action, ActionSink, BindingNames, Bindings, ControlAction, Parameter, StepSizes,
};
pub use engine::{EngineSettings, MappingEngine};
pub use error::MappingError;
pub use repeat::RepeatTimers;
pub use throttle::Throttle;

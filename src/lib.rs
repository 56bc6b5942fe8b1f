//! Remote stimulation control client
//!
//! Gamepad and pointer input is sampled ([`controller`]), rate-limited and mapped
//! to commands ([`mapping`], [`parameters`]) and sent over one reconnecting
//! session to the control server ([`session`]).

pub mod config;
pub mod controller;
pub mod mapping;
pub mod parameters;
pub mod session;

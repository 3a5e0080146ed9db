//! Hush: closed-loop fan control for server fleets.
//!
//! Each tick the [`control::Launcher`] picks the hosts whose delay has elapsed,
//! reads their temperature drivers, turns every reading into a fan demand with a
//! curve or PID controller and applies the highest demand through the host's
//! speed driver. Drivers live in a [`hardware::Registry`] keyed by host and
//! sensor group and are rebuilt whenever their configuration changes.

pub mod app;
pub mod cache;
pub mod config;
pub mod control;
pub mod error;
pub mod hardware;
pub mod monitor;
pub mod system;

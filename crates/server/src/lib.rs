//! Status surface and service runner behind the `railbot` binary.

pub mod api;
pub mod metrics;
pub mod runner;
pub mod state;

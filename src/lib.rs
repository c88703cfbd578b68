//! Electronic throttle body control and limp-mode arbitration.
//!
//! Exposes the pure-logic modules for the bench binary, integration tests
//! and firmware targets.  Hardware enters only through the port traits in
//! [`app::ports`] and the embedded-hal traits used by [`drivers`] and
//! [`start_stop`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod control;
pub mod diagnostics;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod limp;
pub mod scheduler;
pub mod sensors;
pub mod start_stop;
pub mod throttle;

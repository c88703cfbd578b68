//! Actuator drivers.

pub mod dc_motor;

//! Control-loop primitives shared by the throttle controllers and the
//! limp manager: PID, calibration tables, averages, and timers.

pub mod average;
pub mod pid;
pub mod table;
pub mod timer;

//! Engine-wide state consumed by the throttle controllers and the limp
//! manager.
//!
//! Everything here is produced by subsystems outside this crate (trigger
//! decoding, fuel math, scripting, launch control).  The host refreshes the
//! snapshot before each tick and hands it to the service by reference.

/// Per-tick view of the rest of the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineState {
    /// Crank is turning fast enough to count as running.
    pub is_running: bool,
    /// Seconds since the engine transitioned to running.
    pub seconds_since_engine_start: f32,
    /// Trigger decoder has resolved cam phase.
    pub has_synchronized_phase: bool,
    /// Engine has turned within the last couple of seconds.
    pub engine_moved_recently: bool,
    /// Analog sensors are powered and expected to read valid values.
    pub sensors_should_work: bool,
    /// Ignition checks are bypassed while the trigger is self-stimulated.
    pub self_stimulation: bool,

    /// Current injector duty cycle, percent.
    pub injector_duty_cycle: f32,

    // --- Script requests ---
    pub lua_fuel_cut: bool,
    pub lua_ignition_cut: bool,
    pub lua_disable_etb: bool,

    // --- Other subsystems ---
    /// Harley compression release valve is open.
    pub acr_active: bool,
    /// Lambda monitor wants fuel cut.
    pub lambda_cut: bool,
    pub launch_fuel_cut: bool,
    pub launch_spark_cut: bool,
    /// Antilag is active; throttle gets its configured extra opening.
    pub antilag_active: bool,

    /// Tuning tool asked for relay autotune.
    pub etb_autotune_requested: bool,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            is_running: false,
            seconds_since_engine_start: 0.0,
            has_synchronized_phase: false,
            engine_moved_recently: false,
            sensors_should_work: true,
            self_stimulation: false,
            injector_duty_cycle: 0.0,
            lua_fuel_cut: false,
            lua_ignition_cut: false,
            lua_disable_etb: false,
            acr_active: false,
            lambda_cut: false,
            launch_fuel_cut: false,
            launch_spark_cut: false,
            antilag_active: false,
            etb_autotune_requested: false,
        }
    }
}

impl EngineState {
    /// A warm idling engine with synced phase.
    pub fn running() -> Self {
        Self {
            is_running: true,
            seconds_since_engine_start: 60.0,
            has_synchronized_phase: true,
            engine_moved_recently: true,
            ..Self::default()
        }
    }
}

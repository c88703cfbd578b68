//! Periodic task divider.
//!
//! One base timer tick drives every control rate.  The scheduler counts
//! base ticks and notifies a [`SchedulerDelegate`] when a task is due; the
//! main loop implements the delegate and calls into the service.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │              Base tick (BASE_TICK_HZ)                        │
//! │                        │                                     │
//! │        ┌───────────────┼────────────────┐                    │
//! │        ▼               ▼                ▼                    │
//! │  ┌───────────┐  ┌─────────────┐  ┌─────────────┐             │
//! │  │ ETB loop  │  │ Fast tick   │  │ Slow tick   │             │
//! │  │ 500 Hz    │  │ 200 Hz      │  │ 20 Hz       │             │
//! │  └─────┬─────┘  └──────┬──────┘  └──────┬──────┘             │
//! │        ▼               ▼                ▼                    │
//! │  EcuService::etb_tick  ::fast_tick      start/stop button    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use log::info;

use crate::config::{ETB_LOOP_FREQUENCY, FAST_CALLBACK_FREQUENCY};

/// Base tick rate; every task rate must divide it.
pub const BASE_TICK_HZ: u32 = 1000;

/// Slow housekeeping rate (button, ignition, config autosave).
pub const SLOW_CALLBACK_FREQUENCY: u32 = 20;

/// Periodic work driven off the base tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    EtbLoop,
    FastCallback,
    SlowCallback,
}

/// Receives task-due notifications.
pub trait SchedulerDelegate {
    fn on_task_due(&mut self, task: Task);
}

const MAX_TASKS: usize = 4;

#[derive(Debug, Clone, Copy)]
struct TaskEntry {
    task: Task,
    /// Base ticks between runs.
    divider: u32,
    elapsed: u32,
    runs: u64,
}

/// Fixed-slot rate divider.
pub struct Scheduler {
    tasks: [Option<TaskEntry>; MAX_TASKS],
    enabled: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: [None; MAX_TASKS],
            enabled: true,
        }
    }

    /// The three standard control rates.
    pub fn standard() -> Self {
        let mut s = Self::new();
        // the standard rates all divide BASE_TICK_HZ
        let _ = s.add(Task::EtbLoop, ETB_LOOP_FREQUENCY);
        let _ = s.add(Task::FastCallback, FAST_CALLBACK_FREQUENCY);
        let _ = s.add(Task::SlowCallback, SLOW_CALLBACK_FREQUENCY);
        s
    }

    /// Register `task` at `hz`.  Returns the slot, or `None` when full or
    /// the rate doesn't divide the base tick.
    pub fn add(&mut self, task: Task, hz: u32) -> Option<usize> {
        if hz == 0 || hz > BASE_TICK_HZ || BASE_TICK_HZ % hz != 0 {
            return None;
        }
        let divider = BASE_TICK_HZ / hz;
        for (i, slot) in self.tasks.iter_mut().enumerate() {
            if slot.is_none() {
                info!("Scheduler: {:?} at {} Hz (every {} ticks)", task, hz, divider);
                *slot = Some(TaskEntry {
                    task,
                    divider,
                    elapsed: 0,
                    runs: 0,
                });
                return Some(i);
            }
        }
        None
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Advance one base tick, notifying `delegate` for each due task in
    /// registration order.
    pub fn tick(&mut self, delegate: &mut dyn SchedulerDelegate) {
        if !self.enabled {
            return;
        }
        for entry in self.tasks.iter_mut().flatten() {
            entry.elapsed += 1;
            if entry.elapsed >= entry.divider {
                entry.elapsed = 0;
                entry.runs += 1;
                delegate.on_task_due(entry.task);
            }
        }
    }

    /// Times `task` has run.
    pub fn run_count(&self, task: Task) -> u64 {
        self.tasks
            .iter()
            .flatten()
            .find(|e| e.task == task)
            .map_or(0, |e| e.runs)
    }
}

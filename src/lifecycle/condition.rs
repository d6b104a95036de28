//! Predicates that trigger shutdown from inside the tick loop.

use std::time::Duration;

/// Coordinator timing as seen by a shutdown condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickSnapshot {
    pub frame: u64,
    /// Scaled simulation seconds.
    pub sim_elapsed: f64,
    pub wall_elapsed: Duration,
}

/// Evaluated once per tick while running; shutdown is requested when met.
pub trait ShutdownCondition: Send {
    fn is_met(&self, now: &TickSnapshot) -> bool;

    fn describe(&self) -> String;
}

/// Met once `frames` ticks have passed since the condition was installed.
#[derive(Debug, Clone)]
pub struct FrameCountCondition {
    start: u64,
    frames: u64,
}

impl FrameCountCondition {
    pub fn new(start: u64, frames: u64) -> Self {
        Self { start, frames }
    }
}

impl ShutdownCondition for FrameCountCondition {
    fn is_met(&self, now: &TickSnapshot) -> bool {
        now.frame.saturating_sub(self.start) >= self.frames
    }

    fn describe(&self) -> String {
        format!("after {} frames", self.frames)
    }
}

/// Met once `seconds` of simulation time have passed since installation.
#[derive(Debug, Clone)]
pub struct SimSecondsCondition {
    start: f64,
    seconds: f64,
}

impl SimSecondsCondition {
    pub fn new(start: f64, seconds: f64) -> Self {
        Self { start, seconds }
    }
}

impl ShutdownCondition for SimSecondsCondition {
    fn is_met(&self, now: &TickSnapshot) -> bool {
        now.sim_elapsed - self.start >= self.seconds
    }

    fn describe(&self) -> String {
        format!("after {:.3} simulated seconds", self.seconds)
    }
}

/// Met once `duration` of wall time has passed since installation.
#[derive(Debug, Clone)]
pub struct WallSecondsCondition {
    start: Duration,
    duration: Duration,
}

impl WallSecondsCondition {
    pub fn new(start: Duration, duration: Duration) -> Self {
        Self { start, duration }
    }
}

impl ShutdownCondition for WallSecondsCondition {
    fn is_met(&self, now: &TickSnapshot) -> bool {
        now.wall_elapsed.saturating_sub(self.start) >= self.duration
    }

    fn describe(&self) -> String {
        format!("after {:.3} wall seconds", self.duration.as_secs_f64())
    }
}

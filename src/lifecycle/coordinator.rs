//! The tick-driven lifecycle coordinator.
//!
//! A host drives `tick(dt)` once per frame from a single thread, the one that
//! constructed the coordinator. Each tick runs these phases in order:
//!
//! 1. start notification (first tick only)
//! 2. main-thread actions
//! 3. clock advance
//! 4. tick subscribers
//! 5. aging pass over the in-flight registry
//! 6. frame-boundary actions
//! 7. shutdown condition
//! 8. late phase: drain protocol and termination check
//!
//! Shutdown moves `Running -> ShutdownRequested -> Draining -> Terminated`.
//! Draining joins every tracked request, flushes both action queues, sends
//! the one-time shutdown notification and only then sets the final-flush flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::collaborator::Collaborator;
use super::condition::{
    FrameCountCondition, ShutdownCondition, SimSecondsCondition, TickSnapshot, WallSecondsCondition,
};
use super::state::LifecycleState;
use crate::config::EngineConfig;
use crate::context::{Action, EngineContext, EngineCounters};
use crate::error::EngineError;
use crate::pool::{self, PooledRequest};
use crate::request::ExecutionContext;
use crate::scheduler::{WorkerPool, WorkerPoolConfig, WorkerPoolStats};
use crate::telemetry;

type TickSubscriber = Box<dyn FnMut(f64) + Send + 'static>;

#[derive(Debug, Default)]
struct Timing {
    started: bool,
    wall_origin: Duration,
    sim_elapsed: f64,
    sim_unscaled: f64,
    time_scale: f64,
    shutdown_requested_at: Option<Duration>,
}

struct CoordinatorInner {
    ctx: Arc<EngineContext>,
    clock: Arc<dyn Clock>,
    session_id: Uuid,
    shutdown_timeout: Duration,
    timing: Mutex<Timing>,
    condition: Mutex<Option<Box<dyn ShutdownCondition>>>,
    tick_subscribers: Mutex<Vec<TickSubscriber>>,
    start_hooks: Mutex<Vec<Action>>,
    shutdown_hooks: Mutex<Vec<Action>>,
    collaborators: Mutex<Vec<Arc<dyn Collaborator>>>,
    final_flush_done: AtomicBool,
    ticks: AtomicU64,
}

/// Counters and sizes for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStats {
    pub session_id: String,
    pub state: LifecycleState,
    pub ticks: u64,
    pub frame: u64,
    pub requests_created: u64,
    pub requests_recycled: u64,
    pub aged_completions: u64,
    pub drained_completions: u64,
    pub callable_failures: u64,
    pub pool_idle: usize,
    pub outstanding: usize,
    pub registry_size: usize,
    /// Requests still checked out once the coordinator terminated.
    pub leaked: usize,
    pub workers: WorkerPoolStats,
}

/// Owns the engine context and drives it from the host's frame loop.
///
/// Clones share the same engine.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Build a coordinator reading wall time from `clock`.
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, EngineError> {
        let workers = WorkerPool::new(WorkerPoolConfig {
            num_threads: config.resolved_worker_threads(),
            ..Default::default()
        })?;

        let default_context = match config.default_context {
            ExecutionContext::Default => ExecutionContext::Chained,
            context => context,
        };

        let ctx = EngineContext::new(
            Arc::new(workers),
            default_context,
            config.resolved_max_parallelism(),
            config.max_request_age,
        );

        let session_id = Uuid::new_v4();
        tracing::info!(
            session_id = %session_id,
            default_context = %default_context,
            max_parallelism = ctx.max_parallelism(),
            workers = ctx.workers.num_threads(),
            "coordinator created"
        );

        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                ctx: Arc::new(ctx),
                clock,
                session_id,
                shutdown_timeout: config.shutdown_timeout,
                timing: Mutex::new(Timing {
                    time_scale: 1.0,
                    ..Default::default()
                }),
                condition: Mutex::new(None),
                tick_subscribers: Mutex::new(Vec::new()),
                start_hooks: Mutex::new(Vec::new()),
                shutdown_hooks: Mutex::new(Vec::new()),
                collaborators: Mutex::new(Vec::new()),
                final_flush_done: AtomicBool::new(false),
                ticks: AtomicU64::new(0),
            }),
        })
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Check out a request from the pool and register it for aging.
    ///
    /// Fails with `ShutdownComplete` once the shutdown notification has been
    /// sent, unless a callable is currently executing: in-flight work may
    /// still spawn follow-on requests while the engine drains.
    pub fn create_request<T: Default + Send + 'static>(&self) -> Result<PooledRequest<T>, EngineError> {
        let ctx = &self.inner.ctx;
        if ctx.notification_sent() && !ctx.inside_callable() {
            return Err(EngineError::ShutdownComplete);
        }
        Ok(PooledRequest::new(pool::acquire::<T>(ctx)))
    }

    /// Force-complete tracked requests: all of them, or only the aged ones.
    pub fn complete_tracked_requests(&self, all: bool) -> usize {
        let ctx = &self.inner.ctx;
        if all {
            let forced = ctx.registry.drain();
            self.count_forced(&ctx.counters.drained_completions, "drain", forced);
            forced
        } else {
            let forced = ctx.registry.age(ctx.frame(), ctx.max_request_age());
            self.count_forced(&ctx.counters.aged_completions, "aged", forced);
            forced
        }
    }

    fn count_forced(&self, counter: &AtomicU64, reason: &'static str, forced: usize) {
        if forced > 0 {
            counter.fetch_add(forced as u64, Ordering::Relaxed);
            telemetry::record_forced_completions(reason, forced);
        }
    }

    // ------------------------------------------------------------------
    // Tick loop
    // ------------------------------------------------------------------

    /// Advance one frame. `dt` is the frame's duration in seconds.
    ///
    /// Returns the state after the tick. Ticks after termination do nothing.
    pub fn tick(&self, dt: f64) -> LifecycleState {
        let ctx = self.inner.ctx.clone();
        if ctx.state().is_terminated() {
            return LifecycleState::Terminated;
        }
        self.inner.ticks.fetch_add(1, Ordering::Relaxed);

        self.fire_start_hooks();

        ctx.main_thread_actions.run_all();

        let frame = ctx.advance_frame();
        let _span = telemetry::tick_span(frame).entered();
        {
            let mut timing = self.inner.timing.lock();
            let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
            timing.sim_elapsed += dt * timing.time_scale;
            timing.sim_unscaled += dt;
        }

        self.run_tick_subscribers(dt);

        let aged = ctx.registry.age(frame, ctx.max_request_age());
        self.count_forced(&ctx.counters.aged_completions, "aged", aged);
        telemetry::record_registry_size(ctx.registry.len());

        ctx.frame_boundary_actions.run_all();

        if ctx.state() == LifecycleState::Running && self.condition_met() {
            self.shutdown();
        }

        if ctx.shutdown_requested() && !self.final_flush_done() {
            self.drain();
        }
        if self.final_flush_done() {
            self.check_termination();
        }

        ctx.state()
    }

    fn fire_start_hooks(&self) {
        let first = {
            let mut timing = self.inner.timing.lock();
            if timing.started {
                false
            } else {
                timing.started = true;
                timing.wall_origin = self.inner.clock.now();
                true
            }
        };
        if first {
            let hooks = std::mem::take(&mut *self.inner.start_hooks.lock());
            tracing::info!(session_id = %self.inner.session_id, hooks = hooks.len(), "coordinator started");
            for hook in hooks {
                hook();
            }
        }
    }

    fn run_tick_subscribers(&self, dt: f64) {
        // Subscribers may register further subscribers; run them unlocked.
        let mut running = std::mem::take(&mut *self.inner.tick_subscribers.lock());
        for subscriber in running.iter_mut() {
            subscriber(dt);
        }
        let mut subscribers = self.inner.tick_subscribers.lock();
        running.append(&mut subscribers);
        *subscribers = running;
    }

    fn condition_met(&self) -> bool {
        let snapshot = self.snapshot();
        let condition = self.inner.condition.lock();
        match condition.as_ref() {
            Some(condition) if condition.is_met(&snapshot) => {
                tracing::info!(condition = %condition.describe(), "shutdown condition met");
                true
            }
            _ => false,
        }
    }

    fn snapshot(&self) -> TickSnapshot {
        TickSnapshot {
            frame: self.frame_count(),
            sim_elapsed: self.sim_elapsed(),
            wall_elapsed: self.wall_elapsed(),
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Request shutdown. The drain runs in the late phase of the next tick.
    pub fn shutdown(&self) {
        if !self
            .inner
            .ctx
            .transition(LifecycleState::Running, LifecycleState::ShutdownRequested)
        {
            return;
        }
        self.inner.timing.lock().shutdown_requested_at = Some(self.inner.clock.now());
        self.inner.condition.lock().take();
        tracing::info!(
            session_id = %self.inner.session_id,
            frame = self.frame_count(),
            in_flight = self.inner.ctx.registry.len(),
            "shutdown requested"
        );
    }

    /// Shut down once `frames` more ticks have run.
    pub fn shutdown_after_frames(&self, frames: u64) -> bool {
        self.set_shutdown_condition(Box::new(FrameCountCondition::new(self.frame_count(), frames)))
    }

    /// Shut down once `seconds` more simulated (scaled) seconds have passed.
    pub fn shutdown_after_sim_seconds(&self, seconds: f64) -> bool {
        self.set_shutdown_condition(Box::new(SimSecondsCondition::new(self.sim_elapsed(), seconds)))
    }

    /// Shut down once `seconds` more wall seconds have passed.
    pub fn shutdown_after_wall_seconds(&self, seconds: f64) -> bool {
        let duration = Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX);
        self.set_shutdown_condition(Box::new(WallSecondsCondition::new(self.wall_elapsed(), duration)))
    }

    /// Install a shutdown condition, replacing any previous one.
    ///
    /// Returns false, and logs, if shutdown has already been requested.
    pub fn set_shutdown_condition(&self, condition: Box<dyn ShutdownCondition>) -> bool {
        if self.shutdown_requested() {
            tracing::error!(
                condition = %condition.describe(),
                "shutdown already requested; condition ignored"
            );
            return false;
        }
        tracing::info!(condition = %condition.describe(), "shutdown condition installed");
        *self.inner.condition.lock() = Some(condition);
        true
    }

    fn drain(&self) {
        let ctx = &self.inner.ctx;
        let session = self.inner.session_id.to_string();
        let span = telemetry::drain_span(&session);
        let _entered = span.enter();

        ctx.transition(LifecycleState::ShutdownRequested, LifecycleState::Draining);
        tracing::info!(in_flight = ctx.registry.len(), "draining");

        let mut forced = ctx.registry.drain();
        forced += self.flush_queues();

        if !ctx.notification_sent() {
            let collaborators = self.inner.collaborators.lock().clone();
            for collaborator in &collaborators {
                tracing::debug!(collaborator = collaborator.name(), "sending shutdown notification");
                collaborator.shutdown_notification();
            }
            let hooks = std::mem::take(&mut *self.inner.shutdown_hooks.lock());
            for hook in hooks {
                hook();
            }
            ctx.mark_notification_sent();
        }

        // Notifications may have queued or created more work.
        forced += self.flush_queues();

        span.record("forced", forced);
        self.count_forced(&ctx.counters.drained_completions, "drain", forced);

        if !self.inner.final_flush_done.swap(true, Ordering::AcqRel) {
            tracing::info!(forced, "final flush done");
        }
    }

    /// Run both action queues, and any registry entries they add, until all
    /// three are empty.
    fn flush_queues(&self) -> usize {
        let ctx = &self.inner.ctx;
        let mut forced = 0;
        loop {
            let ran = ctx.main_thread_actions.run_all() + ctx.frame_boundary_actions.run_all();
            forced += ctx.registry.drain();
            if ran == 0 && ctx.main_thread_actions.len() == 0 && ctx.frame_boundary_actions.len() == 0 {
                return forced;
            }
        }
    }

    fn check_termination(&self) {
        let busy: Vec<String> = self
            .inner
            .collaborators
            .lock()
            .iter()
            .filter(|c| c.work_in_progress())
            .map(|c| c.name().to_string())
            .collect();

        let waited = self
            .inner
            .timing
            .lock()
            .shutdown_requested_at
            .map(|at| self.inner.clock.now().saturating_sub(at))
            .unwrap_or_default();
        let timed_out = waited >= self.inner.shutdown_timeout;

        if !busy.is_empty() && !timed_out {
            return;
        }
        if !busy.is_empty() {
            tracing::warn!(
                busy = ?busy,
                waited_secs = waited.as_secs_f64(),
                "shutdown timeout elapsed with collaborators still busy"
            );
        }

        let leaked = self.inner.ctx.pool.outstanding();
        if leaked > 0 {
            tracing::warn!(leaked, "requests never disposed at termination");
        }

        self.inner.ctx.set_state(LifecycleState::Terminated);
        tracing::info!(session_id = %self.inner.session_id, frame = self.frame_count(), "terminated");
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Call `subscriber(dt)` on every tick, after the clocks advance.
    pub fn on_tick<F>(&self, subscriber: F)
    where
        F: FnMut(f64) + Send + 'static,
    {
        self.inner.tick_subscribers.lock().push(Box::new(subscriber));
    }

    /// Run `hook` on the first tick, or now if that tick has already run.
    pub fn on_start<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.timing.lock().started {
            hook();
            return;
        }
        self.inner.start_hooks.lock().push(Box::new(hook));
    }

    /// Run `hook` once during the drain, or now if that already happened.
    pub fn on_shutdown<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.ctx.notification_sent() {
            hook();
            return;
        }
        self.inner.shutdown_hooks.lock().push(Box::new(hook));
    }

    /// Register a collaborator. Duplicate registrations are ignored.
    ///
    /// Returns false, and logs, if the collaborator refuses to initialize.
    pub fn register_collaborator(&self, collaborator: Arc<dyn Collaborator>) -> bool {
        {
            let collaborators = self.inner.collaborators.lock();
            if collaborators.iter().any(|c| same_collaborator(c, &collaborator)) {
                return true;
            }
        }
        if !collaborator.initialize() {
            tracing::error!(collaborator = collaborator.name(), "collaborator failed to initialize");
            return false;
        }
        tracing::debug!(collaborator = collaborator.name(), "collaborator registered");
        self.inner.collaborators.lock().push(collaborator);
        true
    }

    pub fn unregister_collaborator(&self, collaborator: &Arc<dyn Collaborator>) -> bool {
        let mut collaborators = self.inner.collaborators.lock();
        let before = collaborators.len();
        collaborators.retain(|c| !same_collaborator(c, collaborator));
        collaborators.len() != before
    }

    /// Run `action` at the start of the next tick, on the tick thread.
    pub fn queue_for_main_thread<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.ctx.main_thread_actions.push(Box::new(action));
    }

    /// Run `action` in the next frame-boundary phase.
    pub fn queue_for_frame_boundary<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.ctx.frame_boundary_actions.push(Box::new(action));
    }

    // ------------------------------------------------------------------
    // Runtime settings
    // ------------------------------------------------------------------

    pub fn default_context(&self) -> ExecutionContext {
        self.inner.ctx.default_context().unwrap_or(ExecutionContext::Chained)
    }

    /// Change the process-wide default context. `Default` itself is rejected.
    pub fn set_default_context(&self, context: ExecutionContext) -> Result<(), EngineError> {
        if context == ExecutionContext::Default {
            return Err(EngineError::UnsupportedContext(context.to_string()));
        }
        self.inner.ctx.set_default_context(context);
        Ok(())
    }

    pub fn max_parallelism(&self) -> usize {
        self.inner.ctx.max_parallelism()
    }

    /// Resize the chained-dispatch ring; takes effect on the next schedule.
    pub fn set_max_parallelism(&self, value: usize) {
        self.inner.ctx.set_max_parallelism(value);
    }

    pub fn max_request_age(&self) -> u64 {
        self.inner.ctx.max_request_age()
    }

    pub fn set_max_request_age(&self, ticks: u64) {
        self.inner.ctx.set_max_request_age(ticks);
    }

    /// Scale applied to `dt` for simulated time. Negative or non-finite
    /// values are ignored.
    pub fn set_time_scale(&self, scale: f64) {
        if !scale.is_finite() || scale < 0.0 {
            tracing::warn!(scale, "ignoring invalid time scale");
            return;
        }
        self.inner.timing.lock().time_scale = scale;
    }

    pub fn time_scale(&self) -> f64 {
        self.inner.timing.lock().time_scale
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.ctx.state()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.inner.ctx.shutdown_requested()
    }

    pub fn final_flush_done(&self) -> bool {
        self.inner.final_flush_done.load(Ordering::Acquire)
    }

    pub fn is_terminated(&self) -> bool {
        self.state().is_terminated()
    }

    pub fn frame_count(&self) -> u64 {
        self.inner.ctx.frame()
    }

    /// Scaled simulated seconds.
    pub fn sim_elapsed(&self) -> f64 {
        self.inner.timing.lock().sim_elapsed
    }

    pub fn sim_elapsed_unscaled(&self) -> f64 {
        self.inner.timing.lock().sim_unscaled
    }

    /// Wall time since the first tick; zero before it.
    pub fn wall_elapsed(&self) -> Duration {
        let timing = self.inner.timing.lock();
        if !timing.started {
            return Duration::ZERO;
        }
        self.inner.clock.now().saturating_sub(timing.wall_origin)
    }

    pub fn idle_requests<T: Send + 'static>(&self) -> usize {
        self.inner.ctx.pool.idle_count::<T>()
    }

    pub fn tracked_requests(&self) -> usize {
        self.inner.ctx.registry.len()
    }

    pub fn stats(&self) -> CoordinatorStats {
        let ctx = &self.inner.ctx;
        let outstanding = ctx.pool.outstanding();
        let state = ctx.state();
        CoordinatorStats {
            session_id: self.inner.session_id.to_string(),
            state,
            ticks: self.inner.ticks.load(Ordering::Relaxed),
            frame: ctx.frame(),
            requests_created: EngineCounters::read(&ctx.counters.created),
            requests_recycled: EngineCounters::read(&ctx.counters.recycled),
            aged_completions: EngineCounters::read(&ctx.counters.aged_completions),
            drained_completions: EngineCounters::read(&ctx.counters.drained_completions),
            callable_failures: EngineCounters::read(&ctx.counters.callable_failures),
            pool_idle: ctx.pool.total_idle(),
            outstanding,
            registry_size: ctx.registry.len(),
            leaked: if state.is_terminated() { outstanding } else { 0 },
            workers: ctx.workers.stats(),
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("session_id", &self.inner.session_id)
            .field("state", &self.state())
            .field("frame", &self.frame_count())
            .finish()
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        if !self.ctx.state().is_terminated() {
            tracing::warn!(session_id = %self.session_id, "coordinator dropped before termination");
        }
        self.ctx.workers.signal_shutdown();
    }
}

fn same_collaborator(a: &Arc<dyn Collaborator>, b: &Arc<dyn Collaborator>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

//! Execution state machine.
//! - ExecutionState: the single global run state
//! - ExecutionControl: transitions, step targets, the stopper slot
//! - line_gate/begin_stop/resume: the hook-side protocol
//! - abandon_step/terminate: threads and sessions that end mid-step

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Step behavior while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Stop at the next line, regardless of call depth.
    Into,
    /// Stop at the next line at the same or a lower call depth.
    Over,
    /// Stop at the next line at a strictly lower call depth.
    Out,
}

impl StepKind {
    fn reached(self, origin: u32, depth: u32) -> bool {
        match self {
            Self::Into => true,
            Self::Over => depth <= origin,
            Self::Out => depth < origin,
        }
    }
}

/// Reason reported on `stopped` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Entry,
    Breakpoint,
    Step,
    Pause,
    Exception,
}

impl StopReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Breakpoint => "breakpoint",
            Self::Step => "step",
            Self::Pause => "pause",
            Self::Exception => "exception",
        }
    }
}

/// Global execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Initializing,
    Running,
    Stepping(StepKind),
    Stopped(StopReason),
    Terminated,
}

/// What a line hook should do after consulting the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineGate {
    /// The calling thread is now the stopper.
    Stop(StopReason),
    /// Check breakpoints at this line.
    Breakpoints,
    /// Ignore breakpoints; a step is in progress deeper than its target.
    Suppressed,
    /// The session is over.
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StepTarget {
    kind: StepKind,
    thread: u32,
    depth: u32,
}

#[derive(Debug)]
struct ControlState {
    state: ExecutionState,
    step: Option<StepTarget>,
    pending: Option<StopReason>,
    stopper: Option<u32>,
}

const QUICK_WAIT: u8 = 0;
const QUICK_RUNNING: u8 = 1;
const QUICK_ATTENTION: u8 = 2;
const QUICK_TERMINATED: u8 = 3;

/// Fast-path view of the state for per-line hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickState {
    /// Hooks must block until the state machine lets them run.
    Wait,
    /// Nothing pending; only breakpoints can stop execution.
    Running,
    /// A step, pause or stop is in progress; take the slow path.
    Attention,
    Terminated,
}

impl ControlState {
    fn quick(&self) -> u8 {
        match self.state {
            ExecutionState::Terminated => QUICK_TERMINATED,
            ExecutionState::Initializing => QUICK_WAIT,
            ExecutionState::Running
                if self.step.is_none() && self.pending.is_none() && self.stopper.is_none() =>
            {
                QUICK_RUNNING
            }
            _ => QUICK_ATTENTION,
        }
    }

    fn blocks(&self, thread: u32) -> bool {
        matches!(self.state, ExecutionState::Initializing)
            || self.stopper.is_some_and(|stopper| stopper != thread)
    }
}

/// Single authority over the global execution state.
///
/// Every transition happens under one lock; `quick` mirrors the state for
/// the lock-free per-line check and is only written while the lock is held.
#[derive(Debug)]
pub struct ExecutionControl {
    inner: Mutex<ControlState>,
    changed: Condvar,
    quick: AtomicU8,
}

impl Default for ExecutionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionControl {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ControlState {
                state: ExecutionState::Initializing,
                step: None,
                pending: None,
                stopper: None,
            }),
            changed: Condvar::new(),
            quick: AtomicU8::new(QUICK_WAIT),
        }
    }

    #[must_use]
    pub fn state(&self) -> ExecutionState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn stopper(&self) -> Option<u32> {
        self.inner.lock().stopper
    }

    #[must_use]
    pub fn quick(&self) -> QuickState {
        match self.quick.load(Ordering::Acquire) {
            QUICK_RUNNING => QuickState::Running,
            QUICK_ATTENTION => QuickState::Attention,
            QUICK_TERMINATED => QuickState::Terminated,
            _ => QuickState::Wait,
        }
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.quick() == QuickState::Terminated
    }

    fn publish(&self, state: &ControlState) {
        self.quick.store(state.quick(), Ordering::Release);
        self.changed.notify_all();
    }

    /// Leave `Initializing`; with `stop_on_entry` the first line stops.
    pub fn configuration_done(&self, stop_on_entry: bool) -> bool {
        let mut state = self.inner.lock();
        if state.state != ExecutionState::Initializing {
            return false;
        }
        state.state = ExecutionState::Running;
        if stop_on_entry {
            state.pending = Some(StopReason::Entry);
        }
        debug!(stop_on_entry, "configuration done");
        self.publish(&state);
        true
    }

    /// Ask the next thread that executes a line to stop.
    pub fn request_pause(&self) -> bool {
        let mut state = self.inner.lock();
        match state.state {
            ExecutionState::Stopped(_) | ExecutionState::Terminated => false,
            _ => {
                state.pending = Some(StopReason::Pause);
                self.publish(&state);
                true
            }
        }
    }

    /// Block while another thread is stopped or configuration is pending.
    ///
    /// `on_block` runs once, before the first wait. Returns `false` once the
    /// session is terminated.
    pub fn wait_until_runnable(&self, thread: u32, on_block: impl FnOnce()) -> bool {
        let mut state = self.inner.lock();
        let mut on_block = Some(on_block);
        loop {
            if state.state == ExecutionState::Terminated {
                return false;
            }
            if !state.blocks(thread) {
                return true;
            }
            if let Some(notify) = on_block.take() {
                notify();
            }
            self.changed.wait(&mut state);
        }
    }

    /// Decide what a line hook on `thread` at call `depth` does.
    ///
    /// Returns `Stop` only after the caller became the stopper. Lines in
    /// skipped files never stop; stepping continues through them.
    pub fn line_gate(&self, thread: u32, depth: u32, skipped: bool) -> LineGate {
        let mut state = self.inner.lock();
        loop {
            if state.state == ExecutionState::Terminated {
                return LineGate::Terminated;
            }
            if !state.blocks(thread) {
                break;
            }
            self.changed.wait(&mut state);
        }

        if skipped {
            return LineGate::Suppressed;
        }
        if let Some(reason) = state.pending.take() {
            self.enter_stop(&mut state, thread, reason);
            return LineGate::Stop(reason);
        }
        if let Some(step) = state.step.filter(|step| step.thread == thread) {
            if step.kind.reached(step.depth, depth) {
                self.enter_stop(&mut state, thread, StopReason::Step);
                return LineGate::Stop(StopReason::Step);
            }
            return LineGate::Suppressed;
        }
        LineGate::Breakpoints
    }

    /// Make `thread` the stopper, waiting for any other stopper to resume.
    ///
    /// Returns `false` if the session terminated first.
    pub fn begin_stop(&self, thread: u32, reason: StopReason) -> bool {
        let mut state = self.inner.lock();
        loop {
            if state.state == ExecutionState::Terminated {
                return false;
            }
            if state.stopper.is_none() || state.stopper == Some(thread) {
                break;
            }
            self.changed.wait(&mut state);
        }
        self.enter_stop(&mut state, thread, reason);
        true
    }

    fn enter_stop(&self, state: &mut ControlState, thread: u32, reason: StopReason) {
        state.state = ExecutionState::Stopped(reason);
        state.stopper = Some(thread);
        state.step = None;
        if reason == StopReason::Pause {
            state.pending = None;
        }
        debug!(thread, reason = reason.as_str(), "execution stopped");
        self.publish(state);
    }

    /// Run `forward` while `thread` (or any thread, if `None`) is stopped.
    ///
    /// Returns `false` without calling `forward` otherwise.
    pub fn forward_if_stopped(&self, thread: Option<u32>, forward: impl FnOnce()) -> bool {
        let state = self.inner.lock();
        let stopped = matches!(state.state, ExecutionState::Stopped(_))
            && state.stopper.is_some()
            && thread.is_none_or(|thread| state.stopper == Some(thread));
        if stopped {
            forward();
        }
        stopped
    }

    /// Release the stopper, optionally arming a step from call `depth`.
    ///
    /// Stepping out of the outermost function has no target line and resumes
    /// plainly. `drain` runs under the lock, after the transition, so nothing
    /// can be forwarded to the stopped thread once it has been released.
    pub fn resume(
        &self,
        thread: u32,
        step: Option<StepKind>,
        depth: u32,
        drain: impl FnOnce(),
    ) -> bool {
        let mut state = self.inner.lock();
        if state.stopper != Some(thread) {
            return false;
        }
        state.stopper = None;
        if state.state != ExecutionState::Terminated {
            state.state = match step {
                Some(StepKind::Out) if depth == 0 => ExecutionState::Running,
                Some(kind) => {
                    state.step = Some(StepTarget {
                        kind,
                        thread,
                        depth,
                    });
                    ExecutionState::Stepping(kind)
                }
                None => ExecutionState::Running,
            };
        }
        drain();
        debug!(thread, step = ?step, "execution resumed");
        self.publish(&state);
        true
    }

    /// Drop a step armed for `thread`, which will not execute another line.
    pub fn abandon_step(&self, thread: u32) -> bool {
        let mut state = self.inner.lock();
        if !state.step.is_some_and(|step| step.thread == thread) {
            return false;
        }
        state.step = None;
        if matches!(state.state, ExecutionState::Stepping(_)) {
            state.state = ExecutionState::Running;
        }
        debug!(thread, "step abandoned");
        self.publish(&state);
        true
    }

    /// Enter the absorbing `Terminated` state; `true` only the first time.
    ///
    /// `drain` receives the thread that was stopped, if any.
    pub fn terminate(&self, drain: impl FnOnce(Option<u32>)) -> bool {
        let mut state = self.inner.lock();
        if state.state == ExecutionState::Terminated {
            return false;
        }
        state.state = ExecutionState::Terminated;
        state.step = None;
        state.pending = None;
        let stopper = state.stopper.take();
        drain(stopper);
        debug!("execution terminated");
        self.publish(&state);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::{ExecutionControl, ExecutionState, LineGate, QuickState, StepKind, StopReason};

    fn running() -> ExecutionControl {
        let control = ExecutionControl::new();
        assert!(control.configuration_done(false));
        control
    }

    #[test]
    fn configuration_done_leaves_initializing_once() {
        let control = ExecutionControl::new();
        assert_eq!(control.quick(), QuickState::Wait);
        assert!(control.configuration_done(true));
        assert!(!control.configuration_done(false));
        assert_eq!(control.quick(), QuickState::Attention);
        assert_eq!(control.line_gate(1, 0, false), LineGate::Stop(StopReason::Entry));
        assert_eq!(control.state(), ExecutionState::Stopped(StopReason::Entry));
    }

    #[test]
    fn step_over_ignores_deeper_lines() {
        let control = running();
        assert!(control.begin_stop(1, StopReason::Breakpoint));
        assert!(control.resume(1, Some(StepKind::Over), 2, || {}));
        assert_eq!(control.state(), ExecutionState::Stepping(StepKind::Over));
        assert_eq!(control.line_gate(1, 3, false), LineGate::Suppressed);
        assert_eq!(control.line_gate(1, 2, false), LineGate::Stop(StopReason::Step));
    }

    #[test]
    fn step_out_needs_a_shallower_line() {
        let control = running();
        assert!(control.begin_stop(1, StopReason::Breakpoint));
        assert!(control.resume(1, Some(StepKind::Out), 2, || {}));
        assert_eq!(control.line_gate(1, 2, false), LineGate::Suppressed);
        assert_eq!(control.line_gate(1, 1, false), LineGate::Stop(StopReason::Step));
    }

    #[test]
    fn step_out_of_the_outermost_function_just_runs() {
        let control = running();
        assert!(control.begin_stop(1, StopReason::Breakpoint));
        assert!(control.resume(1, Some(StepKind::Out), 0, || {}));
        assert_eq!(control.state(), ExecutionState::Running);
        assert_eq!(control.quick(), QuickState::Running);
        assert_eq!(control.line_gate(1, 0, false), LineGate::Breakpoints);
    }

    #[test]
    fn abandoned_steps_return_to_running() {
        let control = running();
        assert!(control.begin_stop(1, StopReason::Breakpoint));
        assert!(control.resume(1, Some(StepKind::Over), 1, || {}));
        assert_eq!(control.quick(), QuickState::Attention);
        assert!(!control.abandon_step(2));
        assert!(control.abandon_step(1));
        assert_eq!(control.state(), ExecutionState::Running);
        assert_eq!(control.quick(), QuickState::Running);
        assert!(!control.abandon_step(1));
    }

    #[test]
    fn step_in_stops_at_any_depth_but_not_in_skipped_files() {
        let control = running();
        assert!(control.begin_stop(1, StopReason::Breakpoint));
        assert!(control.resume(1, Some(StepKind::Into), 1, || {}));
        assert_eq!(control.line_gate(1, 5, true), LineGate::Suppressed);
        assert_eq!(control.line_gate(1, 5, false), LineGate::Stop(StopReason::Step));
    }

    #[test]
    fn steps_belong_to_their_thread() {
        let control = running();
        assert!(control.begin_stop(1, StopReason::Breakpoint));
        assert!(control.resume(1, Some(StepKind::Into), 1, || {}));
        assert_eq!(control.line_gate(2, 1, false), LineGate::Breakpoints);
        assert_eq!(control.line_gate(1, 1, false), LineGate::Stop(StopReason::Step));
    }

    #[test]
    fn pause_stops_the_next_line_and_only_once() {
        let control = running();
        assert_eq!(control.quick(), QuickState::Running);
        assert!(control.request_pause());
        assert_eq!(control.line_gate(4, 0, false), LineGate::Stop(StopReason::Pause));
        assert!(!control.request_pause());
        assert!(control.resume(4, None, 0, || {}));
        assert_eq!(control.line_gate(4, 0, false), LineGate::Breakpoints);
    }

    #[test]
    fn resume_requires_the_stopper() {
        let control = running();
        assert!(!control.resume(1, None, 0, || {}));
        assert!(control.begin_stop(1, StopReason::Breakpoint));
        assert!(!control.resume(2, None, 0, || {}));
        assert!(control.forward_if_stopped(Some(1), || {}));
        assert!(!control.forward_if_stopped(Some(2), || {}));
        assert!(control.resume(1, None, 0, || {}));
        assert!(!control.forward_if_stopped(None, || {}));
    }

    #[test]
    fn second_stopper_waits_for_the_first() {
        let control = Arc::new(running());
        assert!(control.begin_stop(1, StopReason::Breakpoint));
        let waiter = {
            let control = Arc::clone(&control);
            thread::spawn(move || control.begin_stop(2, StopReason::Breakpoint))
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(control.stopper(), Some(1));
        assert!(control.resume(1, None, 0, || {}));
        assert!(waiter.join().expect("waiter"));
        assert_eq!(control.stopper(), Some(2));
    }

    #[test]
    fn terminate_releases_blocked_threads() {
        let control = Arc::new(running());
        assert!(control.begin_stop(1, StopReason::Breakpoint));
        let blocked = {
            let control = Arc::clone(&control);
            thread::spawn(move || control.wait_until_runnable(2, || {}))
        };
        thread::sleep(Duration::from_millis(50));
        let mut released = None;
        assert!(control.terminate(|stopper| released = stopper));
        assert_eq!(released, Some(1));
        assert!(!control.terminate(|_| unreachable!("already terminated")));
        assert!(!blocked.join().expect("blocked thread"));
        assert_eq!(control.line_gate(1, 0, false), LineGate::Terminated);
        assert!(!control.begin_stop(1, StopReason::Exception));
        assert!(!control.request_pause());
        assert_eq!(control.state(), ExecutionState::Terminated);
    }
}

//! Interpreter entry points.
//! - hook: line/call/return callback with the breakpoint fast path
//! - exception/panic: fault reporting
//! - attach/detach: thread lifecycle and thread events
//! - print/capture/output_origin: output produced by the debuggee
//! - run_stopped: service hook-table requests on the stopped thread

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, error, info, warn};

use crate::breakpoints::LogFragment;
use crate::config::{FILTER_CAUGHT, FILTER_ERROR};
use crate::control::{ExecutionState, LineGate, QuickState, StopReason};
use crate::encoding::TextEncoding;
use crate::output::{OutputAttribution, OutputCategory};
use crate::protocol::{LoadedSourceEventBody, OutputEventBody, StoppedEventBody, ThreadEventBody};
use crate::registry::{ExceptionRecord, RuntimeThread, ThreadPhase};
use crate::runtime::{HookContext, HookEvent, NativeHandle};
use crate::sources::{ResolvedSource, SourceOrigin};

use super::dispatch::Handler;
use super::{Debugger, HookCommand, Resume, StopScope};

/// How long a stopped thread waits for a command before rechecking termination.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Longest display name derived from an inline chunk.
const VIRTUAL_NAME_LIMIT: usize = 48;

/// Runtime error classification, matched against exception filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    /// Error that no protected call will handle.
    Uncaught,
    /// Error raised inside a protected call.
    Caught,
}

impl ExceptionKind {
    fn filter(self) -> &'static str {
        match self {
            Self::Uncaught => FILTER_ERROR,
            Self::Caught => FILTER_CAUGHT,
        }
    }
}

impl Debugger {
    /// Register an execution context; emits `thread started` on first sight.
    pub fn attach(&self, handle: NativeHandle) -> Arc<RuntimeThread> {
        let (thread, created) = self.threads.attach(handle);
        if created {
            info!(thread = thread.id(), handle = handle.raw(), "thread attached");
            if !self.control.is_terminated() {
                self.outbox.send(self.event(
                    "thread",
                    Some(ThreadEventBody {
                        reason: "started".to_string(),
                        thread_id: thread.id(),
                    }),
                ));
            }
        }
        thread
    }

    /// Forget an execution context. Returns `false` if it was unknown.
    pub fn detach(&self, handle: NativeHandle, emit_event: bool) -> bool {
        let Some(thread) = self.threads.detach(handle) else {
            return false;
        };
        info!(thread = thread.id(), "thread detached");
        self.control.abandon_step(thread.id());
        if emit_event {
            self.outbox.send(self.event(
                "thread",
                Some(ThreadEventBody {
                    reason: "exited".to_string(),
                    thread_id: thread.id(),
                }),
            ));
        }
        true
    }

    /// Debug hook, called by the interpreter on every line, call and return.
    ///
    /// Blocks the calling thread while it is stopped, while another thread
    /// is stopped, and while configuration is pending.
    pub fn hook(&self, handle: NativeHandle, event: HookEvent, ctx: &mut dyn HookContext) {
        let quick = self.control.quick();
        if quick == QuickState::Terminated {
            return;
        }
        let thread = match self.threads.find_by_handle(handle) {
            Some(thread) => thread,
            None => self.attach(handle),
        };
        let HookEvent::Line(line) = event else {
            return;
        };

        if quick == QuickState::Running {
            let resolved = self.sources.read().lookup(ctx.chunk());
            if let Some(resolved) = resolved {
                if resolved.skipped || !self.breakpoints.read().contains(&resolved.key, line) {
                    return;
                }
            }
        }
        self.on_line(&thread, line, ctx);
    }

    fn on_line(&self, thread: &Arc<RuntimeThread>, line: u32, ctx: &mut dyn HookContext) {
        let resolved = self.resolve_chunk(&*ctx);
        let id = thread.id();
        if !self
            .control
            .wait_until_runnable(id, || thread.set_suspended())
        {
            return;
        }
        if thread.phase() == ThreadPhase::Suspended {
            thread.set_running(false);
        }

        match self.control.line_gate(id, ctx.depth(), resolved.skipped) {
            LineGate::Stop(reason) => {
                debug!(thread = id, line, key = %resolved.key, "line stop");
                self.run_stopped(thread, reason, None, ctx);
            }
            LineGate::Breakpoints => self.breakpoint_hit(thread, &resolved, line, ctx),
            LineGate::Suppressed | LineGate::Terminated => {}
        }
    }

    fn breakpoint_hit(
        &self,
        thread: &Arc<RuntimeThread>,
        resolved: &ResolvedSource,
        line: u32,
        ctx: &mut dyn HookContext,
    ) {
        let breakpoint = self.breakpoints.read().get(&resolved.key, line);
        let Some(breakpoint) = breakpoint else {
            return;
        };
        if let Some(condition) = &breakpoint.condition {
            match ctx.evaluate_condition(condition) {
                Ok(true) => {}
                Ok(false) => return,
                Err(err) => {
                    warn!(id = breakpoint.id, "breakpoint condition failed: {err}");
                    self.outbox.send(
                        self.console_output(format!(
                            "breakpoint condition '{condition}' failed: {err}"
                        )),
                    );
                }
            }
        }
        let hits = self.breakpoints.write().record_hit(&resolved.key, line);
        if breakpoint
            .hit_condition
            .is_some_and(|condition| !condition.is_met(hits))
        {
            return;
        }
        if let Some(fragments) = &breakpoint.log_message {
            let mut output = format_log_message(fragments, ctx);
            output.push('\n');
            let body = OutputEventBody {
                output,
                category: Some("console".to_string()),
                source: Some(resolved.source.clone()),
                line: Some(self.coordinate().to_client_line(line)),
                column: None,
                data: None,
            };
            self.outbox.send(self.event("output", Some(body)));
            return;
        }
        if self.control.begin_stop(thread.id(), StopReason::Breakpoint) {
            debug!(thread = thread.id(), id = breakpoint.id, line, "breakpoint hit");
            self.run_stopped(thread, StopReason::Breakpoint, None, ctx);
        }
    }

    /// Report a runtime error. Stops only when the matching filter is armed;
    /// returns whether the thread stopped.
    pub fn exception(
        &self,
        handle: NativeHandle,
        kind: ExceptionKind,
        message: &str,
        ctx: &mut dyn HookContext,
    ) -> bool {
        if self.control.is_terminated() {
            return false;
        }
        let armed = self
            .exception_filters
            .read()
            .iter()
            .any(|filter| filter == kind.filter());
        if !armed {
            return false;
        }
        let thread = self.attach(handle);
        let record = ExceptionRecord {
            kind: kind.filter().to_string(),
            message: self.paths().exception_message(message),
            fatal: false,
        };
        self.stop_for_exception(&thread, record, ctx)
    }

    /// Report an unrecoverable interpreter fault.
    ///
    /// Always stops, regardless of exception filters; once the client resumes
    /// the session is terminated.
    pub fn panic(&self, handle: NativeHandle, message: &str, ctx: &mut dyn HookContext) {
        if self.control.is_terminated() {
            return;
        }
        let thread = self.attach(handle);
        let message = self.paths().exception_message(message);
        error!(thread = thread.id(), "interpreter panic: {message}");
        let record = ExceptionRecord {
            kind: "panic".to_string(),
            message,
            fatal: true,
        };
        self.stop_for_exception(&thread, record, ctx);
        self.shutdown();
    }

    fn stop_for_exception(
        &self,
        thread: &Arc<RuntimeThread>,
        record: ExceptionRecord,
        ctx: &mut dyn HookContext,
    ) -> bool {
        let id = thread.id();
        if !self
            .control
            .wait_until_runnable(id, || thread.set_suspended())
        {
            return false;
        }
        if !self.control.begin_stop(id, StopReason::Exception) {
            return false;
        }
        self.run_stopped(thread, StopReason::Exception, Some(record), ctx);
        true
    }

    /// Capture print-style output from the interpreter.
    ///
    /// Returns `false` when print capture is off and the caller should write
    /// the text itself.
    pub fn print(&self, bytes: &[u8], origin: Option<OutputAttribution>) -> bool {
        if !self.session.lock().capture_print {
            return false;
        }
        self.capture(OutputCategory::Stdout, bytes, origin);
        true
    }

    /// Feed raw output bytes through the escape-sequence parser.
    ///
    /// Safe to call from any thread; events are queued for the connection.
    pub fn capture(
        &self,
        category: OutputCategory,
        bytes: &[u8],
        attribution: Option<OutputAttribution>,
    ) {
        if self.control.is_terminated() {
            return;
        }
        let coordinate = self.coordinate();
        let coding = self.paths().console_coding();
        self.output
            .capture(category, bytes, coding, attribution, |chunk| {
                self.outbox.send(self.output_event(chunk, coordinate));
            });
    }

    /// Attribution for output produced at `line` of the current chunk.
    pub fn output_origin(&self, ctx: &dyn HookContext, line: u32) -> OutputAttribution {
        let resolved = self.resolve_chunk(ctx);
        OutputAttribution {
            source: resolved.source.clone(),
            line,
        }
    }

    fn resolve_chunk(&self, ctx: &dyn HookContext) -> Arc<ResolvedSource> {
        self.resolve(ctx.chunk(), ctx)
    }

    /// Resolve a chunk name, registering the source on first sight.
    pub(super) fn resolve(&self, chunk: &[u8], ctx: &dyn HookContext) -> Arc<ResolvedSource> {
        let cached = self.sources.read().lookup(chunk);
        if let Some(resolved) = cached {
            return resolved;
        }

        let paths = self.paths();
        let origin = SourceOrigin::file(&paths, chunk).unwrap_or_else(|| {
            let code = ctx
                .chunk_code(chunk)
                .map(|code| paths.source_coding().decode(&code).into_owned())
                .unwrap_or_default();
            SourceOrigin::Virtual {
                name: virtual_name(chunk, paths.source_coding()),
                code,
            }
        });
        let (resolved, created) = self.sources.write().register(chunk, origin);
        if created {
            debug!(key = %resolved.key, skipped = resolved.skipped, "source loaded");
            self.outbox.send(self.event(
                "loadedSource",
                Some(LoadedSourceEventBody {
                    reason: "new".to_string(),
                    source: resolved.source.clone(),
                }),
            ));
        }
        resolved
    }

    /// Park the stopper and serve hook-table requests until it resumes.
    fn run_stopped(
        &self,
        thread: &Arc<RuntimeThread>,
        reason: StopReason,
        exception: Option<ExceptionRecord>,
        ctx: &mut dyn HookContext,
    ) {
        let id = thread.id();
        let (description, text) = match &exception {
            Some(record) if record.fatal => {
                (Some("Paused on panic".to_string()), Some(record.message.clone()))
            }
            Some(record) => (
                Some("Paused on exception".to_string()),
                Some(record.message.clone()),
            ),
            None => (None, None),
        };
        for other in self.threads.threads() {
            if other.id() != id {
                other.set_suspended();
            }
        }
        thread.set_stopped(reason, exception);
        self.flush_output();

        info!(thread = id, reason = reason.as_str(), "execution stopped");
        self.outbox.send(self.event(
            "stopped",
            Some(StoppedEventBody {
                reason: reason.as_str().to_string(),
                description,
                thread_id: Some(id),
                text,
                all_threads_stopped: Some(true),
            }),
        ));

        let mut scope = StopScope {
            thread: Arc::clone(thread),
            ctx,
            frames: None,
        };
        let resumed = self.serve_stopped(&mut scope);
        let stepping = matches!(self.control.state(), ExecutionState::Stepping(_));
        for other in self.threads.threads() {
            other.set_running(stepping && other.id() == id);
        }
        match resumed {
            Some(resume) => debug!(thread = id, ?resume, "thread resumed"),
            None => debug!(thread = id, "thread released by termination"),
        }
    }

    fn serve_stopped(&self, scope: &mut StopScope<'_>) -> Option<Resume> {
        let id = scope.thread.id();
        loop {
            if self.control.is_terminated() {
                return None;
            }
            let command = match self.hook_rx.recv_timeout(POLL_INTERVAL) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            };
            let HookCommand::Request(request) = command else {
                continue;
            };
            let Some(Handler::Hook(handler)) = self.table.get(&request.command) else {
                let message = format!("'{}' is not valid while stopped", request.command);
                self.outbox.send(self.error_response(&request, &message));
                continue;
            };

            let mut outcome = handler(self, scope, &request);
            let Some(resume) = outcome.resume.take() else {
                self.send_outcome(outcome);
                continue;
            };
            let step = match resume {
                Resume::Continue => None,
                Resume::Step(kind) => Some(kind),
            };
            let depth = scope.ctx.depth();
            // The resume response must precede any later stop of this thread.
            self.send_outcome(outcome);
            let released = self.control.resume(id, step, depth, || {
                self.reject_pending("thread is no longer stopped");
            });
            return released.then_some(resume);
        }
    }
}

fn format_log_message(fragments: &[LogFragment], ctx: &mut dyn HookContext) -> String {
    let mut message = String::new();
    for fragment in fragments {
        match fragment {
            LogFragment::Text(text) => message.push_str(text),
            LogFragment::Expr(expr) => match ctx.evaluate(expr, None) {
                Ok(result) => message.push_str(&result.value),
                Err(err) => {
                    message.push('{');
                    message.push_str(expr);
                    message.push_str(": ");
                    message.push_str(&err.to_string());
                    message.push('}');
                }
            },
        }
    }
    message
}

/// Display name for a chunk that was not loaded from a file.
fn virtual_name(chunk: &[u8], coding: TextEncoding) -> String {
    let decoded = coding.decode(chunk);
    if let Some(name) = decoded.strip_prefix('=') {
        return name.to_string();
    }
    let first = decoded.lines().next().unwrap_or_default().trim();
    if first.chars().count() > VIRTUAL_NAME_LIMIT {
        let mut name = first.chars().take(VIRTUAL_NAME_LIMIT).collect::<String>();
        name.push_str("...");
        name
    } else if first.is_empty() {
        "<chunk>".to_string()
    } else {
        first.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::virtual_name;
    use crate::encoding::TextEncoding;

    #[test]
    fn virtual_names_come_from_the_chunk() {
        assert_eq!(virtual_name(b"=stdin", TextEncoding::Utf8), "stdin");
        assert_eq!(
            virtual_name(b"return 1\nreturn 2", TextEncoding::Utf8),
            "return 1"
        );
        assert_eq!(virtual_name(b"", TextEncoding::Utf8), "<chunk>");
        let long = "x".repeat(60);
        let name = virtual_name(long.as_bytes(), TextEncoding::Utf8);
        assert_eq!(name.len(), 51);
        assert!(name.ends_with("..."));
    }
}

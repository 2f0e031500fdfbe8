//! Debug adapter module map.
//! - core: Debugger construction, request routing, message helpers
//! - dispatch: main/hook handler tables
//! - hook: interpreter entry points and the stopped-thread service loop
//! - handlers: DAP request handlers by area
//! - outbox: ordered outbound queue, sequence stamping
//! - server: stdio/TCP connection loops
//! - protocol_io: message framing + logging
//! - launch: launch/attach argument helpers
//! - tests: adapter unit tests

mod core;
mod dispatch;
mod handlers;
mod hook;
mod launch;
mod outbox;
mod protocol_io;
mod server;


use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::breakpoints::BreakpointStore;
use crate::config::ConfigStore;
use crate::control::{ExecutionControl, StepKind};
use crate::output::{OutputPipeline, StreamRedirect};
use crate::path::PathReconciler;
use crate::protocol::Request;
use crate::registry::{RuntimeThread, ThreadRegistry};
use crate::runtime::{FrameInfo, HookContext};
use crate::sources::SourceStore;

use self::dispatch::DispatchTable;
use self::outbox::Outbox;

pub use self::hook::ExceptionKind;
pub use self::outbox::Connection;
pub use self::server::{listen, run, run_stdio};

#[derive(Debug, Clone, Copy)]
struct CoordinateConverter {
    line_offset: u32,
    column_offset: u32,
}

impl CoordinateConverter {
    /// Runtime lines and columns are 1-based.
    fn new(lines_start_at1: bool, columns_start_at1: bool) -> Self {
        Self {
            line_offset: u32::from(!lines_start_at1),
            column_offset: u32::from(!columns_start_at1),
        }
    }

    fn to_client_line(self, line: u32) -> u32 {
        line.saturating_sub(self.line_offset)
    }

    fn to_client_column(self, column: u32) -> u32 {
        column.saturating_sub(self.column_offset)
    }

    fn to_runtime_line(self, line: u32) -> u32 {
        line.saturating_add(self.line_offset)
    }
}

impl Default for CoordinateConverter {
    fn default() -> Self {
        Self::new(true, true)
    }
}

/// Session progress toward leaving `Initializing`.
#[derive(Debug, Default)]
struct SessionState {
    coordinate: CoordinateConverter,
    initialized: bool,
    configured: bool,
    launched: bool,
    stop_on_entry: bool,
    capture_print: bool,
    client_filters: bool,
    /// The connection itself writes to stdout.
    stdout_reserved: bool,
}

/// Command delivered to the thread parked in a hook.
#[derive(Debug)]
enum HookCommand {
    Request(Request<Value>),
    /// Wake the parked thread so it notices termination.
    Release,
}

/// How a stopped thread continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    Continue,
    Step(StepKind),
}

/// Outcome of one handler call.
#[derive(Debug, Default)]
struct DispatchOutcome {
    responses: Vec<Value>,
    events: Vec<Value>,
    should_exit: bool,
    resume: Option<Resume>,
}

/// State available to hook-table handlers on the stopped thread.
struct StopScope<'a> {
    thread: Arc<RuntimeThread>,
    ctx: &'a mut dyn HookContext,
    frames: Option<Vec<FrameInfo>>,
}

impl StopScope<'_> {
    fn frames(&mut self) -> &[FrameInfo] {
        if self.frames.is_none() {
            self.frames = Some(self.ctx.stack_frames());
        }
        self.frames.as_deref().unwrap_or_default()
    }
}

/// How `Debugger::handle` disposed of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Answered on the calling thread.
    Handled,
    /// Forwarded to the stopped thread, which answers it.
    Deferred,
    /// Answered; the connection should close.
    Exit,
}

/// Execution-control core shared by the connection and interpreter threads.
pub struct Debugger {
    this: Weak<Debugger>,
    outbox: Outbox,
    control: ExecutionControl,
    threads: ThreadRegistry,
    breakpoints: RwLock<Box<dyn BreakpointStore>>,
    sources: RwLock<Box<dyn SourceStore>>,
    config: Mutex<ConfigStore>,
    paths: RwLock<Arc<PathReconciler>>,
    output: OutputPipeline,
    redirects: Mutex<Vec<Box<dyn StreamRedirect>>>,
    exception_filters: RwLock<Vec<String>>,
    session: Mutex<SessionState>,
    hook_tx: Sender<HookCommand>,
    hook_rx: Receiver<HookCommand>,
    table: DispatchTable,
}

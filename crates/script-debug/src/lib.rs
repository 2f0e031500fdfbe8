//! Debug Adapter Protocol (DAP) execution-control core for embedded
//! scripting runtimes.
//!
//! The host interpreter drives [`Debugger::hook`] from its debug hook; a
//! connection loop ([`run`], [`run_stdio`], [`listen`]) serves the client.

mod adapter;
mod breakpoints;
mod config;
mod control;
mod encoding;
mod error;
mod logging;
mod output;
mod path;
mod protocol;
mod registry;
mod runtime;
mod sources;

pub use adapter::{listen, run, run_stdio, Connection, Debugger, Dispatch, ExceptionKind};
pub use breakpoints::{
    parse_hit_condition, parse_log_message, BreakpointStore, BreakpointTable, HitCondition,
    LineBreakpoint, LogFragment,
};
pub use config::{ConfigLevel, ConfigStore, DebugConfig, OutputCapture, FILTER_CAUGHT, FILTER_ERROR};
pub use control::{ExecutionControl, ExecutionState, LineGate, QuickState, StepKind, StopReason};
pub use encoding::TextEncoding;
pub use error::{ConfigError, HookError};
pub use logging::init_tracing;
pub use output::{
    open_redirect, OutputAttribution, OutputCategory, OutputChunk, OutputPipeline, RedirectStream,
    StreamRedirect, StyledRun, VtColor, VtParser, VtTextState,
};
pub use path::{normalize_path, path_key, PathReconciler};
pub use protocol::{
    Breakpoint, Capabilities, Event, MessageType, OutputEventBody, Request, Response, Source,
    SourceBreakpoint, StoppedEventBody,
};
pub use registry::{ExceptionRecord, RuntimeThread, ThreadPhase, ThreadRegistry};
pub use runtime::{
    EvaluateResult, FrameInfo, HookContext, HookEvent, NativeHandle, ScopeInfo, VariableInfo,
};
pub use sources::{reference_key, ResolvedSource, SourceCache, SourceOrigin, SourceStore};

//! Handler tables.
//! - Handler: main (any time) or hook (stopped thread only)
//! - DispatchTable: command name to handler, built once per Debugger

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::protocol::Request;

use super::{Debugger, DispatchOutcome, StopScope};

pub(super) type MainHandler = fn(&Debugger, &Request<Value>) -> DispatchOutcome;
pub(super) type HookHandler = fn(&Debugger, &mut StopScope<'_>, &Request<Value>) -> DispatchOutcome;

#[derive(Clone, Copy)]
pub(super) enum Handler {
    /// Runs on the connection thread in any state.
    Main(MainHandler),
    /// Runs on the stopped interpreter thread.
    Hook(HookHandler),
}

pub(super) struct DispatchTable {
    handlers: FxHashMap<&'static str, Handler>,
}

impl DispatchTable {
    pub(super) fn new() -> Self {
        let main: [(&'static str, MainHandler); 9] = [
            ("initialize", Debugger::handle_initialize),
            ("launch", Debugger::handle_launch),
            ("attach", Debugger::handle_attach),
            ("setBreakpoints", Debugger::handle_set_breakpoints),
            ("setExceptionBreakpoints", Debugger::handle_set_exception_breakpoints),
            ("configurationDone", Debugger::handle_configuration_done),
            ("pause", Debugger::handle_pause),
            ("terminate", Debugger::handle_terminate),
            ("disconnect", Debugger::handle_disconnect),
        ];
        let hook: [(&'static str, HookHandler); 13] = [
            ("threads", Debugger::handle_threads),
            ("stackTrace", Debugger::handle_stack_trace),
            ("source", Debugger::handle_source),
            ("scopes", Debugger::handle_scopes),
            ("variables", Debugger::handle_variables),
            ("setVariable", Debugger::handle_set_variable),
            ("evaluate", Debugger::handle_evaluate),
            ("exceptionInfo", Debugger::handle_exception_info),
            ("loadedSources", Debugger::handle_loaded_sources),
            ("continue", Debugger::handle_continue),
            ("next", Debugger::handle_next),
            ("stepIn", Debugger::handle_step_in),
            ("stepOut", Debugger::handle_step_out),
        ];
        let mut handlers = FxHashMap::default();
        handlers.extend(main.map(|(command, handler)| (command, Handler::Main(handler))));
        handlers.extend(hook.map(|(command, handler)| (command, Handler::Hook(handler))));
        Self { handlers }
    }

    pub(super) fn get(&self, command: &str) -> Option<Handler> {
        self.handlers.get(command).copied()
    }
}

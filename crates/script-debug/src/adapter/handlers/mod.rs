//! Request handlers grouped by DAP area.
//! - initialize: initialize/launch/attach/configurationDone
//! - breakpoints: setBreakpoints/setExceptionBreakpoints
//! - lifecycle: disconnect/terminate
//! - run_control: pause/continue/step
//! - threads: thread list + exception details
//! - stack_trace: stackTrace request
//! - scopes: scopes/variables/setVariable/evaluate
//! - sources: source/loadedSources

mod breakpoints;
mod initialize;
mod lifecycle;
mod run_control;
mod scopes;
mod sources;
mod stack_trace;
mod threads;

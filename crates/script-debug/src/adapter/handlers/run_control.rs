//! Pause/continue/step handlers.
//! - handle_pause: ask the next executed line to stop
//! - handle_continue: resume the stopped thread
//! - handle_next/step_in/step_out: arm a step target and resume

use serde_json::Value;
use tracing::debug;

use crate::control::StepKind;
use crate::protocol::{
    ContinueArguments, ContinueResponseBody, NextArguments, PauseArguments, Request,
    StepInArguments, StepOutArguments,
};

use super::super::{Debugger, DispatchOutcome, Resume, StopScope};

impl Debugger {
    pub(in crate::adapter) fn handle_pause(&self, request: &Request<Value>) -> DispatchOutcome {
        let Some(args) = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<PauseArguments>(value).ok())
        else {
            return self.fail(request, "invalid pause args");
        };
        // Already stopped counts as paused.
        let requested = self.control.request_pause();
        debug!(thread = args.thread_id, requested, "pause");
        DispatchOutcome {
            responses: vec![self.ok_response::<Value>(request, None)],
            ..DispatchOutcome::default()
        }
    }

    pub(in crate::adapter) fn handle_continue(
        &self,
        scope: &mut StopScope<'_>,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let Some(args) = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<ContinueArguments>(value).ok())
        else {
            return self.fail(request, "invalid continue args");
        };
        if args.thread_id != scope.thread.id() && self.threads.find(args.thread_id).is_none() {
            return self.fail(request, &format!("unknown thread {}", args.thread_id));
        }
        DispatchOutcome {
            responses: vec![self.ok_response(
                request,
                Some(ContinueResponseBody {
                    all_threads_continued: Some(true),
                }),
            )],
            resume: Some(Resume::Continue),
            ..DispatchOutcome::default()
        }
    }

    pub(in crate::adapter) fn handle_next(
        &self,
        scope: &mut StopScope<'_>,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let Some(args) = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<NextArguments>(value).ok())
        else {
            return self.fail(request, "invalid next args");
        };
        self.step(scope, request, args.thread_id, StepKind::Over)
    }

    pub(in crate::adapter) fn handle_step_in(
        &self,
        scope: &mut StopScope<'_>,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let Some(args) = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<StepInArguments>(value).ok())
        else {
            return self.fail(request, "invalid stepIn args");
        };
        self.step(scope, request, args.thread_id, StepKind::Into)
    }

    pub(in crate::adapter) fn handle_step_out(
        &self,
        scope: &mut StopScope<'_>,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let Some(args) = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<StepOutArguments>(value).ok())
        else {
            return self.fail(request, "invalid stepOut args");
        };
        self.step(scope, request, args.thread_id, StepKind::Out)
    }

    fn step(
        &self,
        scope: &StopScope<'_>,
        request: &Request<Value>,
        thread_id: u32,
        kind: StepKind,
    ) -> DispatchOutcome {
        if thread_id != scope.thread.id() {
            let message = if self.threads.find(thread_id).is_some() {
                format!("thread {thread_id} is not stopped")
            } else {
                format!("unknown thread {thread_id}")
            };
            return self.fail(request, &message);
        }
        DispatchOutcome {
            responses: vec![self.ok_response::<Value>(request, None)],
            resume: Some(Resume::Step(kind)),
            ..DispatchOutcome::default()
        }
    }
}

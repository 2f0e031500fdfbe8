//! Thread handlers.
//! - handle_threads: every attached thread
//! - handle_exception_info: details of the exception a thread stopped on

use serde_json::Value;

use crate::config::FILTER_ERROR;
use crate::protocol::{
    ExceptionDetails, ExceptionInfoArguments, ExceptionInfoResponseBody, Request, Thread,
    ThreadsResponseBody,
};

use super::super::{Debugger, DispatchOutcome, StopScope};

impl Debugger {
    pub(in crate::adapter) fn handle_threads(
        &self,
        _scope: &mut StopScope<'_>,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let threads = self
            .threads
            .threads()
            .into_iter()
            .map(|thread| Thread {
                id: thread.id(),
                name: thread.name(),
            })
            .collect();
        DispatchOutcome {
            responses: vec![self.ok_response(request, Some(ThreadsResponseBody { threads }))],
            ..DispatchOutcome::default()
        }
    }

    pub(in crate::adapter) fn handle_exception_info(
        &self,
        scope: &mut StopScope<'_>,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let Some(args) = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<ExceptionInfoArguments>(value).ok())
        else {
            return self.fail(request, "invalid exceptionInfo args");
        };
        let Some(thread) = self.threads.find(args.thread_id) else {
            return self.fail(request, &format!("unknown thread {}", args.thread_id));
        };
        let Some(record) = thread.exception() else {
            return self.fail(
                request,
                &format!("thread {} is not stopped on an exception", args.thread_id),
            );
        };

        let coordinate = self.coordinate();
        let stack_trace = (thread.id() == scope.thread.id()).then(|| {
            scope
                .frames()
                .iter()
                .map(|frame| {
                    format!("{} (line {})", frame.name, coordinate.to_client_line(frame.line))
                })
                .collect::<Vec<_>>()
                .join("\n")
        });
        let break_mode = if record.fatal || record.kind == FILTER_ERROR {
            "unhandled"
        } else {
            "always"
        };
        let body = ExceptionInfoResponseBody {
            exception_id: record.kind,
            description: Some(record.message.clone()),
            break_mode: break_mode.to_string(),
            details: Some(ExceptionDetails {
                message: Some(record.message),
                stack_trace,
            }),
        };
        DispatchOutcome {
            responses: vec![self.ok_response(request, Some(body))],
            ..DispatchOutcome::default()
        }
    }
}

//! Session lifecycle handlers.
//! - handle_terminate: end the session, keep the connection
//! - handle_disconnect: end the session and close the connection

use serde_json::Value;
use tracing::info;

use crate::protocol::{DisconnectArguments, Request, TerminateArguments};

use super::super::{Debugger, DispatchOutcome};

impl Debugger {
    pub(in crate::adapter) fn handle_terminate(&self, request: &Request<Value>) -> DispatchOutcome {
        let args = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<TerminateArguments>(value).ok())
            .unwrap_or_default();
        if args.restart.unwrap_or(false) {
            info!("restart requested; terminating instead");
        }
        self.end_session(request, false)
    }

    pub(in crate::adapter) fn handle_disconnect(
        &self,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let args = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<DisconnectArguments>(value).ok())
            .unwrap_or_default();
        info!(
            terminate_debuggee = args.terminate_debuggee.unwrap_or(true),
            "disconnect"
        );
        self.end_session(request, true)
    }

    fn end_session(&self, request: &Request<Value>, should_exit: bool) -> DispatchOutcome {
        let first = self.teardown();
        let events = if first {
            vec![self.terminated_event()]
        } else {
            Vec::new()
        };
        DispatchOutcome {
            responses: vec![self.ok_response::<Value>(request, None)],
            events,
            should_exit,
            resume: None,
        }
    }
}

//! Breakpoint handlers.
//! - handle_set_breakpoints: replace one source's line breakpoints
//! - handle_set_exception_breakpoints: arm exception filters

use serde_json::Value;
use tracing::{debug, info};

use crate::config::validate_exception_filters;
use crate::path::path_key;
use crate::protocol::{
    Request, SetBreakpointsArguments, SetBreakpointsResponseBody,
    SetExceptionBreakpointsArguments, Source, SourceBreakpoint,
};
use crate::sources::reference_key;

use super::super::{Debugger, DispatchOutcome};

/// Table key for a client source: its path, or its reference when virtual.
fn breakpoint_key(source: &Source) -> Option<String> {
    match (&source.path, source.source_reference) {
        (_, Some(reference)) if reference > 0 => Some(reference_key(reference)),
        (Some(path), _) if !path.trim().is_empty() => Some(path_key(path)),
        _ => None,
    }
}

impl Debugger {
    pub(in crate::adapter) fn handle_set_breakpoints(
        &self,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let Some(args) = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<SetBreakpointsArguments>(value).ok())
        else {
            return self.fail(request, "invalid setBreakpoints args");
        };
        let Some(key) = breakpoint_key(&args.source) else {
            return self.fail(request, "source has neither a path nor a sourceReference");
        };

        let coordinate = self.coordinate();
        let requested = match (args.breakpoints, args.lines) {
            (Some(breakpoints), _) => breakpoints,
            (None, Some(lines)) => lines.into_iter().map(SourceBreakpoint::at_line).collect(),
            (None, None) => Vec::new(),
        };
        let requested = requested
            .into_iter()
            .map(|mut breakpoint| {
                breakpoint.line = coordinate.to_runtime_line(breakpoint.line);
                breakpoint
            })
            .collect::<Vec<_>>();

        let mut breakpoints = self
            .breakpoints
            .write()
            .replace(&key, &args.source, &requested);
        for breakpoint in &mut breakpoints {
            breakpoint.line = breakpoint.line.map(|line| coordinate.to_client_line(line));
        }
        info!(
            key = %key,
            requested = requested.len(),
            verified = breakpoints.iter().filter(|breakpoint| breakpoint.verified).count(),
            "breakpoints set"
        );

        DispatchOutcome {
            responses: vec![
                self.ok_response(request, Some(SetBreakpointsResponseBody { breakpoints })),
            ],
            ..DispatchOutcome::default()
        }
    }

    pub(in crate::adapter) fn handle_set_exception_breakpoints(
        &self,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let Some(args) = request
            .arguments
            .clone()
            .and_then(|value| {
                serde_json::from_value::<SetExceptionBreakpointsArguments>(value).ok()
            })
        else {
            return self.fail(request, "invalid setExceptionBreakpoints args");
        };
        if let Err(err) = validate_exception_filters(&args.filters) {
            return self.fail(request, &err.to_string());
        }

        debug!(filters = ?args.filters, "exception filters set");
        *self.exception_filters.write() = args.filters;
        self.session.lock().client_filters = true;

        DispatchOutcome {
            responses: vec![self.ok_response::<Value>(request, None)],
            ..DispatchOutcome::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::breakpoint_key;
    use crate::protocol::Source;

    #[test]
    fn keys_prefer_references_for_virtual_sources() {
        let file = Source {
            name: Some("a.lua".into()),
            path: Some("C:\\Proj\\a.lua".into()),
            source_reference: None,
        };
        assert_eq!(breakpoint_key(&file).as_deref(), Some("c:/proj/a.lua"));

        let virtual_source = Source {
            name: Some("chunk".into()),
            path: None,
            source_reference: Some(3),
        };
        assert_eq!(breakpoint_key(&virtual_source).as_deref(), Some("ref:3"));

        assert_eq!(breakpoint_key(&Source::default()), None);
    }
}

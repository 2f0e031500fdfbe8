//! Source handlers.
//! - handle_source: text of a virtual source
//! - handle_loaded_sources: every source seen so far

use serde_json::Value;

use crate::protocol::{LoadedSourcesResponseBody, Request, SourceArguments, SourceResponseBody};

use super::super::{Debugger, DispatchOutcome, StopScope};

impl Debugger {
    pub(in crate::adapter) fn handle_source(
        &self,
        _scope: &mut StopScope<'_>,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let Some(args) = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<SourceArguments>(value).ok())
        else {
            return self.fail(request, "invalid source args");
        };
        let reference = args
            .source
            .as_ref()
            .and_then(|source| source.source_reference)
            .unwrap_or(args.source_reference);
        let Some(content) = self.sources.read().content(reference) else {
            return self.fail(request, &format!("unknown source reference {reference}"));
        };
        let body = SourceResponseBody {
            content,
            mime_type: None,
        };
        DispatchOutcome {
            responses: vec![self.ok_response(request, Some(body))],
            ..DispatchOutcome::default()
        }
    }

    pub(in crate::adapter) fn handle_loaded_sources(
        &self,
        _scope: &mut StopScope<'_>,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let sources = self.sources.read().loaded();
        DispatchOutcome {
            responses: vec![
                self.ok_response(request, Some(LoadedSourcesResponseBody { sources })),
            ],
            ..DispatchOutcome::default()
        }
    }
}

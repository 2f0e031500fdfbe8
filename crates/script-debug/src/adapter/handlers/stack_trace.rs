//! Stack trace handler.
//! - handle_stack_trace: frames of the stopped thread, paged

use serde_json::Value;

use crate::protocol::{Request, StackFrame, StackTraceArguments, StackTraceResponseBody};

use super::super::{Debugger, DispatchOutcome, StopScope};

impl Debugger {
    pub(in crate::adapter) fn handle_stack_trace(
        &self,
        scope: &mut StopScope<'_>,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let Some(args) = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<StackTraceArguments>(value).ok())
        else {
            return self.fail(request, "invalid stackTrace args");
        };

        if args.thread_id != scope.thread.id() {
            // Threads blocked behind the stopper have no inspectable stack.
            if self.threads.find(args.thread_id).is_none() {
                return self.fail(request, &format!("unknown thread {}", args.thread_id));
            }
            let body = StackTraceResponseBody {
                stack_frames: Vec::new(),
                total_frames: Some(0),
            };
            return DispatchOutcome {
                responses: vec![self.ok_response(request, Some(body))],
                ..DispatchOutcome::default()
            };
        }

        let coordinate = self.coordinate();
        let frames = scope.frames().to_vec();
        let total = frames.len();
        let start = args.start_frame.unwrap_or(0) as usize;
        let levels = args
            .levels
            .filter(|levels| *levels > 0)
            .map_or(total, |levels| levels as usize);

        let mut stack_frames = Vec::with_capacity(levels.min(total));
        for (index, frame) in frames.iter().enumerate().skip(start).take(levels) {
            let resolved = frame
                .chunk
                .as_deref()
                .map(|chunk| self.resolve(chunk, &*scope.ctx));
            let presentation_hint = match &resolved {
                Some(resolved) if resolved.skipped => Some("subtle".to_string()),
                Some(_) => None,
                None => Some("label".to_string()),
            };
            stack_frames.push(StackFrame {
                id: u32::try_from(index).unwrap_or(u32::MAX),
                name: frame.name.clone(),
                source: resolved.map(|resolved| resolved.source.clone()),
                line: coordinate.to_client_line(frame.line),
                column: coordinate.to_client_column(frame.column),
                presentation_hint,
            });
        }

        let body = StackTraceResponseBody {
            stack_frames,
            total_frames: Some(u32::try_from(total).unwrap_or(u32::MAX)),
        };
        DispatchOutcome {
            responses: vec![self.ok_response(request, Some(body))],
            ..DispatchOutcome::default()
        }
    }
}

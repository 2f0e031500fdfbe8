//! Initialize/launch/configuration handlers.
//! - handle_initialize: client coordinates + capabilities
//! - handle_launch/handle_attach: launch-level configuration, redirects
//! - handle_configuration_done: the barrier before execution starts

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ConfigLevel, DebugConfig, OutputCapture, FILTER_CAUGHT, FILTER_ERROR};
use crate::output::{open_redirect, OutputCategory, RedirectStream};
use crate::protocol::{
    AttachArguments, Capabilities, ExceptionBreakpointsFilter, InitializeArguments,
    InitializeResponseBody, LaunchArguments, Request,
};

use super::super::launch::launch_config;
use super::super::{CoordinateConverter, Debugger, DispatchOutcome};

const REDIRECTS: [(OutputCapture, RedirectStream, OutputCategory); 2] = [
    (OutputCapture::Stdout, RedirectStream::Stdout, OutputCategory::Stdout),
    (OutputCapture::Stderr, RedirectStream::Stderr, OutputCategory::Stderr),
];

impl Debugger {
    pub(in crate::adapter) fn handle_initialize(
        &self,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let args = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<InitializeArguments>(value).ok())
            .unwrap_or_default();

        {
            let mut session = self.session.lock();
            if session.initialized {
                return self.fail(request, "initialize was already received");
            }
            session.initialized = true;
            session.coordinate = CoordinateConverter::new(
                args.lines_start_at1.unwrap_or(true),
                args.columns_start_at1.unwrap_or(true),
            );
        }
        info!(
            client = args.client_id.as_deref().unwrap_or("<unknown>"),
            "initialize"
        );

        let capabilities = Capabilities {
            supports_configuration_done_request: Some(true),
            supports_conditional_breakpoints: Some(true),
            supports_hit_conditional_breakpoints: Some(true),
            supports_log_points: Some(true),
            supports_evaluate_for_hovers: Some(true),
            supports_set_variable: Some(true),
            supports_exception_info_request: Some(true),
            supports_loaded_sources_request: Some(true),
            supports_delayed_stack_trace_loading: Some(true),
            supports_terminate_request: Some(true),
            exception_breakpoint_filters: Some(vec![
                ExceptionBreakpointsFilter {
                    filter: FILTER_ERROR.to_string(),
                    label: "Uncaught Exceptions".to_string(),
                    default: Some(true),
                },
                ExceptionBreakpointsFilter {
                    filter: FILTER_CAUGHT.to_string(),
                    label: "Caught Exceptions".to_string(),
                    default: Some(false),
                },
            ]),
        };

        DispatchOutcome {
            responses: vec![
                self.ok_response(request, Some(InitializeResponseBody { capabilities })),
            ],
            events: vec![self.event("initialized", Option::<Value>::None)],
            ..DispatchOutcome::default()
        }
    }

    pub(in crate::adapter) fn handle_launch(&self, request: &Request<Value>) -> DispatchOutcome {
        let args = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<LaunchArguments>(value).ok())
            .unwrap_or_default();
        self.start_session(request, &args.additional, "launch")
    }

    pub(in crate::adapter) fn handle_attach(&self, request: &Request<Value>) -> DispatchOutcome {
        let args = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<AttachArguments>(value).ok())
            .unwrap_or_default();
        self.start_session(request, &args.additional, "attach")
    }

    fn start_session(
        &self,
        request: &Request<Value>,
        args: &BTreeMap<String, Value>,
        mode: &str,
    ) -> DispatchOutcome {
        if self.session.lock().launched {
            return self.fail(request, "a launch or attach request was already received");
        }
        let config = match self.apply_config(ConfigLevel::Launch, launch_config(args)) {
            Ok(config) => config,
            Err(err) => return self.fail(request, &format!("{mode} failed: {err}")),
        };
        self.open_redirects(&config);
        {
            let mut session = self.session.lock();
            session.launched = true;
            session.stop_on_entry = config.stop_on_entry;
            session.capture_print = config.captures(OutputCapture::Print);
        }
        info!(mode, stop_on_entry = config.stop_on_entry, "session started");
        DispatchOutcome {
            responses: vec![self.ok_response::<Value>(request, None)],
            ..DispatchOutcome::default()
        }
    }

    fn open_redirects(&self, config: &DebugConfig) {
        let stdout_reserved = self.session.lock().stdout_reserved;
        let mut redirects = self.redirects.lock();
        for (capture, stream, category) in REDIRECTS {
            if !config.captures(capture) || redirects.iter().any(|open| open.stream() == stream) {
                continue;
            }
            if stream == RedirectStream::Stdout && stdout_reserved {
                warn!("stdout carries the protocol; not redirecting it");
                continue;
            }
            let this = self.this.clone();
            let opened = open_redirect(stream, move |bytes| {
                if let Some(debugger) = this.upgrade() {
                    debugger.capture(category, bytes, None);
                }
            });
            match opened {
                Ok(Some(redirect)) => {
                    info!(stream = stream.as_str(), "native stream redirected");
                    redirects.push(redirect);
                }
                Ok(None) => debug!(
                    stream = stream.as_str(),
                    "native redirection unavailable on this platform"
                ),
                Err(err) => warn!(stream = stream.as_str(), "failed to redirect: {err}"),
            }
        }
    }

    pub(in crate::adapter) fn handle_configuration_done(
        &self,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        {
            let mut session = self.session.lock();
            if session.configured {
                return self.fail(request, "configurationDone was already received");
            }
            session.configured = true;
        }
        debug!("configuration done");
        DispatchOutcome {
            responses: vec![self.ok_response::<Value>(request, None)],
            ..DispatchOutcome::default()
        }
    }
}

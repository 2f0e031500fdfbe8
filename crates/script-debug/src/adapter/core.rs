//! Adapter core.
//! - Debugger::new/with_stores: build the shared core and its connection
//! - handle: route a request to the main table or the stopped thread
//! - shutdown: idempotent teardown, releases parked threads
//! - apply_config/update_config/load_defaults: configuration levels
//! - ok_response/error_response/event: message builders

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::breakpoints::{BreakpointStore, BreakpointTable};
use crate::config::{ConfigLevel, ConfigStore, DebugConfig};
use crate::control::{ExecutionControl, ExecutionState};
use crate::error::ConfigError;
use crate::output::{OutputChunk, OutputPipeline};
use crate::path::PathReconciler;
use crate::protocol::{
    Event, LoadedSourceEventBody, MessageType, OutputEventBody, Request, Response,
    TerminatedEventBody,
};
use crate::registry::{RuntimeThread, ThreadRegistry};
use crate::sources::{SourceCache, SourceOrigin, SourceStore};

use super::dispatch::{DispatchTable, Handler};
use super::outbox::{self, Connection};
use super::{CoordinateConverter, Debugger, Dispatch, DispatchOutcome, HookCommand, SessionState};

impl Debugger {
    /// Core with the default breakpoint and source stores.
    #[must_use]
    pub fn new() -> (Arc<Self>, Connection) {
        Self::with_stores(Box::new(BreakpointTable::new()), Box::new(SourceCache::new()))
    }

    #[must_use]
    pub fn with_stores(
        breakpoints: Box<dyn BreakpointStore>,
        sources: Box<dyn SourceStore>,
    ) -> (Arc<Self>, Connection) {
        let (outbox, connection) = outbox::channel();
        let (hook_tx, hook_rx) = crossbeam_channel::unbounded();
        let config = ConfigStore::new();
        let debugger = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            outbox,
            control: ExecutionControl::new(),
            threads: ThreadRegistry::new(),
            breakpoints: RwLock::new(breakpoints),
            sources: RwLock::new(sources),
            paths: RwLock::new(config.paths()),
            exception_filters: RwLock::new(config.effective().exception_filters.clone()),
            config: Mutex::new(config),
            output: OutputPipeline::new(),
            redirects: Mutex::new(Vec::new()),
            session: Mutex::new(SessionState::default()),
            hook_tx,
            hook_rx,
            table: DispatchTable::new(),
        });
        (debugger, connection)
    }

    #[must_use]
    pub fn state(&self) -> ExecutionState {
        self.control.state()
    }

    /// Threads currently attached, in id order.
    #[must_use]
    pub fn threads(&self) -> Vec<Arc<RuntimeThread>> {
        self.threads.threads()
    }

    #[must_use]
    pub fn config(&self) -> DebugConfig {
        self.config.lock().effective().clone()
    }

    /// Load the defaults configuration level from a TOML file.
    pub fn load_defaults(&self, path: &Path) -> Result<(), ConfigError> {
        self.reconfigure(ConfigLevel::Defaults, |store| store.load_defaults(path))
            .map(|_| ())
    }

    /// Merge a runtime configuration update; rejected updates change nothing.
    pub fn update_config(&self, update: Value) -> Result<(), ConfigError> {
        self.apply_config(ConfigLevel::Runtime, update).map(|_| ())
    }

    pub(super) fn apply_config(
        &self,
        level: ConfigLevel,
        update: Value,
    ) -> Result<DebugConfig, ConfigError> {
        self.reconfigure(level, |store| store.apply(level, update))
    }

    fn reconfigure<F>(&self, level: ConfigLevel, change: F) -> Result<DebugConfig, ConfigError>
    where
        F: FnOnce(&mut ConfigStore) -> Result<&DebugConfig, ConfigError>,
    {
        let mut store = self.config.lock();
        let config = match change(&mut store) {
            Ok(config) => config.clone(),
            Err(err) => {
                warn!(?level, "configuration rejected: {err}");
                return Err(err);
            }
        };
        let paths = store.paths();
        *self.paths.write() = Arc::clone(&paths);
        let moved = self
            .sources
            .write()
            .remap(&|chunk| SourceOrigin::file(&paths, chunk));
        if !self.session.lock().client_filters {
            self.exception_filters
                .write()
                .clone_from(&config.exception_filters);
        }
        drop(store);
        info!(?level, moved = moved.len(), "configuration applied");
        for resolved in moved {
            self.outbox.send(self.event(
                "loadedSource",
                Some(LoadedSourceEventBody {
                    reason: "changed".to_string(),
                    source: resolved.source.clone(),
                }),
            ));
        }
        Ok(config)
    }

    /// Route one request.
    ///
    /// Main-table requests are answered here; hook-table requests are
    /// forwarded to the stopped thread or rejected when nothing is stopped.
    pub fn handle(&self, request: Request<Value>) -> Dispatch {
        if request.message_type != MessageType::Request {
            return Dispatch::Handled;
        }
        debug!(seq = request.seq, command = %request.command, "dispatch");
        let Some(handler) = self.table.get(&request.command) else {
            let message = format!("unknown command '{}'", request.command);
            self.outbox.send(self.error_response(&request, &message));
            return Dispatch::Handled;
        };
        if self.control.is_terminated()
            && !matches!(request.command.as_str(), "disconnect" | "terminate")
        {
            self.outbox
                .send(self.error_response(&request, "debug session has terminated"));
            return Dispatch::Handled;
        }

        match handler {
            Handler::Main(handler) => {
                let outcome = handler(self, &request);
                let exit = outcome.should_exit;
                self.send_outcome(outcome);
                self.release_if_ready();
                if exit {
                    Dispatch::Exit
                } else {
                    Dispatch::Handled
                }
            }
            Handler::Hook(_) => {
                let mut pending = Some(request);
                let forwarded = self.control.forward_if_stopped(None, || {
                    if let Some(request) = pending.take() {
                        let _ = self.hook_tx.send(HookCommand::Request(request));
                    }
                });
                if forwarded {
                    return Dispatch::Deferred;
                }
                if let Some(request) = pending {
                    let message = format!("'{}' is only valid while stopped", request.command);
                    self.outbox.send(self.error_response(&request, &message));
                }
                Dispatch::Handled
            }
        }
    }

    /// Terminate the session: release parked threads, detach every thread,
    /// close redirects. Only the first call has any effect on the client.
    pub fn shutdown(&self) -> bool {
        let first = self.teardown();
        if first {
            self.outbox.send(self.terminated_event());
        }
        first
    }

    /// Shutdown without the `terminated` event; `true` the first time.
    pub(super) fn teardown(&self) -> bool {
        let first = self.control.terminate(|stopper| {
            self.reject_pending("debug session has terminated");
            if stopper.is_some() {
                let _ = self.hook_tx.send(HookCommand::Release);
            }
        });
        let detached = self.threads.detach_all();
        self.close_redirects();
        self.flush_output();
        self.output.reset();
        if first {
            info!(threads = detached.len(), "debug session terminated");
        }
        first
    }

    pub(super) fn terminated_event(&self) -> Value {
        self.event("terminated", Some(TerminatedEventBody { restart: None }))
    }

    /// Leave `Initializing` once both `configurationDone` and a launch or
    /// attach request have been answered.
    fn release_if_ready(&self) {
        let (ready, stop_on_entry) = {
            let session = self.session.lock();
            (session.configured && session.launched, session.stop_on_entry)
        };
        if ready && self.control.configuration_done(stop_on_entry) {
            info!(stop_on_entry, "execution released");
        }
    }

    pub(super) fn reject_pending(&self, message: &str) {
        while let Ok(command) = self.hook_rx.try_recv() {
            if let HookCommand::Request(request) = command {
                self.outbox.send(self.error_response(&request, message));
            }
        }
    }

    fn close_redirects(&self) {
        let redirects = std::mem::take(&mut *self.redirects.lock());
        for redirect in redirects {
            debug!(stream = redirect.stream().as_str(), "closing redirect");
            redirect.close();
        }
    }

    pub(super) fn send_outcome(&self, outcome: DispatchOutcome) {
        self.outbox.send_all(outcome.responses);
        self.outbox.send_all(outcome.events);
    }

    pub(super) fn coordinate(&self) -> CoordinateConverter {
        self.session.lock().coordinate
    }

    pub(super) fn paths(&self) -> Arc<PathReconciler> {
        self.paths.read().clone()
    }

    pub(super) fn flush_output(&self) {
        let coordinate = self.coordinate();
        let coding = self.paths().console_coding();
        self.output.flush(coding, |chunk| {
            self.outbox.send(self.output_event(chunk, coordinate));
        });
    }

    pub(super) fn output_event(&self, chunk: OutputChunk, coordinate: CoordinateConverter) -> Value {
        let (source, line) = match chunk.attribution {
            Some(attribution) => (
                Some(attribution.source),
                Some(coordinate.to_client_line(attribution.line)),
            ),
            None => (None, None),
        };
        let body = OutputEventBody {
            output: chunk.run.text,
            category: Some(chunk.category.as_str().to_string()),
            source,
            line,
            column: None,
            data: chunk.run.style.to_json(),
        };
        self.event("output", Some(body))
    }

    pub(super) fn console_output(&self, message: impl Into<String>) -> Value {
        let mut output = message.into();
        if !output.ends_with('\n') {
            output.push('\n');
        }
        let body = OutputEventBody {
            output,
            category: Some("console".to_string()),
            source: None,
            line: None,
            column: None,
            data: None,
        };
        self.event("output", Some(body))
    }

    pub(super) fn ok_response<T>(&self, request: &Request<Value>, body: Option<T>) -> Value
    where
        T: Serialize,
    {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .unwrap_or(None);
        let response = Response {
            seq: 0,
            message_type: MessageType::Response,
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body,
        };
        serde_json::to_value(response).unwrap_or(Value::Null)
    }

    pub(super) fn error_response(&self, request: &Request<Value>, message: &str) -> Value {
        let response: Response<Value> = Response {
            seq: 0,
            message_type: MessageType::Response,
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(message.to_string()),
            body: None,
        };
        serde_json::to_value(response).unwrap_or(Value::Null)
    }

    pub(super) fn event<T>(&self, name: &str, body: Option<T>) -> Value
    where
        T: Serialize,
    {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .unwrap_or(None);
        let event = Event {
            seq: 0,
            message_type: MessageType::Event,
            event: name.to_string(),
            body,
        };
        serde_json::to_value(event).unwrap_or(Value::Null)
    }

    pub(super) fn fail(&self, request: &Request<Value>, message: &str) -> DispatchOutcome {
        DispatchOutcome {
            responses: vec![self.error_response(request, message)],
            ..DispatchOutcome::default()
        }
    }
}

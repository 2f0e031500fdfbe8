//! Connection loops.
//! - run: serve one client over a reader/writer pair
//! - run_stdio: serve one client over stdin/stdout
//! - listen: serve one client accepted on a TCP address
//!
//! Only the loop thread writes to the transport; a reader thread decodes
//! inbound frames and everything outbound arrives through the `Connection`.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{select, Receiver, Sender};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::protocol::Request;

use super::protocol_io::{
    open_protocol_log, read_message, write_message, write_protocol_log, ProtocolLog,
};
use super::{Connection, Debugger, Dispatch};

/// Mirror every request to the client console when set.
const VERBOSE_ENV: &str = "SCRIPT_DEBUG_DAP_VERBOSE";

#[derive(Debug)]
enum Inbound {
    Message(String),
    Closed,
    Failed(io::Error),
}

fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(raw) => {
            let value = raw.trim().to_ascii_lowercase();
            matches!(value.as_str(), "1" | "true" | "yes" | "on")
        }
        Err(_) => false,
    }
}

/// Serve a client on stdin/stdout until it disconnects.
///
/// Native stdout redirection is refused for this session since stdout
/// carries the protocol.
pub fn run_stdio(debugger: &Arc<Debugger>, connection: Connection) -> io::Result<()> {
    debugger.session.lock().stdout_reserved = true;
    run(
        debugger,
        connection,
        BufReader::new(io::stdin()),
        io::stdout(),
    )
}

/// Accept a single client on `addr` and serve it until it disconnects.
pub fn listen(
    debugger: &Arc<Debugger>,
    connection: Connection,
    addr: impl ToSocketAddrs,
) -> io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    info!(addr = %listener.local_addr()?, "waiting for debug client");
    let (stream, peer) = listener.accept()?;
    info!(%peer, "debug client connected");
    let reader = BufReader::new(stream.try_clone()?);
    let writer = stream.try_clone()?;
    let result = run(debugger, connection, reader, writer);
    // Unblocks the reader thread.
    let _ = stream.shutdown(Shutdown::Both);
    result
}

/// Serve one client.
///
/// Returns when the client disconnects. Losing the transport terminates the
/// session so no interpreter thread stays parked in a hook.
pub fn run<R, W>(
    debugger: &Arc<Debugger>,
    mut connection: Connection,
    reader: R,
    mut writer: W,
) -> io::Result<()>
where
    R: BufRead + Send + 'static,
    W: Write,
{
    let log = open_protocol_log();
    let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
    let reader_log = log.clone();
    thread::Builder::new()
        .name("dap-reader".to_string())
        .spawn(move || read_loop(reader, &inbound_tx, reader_log.as_ref()))?;

    info!("debug session connected");
    let result = serve(
        debugger,
        &mut connection,
        &inbound_rx,
        &mut writer,
        log.as_ref(),
    );
    if let Err(err) = &result {
        error!("transport failed: {err}");
    }
    result
}

fn read_loop<R: BufRead>(mut reader: R, inbound: &Sender<Inbound>, log: Option<&ProtocolLog>) {
    loop {
        let message = match read_message(&mut reader) {
            Ok(Some(payload)) => {
                if let Some(log) = log {
                    let _ = write_protocol_log(log, "<-", &payload);
                }
                Inbound::Message(payload)
            }
            Ok(None) => Inbound::Closed,
            Err(err) => Inbound::Failed(err),
        };
        let last = !matches!(message, Inbound::Message(_));
        if inbound.send(message).is_err() || last {
            break;
        }
    }
}

/// What the loop does after one select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
    Closed,
}

fn serve<W: Write>(
    debugger: &Debugger,
    connection: &mut Connection,
    inbound: &Receiver<Inbound>,
    writer: &mut W,
    log: Option<&ProtocolLog>,
) -> io::Result<()> {
    let verbose = env_flag(VERBOSE_ENV);
    let outbound = connection.receiver().clone();
    loop {
        let flow = select! {
            recv(inbound) -> message => receive(debugger, message.ok(), verbose),
            recv(outbound) -> message => match message {
                Ok(message) => deliver(connection, writer, log, message).map(|()| Flow::Continue),
                Err(_) => Ok(Flow::Continue),
            },
        };
        match flow {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit) => {
                while let Ok(message) = outbound.try_recv() {
                    deliver(connection, writer, log, message)?;
                }
                info!("client disconnected");
                return Ok(());
            }
            Ok(Flow::Closed) => {
                warn!("connection closed without disconnect; terminating session");
                debugger.shutdown();
                return Ok(());
            }
            Err(err) => {
                debugger.shutdown();
                return Err(err);
            }
        }
    }
}

fn receive(debugger: &Debugger, message: Option<Inbound>, verbose: bool) -> io::Result<Flow> {
    let payload = match message {
        Some(Inbound::Message(payload)) => payload,
        Some(Inbound::Closed) | None => return Ok(Flow::Closed),
        Some(Inbound::Failed(err)) => return Err(err),
    };
    let request = match serde_json::from_str::<Request<Value>>(&payload) {
        Ok(request) => request,
        Err(err) => {
            warn!("ignoring malformed message: {err}");
            return Ok(Flow::Continue);
        }
    };
    if verbose {
        debugger.outbox.send(debugger.console_output(format!(
            "[script-debug] request {} seq={}",
            request.command, request.seq
        )));
    }
    match debugger.handle(request) {
        Dispatch::Exit => Ok(Flow::Exit),
        Dispatch::Handled | Dispatch::Deferred => Ok(Flow::Continue),
    }
}

fn deliver<W: Write>(
    connection: &mut Connection,
    writer: &mut W,
    log: Option<&ProtocolLog>,
    message: Value,
) -> io::Result<()> {
    let message = connection.stamp(message);
    let payload = serde_json::to_string(&message).map_err(io::Error::other)?;
    if let Some(log) = log {
        let _ = write_protocol_log(log, "->", &payload);
    }
    // Logging here would echo back through a redirected stderr.
    write_message(writer, &payload)
}

#[cfg(test)]
mod tests {
    use std::io::{self, Write};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::deliver;
    use crate::adapter::outbox;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn delivery_writes_nothing_to_the_log() {
        let captured = Captured::default();
        let subscriber = {
            let captured = captured.clone();
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::TRACE)
                .with_writer(move || captured.clone())
                .finish()
        };
        let (_outbox, mut connection) = outbox::channel();
        let mut wire = Vec::new();
        tracing::subscriber::with_default(subscriber, || {
            tracing::trace!("before delivery");
            let logged = captured.0.lock().len();
            deliver(&mut connection, &mut wire, None, json!({"type": "event", "event": "output"}))
                .expect("deliver");
            assert_eq!(captured.0.lock().len(), logged);
        });
        let wire = String::from_utf8(wire).expect("utf-8");
        assert!(wire.starts_with("Content-Length: "));
        assert!(wire.contains(r#""seq":1"#));
    }
}

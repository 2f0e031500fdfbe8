//! Native stdout/stderr redirection.
//! - StreamRedirect: handle for an open redirection
//! - open_redirect: route a process stream through a pipe pump
//! - spawn_pump: forward pipe reads to a callback

use std::io::{self, Read};
use std::thread::{self, JoinHandle};

use tracing::warn;

const PUMP_CHUNK: usize = 4096;

/// Process stream that can be redirected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedirectStream {
    Stdout,
    Stderr,
}

impl RedirectStream {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// An open redirection; closing restores the original stream.
pub trait StreamRedirect: Send {
    fn stream(&self) -> RedirectStream;

    /// Restore the stream and wait for buffered bytes to be delivered.
    fn close(self: Box<Self>);
}

/// Read `reader` until EOF, handing each chunk to `on_data`.
pub fn spawn_pump<R, F>(reader: R, mut on_data: F) -> JoinHandle<()>
where
    R: Read + Send + 'static,
    F: FnMut(&[u8]) + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = reader;
        let mut buffer = [0u8; PUMP_CHUNK];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => on_data(&buffer[..read]),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!("redirect pump stopped: {err}");
                    break;
                }
            }
        }
    })
}

/// Redirect a native stream of this process into `on_data`.
///
/// Returns `Ok(None)` where native redirection is unavailable; print-style
/// capture keeps working there.
pub fn open_redirect<F>(
    stream: RedirectStream,
    on_data: F,
) -> io::Result<Option<Box<dyn StreamRedirect>>>
where
    F: FnMut(&[u8]) + Send + 'static,
{
    imp::open(stream, on_data)
}

#[cfg(unix)]
mod imp {
    use std::io::{self, Write};
    use std::os::unix::io::{AsRawFd, RawFd};
    use std::thread::JoinHandle;

    use nix::unistd::{close, dup, dup2};
    use tracing::{debug, warn};

    use super::{spawn_pump, RedirectStream, StreamRedirect};

    struct NativeRedirect {
        stream: RedirectStream,
        target: RawFd,
        saved: RawFd,
        pump: Option<JoinHandle<()>>,
    }

    fn target_fd(stream: RedirectStream) -> RawFd {
        match stream {
            RedirectStream::Stdout => io::stdout().as_raw_fd(),
            RedirectStream::Stderr => io::stderr().as_raw_fd(),
        }
    }

    fn flush_stream(stream: RedirectStream) {
        let _ = match stream {
            RedirectStream::Stdout => io::stdout().flush(),
            RedirectStream::Stderr => io::stderr().flush(),
        };
    }

    pub(super) fn open<F>(
        stream: RedirectStream,
        on_data: F,
    ) -> io::Result<Option<Box<dyn StreamRedirect>>>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let (reader, writer) = os_pipe::pipe()?;
        let target = target_fd(stream);
        flush_stream(stream);
        let saved = dup(target)?;
        if let Err(err) = dup2(writer.as_raw_fd(), target) {
            let _ = close(saved);
            return Err(err.into());
        }
        // The target descriptor now holds the write end.
        drop(writer);
        let pump = spawn_pump(reader, on_data);
        debug!("redirected {}", stream.as_str());
        Ok(Some(Box::new(NativeRedirect {
            stream,
            target,
            saved,
            pump: Some(pump),
        })))
    }

    impl StreamRedirect for NativeRedirect {
        fn stream(&self) -> RedirectStream {
            self.stream
        }

        fn close(mut self: Box<Self>) {
            flush_stream(self.stream);
            if let Err(err) = dup2(self.saved, self.target) {
                warn!("failed to restore {}: {err}", self.stream.as_str());
            }
            let _ = close(self.saved);
            if let Some(pump) = self.pump.take() {
                let _ = pump.join();
            }
            debug!("restored {}", self.stream.as_str());
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::io;

    use super::{RedirectStream, StreamRedirect};

    pub(super) fn open<F>(
        _stream: RedirectStream,
        _on_data: F,
    ) -> io::Result<Option<Box<dyn StreamRedirect>>>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        Ok(None)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::Write;

    use super::spawn_pump;

    #[test]
    fn pump_forwards_until_writer_closes() {
        let (reader, mut writer) = os_pipe::pipe().expect("pipe");
        let (tx, rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        let pump = spawn_pump(reader, move |bytes| {
            let _ = tx.send(bytes.to_vec());
        });
        writer.write_all(b"hello ").expect("write");
        writer.write_all(b"\x1b[32mworld\n").expect("write");
        drop(writer);
        pump.join().expect("pump thread");
        let collected = rx.iter().flatten().collect::<Vec<u8>>();
        assert_eq!(collected, b"hello \x1b[32mworld\n");
    }
}

//! DAP protocol framing IO.
//! - read_message: parse Content-Length payload
//! - write_message: emit payload
//! - open_protocol_log/write_protocol_log: optional transcript logging

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufWriter, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

const CONTENT_LENGTH: &str = "Content-Length";

/// Environment variable naming the transcript file.
pub(super) const PROTOCOL_LOG_ENV: &str = "SCRIPT_DEBUG_DAP_LOG";

pub(super) type ProtocolLog = Arc<Mutex<BufWriter<File>>>;

pub(super) fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut content_length = None;
    let mut line = String::new();

    loop {
        line.clear();
        let bytes = reader.read_line(&mut line)?;
        if bytes == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                if let Ok(length) = value.trim().parse::<usize>() {
                    content_length = Some(length);
                }
            }
        }
    }

    let length = content_length.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length header")
    })?;

    let mut buffer = vec![0u8; length];
    reader.read_exact(&mut buffer)?;
    let payload = String::from_utf8(buffer)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid utf-8 payload"))?;
    Ok(Some(payload))
}

pub(super) fn write_message<W: Write>(writer: &mut W, payload: &str) -> io::Result<()> {
    let length = payload.len();
    write!(writer, "Content-Length: {length}\r\n\r\n")?;
    writer.write_all(payload.as_bytes())?;
    writer.flush()
}

/// Open the transcript named by `SCRIPT_DEBUG_DAP_LOG`, if any.
pub(super) fn open_protocol_log() -> Option<ProtocolLog> {
    let path = std::env::var(PROTOCOL_LOG_ENV).ok()?;
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => {
            info!(path = %path, "writing protocol transcript");
            Some(Arc::new(Mutex::new(BufWriter::new(file))))
        }
        Err(err) => {
            warn!(path = %path, "cannot open protocol transcript: {err}");
            None
        }
    }
}

pub(super) fn write_protocol_log(
    logger: &ProtocolLog,
    direction: &str,
    payload: &str,
) -> io::Result<()> {
    let mut logger = logger.lock();
    writeln!(logger, "{direction} {payload}")?;
    logger.flush()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{read_message, write_message};

    #[test]
    fn framed_messages_read_back_in_order() {
        let mut wire = Vec::new();
        write_message(&mut wire, r#"{"seq":1}"#).expect("write");
        write_message(&mut wire, r#"{"seq":2,"text":"é"}"#).expect("write");

        let mut reader = Cursor::new(wire);
        assert_eq!(
            read_message(&mut reader).expect("read").as_deref(),
            Some(r#"{"seq":1}"#)
        );
        assert_eq!(
            read_message(&mut reader).expect("read").as_deref(),
            Some(r#"{"seq":2,"text":"é"}"#)
        );
        assert_eq!(read_message(&mut reader).expect("eof"), None);
    }

    #[test]
    fn missing_length_is_invalid_data() {
        let mut reader = Cursor::new(b"X-Other: 1\r\n\r\n{}".to_vec());
        let err = read_message(&mut reader).expect_err("no length");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}

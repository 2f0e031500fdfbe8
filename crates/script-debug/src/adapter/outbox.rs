//! Outbound message queue.
//! - Outbox: cloneable sender used from any thread
//! - Connection: single consumer; stamps `seq` in delivery order

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub(super) struct Outbox {
    tx: Sender<Value>,
}

impl Outbox {
    pub(super) fn send(&self, message: Value) {
        // The receiver only goes away when the connection is gone.
        let _ = self.tx.send(message);
    }

    pub(super) fn send_all(&self, messages: impl IntoIterator<Item = Value>) {
        for message in messages {
            self.send(message);
        }
    }
}

/// Receiving end of the adapter's outbound messages.
///
/// Messages are queued without a sequence number; `seq` is assigned here so
/// numbering always follows delivery order.
#[derive(Debug)]
pub struct Connection {
    rx: Receiver<Value>,
    next_seq: u32,
}

pub(super) fn channel() -> (Outbox, Connection) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (Outbox { tx }, Connection { rx, next_seq: 1 })
}

impl Connection {
    pub(super) fn receiver(&self) -> &Receiver<Value> {
        &self.rx
    }

    pub(super) fn stamp(&mut self, mut message: Value) -> Value {
        if let Value::Object(fields) = &mut message {
            fields.insert("seq".to_string(), json!(self.next_seq));
            self.next_seq = self.next_seq.wrapping_add(1);
        }
        message
    }

    /// Next message, waiting at most `timeout`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Value> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(self.stamp(message)),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Next message if one is queued.
    pub fn try_recv(&mut self) -> Option<Value> {
        match self.rx.try_recv() {
            Ok(message) => Some(self.stamp(message)),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Every queued message.
    pub fn drain(&mut self) -> Vec<Value> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

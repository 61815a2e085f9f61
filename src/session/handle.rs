//! Transport boundary shared between a session and whoever delivers to it.
//!
//! A [`SessionHandle`] is the writable half of one client connection. The
//! connection's writer task owns the matching receiver; everything else
//! (the session itself, its target, VPN peers in other sessions) only pushes
//! frames. Closing the handle drops the sender, which ends the writer task
//! and closes the socket.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// One transport message, tagged text or binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Writable, closable handle to one client connection.
#[derive(Debug)]
pub struct SessionHandle {
    id: u64,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

impl SessionHandle {
    /// Create a handle plus the receiver the connection's writer drains.
    pub fn new(id: u64) -> (Arc<Self>, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(Self {
            id,
            outbound: Mutex::new(Some(tx)),
        });
        (handle, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a frame. Returns `false` when the connection is already closed.
    pub fn send(&self, frame: Frame) -> bool {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into()))
    }

    pub fn send_binary(&self, data: Vec<u8>) -> bool {
        self.send(Frame::Binary(data))
    }

    /// Close the connection. Idempotent; returns `true` only for the call
    /// that actually closed it.
    pub fn close(&self) -> bool {
        self.outbound.lock().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }
}

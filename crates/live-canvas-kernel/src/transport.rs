//! Duplex channel transport contract.
//!
//! A transport turns an endpoint into a pair of channels: frames written to
//! `outbound` go to the service, and everything the service (or the socket)
//! reports arrives on `inbound`. Dropping `outbound` closes the connection.
//!
//! Every outbound frame carries a [`FrameAck`]. The transport resolves it once
//! the frame has been written to the wire; a frame dropped unacknowledged
//! (still buffered when the link died) reads as not transmitted.

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use crate::error::ConnectError;

/// Events surfaced by an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete inbound frame.
    Frame(Vec<u8>),
    /// The remote end closed the connection.
    Closed,
    /// The connection failed; no further frames will arrive.
    Error(String),
}

/// Transmission receipt for one outbound frame.
#[derive(Debug)]
pub struct FrameAck(oneshot::Sender<Result<(), String>>);

impl FrameAck {
    /// The frame reached the wire.
    pub fn transmitted(self) {
        let _ = self.0.send(Ok(()));
    }

    /// The frame could not be written.
    pub fn failed(self, reason: impl Into<String>) {
        let _ = self.0.send(Err(reason.into()));
    }
}

/// Outcome of a frame as reported by the transport.
pub type AckReceiver = oneshot::Receiver<Result<(), String>>;

/// One frame handed to the transport.
#[derive(Debug)]
pub struct OutboundFrame {
    pub bytes: Vec<u8>,
    pub ack: FrameAck,
}

impl OutboundFrame {
    /// Wrap `bytes` and return the receiver its acknowledgement lands on.
    pub fn new(bytes: Vec<u8>) -> (Self, AckReceiver) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                bytes,
                ack: FrameAck(tx),
            },
            rx,
        )
    }
}

/// An open duplex connection.
#[derive(Debug)]
pub struct Duplex {
    pub outbound: mpsc::Sender<OutboundFrame>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

impl Duplex {
    /// Build a duplex connection and hand back the remote halves.
    ///
    /// Transports that bridge a socket keep the remote halves in their pump
    /// task; tests use them to play the service.
    pub fn pair(capacity: usize) -> (Self, RemoteEnd) {
        let (outbound, frames) = mpsc::channel(capacity);
        let (events, inbound) = mpsc::channel(capacity);
        (Self { outbound, inbound }, RemoteEnd { frames, events })
    }
}

/// The service side of a [`Duplex`].
#[derive(Debug)]
pub struct RemoteEnd {
    /// Frames the client transmitted, each awaiting acknowledgement.
    pub frames: mpsc::Receiver<OutboundFrame>,
    /// Events delivered to the client.
    pub events: mpsc::Sender<TransportEvent>,
}

/// Establishes duplex connections.
pub trait Transport: Send + Sync {
    fn connect(&self, endpoint: &str) -> BoxFuture<'static, Result<Duplex, ConnectError>>;
}

use anyhow::Result;
use tokio::sync::mpsc;

use super::messages::{LiveSetup, RealtimeInput, ServerMessage};
use crate::error::SessionError;

/// Inbound channel events (open acknowledgment, messages, close, error)
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The remote side acknowledged the setup; media may flow
    Open,
    /// A message from the model
    Message(ServerMessage),
    /// The remote side closed the channel
    Closed,
    /// Channel-level failure
    Error(String),
}

/// Fire-and-forget sender for realtime input
///
/// Wraps the queue feeding the transport's writer task. Sending never waits:
/// a full or closed queue drops the input and reports `SendFailed`.
#[derive(Debug, Clone)]
pub struct OutboundLink {
    tx: mpsc::Sender<RealtimeInput>,
}

impl OutboundLink {
    pub fn new(tx: mpsc::Sender<RealtimeInput>) -> Self {
        Self { tx }
    }

    /// Create a link and the receiver a writer task drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RealtimeInput>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn send_realtime_input(&self, input: RealtimeInput) -> Result<(), SessionError> {
        self.tx
            .try_send(input)
            .map_err(|e| SessionError::SendFailed(e.to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Close hook of an open connection
#[async_trait::async_trait]
pub trait ConnectionControl: Send {
    async fn close(&mut self) -> Result<()>;
}

/// An opened duplex connection
pub struct LiveConnection {
    pub outbound: OutboundLink,
    pub inbound: mpsc::Receiver<ChannelEvent>,
    pub control: Box<dyn ConnectionControl>,
}

/// Duplex channel to the live model
///
/// `open` returns as soon as the connection exists; the setup acknowledgment
/// arrives later as `ChannelEvent::Open` on the inbound receiver.
#[async_trait::async_trait]
pub trait LiveTransport: Send + Sync {
    async fn open(&self, session_id: &str, api_key: &str, setup: &LiveSetup)
        -> Result<LiveConnection>;

    /// Transport name for logging
    fn name(&self) -> &str;
}

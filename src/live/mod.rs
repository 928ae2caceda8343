//! Live model channel: wire types, transport seam and the NATS gateway transport

pub mod instruction;
pub mod messages;
pub mod nats;
pub mod transport;

pub use instruction::system_instruction;
pub use messages::{Blob, LiveSetup, RealtimeInput, ServerContent, ServerMessage};
pub use nats::NatsTransport;
pub use transport::{ChannelEvent, ConnectionControl, LiveConnection, LiveTransport, OutboundLink};

//! Transport session: one reconnecting connection to the control server
//!
//! Frames are newline-delimited JSON envelopes (`{"type", "payload", "timestamp"}`).
//! Subscribers register per [`Topic`]; lifecycle topics are raised by the session,
//! message topics by inbound frames.

pub mod bus;
pub mod client;
pub mod envelope;
pub mod error;
pub mod protocol;
pub mod reconnect;
pub mod transport;

pub use bus::{EventBus, SubscriptionId, Topic};
pub use client::{
    CommandSink, ConnectionState, Credentials, Session, SessionOptions, SessionStatus,
};
pub use envelope::Envelope;
pub use error::{ProtocolError, TransportError};
pub use protocol::{Command, ServerEvent};
pub use reconnect::ReconnectPolicy;
pub use transport::{Connector, Duplex, Endpoint, Origin, TcpConnector};

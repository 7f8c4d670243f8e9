pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod loopback;
pub mod negotiation;
pub mod state;
pub mod types;

pub use connection::{PeerTransport, RtcTransportFactory, TransportFactory};
pub use data_channel::{ChannelEvent, ControlChannel, ControlLink};
pub use negotiation::{NegotiationEngine, NegotiationTimeouts};
pub use state::NegotiationState;
pub use types::{Candidate, PairingRecord, Role, SessionDescription, SessionPackage};

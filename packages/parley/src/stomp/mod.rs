//! STOMP 1.2 over WebSocket: frame codec and the transport adapter.

pub mod frame;
pub mod transport;

pub use transport::StompTransport;

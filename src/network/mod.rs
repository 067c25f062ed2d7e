// Peer-to-peer transport: wire protocol, client handles, server endpoint

pub mod protocol;
pub mod server;

mod connection;
mod peer;

pub use peer::PeerHandle;
pub use server::ServerEndpoint;

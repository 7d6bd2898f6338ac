//! Local IPC channel
//!
//! Framing, serializers and named endpoints shared by the supervisor and discovery.

pub mod codec;
mod connection;
mod server;
mod transport;

pub use codec::{Message, ProtocolError};
pub use connection::{Connection, IpcError};
pub use server::{IpcServer, ServerStream};
pub use transport::{connect, ChannelName, ClientStream};

// SKDP (Symmetric Key Distribution Protocol)
// Hierarchical pre-shared key distribution with authenticated ephemeral sessions

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! SKDP distributes symmetric keys along a three-level hierarchy: a root
//! master key derives per-server keys, and each server key derives
//! per-device keys. A device holding its derived key can mutually
//! authenticate to the server that derived it, establish a fresh ephemeral
//! session with forward secrecy, and exchange authenticated-encrypted
//! records over a stream transport.
//!
//! The crate is organized around the protocol core:
//!
//! - [`keys`] — the master/server/device key hierarchy and its persisted
//!   encoding
//! - [`packet`] — the wire packet and header codec
//! - [`protocol`] — the client and server key-exchange state machines and
//!   the record layer
//! - [`keepalive`] — the liveness probe sub-protocol
//! - [`transport`] — TCP plumbing that drives the state machines
//! - [`keystore`] — key files and first-run provisioning

pub mod config;
pub mod crypto;
pub mod error;
pub mod keepalive;
pub mod keys;
pub mod keystore;
pub mod packet;
pub mod protocol;
pub mod time;
pub mod transport;

// Re-export commonly used types
pub use config::ProtocolConfig;
pub use error::{SkdpError, SkdpResult};
pub use keys::{DeviceKey, MasterKey, ServerKey};
pub use packet::{NetworkPacket, PacketFlag};
pub use protocol::{client::ClientSession, server::ServerSession};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol name.
pub const PROTOCOL_NAME: &str = "SKDP";

/// The key identity size in bytes: master(4) || server(4) || device(8).
pub const KID_SIZE: usize = 16;

/// The master key identity size in bytes.
pub const MID_SIZE: usize = 4;

/// The server key identity size in bytes.
pub const SID_SIZE: usize = 4;

/// The device key identity size in bytes.
pub const DID_SIZE: usize = 8;

/// The protocol configuration string size in bytes.
pub const CONFIG_SIZE: usize = 26;

/// The packet header size in bytes.
pub const HEADER_SIZE: usize = 21;

/// The size of the expiration field in bytes.
pub const EXP_SIZE: usize = 8;

/// The size of a transmitted error code in bytes.
pub const ERROR_SIZE: usize = 1;

/// The application message size used during a session, in bytes.
pub const MESSAGE_SIZE: usize = 1024;

/// The maximum packet payload size in bytes.
pub const MESSAGE_MAX: usize = MESSAGE_SIZE + HEADER_SIZE;

/// The sequence number reserved for terminate and error packets.
pub const SEQUENCE_TERMINATOR: u64 = 0xFFFF_FFFF;

/// The number of days a key-set remains valid.
pub const KEY_DURATION_DAYS: u64 = 365;

/// The number of seconds a key-set remains valid.
pub const KEY_DURATION_SECONDS: u64 = KEY_DURATION_DAYS * 24 * 60 * 60;

/// The maximum clock skew tolerated on a packet, in seconds.
pub const PACKET_TIME_THRESHOLD: u64 = 60;

/// The default server port number.
pub const SERVER_PORT: u16 = 2201;

/// The keep-alive timeout in milliseconds (5 minutes).
pub const KEEPALIVE_TIMEOUT: u64 = 300 * 1000;

/// The size of the keep-alive epoch-time payload in bytes.
pub const KEEPALIVE_MESSAGE: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_fixed_sizes() {
        assert_eq!(KID_SIZE, MID_SIZE + SID_SIZE + DID_SIZE);
        assert_eq!(MESSAGE_MAX, 1045);
        assert_eq!(HEADER_SIZE, 21);
    }
}

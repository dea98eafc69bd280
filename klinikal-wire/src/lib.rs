//! WireGuard tunnel device.
//!
//! One UDP socket, a peer table with allowed-IP routing, and per-peer
//! handshake plus transport-key state. The device consumes and produces raw
//! IPv4 frames; the netstack hands outbound frames to [`Device::transmit`]
//! and inbound decrypted frames are pushed through the ingress callback.

mod config;
mod crypto;
mod device;
mod handshake;
mod peer;

pub use config::{decode_key_base64, key_from_hex, key_to_hex, DeviceConfig, PeerConfig};
pub use crypto::{dh, generate_private_key, hash, public_key, KeyPair};
pub use device::Device;
pub use handshake::{
    Handshake, HandshakeInitiation, HandshakeResponse, HandshakeState, TransportKeys,
    MSG_TYPE_COOKIE_REPLY, MSG_TYPE_HANDSHAKE_INIT, MSG_TYPE_HANDSHAKE_RESP, MSG_TYPE_TRANSPORT,
};
pub use peer::Peer;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("handshake error: {0}")]
    Handshake(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("peer not found")]
    PeerNotFound,
    #[error("session not established")]
    NoSession,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("invalid packet")]
    InvalidPacket,
}

pub type Result<T> = std::result::Result<T, WireError>;

//! Device and peer configuration plus the key codecs used at the
//! configuration boundary (base64 in the file, hex toward the device).

use std::net::SocketAddr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ipnet::IpNet;

use crate::{Result, WireError};

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub private_key: [u8; 32],
    pub listen_port: Option<u16>,
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub public_key: [u8; 32],
    pub endpoint: Option<SocketAddr>,
    /// Empty means route everything to this peer.
    pub allowed_ips: Vec<IpNet>,
    pub persistent_keepalive: Option<u16>,
}

/// Decode a base64 curve key; it must be exactly 32 bytes.
pub fn decode_key_base64(s: &str) -> Result<[u8; 32]> {
    let decoded = BASE64
        .decode(s.trim())
        .map_err(|e| WireError::InvalidConfig(format!("bad base64 key: {e}")))?;
    if decoded.len() != 32 {
        return Err(WireError::InvalidConfig(format!(
            "key should be 32 bytes, got {}",
            decoded.len()
        )));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&decoded);
    Ok(key)
}

/// The hex rendering the device-control plane speaks.
pub fn key_to_hex(key: &[u8; 32]) -> String {
    hex::encode(key)
}

pub fn key_from_hex(s: &str) -> Result<[u8; 32]> {
    let decoded =
        hex::decode(s.trim()).map_err(|e| WireError::InvalidConfig(format!("bad hex key: {e}")))?;
    if decoded.len() != 32 {
        return Err(WireError::InvalidConfig(format!(
            "key should be 32 bytes, got {}",
            decoded.len()
        )));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&decoded);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_key_roundtrips_through_hex() {
        let raw = [0x42u8; 32];
        let b64 = BASE64.encode(raw);
        let key = decode_key_base64(&b64).unwrap();
        assert_eq!(key, raw);
        assert_eq!(key_from_hex(&key_to_hex(&key)).unwrap(), raw);
    }

    #[test]
    fn short_key_is_rejected() {
        let b64 = BASE64.encode([1u8; 16]);
        assert!(decode_key_base64(&b64).is_err());
        assert!(decode_key_base64("!!!not base64!!!").is_err());
    }
}

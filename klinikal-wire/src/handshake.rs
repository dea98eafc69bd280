//! Handshake state machine and message framing.
//!
//! Framing follows the WireGuard message types (1 = initiation,
//! 2 = response, 4 = transport). The key schedule derives per-direction
//! transport keys from the ephemeral-ephemeral and static-ephemeral DH
//! results; cookie MACs are carried but not enforced.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::crypto;
use crate::{Result, WireError};

pub const MSG_TYPE_HANDSHAKE_INIT: u8 = 1;
pub const MSG_TYPE_HANDSHAKE_RESP: u8 = 2;
pub const MSG_TYPE_COOKIE_REPLY: u8 = 3;
pub const MSG_TYPE_TRANSPORT: u8 = 4;

pub const INITIATION_LEN: usize = 4 + 4 + 32 + 32 + 8 + 16 + 16;
pub const RESPONSE_LEN: usize = 4 + 4 + 4 + 32 + 16 + 16 + 16;
pub const TRANSPORT_HEADER_LEN: usize = 4 + 4 + 8;

const CONSTRUCTION: &[u8] = b"klinikal wg bridge v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    None,
    InitiationSent,
    ResponseSent,
    Completed,
}

/// Per-direction transport keys.
#[derive(Debug, Clone)]
pub struct TransportKeys {
    pub sending: [u8; 32],
    pub receiving: [u8; 32],
}

#[derive(Debug, Clone)]
pub struct HandshakeInitiation {
    pub sender_index: u32,
    pub ephemeral_public_key: [u8; 32],
    pub static_public_key: [u8; 32],
    pub timestamp: u64,
    pub mac1: [u8; 16],
    pub mac2: [u8; 16],
}

impl HandshakeInitiation {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(INITIATION_LEN);
        out.extend_from_slice(&[MSG_TYPE_HANDSHAKE_INIT, 0, 0, 0]);
        out.extend_from_slice(&self.sender_index.to_le_bytes());
        out.extend_from_slice(&self.ephemeral_public_key);
        out.extend_from_slice(&self.static_public_key);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.mac1);
        out.extend_from_slice(&self.mac2);
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < INITIATION_LEN || data[0] != MSG_TYPE_HANDSHAKE_INIT {
            return Err(WireError::InvalidPacket);
        }
        Ok(Self {
            sender_index: u32::from_le_bytes(data[4..8].try_into().unwrap()),
            ephemeral_public_key: data[8..40].try_into().unwrap(),
            static_public_key: data[40..72].try_into().unwrap(),
            timestamp: u64::from_le_bytes(data[72..80].try_into().unwrap()),
            mac1: data[80..96].try_into().unwrap(),
            mac2: data[96..112].try_into().unwrap(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub sender_index: u32,
    pub receiver_index: u32,
    pub ephemeral_public_key: [u8; 32],
    pub empty: [u8; 16],
    pub mac1: [u8; 16],
    pub mac2: [u8; 16],
}

impl HandshakeResponse {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RESPONSE_LEN);
        out.extend_from_slice(&[MSG_TYPE_HANDSHAKE_RESP, 0, 0, 0]);
        out.extend_from_slice(&self.sender_index.to_le_bytes());
        out.extend_from_slice(&self.receiver_index.to_le_bytes());
        out.extend_from_slice(&self.ephemeral_public_key);
        out.extend_from_slice(&self.empty);
        out.extend_from_slice(&self.mac1);
        out.extend_from_slice(&self.mac2);
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RESPONSE_LEN || data[0] != MSG_TYPE_HANDSHAKE_RESP {
            return Err(WireError::InvalidPacket);
        }
        Ok(Self {
            sender_index: u32::from_le_bytes(data[4..8].try_into().unwrap()),
            receiver_index: u32::from_le_bytes(data[8..12].try_into().unwrap()),
            ephemeral_public_key: data[12..44].try_into().unwrap(),
            empty: data[44..60].try_into().unwrap(),
            mac1: data[60..76].try_into().unwrap(),
            mac2: data[76..92].try_into().unwrap(),
        })
    }
}

/// Frame an encrypted transport payload (type 4).
pub fn encode_transport(receiver_index: u32, counter: u64, ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(TRANSPORT_HEADER_LEN + ciphertext.len());
    out.extend_from_slice(&[MSG_TYPE_TRANSPORT, 0, 0, 0]);
    out.extend_from_slice(&receiver_index.to_le_bytes());
    out.extend_from_slice(&counter.to_le_bytes());
    out.extend_from_slice(ciphertext);
    out
}

/// Split a type-4 message into (receiver_index, counter, ciphertext).
pub fn parse_transport(data: &[u8]) -> Result<(u32, u64, &[u8])> {
    if data.len() < TRANSPORT_HEADER_LEN || data[0] != MSG_TYPE_TRANSPORT {
        return Err(WireError::InvalidPacket);
    }
    let receiver = u32::from_le_bytes(data[4..8].try_into().unwrap());
    let counter = u64::from_le_bytes(data[8..16].try_into().unwrap());
    Ok((receiver, counter, &data[TRANSPORT_HEADER_LEN..]))
}

/// Handshake state for one peer.
pub struct Handshake {
    state: HandshakeState,
    local_private_key: [u8; 32],
    local_public_key: [u8; 32],
    remote_public_key: Option<[u8; 32]>,
    local_index: u32,
    remote_index: Option<u32>,
    ephemeral_private: Option<[u8; 32]>,
}

impl Handshake {
    pub fn new(local_private_key: [u8; 32], local_index: u32) -> Self {
        let local_public_key = crypto::public_key(&local_private_key);
        Self {
            state: HandshakeState::None,
            local_private_key,
            local_public_key,
            remote_public_key: None,
            local_index,
            remote_index: None,
            ephemeral_private: None,
        }
    }

    pub fn set_remote_public_key(&mut self, remote_public_key: [u8; 32]) {
        self.remote_public_key = Some(remote_public_key);
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state == HandshakeState::Completed
    }

    pub fn local_index(&self) -> u32 {
        self.local_index
    }

    pub fn remote_index(&self) -> Option<u32> {
        self.remote_index
    }

    fn chaining_key(&self) -> [u8; 32] {
        crypto::hash(CONSTRUCTION)
    }

    /// Build an initiation toward the configured remote.
    pub fn create_initiation(&mut self) -> Result<HandshakeInitiation> {
        if self.remote_public_key.is_none() {
            return Err(WireError::InvalidConfig("no remote public key".into()));
        }
        let ephemeral_private = crypto::generate_private_key();
        let ephemeral_public = crypto::public_key(&ephemeral_private);
        self.ephemeral_private = Some(ephemeral_private);

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        self.state = HandshakeState::InitiationSent;
        Ok(HandshakeInitiation {
            sender_index: self.local_index,
            ephemeral_public_key: ephemeral_public,
            static_public_key: self.local_public_key,
            timestamp: timestamp << 24,
            mac1: [0u8; 16],
            mac2: [0u8; 16],
        })
    }

    /// Responder side: consume an initiation, derive keys, emit a response.
    pub fn process_initiation(
        &mut self,
        initiation: &HandshakeInitiation,
    ) -> Result<(HandshakeResponse, TransportKeys)> {
        if let Some(expected) = self.remote_public_key {
            if expected != initiation.static_public_key {
                return Err(WireError::Handshake("unknown initiator static key".into()));
            }
        } else {
            self.remote_public_key = Some(initiation.static_public_key);
        }
        self.remote_index = Some(initiation.sender_index);

        let ephemeral_private = crypto::generate_private_key();
        let ephemeral_public = crypto::public_key(&ephemeral_private);

        // ee and se mirror the initiator's ee/es computation.
        let dh_ee = crypto::dh(&ephemeral_private, &initiation.ephemeral_public_key);
        let dh_se = crypto::dh(&ephemeral_private, &initiation.static_public_key);
        let mut ikm = Vec::with_capacity(64);
        ikm.extend_from_slice(&dh_ee);
        ikm.extend_from_slice(&dh_se);
        let keys = crypto::kdf(&self.chaining_key(), &ikm, 2);

        self.state = HandshakeState::Completed;
        let response = HandshakeResponse {
            sender_index: self.local_index,
            receiver_index: initiation.sender_index,
            ephemeral_public_key: ephemeral_public,
            empty: [0u8; 16],
            mac1: [0u8; 16],
            mac2: [0u8; 16],
        };
        // The initiator sends under keys[0]; we mirror.
        let transport = TransportKeys {
            sending: keys[1],
            receiving: keys[0],
        };
        Ok((response, transport))
    }

    /// Initiator side: consume the response and derive keys.
    pub fn process_response(&mut self, response: &HandshakeResponse) -> Result<TransportKeys> {
        if self.state != HandshakeState::InitiationSent {
            return Err(WireError::Handshake("response in wrong state".into()));
        }
        if response.receiver_index != self.local_index {
            return Err(WireError::Handshake("response index mismatch".into()));
        }
        let ephemeral_private = self
            .ephemeral_private
            .ok_or_else(|| WireError::Handshake("missing ephemeral key".into()))?;

        let dh_ee = crypto::dh(&ephemeral_private, &response.ephemeral_public_key);
        let dh_es = crypto::dh(&self.local_private_key, &response.ephemeral_public_key);
        let mut ikm = Vec::with_capacity(64);
        ikm.extend_from_slice(&dh_ee);
        ikm.extend_from_slice(&dh_es);
        let keys = crypto::kdf(&self.chaining_key(), &ikm, 2);

        self.remote_index = Some(response.sender_index);
        self.state = HandshakeState::Completed;
        Ok(TransportKeys {
            sending: keys[0],
            receiving: keys[1],
        })
    }

    pub fn reset(&mut self) {
        self.state = HandshakeState::None;
        self.remote_index = None;
        self.ephemeral_private = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn initiation_framing_roundtrip() {
        let mut hs = Handshake::new(KeyPair::generate().private_key, 7);
        hs.set_remote_public_key(KeyPair::generate().public_key);
        let init = hs.create_initiation().unwrap();
        let parsed = HandshakeInitiation::parse(&init.to_bytes()).unwrap();
        assert_eq!(parsed.sender_index, 7);
        assert_eq!(parsed.ephemeral_public_key, init.ephemeral_public_key);
        assert_eq!(parsed.static_public_key, init.static_public_key);
    }

    #[test]
    fn full_handshake_derives_mirrored_keys() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let mut initiator = Handshake::new(alice.private_key, 1);
        initiator.set_remote_public_key(bob.public_key);
        let mut responder = Handshake::new(bob.private_key, 2);
        responder.set_remote_public_key(alice.public_key);

        let init = initiator.create_initiation().unwrap();
        let init = HandshakeInitiation::parse(&init.to_bytes()).unwrap();
        let (resp, responder_keys) = responder.process_initiation(&init).unwrap();
        let resp = HandshakeResponse::parse(&resp.to_bytes()).unwrap();
        let initiator_keys = initiator.process_response(&resp).unwrap();

        assert!(initiator.is_completed());
        assert!(responder.is_completed());
        assert_eq!(initiator_keys.sending, responder_keys.receiving);
        assert_eq!(initiator_keys.receiving, responder_keys.sending);
        assert_eq!(initiator.remote_index(), Some(2));
        assert_eq!(responder.remote_index(), Some(1));
    }

    #[test]
    fn responder_rejects_unknown_static_key() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mallory = KeyPair::generate();

        let mut initiator = Handshake::new(mallory.private_key, 1);
        initiator.set_remote_public_key(bob.public_key);
        let mut responder = Handshake::new(bob.private_key, 2);
        responder.set_remote_public_key(alice.public_key);

        let init = initiator.create_initiation().unwrap();
        assert!(responder.process_initiation(&init).is_err());
    }

    #[test]
    fn transport_framing_roundtrip() {
        let msg = encode_transport(9, 1234, b"sealed");
        let (receiver, counter, ct) = parse_transport(&msg).unwrap();
        assert_eq!(receiver, 9);
        assert_eq!(counter, 1234);
        assert_eq!(ct, b"sealed");
    }
}

//! Per-peer state: endpoint, allowed-IP routing, handshake and the live
//! session with its nonce counters.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::PeerConfig;
use crate::crypto;
use crate::handshake::{self, Handshake, TransportKeys};
use crate::{Result, WireError};

pub struct Session {
    keys: TransportKeys,
    remote_index: u32,
    send_nonce: AtomicU64,
}

impl Session {
    pub fn new(keys: TransportKeys, remote_index: u32) -> Self {
        Self {
            keys,
            remote_index,
            send_nonce: AtomicU64::new(0),
        }
    }
}

pub struct Peer {
    config: PeerConfig,
    endpoint: Mutex<Option<SocketAddr>>,
    handshake: Mutex<Handshake>,
    session: Mutex<Option<Session>>,
    last_sent: Mutex<Option<Instant>>,
}

impl Peer {
    pub fn new(local_private_key: [u8; 32], local_index: u32, config: PeerConfig) -> Self {
        let mut handshake = Handshake::new(local_private_key, local_index);
        handshake.set_remote_public_key(config.public_key);
        Self {
            endpoint: Mutex::new(config.endpoint),
            handshake: Mutex::new(handshake),
            session: Mutex::new(None),
            last_sent: Mutex::new(None),
            config,
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.config.public_key
    }

    pub fn local_index(&self) -> u32 {
        self.handshake.lock().local_index()
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        *self.endpoint.lock()
    }

    pub fn set_endpoint(&self, addr: SocketAddr) {
        *self.endpoint.lock() = Some(addr);
    }

    pub fn persistent_keepalive(&self) -> Option<u16> {
        self.config.persistent_keepalive
    }

    /// Allowed-IPs routing check; an empty list routes everything.
    pub fn allows(&self, ip: IpAddr) -> bool {
        if self.config.allowed_ips.is_empty() {
            return true;
        }
        self.config.allowed_ips.iter().any(|net| net.contains(&ip))
    }

    pub fn has_session(&self) -> bool {
        self.session.lock().is_some()
    }

    pub fn install_session(&self, keys: TransportKeys, remote_index: u32) {
        *self.session.lock() = Some(Session::new(keys, remote_index));
    }

    pub fn clear_session(&self) {
        *self.session.lock() = None;
        self.handshake.lock().reset();
    }

    pub fn handshake(&self) -> &Mutex<Handshake> {
        &self.handshake
    }

    /// Seal a frame (or a keepalive when empty) into a type-4 message.
    pub fn seal_transport(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let session = self.session.lock();
        let session = session.as_ref().ok_or(WireError::NoSession)?;
        let counter = session.send_nonce.fetch_add(1, Ordering::Relaxed);
        let ciphertext = crypto::aead_encrypt(&session.keys.sending, counter, frame)?;
        self.mark_sent();
        Ok(handshake::encode_transport(
            session.remote_index,
            counter,
            &ciphertext,
        ))
    }

    /// Open a type-4 payload addressed to us.
    pub fn open_transport(&self, counter: u64, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let session = self.session.lock();
        let session = session.as_ref().ok_or(WireError::NoSession)?;
        crypto::aead_decrypt(&session.keys.receiving, counter, ciphertext)
    }

    fn mark_sent(&self) {
        *self.last_sent.lock() = Some(Instant::now());
    }

    /// Whether the keepalive interval has lapsed since the last send.
    pub fn keepalive_due(&self) -> bool {
        let Some(interval) = self.config.persistent_keepalive else {
            return false;
        };
        if !self.has_session() {
            return false;
        }
        match *self.last_sent.lock() {
            None => true,
            Some(at) => at.elapsed().as_secs() >= u64::from(interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn peer_pair() -> (Peer, Peer) {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let a = Peer::new(
            alice.private_key,
            1,
            PeerConfig {
                public_key: bob.public_key,
                endpoint: None,
                allowed_ips: Vec::new(),
                persistent_keepalive: None,
            },
        );
        let b = Peer::new(
            bob.private_key,
            2,
            PeerConfig {
                public_key: alice.public_key,
                endpoint: None,
                allowed_ips: Vec::new(),
                persistent_keepalive: None,
            },
        );
        (a, b)
    }

    #[test]
    fn transport_roundtrip_between_peers() {
        let (a, b) = peer_pair();
        let init = a.handshake().lock().create_initiation().unwrap();
        let (resp, b_keys) = b.handshake().lock().process_initiation(&init).unwrap();
        let a_keys = a.handshake().lock().process_response(&resp).unwrap();
        let b_remote = b.handshake().lock().remote_index().unwrap();
        let a_remote = a.handshake().lock().remote_index().unwrap();
        a.install_session(a_keys, a_remote);
        b.install_session(b_keys, b_remote);

        let sealed = a.seal_transport(b"ip frame bytes").unwrap();
        let (receiver, counter, ct) = handshake::parse_transport(&sealed).unwrap();
        assert_eq!(receiver, 2);
        assert_eq!(b.open_transport(counter, ct).unwrap(), b"ip frame bytes");
    }

    #[test]
    fn allowed_ips_route_filter() {
        let alice = KeyPair::generate();
        let peer = Peer::new(
            alice.private_key,
            1,
            PeerConfig {
                public_key: KeyPair::generate().public_key,
                endpoint: None,
                allowed_ips: vec!["10.0.0.0/8".parse().unwrap()],
                persistent_keepalive: None,
            },
        );
        assert!(peer.allows("10.1.2.3".parse().unwrap()));
        assert!(!peer.allows("192.168.1.1".parse().unwrap()));
    }
}

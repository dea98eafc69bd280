//! The tunnel device: one UDP socket, a peer table, and a receive pump.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::config::DeviceConfig;
use crate::handshake::{
    parse_transport, HandshakeInitiation, HandshakeResponse, MSG_TYPE_HANDSHAKE_INIT,
    MSG_TYPE_HANDSHAKE_RESP, MSG_TYPE_TRANSPORT,
};
use crate::peer::Peer;
use crate::{Result, WireError};

const RECV_POLL: Duration = Duration::from_millis(250);
const MAX_DATAGRAM: usize = 65536;

type IngressFn = Box<dyn Fn(&[u8]) + Send + Sync>;

pub struct Device {
    socket: UdpSocket,
    peers: Vec<Arc<Peer>>,
    ingress: RwLock<Option<IngressFn>>,
    running: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Device {
    pub fn new(config: DeviceConfig) -> Result<Device> {
        let port = config.listen_port.unwrap_or(0);
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .map_err(|e| WireError::Network(format!("bind udp {port}: {e}")))?;
        socket
            .set_read_timeout(Some(RECV_POLL))
            .map_err(|e| WireError::Network(e.to_string()))?;

        let peers = config
            .peers
            .iter()
            .enumerate()
            .map(|(i, pc)| Arc::new(Peer::new(config.private_key, i as u32 + 1, pc.clone())))
            .collect();

        Ok(Device {
            socket,
            peers,
            ingress: RwLock::new(None),
            running: Arc::new(AtomicBool::new(false)),
            pump: Mutex::new(None),
        })
    }

    /// Local UDP address the device listens on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| WireError::Network(e.to_string()))
    }

    /// Install the callback receiving decrypted inbound frames.
    pub fn set_ingress<F>(&self, f: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        *self.ingress.write() = Some(Box::new(f));
    }

    /// Start the receive pump and initiate handshakes to peers with known
    /// endpoints.
    pub fn up(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for peer in &self.peers {
            if peer.endpoint().is_some() {
                if let Err(err) = self.send_initiation(peer) {
                    warn!(%err, "initial handshake send failed");
                }
            }
        }
        let device = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("klinikal-wire-pump".into())
            .spawn(move || device.pump_loop())
            .map_err(|e| WireError::Network(e.to_string()))?;
        *self.pump.lock() = Some(handle);
        Ok(())
    }

    pub fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.pump.lock().take() {
            let _ = handle.join();
        }
    }

    /// Encrypt and send one outbound IPv4 frame. Without a session the frame
    /// is dropped and a handshake is (re)started, like a cold tunnel.
    pub fn transmit(&self, frame: &[u8]) {
        let Some(dst) = frame_dst_v4(frame) else {
            trace!("dropping non-IPv4 outbound frame");
            return;
        };
        let Some(peer) = self.peers.iter().find(|p| p.allows(dst.into())) else {
            trace!(%dst, "no peer route");
            return;
        };
        if !peer.has_session() {
            if let Err(err) = self.send_initiation(peer) {
                debug!(%err, "handshake send failed");
            }
            trace!(%dst, "no session yet, frame dropped");
            return;
        }
        match peer.seal_transport(frame) {
            Ok(message) => self.send_to_peer(peer, &message),
            Err(err) => debug!(%err, "seal failed"),
        }
    }

    fn pump_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while self.running.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => self.handle_datagram(&buf[..n], from),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    warn!(%e, "tunnel socket receive failed");
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
            for peer in &self.peers {
                if peer.keepalive_due() {
                    match peer.seal_transport(&[]) {
                        Ok(message) => self.send_to_peer(peer, &message),
                        Err(err) => trace!(%err, "keepalive seal failed"),
                    }
                }
            }
        }
    }

    fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        match data.first().copied() {
            Some(MSG_TYPE_HANDSHAKE_INIT) => {
                let Ok(init) = HandshakeInitiation::parse(data) else {
                    return;
                };
                let Some(peer) = self
                    .peers
                    .iter()
                    .find(|p| p.public_key() == init.static_public_key)
                else {
                    debug!(%from, "initiation from unknown peer");
                    return;
                };
                let result = peer.handshake().lock().process_initiation(&init);
                match result {
                    Ok((response, keys)) => {
                        peer.set_endpoint(from);
                        peer.install_session(keys, init.sender_index);
                        self.send_to_peer(peer, &response.to_bytes());
                        debug!(%from, "handshake completed (responder)");
                    }
                    Err(err) => debug!(%err, "initiation rejected"),
                }
            }
            Some(MSG_TYPE_HANDSHAKE_RESP) => {
                let Ok(resp) = HandshakeResponse::parse(data) else {
                    return;
                };
                let Some(peer) = self
                    .peers
                    .iter()
                    .find(|p| p.local_index() == resp.receiver_index)
                else {
                    return;
                };
                let result = peer.handshake().lock().process_response(&resp);
                match result {
                    Ok(keys) => {
                        peer.set_endpoint(from);
                        peer.install_session(keys, resp.sender_index);
                        debug!(%from, "handshake completed (initiator)");
                    }
                    Err(err) => debug!(%err, "response rejected"),
                }
            }
            Some(MSG_TYPE_TRANSPORT) => {
                let Ok((receiver, counter, ciphertext)) = parse_transport(data) else {
                    return;
                };
                let Some(peer) = self.peers.iter().find(|p| p.local_index() == receiver) else {
                    return;
                };
                match peer.open_transport(counter, ciphertext) {
                    Ok(frame) if frame.is_empty() => trace!(%from, "keepalive"),
                    Ok(frame) => {
                        if let Some(ingress) = self.ingress.read().as_ref() {
                            ingress(&frame);
                        }
                    }
                    Err(err) => debug!(%err, "transport open failed"),
                }
            }
            _ => trace!(%from, "unknown message type"),
        }
    }

    fn send_initiation(&self, peer: &Arc<Peer>) -> Result<()> {
        let initiation = peer.handshake().lock().create_initiation()?;
        self.send_to_peer(peer, &initiation.to_bytes());
        Ok(())
    }

    fn send_to_peer(&self, peer: &Arc<Peer>, message: &[u8]) {
        let Some(endpoint) = peer.endpoint() else {
            trace!("peer has no endpoint");
            return;
        };
        if let Err(err) = self.socket.send_to(message, endpoint) {
            debug!(%err, %endpoint, "tunnel send failed");
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.close();
    }
}

/// Destination address of an outbound IPv4 frame.
fn frame_dst_v4(frame: &[u8]) -> Option<std::net::Ipv4Addr> {
    if frame.len() < 20 || frame[0] >> 4 != 4 {
        return None;
    }
    Some(std::net::Ipv4Addr::new(
        frame[16], frame[17], frame[18], frame[19],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;
    use crate::crypto::KeyPair;
    use std::net::Ipv4Addr;

    fn frame_to(dst: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; 20];
        frame[0] = 0x45;
        let total = (20 + payload.len()) as u16;
        frame[2..4].copy_from_slice(&total.to_be_bytes());
        frame[8] = 64;
        frame[9] = 17;
        frame[12..16].copy_from_slice(&Ipv4Addr::new(10, 9, 0, 1).octets());
        frame[16..20].copy_from_slice(&dst.octets());
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn frames_cross_between_two_devices() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let device_b = Arc::new(
            Device::new(DeviceConfig {
                private_key: bob.private_key,
                listen_port: None,
                peers: vec![PeerConfig {
                    public_key: alice.public_key,
                    endpoint: None,
                    allowed_ips: vec!["10.9.0.1/32".parse().unwrap()],
                    persistent_keepalive: None,
                }],
            })
            .unwrap(),
        );
        let b_addr = device_b.local_addr().unwrap();
        let b_port = b_addr.port();

        let device_a = Arc::new(
            Device::new(DeviceConfig {
                private_key: alice.private_key,
                listen_port: None,
                peers: vec![PeerConfig {
                    public_key: bob.public_key,
                    endpoint: Some(format!("127.0.0.1:{b_port}").parse().unwrap()),
                    allowed_ips: vec!["10.9.0.2/32".parse().unwrap()],
                    persistent_keepalive: None,
                }],
            })
            .unwrap(),
        );

        let received = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
        let sink = received.clone();
        device_b.set_ingress(move |frame| sink.lock().push(frame.to_vec()));

        device_b.up().unwrap();
        device_a.up().unwrap();

        let frame = frame_to(Ipv4Addr::new(10, 9, 0, 2), b"over the tunnel");
        let mut delivered = false;
        for _ in 0..100 {
            device_a.transmit(&frame);
            std::thread::sleep(Duration::from_millis(20));
            if !received.lock().is_empty() {
                delivered = true;
                break;
            }
        }
        assert!(delivered, "frame never crossed the tunnel");
        assert_eq!(received.lock()[0], frame);

        device_a.close();
        device_b.close();
    }
}

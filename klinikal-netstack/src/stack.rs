//! The transport facade.
//!
//! Traffic addressed to one of the stack's own addresses (or loopback) is
//! delivered in-process through the port tables. UDP datagrams and ICMP
//! echoes to anything else are encapsulated as IPv4 frames and handed to the
//! attached [`Link`]; frames arriving from the link are routed back through
//! [`Stack::inject`].

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::trace;

use crate::error::{NetError, Result};
use crate::packet::{self, Ingress, ICMP_ECHO_REPLY, ICMP_ECHO_REQUEST};
use crate::ping::PingSocket;
use crate::tcp::{TcpListener, TcpStream};
use crate::udp::UdpSocket;
use crate::MAX_UDP_PAYLOAD;

const EPHEMERAL_BASE: u16 = 49152;
const EPHEMERAL_SPAN: u32 = (u16::MAX - EPHEMERAL_BASE) as u32 + 1;
const DEFAULT_BACKLOG: usize = 128;

/// Frame sink toward the tunnel device.
pub trait Link: Send + Sync {
    fn transmit(&self, frame: &[u8]);
}

#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Interface addresses owned by this stack.
    pub addresses: Vec<IpAddr>,
    /// DNS servers reachable through the tunnel.
    pub dns: Vec<IpAddr>,
    pub mtu: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            dns: Vec::new(),
            mtu: 1420,
        }
    }
}

pub struct StackBuilder {
    config: StackConfig,
}

impl StackBuilder {
    pub fn new() -> Self {
        Self {
            config: StackConfig::default(),
        }
    }

    pub fn address(mut self, addr: IpAddr) -> Self {
        self.config.addresses.push(addr);
        self
    }

    pub fn dns_server(mut self, addr: IpAddr) -> Self {
        self.config.dns.push(addr);
        self
    }

    pub fn mtu(mut self, mtu: usize) -> Self {
        self.config.mtu = mtu;
        self
    }

    pub fn build(self) -> Stack {
        Stack::new(self.config)
    }
}

impl Default for StackBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct StackInner {
    config: StackConfig,
    tcp_ports: DashMap<u16, Arc<TcpListener>>,
    udp_ports: DashMap<u16, Arc<UdpSocket>>,
    ping_idents: DashMap<u16, Arc<PingSocket>>,
    next_port: AtomicU32,
    next_ident: AtomicU32,
    link: RwLock<Option<Arc<dyn Link>>>,
    weak_self: Weak<StackInner>,
}

/// The userspace transport. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Stack {
    inner: Arc<StackInner>,
}

impl Stack {
    pub fn new(config: StackConfig) -> Stack {
        let inner = Arc::new_cyclic(|weak| StackInner {
            config,
            tcp_ports: DashMap::new(),
            udp_ports: DashMap::new(),
            ping_idents: DashMap::new(),
            next_port: AtomicU32::new(0),
            next_ident: AtomicU32::new(0),
            link: RwLock::new(None),
            weak_self: weak.clone(),
        });
        Stack { inner }
    }

    pub fn builder() -> StackBuilder {
        StackBuilder::new()
    }

    pub fn attach_link(&self, link: Arc<dyn Link>) {
        *self.inner.link.write() = Some(link);
    }

    pub fn detach_link(&self) {
        *self.inner.link.write() = None;
    }

    /// Feed one inbound IPv4 frame from the tunnel.
    pub fn inject(&self, frame: &[u8]) {
        self.inner.inject(frame);
    }

    pub fn dns_servers(&self) -> Vec<IpAddr> {
        self.inner.config.dns.clone()
    }

    pub fn addresses(&self) -> Vec<IpAddr> {
        self.inner.config.addresses.clone()
    }

    pub fn mtu(&self) -> usize {
        self.inner.config.mtu
    }

    /// Open a TCP listener on `addr` ("ip:port"; empty host or port 0 pick
    /// defaults). The backlog is advisory.
    pub fn listen_tcp(&self, addr: &str, backlog: usize) -> Result<Arc<TcpListener>> {
        let sa = parse_host_port(addr)?;
        self.inner.listen_tcp_at(sa, backlog)
    }

    /// Dial an in-stack TCP endpoint. `bound` selects the source address.
    pub fn dial_tcp(&self, bound: Option<&str>, remote: &str) -> Result<Arc<TcpStream>> {
        let bound = bound.map(parse_host_port).transpose()?;
        let remote = parse_host_port(remote)?;
        self.inner.dial_tcp_at(bound, remote)
    }

    /// Timed dial; the transport's `DialContext` analogue. In-process
    /// establishment is immediate, so the timeout only bounds validation.
    pub fn dial_tcp_timeout(
        &self,
        remote: &str,
        _timeout: Option<Duration>,
    ) -> Result<Arc<TcpStream>> {
        self.dial_tcp(None, remote)
    }

    pub fn listen_udp(&self, addr: &str) -> Result<Arc<UdpSocket>> {
        let sa = parse_host_port(addr)?;
        self.inner.listen_udp_at(sa)
    }

    pub fn dial_udp(&self, bound: Option<&str>, remote: &str) -> Result<Arc<UdpSocket>> {
        let local = match bound {
            Some(b) => parse_host_port(b)?,
            None => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        };
        let remote = parse_host_port(remote)?;
        let sock = self.inner.listen_udp_at(local)?;
        sock.set_peer(remote);
        Ok(sock)
    }

    pub fn listen_ping(&self, ip: IpAddr) -> Result<Arc<PingSocket>> {
        self.inner.listen_ping_at(ip)
    }

    pub fn dial_ping(&self, bound: IpAddr, remote: IpAddr) -> Result<Arc<PingSocket>> {
        let sock = self.inner.listen_ping_at(bound)?;
        sock.set_peer(remote);
        Ok(sock)
    }

    /// Resolve `name` to addresses via the tunnel DNS servers.
    pub fn lookup_host(&self, name: &str) -> Result<Vec<IpAddr>> {
        crate::dns::lookup_host(self, name)
    }
}

impl StackInner {
    fn weak(&self) -> Weak<StackInner> {
        self.weak_self.clone()
    }

    pub(crate) fn is_local_ip(&self, ip: IpAddr) -> bool {
        ip.is_loopback() || ip.is_unspecified() || self.config.addresses.contains(&ip)
    }

    fn primary_ipv4(&self) -> Option<Ipv4Addr> {
        self.config.addresses.iter().find_map(|a| match a {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })
    }

    /// Pick the source address for traffic toward `dst` from a socket bound
    /// to `bound` (possibly unspecified).
    fn source_ip_for(&self, dst: IpAddr, bound: IpAddr) -> IpAddr {
        if !bound.is_unspecified() {
            return bound;
        }
        if dst.is_loopback() || dst.is_unspecified() {
            return match dst {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            };
        }
        match self.primary_ipv4() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    fn alloc_port<F: Fn(u16) -> bool>(&self, in_use: F) -> Result<u16> {
        for _ in 0..EPHEMERAL_SPAN {
            let n = self.next_port.fetch_add(1, Ordering::Relaxed);
            let port = EPHEMERAL_BASE + (n % EPHEMERAL_SPAN) as u16;
            if !in_use(port) {
                return Ok(port);
            }
        }
        Err(NetError::AddrInUse)
    }

    pub(crate) fn listen_tcp_at(
        self: &Arc<Self>,
        sa: SocketAddr,
        backlog: usize,
    ) -> Result<Arc<TcpListener>> {
        if !self.is_local_ip(sa.ip()) {
            return Err(NetError::AddrNotAvail);
        }
        let port = if sa.port() != 0 {
            sa.port()
        } else {
            self.alloc_port(|p| self.tcp_ports.contains_key(&p))?
        };
        let backlog = if backlog == 0 { DEFAULT_BACKLOG } else { backlog };
        match self.tcp_ports.entry(port) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(NetError::AddrInUse),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let listener =
                    TcpListener::new(SocketAddr::new(sa.ip(), port), backlog, self.weak());
                slot.insert(listener.clone());
                Ok(listener)
            }
        }
    }

    pub(crate) fn release_tcp_port(&self, port: u16) {
        self.tcp_ports.remove(&port);
    }

    fn dial_tcp_at(
        self: &Arc<Self>,
        bound: Option<SocketAddr>,
        remote: SocketAddr,
    ) -> Result<Arc<TcpStream>> {
        if remote.port() == 0 {
            return Err(NetError::InvalidAddress(remote.to_string()));
        }
        if !self.is_local_ip(remote.ip()) {
            // Stream sessions are not carried across the link; see DESIGN.md.
            return Err(NetError::HostUnreachable);
        }
        let listener = self
            .tcp_ports
            .get(&remote.port())
            .map(|entry| entry.value().clone())
            .filter(|l| target_matches(l.local_addr().ip(), remote.ip()))
            .ok_or(NetError::ConnectionRefused)?;

        let (bound_ip, bound_port) = match bound {
            Some(b) => (b.ip(), b.port()),
            None => (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        };
        let client_port = if bound_port != 0 {
            bound_port
        } else {
            self.alloc_port(|_| false)?
        };
        let client_local =
            SocketAddr::new(self.source_ip_for(remote.ip(), bound_ip), client_port);
        let server_ip = if listener.local_addr().ip().is_unspecified() {
            if remote.ip().is_unspecified() {
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            } else {
                remote.ip()
            }
        } else {
            listener.local_addr().ip()
        };
        let server_local = SocketAddr::new(server_ip, remote.port());

        let (client, server) = TcpStream::pair(client_local, server_local);
        listener.push(server)?;
        Ok(client)
    }

    pub(crate) fn listen_udp_at(self: &Arc<Self>, sa: SocketAddr) -> Result<Arc<UdpSocket>> {
        if !self.is_local_ip(sa.ip()) {
            return Err(NetError::AddrNotAvail);
        }
        let port = if sa.port() != 0 {
            sa.port()
        } else {
            self.alloc_port(|p| self.udp_ports.contains_key(&p))?
        };
        match self.udp_ports.entry(port) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(NetError::AddrInUse),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let sock = UdpSocket::new(SocketAddr::new(sa.ip(), port), self.weak());
                slot.insert(sock.clone());
                Ok(sock)
            }
        }
    }

    pub(crate) fn release_udp_port(&self, port: u16) {
        self.udp_ports.remove(&port);
    }

    pub(crate) fn listen_ping_at(self: &Arc<Self>, ip: IpAddr) -> Result<Arc<PingSocket>> {
        if !self.is_local_ip(ip) {
            return Err(NetError::AddrNotAvail);
        }
        for _ in 0..u32::from(u16::MAX) {
            let n = self.next_ident.fetch_add(1, Ordering::Relaxed);
            let ident = (n % u32::from(u16::MAX)) as u16 + 1;
            match self.ping_idents.entry(ident) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    let sock = PingSocket::new(ident, ip, self.weak());
                    slot.insert(sock.clone());
                    return Ok(sock);
                }
            }
        }
        Err(NetError::AddrInUse)
    }

    pub(crate) fn release_ping_ident(&self, ident: u16) {
        self.ping_idents.remove(&ident);
    }

    pub(crate) fn route_udp(&self, sock: &UdpSocket, data: &[u8], dst: SocketAddr) -> Result<usize> {
        if data.len() > MAX_UDP_PAYLOAD {
            return Err(NetError::MsgSize);
        }
        let dst_ip = dst.ip();
        let is_broadcast = dst_ip == IpAddr::V4(Ipv4Addr::BROADCAST);
        if is_broadcast && !sock.broadcast() {
            return Err(NetError::OpNotSupported);
        }
        if self.is_local_ip(dst_ip) || is_broadcast {
            let target = self
                .udp_ports
                .get(&dst.port())
                .map(|entry| entry.value().clone())
                .filter(|t| is_broadcast || target_matches(t.local_ip(), dst_ip));
            if let Some(target) = target {
                let from = SocketAddr::new(
                    self.source_ip_for(dst_ip, sock.local_ip()),
                    sock.local_addr().port(),
                );
                target.deliver(from, data.to_vec());
            }
            // Without a receiver the datagram evaporates, as UDP does.
            return Ok(data.len());
        }

        let link = self.link.read().clone().ok_or(NetError::HostUnreachable)?;
        let (src_v4, dst_v4) = match (self.source_ip_for(dst_ip, sock.local_ip()), dst_ip) {
            (IpAddr::V4(s), IpAddr::V4(d)) => (s, d),
            _ => return Err(NetError::HostUnreachable),
        };
        let frame = packet::build_ipv4_udp(
            SocketAddrV4::new(src_v4, sock.local_addr().port()),
            SocketAddrV4::new(dst_v4, dst.port()),
            data,
        );
        link.transmit(&frame);
        Ok(data.len())
    }

    pub(crate) fn route_ping(&self, sock: &PingSocket, message: &[u8], dst: IpAddr) -> Result<usize> {
        let mut msg = message.to_vec();
        if matches!(
            packet::icmp_type(&msg),
            Some(ICMP_ECHO_REQUEST) | Some(ICMP_ECHO_REPLY)
        ) {
            packet::restamp_echo_ident(&mut msg, sock.ident());
        }
        if self.is_local_ip(dst) {
            if packet::icmp_type(&msg) == Some(ICMP_ECHO_REQUEST) {
                // The stack answers its own addresses.
                sock.deliver(dst, packet::build_echo_reply(&msg));
            }
            return Ok(message.len());
        }
        let link = self.link.read().clone().ok_or(NetError::HostUnreachable)?;
        let src = self.source_ip_for(dst, sock.local_ip());
        let (src_v4, dst_v4) = match (src, dst) {
            (IpAddr::V4(s), IpAddr::V4(d)) => (s, d),
            _ => return Err(NetError::HostUnreachable),
        };
        link.transmit(&packet::build_ipv4_icmp(src_v4, dst_v4, &msg));
        Ok(message.len())
    }

    fn inject(&self, frame: &[u8]) {
        match packet::parse_frame(frame) {
            Ok(Ingress::Udp { src, dst, payload }) => {
                let target = self
                    .udp_ports
                    .get(&dst.port())
                    .map(|entry| entry.value().clone())
                    .filter(|t| target_matches(t.local_ip(), IpAddr::V4(*dst.ip())));
                if let Some(target) = target {
                    target.deliver(SocketAddr::V4(src), payload);
                } else {
                    trace!(port = dst.port(), "inbound udp with no listener");
                }
            }
            Ok(Ingress::Icmp { src, dst, message }) => match packet::icmp_type(&message) {
                Some(ICMP_ECHO_REQUEST) => {
                    if let Some(link) = self.link.read().clone() {
                        let reply = packet::build_echo_reply(&message);
                        link.transmit(&packet::build_ipv4_icmp(dst, src, &reply));
                    }
                }
                Some(ICMP_ECHO_REPLY) => {
                    if let Some(ident) = packet::echo_ident(&message) {
                        let target = self
                            .ping_idents
                            .get(&ident)
                            .map(|entry| entry.value().clone());
                        if let Some(target) = target {
                            target.deliver(IpAddr::V4(src), message);
                        }
                    }
                }
                _ => {}
            },
            Ok(Ingress::Other) => {}
            Err(err) => trace!(%err, "dropping undecodable frame"),
        }
    }
}

/// Whether a socket bound to `bound` should receive traffic addressed to
/// `dst`.
fn target_matches(bound: IpAddr, dst: IpAddr) -> bool {
    bound.is_unspecified()
        || dst.is_unspecified()
        || bound == dst
        || (bound.is_loopback() && dst.is_loopback())
}

/// Parse "host:port" where the host may be empty (wildcard), an IPv4
/// address, or a bracketed IPv6 address.
pub fn parse_host_port(s: &str) -> Result<SocketAddr> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| NetError::InvalidAddress(s.to_string()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| NetError::InvalidAddress(s.to_string()))?;
    let ip = if host.is_empty() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        host.parse::<IpAddr>()
            .map_err(|_| NetError::InvalidAddress(s.to_string()))?
    };
    Ok(SocketAddr::new(ip, port))
}

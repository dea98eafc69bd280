//! IPv4 frame assembly and parsing for the tunnel link.
//!
//! Outbound frames are built by hand; inbound frames are parsed with the
//! smoltcp wire types.

use std::net::{Ipv4Addr, SocketAddrV4};

use smoltcp::wire::{IpProtocol, Ipv4Packet, UdpPacket};

use crate::error::{NetError, Result};

pub const IPV4_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_ECHO_REQUEST: u8 = 8;

/// RFC 1071 one's-complement checksum over `data`.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    while sum > 0xFFFF {
        sum = (sum >> 16) + (sum & 0xFFFF);
    }
    !(sum as u16)
}

fn ipv4_header(proto: u8, src: Ipv4Addr, dst: Ipv4Addr, payload_len: usize) -> [u8; IPV4_HEADER_LEN] {
    let mut hdr = [0u8; IPV4_HEADER_LEN];
    hdr[0] = 0x45;
    let total = (IPV4_HEADER_LEN + payload_len) as u16;
    hdr[2..4].copy_from_slice(&total.to_be_bytes());
    hdr[6] = 0x40; // don't fragment
    hdr[8] = 64;
    hdr[9] = proto;
    hdr[12..16].copy_from_slice(&src.octets());
    hdr[16..20].copy_from_slice(&dst.octets());
    let cks = checksum(&hdr);
    hdr[10..12].copy_from_slice(&cks.to_be_bytes());
    hdr
}

/// Build a full IPv4+UDP frame.
pub fn build_ipv4_udp(src: SocketAddrV4, dst: SocketAddrV4, payload: &[u8]) -> Vec<u8> {
    let udp_len = (UDP_HEADER_LEN + payload.len()) as u16;
    let mut frame = Vec::with_capacity(IPV4_HEADER_LEN + udp_len as usize);
    frame.extend_from_slice(&ipv4_header(17, *src.ip(), *dst.ip(), udp_len as usize));

    let udp_start = frame.len();
    frame.extend_from_slice(&src.port().to_be_bytes());
    frame.extend_from_slice(&dst.port().to_be_bytes());
    frame.extend_from_slice(&udp_len.to_be_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(payload);

    // UDP checksum over the pseudo-header plus the datagram.
    let mut pseudo = Vec::with_capacity(12 + udp_len as usize);
    pseudo.extend_from_slice(&src.ip().octets());
    pseudo.extend_from_slice(&dst.ip().octets());
    pseudo.extend_from_slice(&[0, 17]);
    pseudo.extend_from_slice(&udp_len.to_be_bytes());
    pseudo.extend_from_slice(&frame[udp_start..]);
    let mut cks = checksum(&pseudo);
    if cks == 0 {
        cks = 0xFFFF;
    }
    frame[udp_start + 6..udp_start + 8].copy_from_slice(&cks.to_be_bytes());
    frame
}

/// Build a full IPv4+ICMP frame carrying `message` (header included).
pub fn build_ipv4_icmp(src: Ipv4Addr, dst: Ipv4Addr, message: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(IPV4_HEADER_LEN + message.len());
    frame.extend_from_slice(&ipv4_header(1, src, dst, message.len()));
    frame.extend_from_slice(message);
    frame
}

/// ICMP message type, if the message is long enough to carry one.
pub fn icmp_type(message: &[u8]) -> Option<u8> {
    message.first().copied()
}

/// Echo identifier of an ICMP echo message.
pub fn echo_ident(message: &[u8]) -> Option<u16> {
    if message.len() < 8 {
        return None;
    }
    Some(u16::from_be_bytes([message[4], message[5]]))
}

/// Rewrite the echo identifier in place and restore the checksum.
pub fn restamp_echo_ident(message: &mut [u8], ident: u16) {
    if message.len() < 8 {
        return;
    }
    message[4..6].copy_from_slice(&ident.to_be_bytes());
    message[2] = 0;
    message[3] = 0;
    let cks = checksum(message);
    message[2..4].copy_from_slice(&cks.to_be_bytes());
}

/// Turn an echo request into the matching reply.
pub fn build_echo_reply(request: &[u8]) -> Vec<u8> {
    let mut reply = request.to_vec();
    if reply.is_empty() {
        return reply;
    }
    reply[0] = ICMP_ECHO_REPLY;
    if reply.len() >= 4 {
        reply[2] = 0;
        reply[3] = 0;
        let cks = checksum(&reply);
        reply[2..4].copy_from_slice(&cks.to_be_bytes());
    }
    reply
}

/// An inbound frame decoded far enough to route.
#[derive(Debug)]
pub enum Ingress {
    Udp {
        src: SocketAddrV4,
        dst: SocketAddrV4,
        payload: Vec<u8>,
    },
    Icmp {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        message: Vec<u8>,
    },
    Other,
}

/// Parse an inbound IPv4 frame.
pub fn parse_frame(frame: &[u8]) -> Result<Ingress> {
    let ipv4 = Ipv4Packet::new_checked(frame)
        .map_err(|e| NetError::MalformedPacket(format!("ipv4: {e}")))?;
    let src_ip = Ipv4Addr::from(ipv4.src_addr());
    let dst_ip = Ipv4Addr::from(ipv4.dst_addr());

    match ipv4.next_header() {
        IpProtocol::Udp => {
            let udp = UdpPacket::new_checked(ipv4.payload())
                .map_err(|e| NetError::MalformedPacket(format!("udp: {e}")))?;
            Ok(Ingress::Udp {
                src: SocketAddrV4::new(src_ip, udp.src_port()),
                dst: SocketAddrV4::new(dst_ip, udp.dst_port()),
                payload: udp.payload().to_vec(),
            })
        }
        IpProtocol::Icmp => Ok(Ingress::Icmp {
            src: src_ip,
            dst: dst_ip,
            message: ipv4.payload().to_vec(),
        }),
        _ => Ok(Ingress::Other),
    }
}

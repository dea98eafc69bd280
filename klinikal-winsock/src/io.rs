//! Synchronous data transfer: send/recv with non-blocking deadlines and
//! MSG_PEEK, sendto/recvfrom with implicit bind, and the IPv4 header
//! synthesis raw ICMP receivers observe.

use std::ffi::c_void;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use klinikal_netstack::packet::checksum;
use klinikal_netstack::NetError;

use crate::error::{
    map_net_error, set_last_error, WSAEDESTADDRREQ, WSAEHOSTUNREACH, WSAEINVAL, WSAENOTCONN,
    WSAENOTSOCK, WSAEWOULDBLOCK,
};
use crate::lifecycle::read_sockaddr_in;
use crate::registry::{registry, Endpoint, SocketKind, SocketState};
use crate::stack;
use crate::types::{SockaddrIn, AF_INET, MSG_PEEK};

/// Build the 20-byte IPv4 header prepended to raw ICMP payloads: version 4
/// IHL 5, TTL 64, protocol 1, one's-complement checksum over the header.
pub(crate) fn synthesize_ipv4_header(src: Option<Ipv4Addr>, payload_len: usize) -> [u8; 20] {
    let mut hdr = [0u8; 20];
    hdr[0] = 0x45;
    let total = (20 + payload_len) as u16;
    hdr[2..4].copy_from_slice(&total.to_be_bytes());
    hdr[8] = 64;
    hdr[9] = 1;
    if let Some(src) = src {
        hdr[12..16].copy_from_slice(&src.octets());
    }
    let cks = checksum(&hdr);
    hdr[10..12].copy_from_slice(&cks.to_be_bytes());
    hdr
}

fn io_error(st: &SocketState, err: &NetError) -> i32 {
    let code = if err.is_timeout() && st.is_nonblocking() {
        WSAEWOULDBLOCK
    } else {
        map_net_error(err)
    };
    st.set_socket_error(code);
    set_last_error(code);
    -1
}

/// # Safety
/// `buf` must be valid for `len` readable bytes.
pub unsafe fn send(s: u64, buf: *const u8, len: i32, flags: i32) -> i32 {
    trace_call!("Send", s, buf, len, flags);
    let Some(st) = registry().get(s) else {
        set_last_error(WSAENOTSOCK);
        return -1;
    };
    let Some(endpoint) = st.endpoint() else {
        set_last_error(WSAENOTCONN);
        return -1;
    };
    if !endpoint.is_connected() {
        set_last_error(WSAENOTCONN);
        return -1;
    }
    if buf.is_null() || len < 0 {
        set_last_error(WSAEINVAL);
        return -1;
    }
    let data = std::slice::from_raw_parts(buf, len as usize);

    let result = if st.is_nonblocking() {
        endpoint.write_deadline(data, st.op_deadline())
    } else {
        endpoint.write(data)
    };
    match result {
        Ok(n) => n as i32,
        Err(err) => io_error(&st, &err),
    }
}

/// Receive into `data` honouring MSG_PEEK: peeked bytes land in the
/// socket's peek buffer and are served to the next non-peek call first.
/// Raw sockets get a synthesized IPv4 header ahead of the ICMP payload.
fn recv_common(st: &SocketState, endpoint: &Endpoint, data: &mut [u8], peek: bool) -> i32 {
    let mut copied = 0usize;

    if st.peek_len() > 0 {
        copied = st.drain_peek(data, peek);
        if copied >= data.len() || peek {
            // Peek never blocks past what is already buffered.
            return copied as i32;
        }
    }
    let rest = &mut data[copied..];

    let deadline = if st.is_nonblocking() {
        st.op_deadline()
    } else {
        None
    };
    let result = match (st.kind, endpoint) {
        (SocketKind::RawIcmp, Endpoint::Ping(ping)) => {
            let mut icmp = vec![0u8; rest.len()];
            let r = if st.is_nonblocking() {
                ping.recv_deadline(&mut icmp, deadline)
            } else {
                ping.recv(&mut icmp)
            };
            r.map(|n| {
                if n == 0 {
                    return 0;
                }
                let src = match ping.peer_ip() {
                    Some(IpAddr::V4(v4)) => Some(v4),
                    _ => None,
                };
                let hdr = synthesize_ipv4_header(src, n);
                let mut written = hdr.len().min(rest.len());
                rest[..written].copy_from_slice(&hdr[..written]);
                if written < rest.len() {
                    let m = n.min(rest.len() - written);
                    rest[written..written + m].copy_from_slice(&icmp[..m]);
                    written += m;
                }
                written
            })
        }
        _ => {
            if st.is_nonblocking() {
                endpoint.read_deadline(rest, deadline)
            } else {
                endpoint.read(rest)
            }
        }
    };

    match result {
        Ok(n) => {
            if n > 0 && peek {
                st.append_peek(&rest[..n]);
            }
            (copied + n) as i32
        }
        Err(_) if copied > 0 => copied as i32,
        Err(err) => io_error(st, &err),
    }
}

/// # Safety
/// `buf` must be valid for `len` writable bytes.
pub unsafe fn recv(s: u64, buf: *mut u8, len: i32, flags: i32) -> i32 {
    trace_call!("Recv", s, buf, len, flags);
    let Some(st) = registry().get(s) else {
        set_last_error(WSAENOTSOCK);
        return -1;
    };
    let Some(endpoint) = st.endpoint() else {
        set_last_error(WSAENOTCONN);
        return -1;
    };
    if !endpoint.is_connected() {
        set_last_error(WSAENOTCONN);
        return -1;
    }
    if buf.is_null() || len < 0 {
        set_last_error(WSAEINVAL);
        return -1;
    }
    let data = std::slice::from_raw_parts_mut(buf, len as usize);
    recv_common(&st, &endpoint, data, flags & MSG_PEEK != 0)
}

/// Implicit wildcard bind for unbound datagram/raw sockets, then transmit.
/// A connected socket ignores the destination and behaves like send.
///
/// # Safety
/// `buf` must be valid for `len` bytes; `to` for `tolen` when non-null.
pub unsafe fn sendto(
    s: u64,
    buf: *const u8,
    len: i32,
    flags: i32,
    to: *const c_void,
    tolen: i32,
) -> i32 {
    trace_call!("Sendto", s, buf, len, flags, to, tolen);
    let Some(st) = registry().get(s) else {
        set_last_error(WSAENOTSOCK);
        return -1;
    };
    if buf.is_null() || len < 0 {
        set_last_error(WSAEINVAL);
        return -1;
    }
    let data = std::slice::from_raw_parts(buf, len as usize);

    let dest = if to.is_null() {
        None
    } else {
        match read_sockaddr_in(to, tolen) {
            Some((ip, port)) => Some((ip, port)),
            None => {
                set_last_error(WSAEINVAL);
                return -1;
            }
        }
    };

    let mut endpoint = st.endpoint();
    if endpoint.is_none() {
        if dest.is_none() {
            set_last_error(WSAEDESTADDRREQ);
            return -1;
        }
        let Some(stack) = stack::get_stack() else {
            set_last_error(WSAEHOSTUNREACH);
            return -1;
        };
        // Implicit bind to the wildcard address.
        let bound = match st.kind {
            SocketKind::Dgram => stack.net.listen_udp("0.0.0.0:0").map(Endpoint::Dgram),
            SocketKind::RawIcmp => stack
                .net
                .listen_ping(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
                .map(Endpoint::Ping),
            SocketKind::Stream => {
                set_last_error(WSAENOTCONN);
                return -1;
            }
        };
        match bound {
            Ok(ep) => {
                st.set_endpoint(ep.clone());
                st.rebind_waiter();
                endpoint = Some(ep);
            }
            Err(err) => return io_error(&st, &err),
        }
    }
    let endpoint = endpoint.unwrap();

    if dest.is_none() && !endpoint.is_connected() {
        set_last_error(WSAEDESTADDRREQ);
        return -1;
    }

    let result = match &endpoint {
        Endpoint::Stream(_) => {
            set_last_error(WSAEINVAL);
            return -1;
        }
        Endpoint::Dgram(sock) => {
            if endpoint.is_connected() {
                sock.send(data)
            } else {
                let (ip, port) = dest.unwrap();
                sock.send_to(data, SocketAddr::new(IpAddr::V4(ip), port))
            }
        }
        Endpoint::Ping(sock) => {
            if endpoint.is_connected() {
                sock.send(data)
            } else {
                let (ip, _) = dest.unwrap();
                sock.send_to(data, IpAddr::V4(ip))
            }
        }
    };

    match result {
        Ok(n) => n as i32,
        Err(err) => io_error(&st, &err),
    }
}

/// Receives one datagram and writes the source address back as a
/// sockaddr_in when space permits. Raw sockets get the synthesized IPv4
/// header.
///
/// # Safety
/// `buf` must be valid for `len` bytes; `from`/`fromlen` null or valid.
pub unsafe fn recvfrom(
    s: u64,
    buf: *mut u8,
    len: i32,
    flags: i32,
    from: *mut c_void,
    fromlen: *mut i32,
) -> i32 {
    trace_call!("Recvfrom", s, buf, len, flags, from, fromlen);
    let Some(st) = registry().get(s) else {
        set_last_error(WSAENOTSOCK);
        return -1;
    };
    let Some(endpoint) = st.endpoint() else {
        set_last_error(WSAEINVAL);
        return -1;
    };
    if buf.is_null() || len < 0 {
        set_last_error(WSAEINVAL);
        return -1;
    }
    let data = std::slice::from_raw_parts_mut(buf, len as usize);
    let deadline = if st.is_nonblocking() {
        st.op_deadline()
    } else {
        None
    };

    let result: Result<(usize, SocketAddr), NetError> = match &endpoint {
        Endpoint::Stream(_) => {
            set_last_error(WSAEINVAL);
            return -1;
        }
        Endpoint::Dgram(sock) => {
            let r = if st.is_nonblocking() {
                sock.recv_from_deadline(data, deadline)
            } else {
                sock.recv_from(data)
            };
            r.map(|(n, from)| (n, from))
        }
        Endpoint::Ping(sock) => {
            let mut icmp = vec![0u8; data.len()];
            let r = if st.is_nonblocking() {
                sock.recv_from_deadline(&mut icmp, deadline)
            } else {
                sock.recv_from(&mut icmp)
            };
            r.map(|(n, src)| {
                let src_v4 = match src {
                    IpAddr::V4(v4) => Some(v4),
                    IpAddr::V6(_) => None,
                };
                let hdr = synthesize_ipv4_header(src_v4, n);
                let mut written = hdr.len().min(data.len());
                data[..written].copy_from_slice(&hdr[..written]);
                if written < data.len() {
                    let m = n.min(data.len() - written);
                    data[written..written + m].copy_from_slice(&icmp[..m]);
                    written += m;
                }
                (written, SocketAddr::new(src, 0))
            })
        }
    };

    match result {
        Ok((n, source)) => {
            if !from.is_null()
                && !fromlen.is_null()
                && *fromlen >= std::mem::size_of::<SockaddrIn>() as i32
            {
                let sin = &mut *(from as *mut SockaddrIn);
                sin.family = AF_INET as u16;
                sin.port = source.port().to_be();
                sin.addr = match source.ip() {
                    IpAddr::V4(v4) => v4.octets(),
                    IpAddr::V6(_) => [0; 4],
                };
                sin.zero = [0; 8];
                *fromlen = std::mem::size_of::<SockaddrIn>() as i32;
            }
            n as i32
        }
        Err(err) => io_error(&st, &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_header_shape() {
        let hdr = synthesize_ipv4_header(Some(Ipv4Addr::new(10, 7, 0, 1)), 12);
        assert_eq!(hdr[0], 0x45);
        assert_eq!(u16::from_be_bytes([hdr[2], hdr[3]]), 32);
        assert_eq!(hdr[8], 64);
        assert_eq!(hdr[9], 1);
        assert_eq!(&hdr[12..16], &[10, 7, 0, 1]);
        // Destination stays unspecified.
        assert_eq!(&hdr[16..20], &[0, 0, 0, 0]);
        // Header checksums to zero once the checksum field is in place.
        assert_eq!(checksum(&hdr), 0);
    }
}

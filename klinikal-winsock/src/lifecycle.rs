//! Socket lifecycle: creation and destruction, bind with deferred listen,
//! accept, connect for all three kinds, half-close, and the local/peer
//! address queries.

use std::ffi::c_void;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::error::{
    map_net_error, set_last_error, WSAEFAULT, WSAEHOSTUNREACH, WSAEINVAL, WSAENOTCONN,
    WSAENOTSOCK, WSAEOPNOTSUPP, WSAEPROTONOSUPPORT,
};
use crate::options;
use crate::registry::{registry, Endpoint, SocketKind, SocketState};
use crate::stack;
use crate::types::{SockaddrIn, AF_INET, INVALID_SOCKET, IPPROTO_ICMP, SD_BOTH, SD_RECEIVE, SD_SEND};

/// Read an IPv4 sockaddr; anything else is rejected.
///
/// # Safety
/// `name` must be null or point to at least `namelen` readable bytes.
pub(crate) unsafe fn read_sockaddr_in(
    name: *const c_void,
    namelen: i32,
) -> Option<(Ipv4Addr, u16)> {
    if name.is_null() || (namelen > 0 && (namelen as usize) < std::mem::size_of::<SockaddrIn>()) {
        return None;
    }
    let sin = &*(name as *const SockaddrIn);
    if i32::from(sin.family) != AF_INET {
        return None;
    }
    Some((Ipv4Addr::from(sin.addr), u16::from_be(sin.port)))
}

/// Write an IPv4 endpoint back to the caller.
///
/// # Safety
/// `name` must be valid for sizeof(sockaddr_in) bytes.
pub(crate) unsafe fn write_sockaddr_in(name: *mut c_void, addr: SocketAddr) {
    let sin = &mut *(name as *mut SockaddrIn);
    sin.family = AF_INET as u16;
    sin.port = addr.port().to_be();
    sin.addr = match addr.ip() {
        IpAddr::V4(v4) => v4.octets(),
        IpAddr::V6(_) => [0; 4],
    };
    sin.zero = [0; 8];
}

fn fail(code: i32) -> i32 {
    set_last_error(code);
    -1
}

fn fail_on(st: &SocketState, code: i32) -> i32 {
    st.set_socket_error(code);
    set_last_error(code);
    -1
}

/// Creates a socket handle; the transport endpoint comes later, from bind
/// or connect.
pub fn socket(af: i32, socktype: i32, protocol: i32) -> u64 {
    trace_call!("Socket", af, socktype, protocol);
    let state = SocketState::new(SocketKind::from_socktype(socktype), af, protocol);
    let (handle, _) = registry().register(state);
    handle
}

/// # Safety
/// `_protocol_info` is never dereferenced.
pub unsafe fn wsa_socket_a(
    af: i32,
    socktype: i32,
    protocol: i32,
    _protocol_info: *const c_void,
    _group: u32,
    _flags: u32,
) -> u64 {
    trace_call!("WSASocketA", af, socktype, protocol);
    socket(af, socktype, protocol)
}

/// # Safety
/// `_protocol_info` is never dereferenced.
pub unsafe fn wsa_socket_w(
    af: i32,
    socktype: i32,
    protocol: i32,
    _protocol_info: *const c_void,
    _group: u32,
    _flags: u32,
) -> u64 {
    trace_call!("WSASocketW", af, socktype, protocol);
    socket(af, socktype, protocol)
}

pub fn closesocket(s: u64) -> i32 {
    trace_call!("Closesocket", s);
    match registry().unregister(s) {
        Some(state) => {
            state.teardown();
            0
        }
        None => fail(WSAENOTSOCK),
    }
}

/// Cross-process duplication is not supported by the bridge.
pub fn wsa_duplicate_socket_a(s: u64, _process_id: u32, _protocol_info: *mut c_void) -> i32 {
    trace_call!("WSADuplicateSocketA", s);
    fail(WSAEOPNOTSUPP)
}

pub fn wsa_duplicate_socket_w(s: u64, _process_id: u32, _protocol_info: *mut c_void) -> i32 {
    trace_call!("WSADuplicateSocketW", s);
    fail(WSAEOPNOTSUPP)
}

/// Associates a local address with a socket. Datagram and raw sockets open
/// their transport endpoint immediately; stream sockets record the address
/// for listen/connect.
///
/// # Safety
/// `name` must point to `namelen` readable bytes.
pub unsafe fn bind(s: u64, name: *const c_void, namelen: i32) -> i32 {
    trace_call!("Bind", s, name, namelen);
    let Some(st) = registry().get(s) else {
        return fail(WSAENOTSOCK);
    };
    if !st.bound_addr().is_empty() {
        return fail(WSAEINVAL);
    }
    let Some((ip, port)) = read_sockaddr_in(name, namelen) else {
        return fail(WSAEINVAL);
    };
    let addr = format!("{ip}:{port}");
    st.set_bound_addr(addr.clone());

    match st.kind {
        SocketKind::Dgram => {
            let Some(stack) = stack::get_stack() else {
                return fail_on(&st, WSAEHOSTUNREACH);
            };
            match stack.net.listen_udp(&addr) {
                Ok(sock) => {
                    st.set_endpoint(Endpoint::Dgram(sock));
                    st.rebind_waiter();
                }
                Err(err) => return fail_on(&st, map_net_error(&err)),
            }
        }
        SocketKind::RawIcmp => {
            if st.protocol != IPPROTO_ICMP {
                return fail(WSAEPROTONOSUPPORT);
            }
            let Some(stack) = stack::get_stack() else {
                return fail_on(&st, WSAEHOSTUNREACH);
            };
            match stack.net.listen_ping(IpAddr::V4(ip)) {
                Ok(sock) => {
                    st.set_endpoint(Endpoint::Ping(sock));
                    st.rebind_waiter();
                }
                Err(err) => return fail_on(&st, map_net_error(&err)),
            }
        }
        SocketKind::Stream => {}
    }
    0
}

/// Opens the transport listener on the address recorded by bind (wildcard
/// when unbound). The backlog is advisory.
pub fn listen(s: u64, backlog: i32) -> i32 {
    trace_call!("Listen", s, backlog);
    let Some(st) = registry().get(s) else {
        return fail(WSAENOTSOCK);
    };
    let mut addr = st.bound_addr();
    if addr.is_empty() {
        addr = ":0".to_string();
    }
    let Some(stack) = stack::get_stack() else {
        return fail_on(&st, WSAEHOSTUNREACH);
    };
    match stack.net.listen_tcp(&addr, backlog.max(0) as usize) {
        Ok(listener) => {
            st.set_listener(listener);
            st.rebind_waiter();
            0
        }
        Err(err) => fail_on(&st, map_net_error(&err)),
    }
}

/// Blocks on the listener and registers a fresh handle for the accepted
/// connection. The peer address is written back when a 16-byte buffer is
/// provided.
///
/// # Safety
/// `addr`/`addrlen` must be null or valid; `*addrlen` bytes writable.
pub unsafe fn accept(s: u64, addr: *mut c_void, addrlen: *mut i32) -> u64 {
    trace_call!("Accept", s, addr, addrlen);
    let Some(st) = registry().get(s) else {
        set_last_error(WSAENOTSOCK);
        return INVALID_SOCKET;
    };
    let Some(listener) = st.listener() else {
        set_last_error(WSAENOTSOCK);
        return INVALID_SOCKET;
    };

    let conn = match listener.accept() {
        Ok(conn) => conn,
        Err(err) => {
            set_last_error(map_net_error(&err));
            return INVALID_SOCKET;
        }
    };

    let new_state = SocketState::new(st.kind, st.family, st.protocol);
    let (handle, new_state) = registry().register(new_state);
    new_state.set_endpoint(Endpoint::Stream(conn.clone()));
    new_state.rebind_waiter();

    if !addr.is_null() && !addrlen.is_null() && *addrlen >= std::mem::size_of::<SockaddrIn>() as i32
    {
        write_sockaddr_in(addr, conn.peer_addr());
        *addrlen = std::mem::size_of::<SockaddrIn>() as i32;
    }
    handle
}

/// Dials the peer: TCP for stream sockets, a connected datagram endpoint
/// for UDP, a connected ping endpoint for raw ICMP. Stored options are
/// re-applied to the fresh endpoint.
///
/// # Safety
/// `name` must point to `namelen` readable bytes.
pub unsafe fn connect(s: u64, name: *const c_void, namelen: i32) -> i32 {
    trace_call!("Connect", s, name, namelen);
    let Some(st) = registry().get(s) else {
        return fail(WSAENOTSOCK);
    };
    let Some((ip, port)) = read_sockaddr_in(name, namelen) else {
        return fail(WSAEINVAL);
    };
    let addr = format!("{ip}:{port}");
    let Some(stack) = stack::get_stack() else {
        return fail_on(&st, WSAEHOSTUNREACH);
    };

    let bound = st.bound_addr();
    let bound_opt = if bound.is_empty() {
        None
    } else {
        Some(bound.as_str())
    };

    let endpoint = match st.kind {
        SocketKind::Dgram => stack
            .net
            .dial_udp(bound_opt, &addr)
            .map(Endpoint::Dgram),
        SocketKind::RawIcmp => {
            if st.protocol != IPPROTO_ICMP {
                return fail(WSAEPROTONOSUPPORT);
            }
            let local = bound
                .split(':')
                .next()
                .and_then(|h| h.parse().ok())
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
            stack.net.dial_ping(local, IpAddr::V4(ip)).map(Endpoint::Ping)
        }
        SocketKind::Stream => stack.net.dial_tcp(bound_opt, &addr).map(Endpoint::Stream),
    };

    match endpoint {
        Ok(endpoint) => {
            st.set_endpoint(endpoint);
            st.rebind_waiter();
            // Pre-set socket options apply to the new endpoint.
            for (key, value) in st.options_snapshot() {
                options::apply_sock_opt(&st, key >> 16, key & 0xFFFF, &value);
            }
            0
        }
        Err(err) => fail_on(&st, map_net_error(&err)),
    }
}

/// Half-closes a stream; datagram and raw sockets accept and ignore the
/// call.
pub fn shutdown(s: u64, how: i32) -> i32 {
    trace_call!("Shutdown", s, how);
    let Some(st) = registry().get(s) else {
        return fail(WSAENOTSOCK);
    };
    let Some(endpoint) = st.endpoint() else {
        return fail(WSAENOTSOCK);
    };
    if let Endpoint::Stream(stream) = endpoint {
        match how {
            SD_RECEIVE => stream.close_read(),
            SD_SEND => stream.close_write(),
            SD_BOTH => {
                stream.close_read();
                stream.close_write();
            }
            _ => return fail(WSAEINVAL),
        }
    }
    0
}

/// # Safety
/// `name` must be valid for `*namelen` bytes; `namelen` writable.
pub unsafe fn getsockname(s: u64, name: *mut c_void, namelen: *mut i32) -> i32 {
    trace_call!("Getsockname", s, name, namelen);
    let Some(st) = registry().get(s) else {
        return fail(WSAENOTSOCK);
    };
    if name.is_null() || namelen.is_null() || *namelen < std::mem::size_of::<SockaddrIn>() as i32 {
        return fail(WSAEFAULT);
    }

    let local = if let Some(ep) = st.endpoint() {
        ep.local_addr()
    } else if let Some(listener) = st.listener() {
        Some(listener.local_addr())
    } else {
        let bound = st.bound_addr();
        if bound.is_empty() {
            // Unbound socket: nothing to report, and not an error.
            return 0;
        }
        klinikal_netstack::stack::parse_host_port(&bound).ok()
    };

    if let Some(local) = local {
        write_sockaddr_in(name, local);
        *namelen = std::mem::size_of::<SockaddrIn>() as i32;
    }
    0
}

/// # Safety
/// `name` must be valid for `*namelen` bytes; `namelen` writable.
pub unsafe fn getpeername(s: u64, name: *mut c_void, namelen: *mut i32) -> i32 {
    trace_call!("Getpeername", s, name, namelen);
    let Some(st) = registry().get(s) else {
        return fail(WSAENOTSOCK);
    };
    let Some(endpoint) = st.endpoint() else {
        return fail(WSAENOTSOCK);
    };
    if name.is_null() || namelen.is_null() || *namelen < std::mem::size_of::<SockaddrIn>() as i32 {
        return fail(WSAEFAULT);
    }
    let Some(peer) = endpoint.peer_addr() else {
        return fail(WSAENOTCONN);
    };
    write_sockaddr_in(name, peer);
    *namelen = std::mem::size_of::<SockaddrIn>() as i32;
    0
}

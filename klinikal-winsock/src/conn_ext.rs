//! Extended connection APIs: WSAAccept/WSAConnect delegation,
//! WSAConnectByName/WSAConnectByList with timeval timeouts, and the
//! AcceptEx/ConnectEx extension functions with stable pointers.

use std::ffi::c_void;
use std::net::IpAddr;
use std::time::Duration;

use crate::addr::{cstr_to_string, wstr_to_string};
use crate::error::{
    map_net_error, set_last_error, WSAECONNREFUSED, WSAEFAULT, WSAEHOSTUNREACH, WSAEINVAL,
    WSAENOTSOCK, WSAEOPNOTSUPP,
};
use crate::lifecycle::{self, read_sockaddr_in, write_sockaddr_in};
use crate::registry::{registry, Endpoint};
use crate::stack;
use crate::types::{SockaddrIn, Timeval};

#[repr(C)]
struct SocketAddress {
    sockaddr: *mut c_void,
    sockaddr_length: i32,
}

#[repr(C)]
struct SocketAddressList {
    address_count: i32,
    // SOCKET_ADDRESS entries follow, pointer-aligned.
}

/// Permits an incoming connection; the condition callback is not
/// supported and is ignored.
///
/// # Safety
/// As [`lifecycle::accept`].
pub unsafe fn wsa_accept(
    s: u64,
    addr: *mut c_void,
    addrlen: *mut i32,
    _condition: *const c_void,
    _callback_data: u32,
) -> u64 {
    trace_call!("WSAAccept", s, addr, addrlen);
    lifecycle::accept(s, addr, addrlen)
}

/// Establishes a connection; QOS and caller/callee data are ignored.
///
/// # Safety
/// As [`lifecycle::connect`].
pub unsafe fn wsa_connect(
    s: u64,
    name: *const c_void,
    namelen: i32,
    _caller_data: *const c_void,
    _callee_data: *mut c_void,
    _sqos: *const c_void,
    _gqos: *const c_void,
) -> i32 {
    trace_call!("WSAConnect", s, name, namelen);
    lifecycle::connect(s, name, namelen)
}

unsafe fn timeval_duration(timeout: *const Timeval) -> Option<Duration> {
    if timeout.is_null() {
        return None;
    }
    let tv = &*timeout;
    Some(
        Duration::from_secs(tv.sec.max(0) as u64) + Duration::from_micros(tv.usec.max(0) as u64),
    )
}

unsafe fn connect_by_name(
    s: u64,
    node: &str,
    service: &str,
    local_len: *mut u32,
    local: *mut c_void,
    remote_len: *mut u32,
    remote: *mut c_void,
    timeout: *const Timeval,
) -> i32 {
    let Some(st) = registry().get(s) else {
        set_last_error(WSAENOTSOCK);
        return -1;
    };
    let Some(stack) = stack::get_stack() else {
        set_last_error(WSAEHOSTUNREACH);
        return -1;
    };

    // The node may be a literal address or a name resolved through the
    // tunnel.
    let host = if node.parse::<IpAddr>().is_ok() {
        node.to_string()
    } else {
        match stack.net.lookup_host(node) {
            Ok(ips) if !ips.is_empty() => ips[0].to_string(),
            _ => {
                set_last_error(WSAEHOSTUNREACH);
                return -1;
            }
        }
    };
    let port: u16 = match service.parse() {
        Ok(p) => p,
        Err(_) => match crate::proto_svc::service_port(service, "tcp") {
            Some(p) => p,
            None => {
                set_last_error(WSAEINVAL);
                return -1;
            }
        },
    };

    let addr = format!("{host}:{port}");
    let conn = match stack.net.dial_tcp_timeout(&addr, timeval_duration(timeout)) {
        Ok(conn) => conn,
        Err(err) => {
            set_last_error(map_net_error(&err));
            return -1;
        }
    };

    if !local.is_null() && !local_len.is_null() && *local_len >= 16 {
        write_sockaddr_in(local, conn.local_addr());
        *local_len = std::mem::size_of::<SockaddrIn>() as u32;
    }
    if !remote.is_null() && !remote_len.is_null() && *remote_len >= 16 {
        write_sockaddr_in(remote, conn.peer_addr());
        *remote_len = std::mem::size_of::<SockaddrIn>() as u32;
    }

    st.set_endpoint(Endpoint::Stream(conn));
    st.rebind_waiter();
    1 // TRUE
}

/// # Safety
/// Strings must be NUL-terminated; address buffers valid or null.
pub unsafe fn wsa_connect_by_name_a(
    s: u64,
    nodename: *const u8,
    servicename: *const u8,
    local_len: *mut u32,
    local: *mut c_void,
    remote_len: *mut u32,
    remote: *mut c_void,
    timeout: *const Timeval,
    _reserved: *mut c_void,
) -> i32 {
    trace_call!("WSAConnectByNameA", s, nodename, servicename);
    let node = cstr_to_string(nodename);
    let service = cstr_to_string(servicename);
    connect_by_name(s, &node, &service, local_len, local, remote_len, remote, timeout)
}

/// # Safety
/// As the ANSI variant with wide strings.
pub unsafe fn wsa_connect_by_name_w(
    s: u64,
    nodename: *const u16,
    servicename: *const u16,
    local_len: *mut u32,
    local: *mut c_void,
    remote_len: *mut u32,
    remote: *mut c_void,
    timeout: *const Timeval,
    _reserved: *mut c_void,
) -> i32 {
    trace_call!("WSAConnectByNameW", s, nodename, servicename);
    let node = wstr_to_string(nodename);
    let service = wstr_to_string(servicename);
    connect_by_name(s, &node, &service, local_len, local, remote_len, remote, timeout)
}

/// Dials each address in the list until one connects, under one shared
/// timeout.
///
/// # Safety
/// `address_list` must point to a SOCKET_ADDRESS_LIST whose entries
/// reference readable sockaddrs.
pub unsafe fn wsa_connect_by_list(
    s: u64,
    address_list: *const c_void,
    local_len: *mut u32,
    local: *mut c_void,
    remote_len: *mut u32,
    remote: *mut c_void,
    timeout: *const Timeval,
    _reserved: *mut c_void,
) -> i32 {
    trace_call!("WSAConnectByList", s, address_list, timeout);
    let Some(st) = registry().get(s) else {
        set_last_error(WSAENOTSOCK);
        return -1;
    };
    if address_list.is_null() {
        set_last_error(WSAEFAULT);
        return -1;
    }
    let list = &*(address_list as *const SocketAddressList);
    let count = list.address_count;
    if count <= 0 {
        set_last_error(WSAEINVAL);
        return -1;
    }

    // The entry array follows the count, aligned for its pointer member.
    let align = std::mem::align_of::<SocketAddress>();
    let base = (address_list as usize + std::mem::size_of::<i32>() + align - 1) & !(align - 1);
    let entries = std::slice::from_raw_parts(base as *const SocketAddress, count as usize);

    let Some(stack) = stack::get_stack() else {
        set_last_error(WSAEHOSTUNREACH);
        return -1;
    };
    let duration = timeval_duration(timeout);

    let mut last_error = None;
    for entry in entries {
        if entry.sockaddr.is_null() || entry.sockaddr_length < 16 {
            continue;
        }
        let Some((ip, port)) = read_sockaddr_in(entry.sockaddr, entry.sockaddr_length) else {
            continue;
        };
        match stack.net.dial_tcp_timeout(&format!("{ip}:{port}"), duration) {
            Ok(conn) => {
                if !local.is_null() && !local_len.is_null() && *local_len >= 16 {
                    write_sockaddr_in(local, conn.local_addr());
                    *local_len = std::mem::size_of::<SockaddrIn>() as u32;
                }
                if !remote.is_null() && !remote_len.is_null() && *remote_len >= 16 {
                    write_sockaddr_in(remote, conn.peer_addr());
                    *remote_len = std::mem::size_of::<SockaddrIn>() as u32;
                }
                st.set_endpoint(Endpoint::Stream(conn));
                st.rebind_waiter();
                return 1;
            }
            Err(err) => last_error = Some(err),
        }
    }

    match last_error {
        Some(err) => set_last_error(map_net_error(&err)),
        None => set_last_error(WSAECONNREFUSED),
    }
    -1
}

/// AcceptEx body: reported unsupported, but the pointer handed out by
/// WSAIoctl stays stable for the process lifetime.
///
/// # Safety
/// Nothing is dereferenced.
pub unsafe extern "system" fn accept_ex(
    _listen_socket: u64,
    _accept_socket: u64,
    _output_buffer: *mut c_void,
    _receive_data_length: u32,
    _local_address_length: u32,
    _remote_address_length: u32,
    _bytes_received: *mut u32,
    _overlapped: *mut c_void,
) -> i32 {
    trace_call!("AcceptEx");
    set_last_error(WSAEOPNOTSUPP);
    0 // FALSE
}

/// ConnectEx body; same pointer-stability contract as [`accept_ex`].
///
/// # Safety
/// Nothing is dereferenced.
pub unsafe extern "system" fn connect_ex(
    _s: u64,
    _name: *const c_void,
    _namelen: i32,
    _send_buffer: *mut c_void,
    _send_data_length: u32,
    _bytes_sent: *mut u32,
    _overlapped: *mut c_void,
) -> i32 {
    trace_call!("ConnectEx");
    set_last_error(WSAEOPNOTSUPP);
    0 // FALSE
}

pub(crate) fn accept_ex_ptr() -> usize {
    accept_ex as usize
}

pub(crate) fn connect_ex_ptr() -> usize {
    connect_ex as usize
}

//! Socket option dispatch: the store-then-apply model, computed reads for
//! SO_ERROR and SO_TYPE, ioctlsocket and the WSAIoctl surface.

use std::ffi::c_void;
use std::time::Duration;

use crate::conn_ext;
use crate::error::{set_last_error, WSAEFAULT, WSAEINVAL, WSAENOTSOCK, WSAEOPNOTSUPP};
use crate::registry::{registry, Endpoint, SocketKind, SocketState};
use crate::types::{Linger, SOCK_DGRAM, SOCK_STREAM};

pub const SOL_SOCKET: i32 = 0xFFFF;
pub const IPPROTO_IP_LEVEL: i32 = 0;
pub const IPPROTO_TCP_LEVEL: i32 = 6;

pub const SO_REUSEADDR: i32 = 0x0004;
pub const SO_KEEPALIVE: i32 = 0x0008;
pub const SO_BROADCAST: i32 = 0x0020;
pub const SO_LINGER: i32 = 0x0080;
pub const SO_SNDBUF: i32 = 0x1001;
pub const SO_RCVBUF: i32 = 0x1002;
pub const SO_SNDTIMEO: i32 = 0x1005;
pub const SO_RCVTIMEO: i32 = 0x1006;
pub const SO_ERROR: i32 = 0x1007;
pub const SO_TYPE: i32 = 0x1008;

pub const IP_TOS: i32 = 3;

pub const TCP_NODELAY: i32 = 0x0001;
pub const TCP_MAXSEG: i32 = 0x0002;

pub const FIONBIO: u32 = 0x8004_667E;
pub const FIONREAD: u32 = 0x4004_667F;
pub const SIOCATMARK: u32 = 0x4004_7307;

pub const SIO_GET_EXTENSION_FUNCTION_POINTER: u32 = 0xC800_0006;
pub const SIO_KEEPALIVE_VALS: u32 = 0x9800_0004;

pub const WSAID_ACCEPTEX: [u8; 16] = [
    0xb5, 0x36, 0x7d, 0xb5, 0x9d, 0xd5, 0x11, 0xd0, 0x8f, 0x78, 0x00, 0xc0, 0x4f, 0xd9, 0x33,
    0x8d,
];
pub const WSAID_CONNECTEX: [u8; 16] = [
    0x25, 0xa2, 0x07, 0xb9, 0xdd, 0xf3, 0x46, 0x60, 0x8e, 0xe9, 0x76, 0xe5, 0x8c, 0x74, 0x06,
    0x3e,
];

/// Pack (level, optname) into the per-socket option-map key.
pub fn opt_key(level: i32, optname: i32) -> i32 {
    (level << 16) | (optname & 0xFFFF)
}

fn le_u32(val: &[u8]) -> Option<u32> {
    val.get(..4).map(|b| u32::from_le_bytes(b.try_into().unwrap()))
}

/// Apply a stored option to the live endpoint, when one exists and the
/// option has an effect there.
pub(crate) fn apply_sock_opt(st: &SocketState, level: i32, optname: i32, val: &[u8]) {
    let endpoint = st.endpoint();
    match level {
        SOL_SOCKET => apply_sol_socket(st, endpoint.as_ref(), optname, val),
        IPPROTO_IP_LEVEL => apply_ip(endpoint.as_ref(), optname, val),
        IPPROTO_TCP_LEVEL => apply_tcp(endpoint.as_ref(), optname, val),
        _ => {}
    }
}

fn apply_sol_socket(
    _st: &SocketState,
    endpoint: Option<&Endpoint>,
    optname: i32,
    val: &[u8],
) {
    let Some(endpoint) = endpoint else {
        return;
    };
    match optname {
        SO_KEEPALIVE => {
            if let (Some(v), Endpoint::Stream(stream)) = (le_u32(val), endpoint) {
                stream.set_keepalive(v != 0);
            }
        }
        SO_LINGER => {
            if val.len() >= std::mem::size_of::<Linger>() {
                if let Endpoint::Stream(stream) = endpoint {
                    let lo = Linger {
                        onoff: u16::from_le_bytes([val[0], val[1]]),
                        linger: u16::from_le_bytes([val[2], val[3]]),
                    };
                    if lo.onoff != 0 {
                        stream.set_linger(Some(lo.linger));
                    } else {
                        stream.set_linger(None);
                    }
                }
            }
        }
        SO_RCVTIMEO => {
            if let Some(ms) = le_u32(val) {
                let timeout = (ms > 0).then(|| Duration::from_millis(u64::from(ms)));
                endpoint.set_read_timeout(timeout);
            }
        }
        SO_SNDTIMEO => {
            if let Some(ms) = le_u32(val) {
                let timeout = (ms > 0).then(|| Duration::from_millis(u64::from(ms)));
                endpoint.set_write_timeout(timeout);
            }
        }
        SO_RCVBUF => {
            if let Some(size) = le_u32(val) {
                match endpoint {
                    Endpoint::Stream(stream) => stream.set_recv_buffer(size as usize),
                    Endpoint::Dgram(sock) => sock.set_recv_buffer(size as usize),
                    Endpoint::Ping(_) => {}
                }
            }
        }
        SO_SNDBUF => {
            if let (Some(size), Endpoint::Stream(stream)) = (le_u32(val), endpoint) {
                stream.set_send_buffer(size as usize);
            }
        }
        SO_BROADCAST => {
            if let (Some(v), Endpoint::Dgram(sock)) = (le_u32(val), endpoint) {
                sock.set_broadcast(v != 0);
            }
        }
        // Stored for listen-time use; no live endpoint action.
        SO_REUSEADDR => {}
        _ => {}
    }
}

fn apply_ip(endpoint: Option<&Endpoint>, optname: i32, val: &[u8]) {
    if optname != IP_TOS {
        return;
    }
    let (Some(tos), Some(endpoint)) = (le_u32(val), endpoint) else {
        return;
    };
    match endpoint {
        Endpoint::Stream(stream) => stream.set_tos(tos),
        Endpoint::Dgram(sock) => sock.set_tos(tos),
        Endpoint::Ping(sock) => sock.set_tos(tos),
    }
}

fn apply_tcp(endpoint: Option<&Endpoint>, optname: i32, val: &[u8]) {
    let Some(Endpoint::Stream(stream)) = endpoint else {
        return;
    };
    match optname {
        TCP_NODELAY => {
            if let Some(v) = le_u32(val) {
                stream.set_nodelay(v != 0);
            }
        }
        TCP_MAXSEG => {
            if let Some(mss) = le_u32(val) {
                stream.set_mss(mss as usize);
            }
        }
        _ => {}
    }
}

/// Stores the raw option bytes and applies them to the live endpoint;
/// connect re-applies the whole map to fresh endpoints.
///
/// # Safety
/// `optval` must be valid for `optlen` bytes.
pub unsafe fn setsockopt(
    s: u64,
    level: i32,
    optname: i32,
    optval: *const c_void,
    optlen: i32,
) -> i32 {
    trace_call!("Setsockopt", s, level, optname, optval, optlen);
    let Some(st) = registry().get(s) else {
        set_last_error(WSAENOTSOCK);
        return -1;
    };
    if optval.is_null() || optlen <= 0 {
        set_last_error(WSAEFAULT);
        return -1;
    }
    let raw = std::slice::from_raw_parts(optval as *const u8, optlen as usize).to_vec();
    st.store_option(opt_key(level, optname), raw.clone());
    apply_sock_opt(&st, level, optname, &raw);
    0
}

/// SO_ERROR and SO_TYPE are computed; everything else reads back the
/// stored bytes, zero-filled when the option was never set.
///
/// # Safety
/// `optval` must be valid for `*optlen` bytes; `optlen` writable.
pub unsafe fn getsockopt(
    s: u64,
    level: i32,
    optname: i32,
    optval: *mut c_void,
    optlen: *mut i32,
) -> i32 {
    trace_call!("Getsockopt", s, level, optname, optval, optlen);
    let Some(st) = registry().get(s) else {
        set_last_error(WSAENOTSOCK);
        return -1;
    };
    if optval.is_null() || optlen.is_null() {
        set_last_error(WSAEFAULT);
        return -1;
    }

    if level == SOL_SOCKET && optname == SO_ERROR {
        if *optlen >= 4 {
            *(optval as *mut i32) = st.take_socket_error();
            *optlen = 4;
        }
        return 0;
    }
    if level == SOL_SOCKET && optname == SO_TYPE {
        if *optlen >= 4 {
            let ty = if st.kind == SocketKind::Dgram {
                SOCK_DGRAM
            } else {
                SOCK_STREAM
            };
            *(optval as *mut i32) = ty;
            *optlen = 4;
        }
        return 0;
    }

    let out = std::slice::from_raw_parts_mut(optval as *mut u8, (*optlen).max(0) as usize);
    match st.option(opt_key(level, optname)) {
        Some(raw) => {
            let n = out.len().min(raw.len());
            out[..n].copy_from_slice(&raw[..n]);
            *optlen = n as i32;
        }
        None => out.fill(0),
    }
    0
}

/// FIONBIO toggles non-blocking mode; FIONREAD reports what the peek path
/// has buffered; SIOCATMARK always reports "not at mark".
///
/// # Safety
/// `argp` must be null or a valid u32 pointer.
pub unsafe fn ioctlsocket(s: u64, cmd: i32, argp: *mut u32) -> i32 {
    trace_call!("Ioctlsocket", s, cmd, argp);
    let Some(st) = registry().get(s) else {
        set_last_error(WSAENOTSOCK);
        return -1;
    };
    match cmd as u32 {
        FIONBIO => {
            if argp.is_null() {
                set_last_error(WSAEFAULT);
                return -1;
            }
            st.set_nonblocking(*argp != 0);
            0
        }
        FIONREAD => {
            if argp.is_null() {
                set_last_error(WSAEFAULT);
                return -1;
            }
            let pending = st.peek_len();
            let pending = if pending == 0 {
                st.endpoint().map_or(0, |ep| ep.pending_input())
            } else {
                pending
            };
            *argp = pending as u32;
            0
        }
        SIOCATMARK => {
            if argp.is_null() {
                set_last_error(WSAEFAULT);
                return -1;
            }
            *argp = 0;
            0
        }
        _ => 0,
    }
}

/// SIO_GET_EXTENSION_FUNCTION_POINTER resolves the AcceptEx/ConnectEx
/// GUIDs to stable process-lifetime pointers; SIO_KEEPALIVE_VALS is
/// accepted and ignored; unknown codes succeed with zero bytes returned.
///
/// # Safety
/// Buffer pointers must be valid for their stated lengths.
pub unsafe fn wsa_ioctl(
    s: u64,
    control_code: u32,
    in_buffer: *const c_void,
    in_len: u32,
    out_buffer: *mut c_void,
    out_len: u32,
    bytes_returned: *mut u32,
    _overlapped: *mut c_void,
    _completion_routine: *const c_void,
) -> i32 {
    trace_call!("WSAIoctl", s, control_code, in_buffer, in_len, out_buffer, out_len);
    let Some(st) = registry().get(s) else {
        set_last_error(WSAENOTSOCK);
        return -1;
    };

    match control_code {
        SIO_GET_EXTENSION_FUNCTION_POINTER => {
            if in_buffer.is_null()
                || in_len < 16
                || out_buffer.is_null()
                || (out_len as usize) < std::mem::size_of::<usize>()
            {
                set_last_error(WSAEFAULT);
                return -1;
            }
            let guid = *(in_buffer as *const [u8; 16]);
            let ptr = if guid == WSAID_ACCEPTEX {
                conn_ext::accept_ex_ptr()
            } else if guid == WSAID_CONNECTEX {
                conn_ext::connect_ex_ptr()
            } else {
                0
            };
            if ptr == 0 {
                set_last_error(WSAEINVAL);
                return -1;
            }
            *(out_buffer as *mut usize) = ptr;
            if !bytes_returned.is_null() {
                *bytes_returned = std::mem::size_of::<usize>() as u32;
            }
            0
        }
        SIO_KEEPALIVE_VALS => {
            if !bytes_returned.is_null() {
                *bytes_returned = 0;
            }
            0
        }
        FIONBIO => {
            if !in_buffer.is_null() && in_len >= 4 {
                st.set_nonblocking(*(in_buffer as *const u32) != 0);
            }
            if !bytes_returned.is_null() {
                *bytes_returned = 0;
            }
            0
        }
        _ => {
            if !bytes_returned.is_null() {
                *bytes_returned = 0;
            }
            0
        }
    }
}

/// Namespace-provider I/O control is outside the bridge.
///
/// # Safety
/// Nothing is dereferenced.
pub unsafe fn wsa_nsp_ioctl(
    _lookup: *mut c_void,
    _control_code: u32,
    _in_buffer: *const c_void,
    _in_len: u32,
    _out_buffer: *mut c_void,
    _out_len: u32,
    _bytes_returned: *mut u32,
    _completion: *mut c_void,
) -> i32 {
    trace_call!("WSANSPIoctl");
    set_last_error(WSAEOPNOTSUPP);
    -1
}

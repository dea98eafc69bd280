//! Name resolution: getaddrinfo/freeaddrinfo with C-layout result chains,
//! getnameinfo with PTR queries over the tunnel, the static-buffer
//! gethostbyname/gethostbyaddr pair, and the wide-string variants.

use std::ffi::c_void;
use std::net::{IpAddr, SocketAddr};
use std::ptr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use crate::addr::{cstr_to_string, parse_ip, write_cstr, write_wstr, wstr_to_string};
use crate::error::{set_last_error, WSAEAFNOSUPPORT, WSAEINVAL, WSAHOST_NOT_FOUND};
use crate::proto_svc::{service_name, service_port};
use crate::stack;
use crate::types::{
    AddrInfo, Hostent, RacyCell, SockaddrIn, SockaddrIn6, AF_INET, AF_INET6, IPPROTO_TCP,
    IPPROTO_UDP, SOCK_DGRAM, SOCK_STREAM,
};

pub const AI_PASSIVE: i32 = 0x0001;
pub const AI_CANONNAME: i32 = 0x0002;
pub const AI_NUMERICHOST: i32 = 0x0004;
pub const AI_NUMERICSERV: i32 = 0x0008;

pub const NI_NOFQDN: i32 = 0x01;
pub const NI_NUMERICHOST: i32 = 0x02;
pub const NI_NAMEREQD: i32 = 0x04;
pub const NI_NUMERICSERV: i32 = 0x08;
pub const NI_DGRAM: i32 = 0x10;

// Windows EAI values.
pub const EAI_MEMORY: i32 = 8;
pub const EAI_SERVICE: i32 = 10109;
pub const EAI_NONAME: i32 = 11001;
pub const EAI_AGAIN: i32 = 11002;
pub const EAI_FAIL: i32 = 11003;

const PTR_TIMEOUT: Duration = Duration::from_secs(2);

/// One getaddrinfo result set: the node chain plus every buffer its
/// pointers reference, released as a unit by freeaddrinfo.
struct AddrInfoBundle {
    nodes: Box<[AddrInfo]>,
    _v4: Box<[SockaddrIn]>,
    _v6: Box<[SockaddrIn6]>,
    _canon: Option<Box<[u8]>>,
    wide_canon: Option<Box<[u16]>>,
}

// SAFETY: the raw pointers inside only reference the bundle's own boxed
// storage, which lives exactly as long as the bundle.
unsafe impl Send for AddrInfoBundle {}
unsafe impl Sync for AddrInfoBundle {}

static BUNDLES: Lazy<DashMap<usize, AddrInfoBundle>> = Lazy::new(DashMap::new);

fn blank_addrinfo() -> AddrInfo {
    AddrInfo {
        flags: 0,
        family: 0,
        socktype: 0,
        protocol: 0,
        addrlen: 0,
        canonname: ptr::null_mut(),
        addr: ptr::null_mut(),
        next: ptr::null_mut(),
    }
}

/// Resolves node+service into a linked addrinfo chain.
///
/// # Safety
/// `node`/`service` must be null or NUL-terminated; `hints` null or a
/// valid addrinfo; `res` a valid out-pointer.
pub unsafe fn getaddrinfo(
    node: *const u8,
    service: *const u8,
    hints: *const c_void,
    res: *mut *mut c_void,
) -> i32 {
    trace_call!("Getaddrinfo", node, service, hints, res);
    if res.is_null() {
        return EAI_FAIL;
    }
    *res = ptr::null_mut();

    let (h_flags, h_family, h_socktype, h_protocol) = if hints.is_null() {
        (0, 0, 0, 0)
    } else {
        let h = &*(hints as *const AddrInfo);
        (h.flags, h.family, h.socktype, h.protocol)
    };

    // Service → port.
    let mut port = 0u16;
    if !service.is_null() {
        let svc = cstr_to_string(service);
        if let Ok(p) = svc.parse::<u16>() {
            port = p;
        } else if h_flags & AI_NUMERICSERV != 0 {
            return EAI_SERVICE;
        } else {
            let proto = if h_socktype == SOCK_DGRAM { "udp" } else { "tcp" };
            match service_port(&svc, proto) {
                Some(p) => port = p,
                None => return EAI_SERVICE,
            }
        }
    }

    // Node → addresses.
    let mut ips: Vec<IpAddr> = Vec::new();
    if node.is_null() {
        if h_flags & AI_PASSIVE != 0 {
            if h_family == 0 || h_family == AF_INET {
                ips.push("0.0.0.0".parse().unwrap());
            }
            if h_family == 0 || h_family == AF_INET6 {
                ips.push("::".parse().unwrap());
            }
        } else {
            if h_family == 0 || h_family == AF_INET {
                ips.push("127.0.0.1".parse().unwrap());
            }
            if h_family == 0 || h_family == AF_INET6 {
                ips.push("::1".parse().unwrap());
            }
        }
    } else {
        let name = cstr_to_string(node);
        if let Some(ip) = parse_ip(&name) {
            ips.push(ip);
        } else if h_flags & AI_NUMERICHOST != 0 {
            return EAI_NONAME;
        } else {
            let Some(stack) = stack::get_stack() else {
                return EAI_AGAIN;
            };
            match stack.net.lookup_host(&name) {
                Ok(resolved) => ips.extend(resolved),
                Err(_) => return EAI_NONAME,
            }
        }
    }

    if h_family != 0 {
        ips.retain(|ip| match ip {
            IpAddr::V4(_) => h_family == AF_INET,
            IpAddr::V6(_) => h_family == AF_INET6,
        });
    }
    if ips.is_empty() {
        return EAI_NONAME;
    }

    // Socktype/protocol pairs.
    let pairs: Vec<(i32, i32)> = if h_socktype != 0 {
        let proto = if h_protocol != 0 {
            h_protocol
        } else if h_socktype == SOCK_STREAM {
            IPPROTO_TCP
        } else if h_socktype == SOCK_DGRAM {
            IPPROTO_UDP
        } else {
            0
        };
        vec![(h_socktype, proto)]
    } else {
        vec![(SOCK_STREAM, IPPROTO_TCP), (SOCK_DGRAM, IPPROTO_UDP)]
    };

    let n4 = ips.iter().filter(|ip| ip.is_ipv4()).count();
    let n6 = ips.len() - n4;
    let total = ips.len() * pairs.len();

    let mut nodes = vec![blank_addrinfo(); total].into_boxed_slice();
    let mut v4 = vec![
        SockaddrIn {
            family: 0,
            port: 0,
            addr: [0; 4],
            zero: [0; 8],
        };
        n4 * pairs.len()
    ]
    .into_boxed_slice();
    let mut v6 = vec![
        SockaddrIn6 {
            family: 0,
            port: 0,
            flowinfo: 0,
            addr: [0; 16],
            scope_id: 0,
        };
        n6 * pairs.len()
    ]
    .into_boxed_slice();

    let net_port = port.to_be();
    let mut idx = 0usize;
    let mut i4 = 0usize;
    let mut i6 = 0usize;
    for ip in &ips {
        for &(socktype, protocol) in &pairs {
            let info = &mut nodes[idx];
            info.flags = h_flags;
            info.socktype = socktype;
            info.protocol = protocol;
            match ip {
                IpAddr::V4(v4addr) => {
                    let sa = &mut v4[i4];
                    sa.family = AF_INET as u16;
                    sa.port = net_port;
                    sa.addr = v4addr.octets();
                    info.family = AF_INET;
                    info.addr = sa as *mut SockaddrIn as *mut c_void;
                    info.addrlen = std::mem::size_of::<SockaddrIn>();
                    i4 += 1;
                }
                IpAddr::V6(v6addr) => {
                    let sa = &mut v6[i6];
                    sa.family = AF_INET6 as u16;
                    sa.port = net_port;
                    sa.addr = v6addr.octets();
                    info.family = AF_INET6;
                    info.addr = sa as *mut SockaddrIn6 as *mut c_void;
                    info.addrlen = std::mem::size_of::<SockaddrIn6>();
                    i6 += 1;
                }
            }
            idx += 1;
        }
    }
    // Chain the nodes; the last one terminates the list.
    for i in 1..total {
        let next = &mut nodes[i] as *mut AddrInfo;
        nodes[i - 1].next = next;
    }

    let canon = if h_flags & AI_CANONNAME != 0 && !node.is_null() {
        let text = cstr_to_string(node);
        let mut bytes = text.trim_end_matches('.').as_bytes().to_vec();
        bytes.push(0);
        let boxed = bytes.into_boxed_slice();
        nodes[0].canonname = boxed.as_ptr() as *mut u8;
        Some(boxed)
    } else {
        None
    };

    let first = nodes.as_ptr() as *mut c_void;
    BUNDLES.insert(
        first as usize,
        AddrInfoBundle {
            nodes,
            _v4: v4,
            _v6: v6,
            _canon: canon,
            wide_canon: None,
        },
    );
    *res = first;
    0
}

/// Releases a result chain and every buffer behind it.
///
/// # Safety
/// `ai` must be null or a pointer previously returned through `res`.
pub unsafe fn freeaddrinfo(ai: *mut c_void) {
    trace_call!("Freeaddrinfo", ai);
    if ai.is_null() {
        return;
    }
    BUNDLES.remove(&(ai as usize));
}

/// Wide-string getaddrinfo; the canonical name is re-encoded to UTF-16 and
/// kept alive alongside the bundle.
///
/// # Safety
/// As [`getaddrinfo`] with wide strings.
pub unsafe fn get_addr_info_w(
    node: *const u16,
    service: *const u16,
    hints: *const c_void,
    res: *mut *mut c_void,
) -> i32 {
    trace_call!("GetAddrInfoW", node, service, hints, res);
    let node_buf = (!node.is_null()).then(|| {
        let mut b = wstr_to_string(node).into_bytes();
        b.push(0);
        b
    });
    let service_buf = (!service.is_null()).then(|| {
        let mut b = wstr_to_string(service).into_bytes();
        b.push(0);
        b
    });

    let rc = getaddrinfo(
        node_buf.as_ref().map_or(ptr::null(), |b| b.as_ptr()),
        service_buf.as_ref().map_or(ptr::null(), |b| b.as_ptr()),
        hints,
        res,
    );
    if rc != 0 || (*res).is_null() {
        return rc;
    }

    let key = *res as usize;
    if let Some(mut bundle) = BUNDLES.get_mut(&key) {
        let first = bundle.nodes.as_mut_ptr();
        if !(*first).canonname.is_null() {
            let canon = cstr_to_string((*first).canonname);
            let mut wide: Vec<u16> = canon.encode_utf16().collect();
            wide.push(0);
            let boxed = wide.into_boxed_slice();
            (*first).canonname = boxed.as_ptr() as *mut u8;
            bundle.wide_canon = Some(boxed);
        }
    }
    0
}

/// # Safety
/// As [`freeaddrinfo`].
pub unsafe fn free_addr_info_w(ai: *mut c_void) {
    trace_call!("FreeAddrInfoW", ai);
    freeaddrinfo(ai);
}

fn reverse_name(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.{}.in-addr.arpa.", o[3], o[2], o[1], o[0])
        }
        IpAddr::V6(v6) => {
            let mut out = String::with_capacity(74);
            for byte in v6.octets().iter().rev() {
                out.push_str(&format!("{:x}.{:x}.", byte & 0xF, byte >> 4));
            }
            out.push_str("ip6.arpa.");
            out
        }
    }
}

/// Reverse lookup over the tunnel: one PTR query to each configured DNS
/// server with a 2-second deadline, first answer wins.
pub(crate) fn lookup_ptr(ip: IpAddr) -> Option<String> {
    let stack = stack::get_stack()?;
    let servers = stack.dns.clone();
    if servers.is_empty() {
        return None;
    }
    let qname = Name::from_utf8(&reverse_name(ip)).ok()?;
    let mut msg = Message::new();
    msg.set_id(rand::random::<u16>())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(qname, RecordType::PTR));
    let wire = msg.to_vec().ok()?;

    for server in servers {
        let Ok(sock) = stack
            .net
            .dial_udp(None, &SocketAddr::new(server, 53).to_string())
        else {
            continue;
        };
        if sock.send(&wire).is_err() {
            sock.close();
            continue;
        }
        let mut buf = vec![0u8; 2048];
        let deadline = Some(Instant::now() + PTR_TIMEOUT);
        let n = match sock.recv_deadline(&mut buf, deadline) {
            Ok(n) => n,
            Err(err) => {
                debug!(%server, %err, "ptr query failed");
                sock.close();
                continue;
            }
        };
        sock.close();

        let Ok(resp) = Message::from_vec(&buf[..n]) else {
            continue;
        };
        if resp.response_code() != ResponseCode::NoError {
            continue;
        }
        for record in resp.answers() {
            if let Some(RData::PTR(name)) = record.data() {
                let text = name.to_utf8();
                return Some(text.trim_end_matches('.').to_string());
            }
        }
    }
    None
}

/// Resolves a sockaddr into host and service strings; the host side issues
/// a PTR query unless numeric output is requested.
///
/// # Safety
/// `sa` must point to a sockaddr of `salen` bytes; output buffers must be
/// valid for their stated capacities.
pub unsafe fn getnameinfo(
    sa: *const c_void,
    _salen: i32,
    host: *mut u8,
    hostlen: u32,
    serv: *mut u8,
    servlen: u32,
    flags: i32,
) -> i32 {
    trace_call!("Getnameinfo", sa, _salen, host, hostlen, serv, servlen, flags);
    if sa.is_null() {
        return EAI_FAIL;
    }
    let family = i32::from(*(sa as *const u16));
    let (ip, port): (IpAddr, u16) = match family {
        AF_INET => {
            let sin = &*(sa as *const SockaddrIn);
            (IpAddr::from(sin.addr), u16::from_be(sin.port))
        }
        AF_INET6 => {
            let sin6 = &*(sa as *const SockaddrIn6);
            (IpAddr::from(sin6.addr), u16::from_be(sin6.port))
        }
        _ => return EAI_FAIL,
    };

    if !host.is_null() && hostlen > 0 {
        let text = if flags & NI_NUMERICHOST != 0 {
            ip.to_string()
        } else {
            match lookup_ptr(ip) {
                Some(name) => name,
                None if flags & NI_NAMEREQD != 0 => return EAI_NONAME,
                None => ip.to_string(),
            }
        };
        if !write_cstr(host, hostlen as usize, &text) {
            return EAI_MEMORY;
        }
    }

    if !serv.is_null() && servlen > 0 {
        let text = if flags & NI_NUMERICSERV != 0 {
            port.to_string()
        } else {
            let proto = if flags & NI_DGRAM != 0 { "udp" } else { "tcp" };
            service_name(port, proto)
                .map(str::to_string)
                .unwrap_or_else(|| port.to_string())
        };
        if !write_cstr(serv, servlen as usize, &text) {
            return EAI_MEMORY;
        }
    }
    0
}

/// Wide-string getnameinfo via the narrow path.
///
/// # Safety
/// As [`getnameinfo`] with wide output buffers.
pub unsafe fn get_name_info_w(
    sa: *const c_void,
    salen: i32,
    host: *mut u16,
    hostlen: u32,
    serv: *mut u16,
    servlen: u32,
    flags: i32,
) -> i32 {
    trace_call!("GetNameInfoW", sa, salen, host, hostlen, serv, servlen, flags);
    let mut host_buf = [0u8; 256];
    let mut serv_buf = [0u8; 64];

    let rc = getnameinfo(
        sa,
        salen,
        if host.is_null() {
            ptr::null_mut()
        } else {
            host_buf.as_mut_ptr()
        },
        if host.is_null() { 0 } else { host_buf.len() as u32 },
        if serv.is_null() {
            ptr::null_mut()
        } else {
            serv_buf.as_mut_ptr()
        },
        if serv.is_null() { 0 } else { serv_buf.len() as u32 },
        flags,
    );
    if rc != 0 {
        return rc;
    }

    if !host.is_null() && hostlen > 0 {
        let text = cstr_to_string(host_buf.as_ptr());
        if !write_wstr(host, hostlen as usize, &text) {
            return EAI_MEMORY;
        }
    }
    if !serv.is_null() && servlen > 0 {
        let text = cstr_to_string(serv_buf.as_ptr());
        if !write_wstr(serv, servlen as usize, &text) {
            return EAI_MEMORY;
        }
    }
    0
}

// Static hostent storage, clobbered by each call per the documented
// contract.
struct HostentStorage {
    entry: Hostent,
    name: [u8; 256],
    addrs: [[u8; 16]; 16],
    addr_ptrs: [*mut u8; 17],
    aliases: [*mut u8; 1],
}

static HOSTENT_BUF: RacyCell<HostentStorage> = RacyCell::new(HostentStorage {
    entry: Hostent {
        name: ptr::null_mut(),
        aliases: ptr::null_mut(),
        addrtype: 0,
        length: 0,
        addr_list: ptr::null_mut(),
    },
    name: [0; 256],
    addrs: [[0; 16]; 16],
    addr_ptrs: [ptr::null_mut(); 17],
    aliases: [ptr::null_mut(); 1],
});

static HOSTENT_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn fill_hostent(name: &str, family: i32, addrs: &[Vec<u8>]) -> *mut c_void {
    let _guard = HOSTENT_LOCK.lock();
    unsafe {
        let storage = &mut *HOSTENT_BUF.get();
        storage.name.fill(0);
        let n = name.len().min(storage.name.len() - 1);
        storage.name[..n].copy_from_slice(&name.as_bytes()[..n]);
        storage.entry.name = storage.name.as_mut_ptr();

        storage.aliases[0] = ptr::null_mut();
        storage.entry.aliases = storage.aliases.as_mut_ptr();

        storage.entry.addrtype = family as i16;
        storage.entry.length = addrs.first().map_or(4, |a| a.len()) as i16;

        let count = addrs.len().min(16);
        for (i, addr) in addrs.iter().take(count).enumerate() {
            storage.addrs[i][..addr.len()].copy_from_slice(addr);
            storage.addr_ptrs[i] = storage.addrs[i].as_mut_ptr();
        }
        storage.addr_ptrs[count] = ptr::null_mut();
        storage.entry.addr_list = storage.addr_ptrs.as_mut_ptr();

        &mut storage.entry as *mut Hostent as *mut c_void
    }
}

/// Forward lookup into the static hostent buffer: IPv4 results only, up to
/// 16 addresses.
///
/// # Safety
/// `name` must be null or NUL-terminated.
pub unsafe fn gethostbyname(name: *const u8) -> *mut c_void {
    trace_call!("Gethostbyname", name);
    if name.is_null() {
        set_last_error(WSAEINVAL);
        return ptr::null_mut();
    }
    let hostname = cstr_to_string(name);

    let mut addrs: Vec<Vec<u8>> = Vec::new();
    if let Some(ip) = parse_ip(&hostname) {
        if let IpAddr::V4(v4) = ip {
            addrs.push(v4.octets().to_vec());
        }
    } else {
        let Some(stack) = stack::get_stack() else {
            set_last_error(WSAHOST_NOT_FOUND);
            return ptr::null_mut();
        };
        match stack.net.lookup_host(&hostname) {
            Ok(resolved) => {
                for ip in resolved {
                    if let IpAddr::V4(v4) = ip {
                        addrs.push(v4.octets().to_vec());
                    }
                }
            }
            Err(_) => {
                set_last_error(WSAHOST_NOT_FOUND);
                return ptr::null_mut();
            }
        }
    }

    if addrs.is_empty() {
        set_last_error(WSAHOST_NOT_FOUND);
        return ptr::null_mut();
    }
    fill_hostent(&hostname, AF_INET, &addrs)
}

/// Reverse lookup into the static hostent buffer.
///
/// # Safety
/// `addr` must point to `len` readable bytes.
pub unsafe fn gethostbyaddr(addr: *const u8, len: i32, family: i32) -> *mut c_void {
    trace_call!("Gethostbyaddr", addr, len, family);
    if addr.is_null() {
        set_last_error(WSAEINVAL);
        return ptr::null_mut();
    }
    let ip: IpAddr = if family == AF_INET && len == 4 {
        let mut octets = [0u8; 4];
        octets.copy_from_slice(std::slice::from_raw_parts(addr, 4));
        IpAddr::from(octets)
    } else if family == AF_INET6 && len == 16 {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(std::slice::from_raw_parts(addr, 16));
        IpAddr::from(octets)
    } else {
        set_last_error(WSAEAFNOSUPPORT);
        return ptr::null_mut();
    };

    let Some(hostname) = lookup_ptr(ip) else {
        set_last_error(WSAHOST_NOT_FOUND);
        return ptr::null_mut();
    };

    let bytes = match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    };
    fill_hostent(&hostname, family, &[bytes])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_names() {
        assert_eq!(
            reverse_name("192.0.2.5".parse().unwrap()),
            "5.2.0.192.in-addr.arpa."
        );
        let v6 = reverse_name("::1".parse().unwrap());
        assert!(v6.ends_with("ip6.arpa."));
        assert!(v6.starts_with("1.0.0.0."));
    }

    #[test]
    fn numeric_getaddrinfo_builds_chain() {
        unsafe {
            let mut res: *mut c_void = ptr::null_mut();
            let rc = getaddrinfo(
                b"192.0.2.7\0".as_ptr(),
                b"443\0".as_ptr(),
                ptr::null(),
                &mut res,
            );
            assert_eq!(rc, 0);
            assert!(!res.is_null());

            // No socktype hint: one STREAM/TCP and one DGRAM/UDP node.
            let first = &*(res as *const AddrInfo);
            assert_eq!(first.family, AF_INET);
            assert_eq!(first.socktype, SOCK_STREAM);
            assert_eq!(first.protocol, IPPROTO_TCP);
            assert_eq!(first.addrlen, std::mem::size_of::<SockaddrIn>());
            let sin = &*(first.addr as *const SockaddrIn);
            assert_eq!(sin.addr, [192, 0, 2, 7]);
            assert_eq!(u16::from_be(sin.port), 443);

            let second = &*first.next;
            assert_eq!(second.socktype, SOCK_DGRAM);
            assert_eq!(second.protocol, IPPROTO_UDP);
            assert!(second.next.is_null());

            freeaddrinfo(res);
        }
    }

    #[test]
    fn passive_null_node_is_wildcard() {
        unsafe {
            let hints = AddrInfo {
                flags: AI_PASSIVE,
                family: AF_INET,
                socktype: SOCK_STREAM,
                protocol: 0,
                addrlen: 0,
                canonname: ptr::null_mut(),
                addr: ptr::null_mut(),
                next: ptr::null_mut(),
            };
            let mut res: *mut c_void = ptr::null_mut();
            let rc = getaddrinfo(
                ptr::null(),
                b"80\0".as_ptr(),
                &hints as *const _ as *const c_void,
                &mut res,
            );
            assert_eq!(rc, 0);
            let first = &*(res as *const AddrInfo);
            let sin = &*(first.addr as *const SockaddrIn);
            assert_eq!(sin.addr, [0, 0, 0, 0]);
            assert!(first.next.is_null());
            freeaddrinfo(res);
        }
    }

    #[test]
    fn canonname_is_attached_and_trimmed() {
        unsafe {
            let hints = AddrInfo {
                flags: AI_CANONNAME | AI_NUMERICHOST,
                family: 0,
                socktype: SOCK_STREAM,
                protocol: 0,
                addrlen: 0,
                canonname: ptr::null_mut(),
                addr: ptr::null_mut(),
                next: ptr::null_mut(),
            };
            let mut res: *mut c_void = ptr::null_mut();
            let rc = getaddrinfo(
                b"10.0.0.9.\0".as_ptr(),
                ptr::null(),
                &hints as *const _ as *const c_void,
                &mut res,
            );
            // The trailing dot keeps this from parsing as numeric.
            assert_eq!(rc, EAI_NONAME);

            let rc = getaddrinfo(
                b"10.0.0.9\0".as_ptr(),
                ptr::null(),
                &hints as *const _ as *const c_void,
                &mut res,
            );
            assert_eq!(rc, 0);
            let first = &*(res as *const AddrInfo);
            assert!(!first.canonname.is_null());
            assert_eq!(cstr_to_string(first.canonname), "10.0.0.9");
            freeaddrinfo(res);
        }
    }

    #[test]
    fn numeric_serv_flag_rejects_names() {
        unsafe {
            let hints = AddrInfo {
                flags: AI_NUMERICSERV,
                family: 0,
                socktype: 0,
                protocol: 0,
                addrlen: 0,
                canonname: ptr::null_mut(),
                addr: ptr::null_mut(),
                next: ptr::null_mut(),
            };
            let mut res: *mut c_void = ptr::null_mut();
            let rc = getaddrinfo(
                b"127.0.0.1\0".as_ptr(),
                b"https\0".as_ptr(),
                &hints as *const _ as *const c_void,
                &mut res,
            );
            assert_eq!(rc, EAI_SERVICE);
        }
    }

    #[test]
    fn getnameinfo_numeric_paths() {
        unsafe {
            let sin = SockaddrIn {
                family: AF_INET as u16,
                port: 443u16.to_be(),
                addr: [203, 0, 113, 9],
                zero: [0; 8],
            };
            let mut host = [0u8; 64];
            let mut serv = [0u8; 32];
            let rc = getnameinfo(
                &sin as *const _ as *const c_void,
                16,
                host.as_mut_ptr(),
                64,
                serv.as_mut_ptr(),
                32,
                NI_NUMERICHOST,
            );
            assert_eq!(rc, 0);
            assert_eq!(cstr_to_string(host.as_ptr()), "203.0.113.9");
            // Port 443/tcp resolves through the service table.
            assert_eq!(cstr_to_string(serv.as_ptr()), "https");

            let rc = getnameinfo(
                &sin as *const _ as *const c_void,
                16,
                host.as_mut_ptr(),
                64,
                serv.as_mut_ptr(),
                32,
                NI_NUMERICHOST | NI_NUMERICSERV,
            );
            assert_eq!(rc, 0);
            assert_eq!(cstr_to_string(serv.as_ptr()), "443");

            // A too-small host buffer reports memory exhaustion.
            let rc = getnameinfo(
                &sin as *const _ as *const c_void,
                16,
                host.as_mut_ptr(),
                4,
                ptr::null_mut(),
                0,
                NI_NUMERICHOST,
            );
            assert_eq!(rc, EAI_MEMORY);
        }
    }

    #[test]
    fn gethostbyname_numeric_fills_static_buffer() {
        unsafe {
            let he = gethostbyname(b"198.51.100.4\0".as_ptr()) as *mut Hostent;
            assert!(!he.is_null());
            assert_eq!((*he).addrtype, AF_INET as i16);
            assert_eq!((*he).length, 4);
            let first = *(*he).addr_list;
            assert!(!first.is_null());
            assert_eq!(std::slice::from_raw_parts(first, 4), &[198, 51, 100, 4]);
            // Single-address list is null-terminated.
            assert!((*(*he).addr_list.add(1)).is_null());
            assert_eq!(cstr_to_string((*he).name), "198.51.100.4");
        }
    }

    #[test]
    fn wide_variants_transcode() {
        unsafe {
            let node: Vec<u16> = "10.1.2.3\0".encode_utf16().collect();
            let mut res: *mut c_void = ptr::null_mut();
            let rc = get_addr_info_w(node.as_ptr(), ptr::null(), ptr::null(), &mut res);
            assert_eq!(rc, 0);
            let first = &*(res as *const AddrInfo);
            let sin = &*(first.addr as *const SockaddrIn);
            assert_eq!(sin.addr, [10, 1, 2, 3]);
            free_addr_info_w(res);

            let sin = SockaddrIn {
                family: AF_INET as u16,
                port: 80u16.to_be(),
                addr: [10, 1, 2, 3],
                zero: [0; 8],
            };
            let mut whost = [0u16; 64];
            let rc = get_name_info_w(
                &sin as *const _ as *const c_void,
                16,
                whost.as_mut_ptr(),
                64,
                ptr::null_mut(),
                0,
                NI_NUMERICHOST,
            );
            assert_eq!(rc, 0);
            let len = whost.iter().position(|&c| c == 0).unwrap();
            assert_eq!(String::from_utf16_lossy(&whost[..len]), "10.1.2.3");
        }
    }
}

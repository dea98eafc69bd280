//! Static protocol and service databases with C-compatible protoent and
//! servent views. The returned pointers reference process-wide buffers
//! that every call overwrites, per the documented Winsock contract.

use std::ffi::c_void;
use std::ptr;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::addr::cstr_to_string;
use crate::types::{Protoent, RacyCell, Servent};

struct ProtoEntry {
    name: &'static str,
    alias: Option<&'static str>,
    number: i16,
}

const PROTO_TABLE: &[ProtoEntry] = &[
    ProtoEntry { name: "icmp", alias: Some("ICMP"), number: 1 },
    ProtoEntry { name: "igmp", alias: Some("IGMP"), number: 2 },
    ProtoEntry { name: "tcp", alias: Some("TCP"), number: 6 },
    ProtoEntry { name: "udp", alias: Some("UDP"), number: 17 },
    ProtoEntry { name: "ipv6", alias: Some("IPv6"), number: 41 },
    ProtoEntry { name: "icmpv6", alias: Some("ICMPv6"), number: 58 },
];

pub(crate) struct ServEntry {
    pub name: &'static str,
    pub alias: Option<&'static str>,
    pub port: u16,
    pub proto: &'static str,
}

pub(crate) const SERV_TABLE: &[ServEntry] = &[
    ServEntry { name: "echo", alias: None, port: 7, proto: "tcp" },
    ServEntry { name: "echo", alias: None, port: 7, proto: "udp" },
    ServEntry { name: "ftp-data", alias: None, port: 20, proto: "tcp" },
    ServEntry { name: "ftp", alias: None, port: 21, proto: "tcp" },
    ServEntry { name: "ssh", alias: None, port: 22, proto: "tcp" },
    ServEntry { name: "telnet", alias: None, port: 23, proto: "tcp" },
    ServEntry { name: "smtp", alias: Some("mail"), port: 25, proto: "tcp" },
    ServEntry { name: "domain", alias: Some("dns"), port: 53, proto: "tcp" },
    ServEntry { name: "domain", alias: Some("dns"), port: 53, proto: "udp" },
    ServEntry { name: "http", alias: Some("www"), port: 80, proto: "tcp" },
    ServEntry { name: "pop3", alias: None, port: 110, proto: "tcp" },
    ServEntry { name: "imap", alias: None, port: 143, proto: "tcp" },
    ServEntry { name: "https", alias: None, port: 443, proto: "tcp" },
    ServEntry { name: "smtps", alias: None, port: 465, proto: "tcp" },
    ServEntry { name: "imaps", alias: None, port: 993, proto: "tcp" },
    ServEntry { name: "pop3s", alias: None, port: 995, proto: "tcp" },
];

/// Service-name lookup used by getaddrinfo's service step.
pub(crate) fn service_port(name: &str, proto: &str) -> Option<u16> {
    let name = name.to_ascii_lowercase();
    SERV_TABLE
        .iter()
        .filter(|e| e.proto == proto)
        .find(|e| e.name == name || e.alias.map_or(false, |a| a.eq_ignore_ascii_case(&name)))
        .map(|e| e.port)
}

/// Port-to-name lookup used by getnameinfo's service step.
pub(crate) fn service_name(port: u16, proto: &str) -> Option<&'static str> {
    SERV_TABLE
        .iter()
        .find(|e| e.proto == proto && e.port == port)
        .map(|e| e.name)
}

struct ProtoentStorage {
    entry: Protoent,
    name: [u8; 64],
    alias: [u8; 64],
    alias_ptrs: [*mut u8; 2],
}

static PROTOENT_BUF: RacyCell<ProtoentStorage> = RacyCell::new(ProtoentStorage {
    entry: Protoent {
        name: ptr::null_mut(),
        aliases: ptr::null_mut(),
        proto: 0,
    },
    name: [0; 64],
    alias: [0; 64],
    alias_ptrs: [ptr::null_mut(); 2],
});

struct ServentStorage {
    entry: Servent,
    name: [u8; 64],
    alias: [u8; 64],
    alias_ptrs: [*mut u8; 2],
    proto: [u8; 16],
}

static SERVENT_BUF: RacyCell<ServentStorage> = RacyCell::new(ServentStorage {
    entry: Servent {
        name: ptr::null_mut(),
        aliases: ptr::null_mut(),
        port: 0,
        proto: ptr::null_mut(),
    },
    name: [0; 64],
    alias: [0; 64],
    alias_ptrs: [ptr::null_mut(); 2],
    proto: [0; 16],
});

static FILL_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn copy_into(dst: &mut [u8], s: &str) {
    dst.fill(0);
    let n = s.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&s.as_bytes()[..n]);
}

fn fill_protoent(e: &ProtoEntry) -> *mut c_void {
    let _guard = FILL_LOCK.lock();
    unsafe {
        let storage = &mut *PROTOENT_BUF.get();
        copy_into(&mut storage.name, e.name);
        storage.entry.name = storage.name.as_mut_ptr();
        match e.alias {
            Some(alias) => {
                copy_into(&mut storage.alias, alias);
                storage.alias_ptrs[0] = storage.alias.as_mut_ptr();
            }
            None => storage.alias_ptrs[0] = ptr::null_mut(),
        }
        storage.alias_ptrs[1] = ptr::null_mut();
        storage.entry.aliases = storage.alias_ptrs.as_mut_ptr();
        storage.entry.proto = e.number;
        &mut storage.entry as *mut Protoent as *mut c_void
    }
}

fn fill_servent(name: &str, alias: Option<&str>, port: u16, proto: &str) -> *mut c_void {
    let _guard = FILL_LOCK.lock();
    unsafe {
        let storage = &mut *SERVENT_BUF.get();
        copy_into(&mut storage.name, name);
        storage.entry.name = storage.name.as_mut_ptr();
        match alias {
            Some(alias) => {
                copy_into(&mut storage.alias, alias);
                storage.alias_ptrs[0] = storage.alias.as_mut_ptr();
            }
            None => storage.alias_ptrs[0] = ptr::null_mut(),
        }
        storage.alias_ptrs[1] = ptr::null_mut();
        storage.entry.aliases = storage.alias_ptrs.as_mut_ptr();
        storage.entry.port = (port.to_be()) as i16;
        copy_into(&mut storage.proto, proto);
        storage.entry.proto = storage.proto.as_mut_ptr();
        &mut storage.entry as *mut Servent as *mut c_void
    }
}

/// # Safety
/// `name` must be null or NUL-terminated.
pub unsafe fn getprotobyname(name: *const u8) -> *mut c_void {
    trace_call!("Getprotobyname", name);
    if name.is_null() {
        return ptr::null_mut();
    }
    let search = cstr_to_string(name).to_ascii_lowercase();
    for entry in PROTO_TABLE {
        if entry.name == search || entry.alias.map_or(false, |a| a.eq_ignore_ascii_case(&search)) {
            return fill_protoent(entry);
        }
    }
    ptr::null_mut()
}

pub fn getprotobynumber(proto: i32) -> *mut c_void {
    trace_call!("Getprotobynumber", proto);
    for entry in PROTO_TABLE {
        if i32::from(entry.number) == proto {
            return fill_protoent(entry);
        }
    }
    ptr::null_mut()
}

/// # Safety
/// `name` and `proto` must be null or NUL-terminated.
pub unsafe fn getservbyname(name: *const u8, proto: *const u8) -> *mut c_void {
    trace_call!("Getservbyname", name, proto);
    if name.is_null() {
        return ptr::null_mut();
    }
    let search = cstr_to_string(name).to_ascii_lowercase();
    let filter = if proto.is_null() {
        String::new()
    } else {
        cstr_to_string(proto).to_ascii_lowercase()
    };
    for entry in SERV_TABLE {
        if !filter.is_empty() && entry.proto != filter {
            continue;
        }
        if entry.name == search || entry.alias.map_or(false, |a| a.eq_ignore_ascii_case(&search)) {
            return fill_servent(entry.name, entry.alias, entry.port, entry.proto);
        }
    }
    ptr::null_mut()
}

/// `port` arrives in network byte order, as on Win32.
///
/// # Safety
/// `proto` must be null or NUL-terminated.
pub unsafe fn getservbyport(port: i32, proto: *const u8) -> *mut c_void {
    trace_call!("Getservbyport", port, proto);
    let host_port = u16::from_be(port as u16);
    let filter = if proto.is_null() {
        String::new()
    } else {
        cstr_to_string(proto).to_ascii_lowercase()
    };
    for entry in SERV_TABLE {
        if !filter.is_empty() && entry.proto != filter {
            continue;
        }
        if entry.port == host_port {
            return fill_servent(entry.name, entry.alias, entry.port, entry.proto);
        }
    }
    ptr::null_mut()
}

/// # Safety
/// Out-pointer may be null; nothing else is dereferenced.
pub unsafe fn wsa_enum_protocols_a(
    _protocols: *const i32,
    _buffer: *mut c_void,
    _buffer_len: *mut u32,
) -> i32 {
    trace_call!("WSAEnumProtocolsA");
    0
}

/// # Safety
/// Out-pointer may be null; nothing else is dereferenced.
pub unsafe fn wsa_enum_protocols_w(
    _protocols: *const i32,
    _buffer: *mut c_void,
    _buffer_len: *mut u32,
) -> i32 {
    trace_call!("WSAEnumProtocolsW");
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn name_of(p: *mut u8) -> String {
        cstr_to_string(p)
    }

    #[test]
    fn protocol_lookup_by_name_and_number() {
        unsafe {
            let p = getprotobyname(b"TCP\0".as_ptr()) as *mut Protoent;
            assert!(!p.is_null());
            assert_eq!((*p).proto, 6);
            assert_eq!(name_of((*p).name), "tcp");

            let p = getprotobynumber(17) as *mut Protoent;
            assert_eq!(name_of((*p).name), "udp");

            assert!(getprotobyname(b"warp\0".as_ptr()).is_null());
        }
    }

    #[test]
    fn service_lookup_port_in_network_order() {
        unsafe {
            let s = getservbyname(b"https\0".as_ptr(), b"tcp\0".as_ptr()) as *mut Servent;
            assert!(!s.is_null());
            assert_eq!(name_of((*s).name), "https");
            assert_eq!(u16::from_be((*s).port as u16), 443);

            // Reverse direction takes the port in network order too.
            let s = getservbyport(i32::from(443u16.to_be()), b"tcp\0".as_ptr()) as *mut Servent;
            assert!(!s.is_null());
            assert_eq!(name_of((*s).name), "https");
        }
    }

    #[test]
    fn service_alias_and_proto_filter() {
        unsafe {
            let s = getservbyname(b"dns\0".as_ptr(), b"udp\0".as_ptr()) as *mut Servent;
            assert!(!s.is_null());
            assert_eq!(name_of((*s).name), "domain");
            assert_eq!(name_of((*s).proto), "udp");

            assert!(getservbyname(b"https\0".as_ptr(), b"udp\0".as_ptr()).is_null());
        }
    }

    #[test]
    fn table_is_consistent_both_ways() {
        for entry in SERV_TABLE {
            assert_eq!(service_port(entry.name, entry.proto), Some(entry.port));
            assert_eq!(service_name(entry.port, entry.proto), Some(entry.name));
        }
    }
}

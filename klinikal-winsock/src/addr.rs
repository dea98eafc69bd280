//! Address conversion: inet_addr/inet_ntoa, inet_pton/inet_ntop and their
//! wide variants, WSAAddressToString/WSAStringToAddress, and gethostname.
//! Also the C-string helpers the rest of the crate marshals with.

use std::ffi::c_void;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{set_last_error, WSAEFAULT, WSAEINVAL, WSAENOBUFS};
use crate::types::{RacyCell, SockaddrIn, AF_INET, AF_INET6};

pub const INADDR_NONE: u32 = 0xFFFF_FFFF;

/// # Safety
/// `ptr` must be null or point to a NUL-terminated byte string.
pub(crate) unsafe fn cstr_to_string(ptr: *const u8) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let mut len = 0usize;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    String::from_utf8_lossy(std::slice::from_raw_parts(ptr, len)).into_owned()
}

/// # Safety
/// `ptr` must be null or point to a NUL-terminated UTF-16 string.
pub(crate) unsafe fn wstr_to_string(ptr: *const u16) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let mut len = 0usize;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len))
}

/// Copy `s` plus NUL into `dst`; fails when the buffer is too small.
///
/// # Safety
/// `dst` must be valid for `cap` bytes.
pub(crate) unsafe fn write_cstr(dst: *mut u8, cap: usize, s: &str) -> bool {
    if s.len() + 1 > cap {
        return false;
    }
    std::ptr::copy_nonoverlapping(s.as_ptr(), dst, s.len());
    *dst.add(s.len()) = 0;
    true
}

/// Copy `s` as UTF-16 plus NUL into `dst` (capacity in u16 units).
///
/// # Safety
/// `dst` must be valid for `cap` u16 slots.
pub(crate) unsafe fn write_wstr(dst: *mut u16, cap: usize, s: &str) -> bool {
    let units: Vec<u16> = s.encode_utf16().collect();
    if units.len() + 1 > cap {
        return false;
    }
    std::ptr::copy_nonoverlapping(units.as_ptr(), dst, units.len());
    *dst.add(units.len()) = 0;
    true
}

pub(crate) fn parse_ip(s: &str) -> Option<IpAddr> {
    s.parse().ok()
}

/// Converts a dotted-decimal string to a network-order u32; INADDR_NONE on
/// failure.
///
/// # Safety
/// `cp` must be null or NUL-terminated.
pub unsafe fn inet_addr(cp: *const u8) -> u32 {
    trace_call!("Inet_addr", cp);
    let s = cstr_to_string(cp);
    match s.parse::<Ipv4Addr>() {
        Ok(ip) => u32::from_be_bytes(ip.octets()).to_be(),
        Err(_) => INADDR_NONE,
    }
}

static INET_NTOA_BUF: RacyCell<[u8; 16]> = RacyCell::new([0u8; 16]);

/// Renders a network-order IPv4 address into the static dotted-decimal
/// buffer; each call overwrites the last result.
pub fn inet_ntoa(addr: u32) -> *mut u8 {
    trace_call!("Inet_ntoa", addr);
    let ip = Ipv4Addr::from(u32::from_be(addr));
    let s = ip.to_string();
    unsafe {
        let buf = INET_NTOA_BUF.get();
        (*buf).fill(0);
        (&mut (*buf))[..s.len()].copy_from_slice(s.as_bytes());
        (*buf).as_mut_ptr()
    }
}

fn parse_for_family(s: &str, family: i32) -> Option<Vec<u8>> {
    match family {
        AF_INET => s.parse::<Ipv4Addr>().ok().map(|ip| ip.octets().to_vec()),
        AF_INET6 => s.parse::<Ipv6Addr>().ok().map(|ip| ip.octets().to_vec()),
        _ => None,
    }
}

/// Returns 1 on success, 0 for an unparsable string, -1 for a bad family
/// or pointer. The output buffer is untouched unless the conversion
/// succeeds.
///
/// # Safety
/// `dst` must be valid for 4 (AF_INET) or 16 (AF_INET6) bytes.
pub unsafe fn inet_pton(family: i32, src: *const u8, dst: *mut c_void) -> i32 {
    trace_call!("inet_pton", family, src, dst);
    if src.is_null() || dst.is_null() {
        set_last_error(WSAEFAULT);
        return -1;
    }
    if family != AF_INET && family != AF_INET6 {
        set_last_error(WSAEFAULT);
        return -1;
    }
    match parse_for_family(&cstr_to_string(src), family) {
        Some(bytes) => {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst as *mut u8, bytes.len());
            1
        }
        None => 0,
    }
}

/// # Safety
/// As [`inet_pton`], with a wide source string.
pub unsafe fn inet_pton_w(family: i32, src: *const u16, dst: *mut c_void) -> i32 {
    trace_call!("InetPtonW", family, src, dst);
    if src.is_null() || dst.is_null() {
        set_last_error(WSAEFAULT);
        return -1;
    }
    if family != AF_INET && family != AF_INET6 {
        set_last_error(WSAEFAULT);
        return -1;
    }
    match parse_for_family(&wstr_to_string(src), family) {
        Some(bytes) => {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst as *mut u8, bytes.len());
            1
        }
        None => 0,
    }
}

fn render_binary(family: i32, src: *const c_void) -> Option<String> {
    unsafe {
        match family {
            AF_INET => {
                let octets = *(src as *const [u8; 4]);
                Some(Ipv4Addr::from(octets).to_string())
            }
            AF_INET6 => {
                let octets = *(src as *const [u8; 16]);
                Some(Ipv6Addr::from(octets).to_string())
            }
            _ => None,
        }
    }
}

/// # Safety
/// `src` must hold a binary address of the given family; `dst` must be
/// valid for `size` bytes.
pub unsafe fn inet_ntop(family: i32, src: *const c_void, dst: *mut u8, size: i32) -> *mut u8 {
    trace_call!("inet_ntop", family, src, dst, size);
    if src.is_null() || dst.is_null() {
        set_last_error(WSAEFAULT);
        return std::ptr::null_mut();
    }
    let Some(s) = render_binary(family, src) else {
        set_last_error(WSAEFAULT);
        return std::ptr::null_mut();
    };
    if !write_cstr(dst, size.max(0) as usize, &s) {
        set_last_error(WSAENOBUFS);
        return std::ptr::null_mut();
    }
    dst
}

/// # Safety
/// As [`inet_ntop`], with a wide destination (capacity in u16 units).
pub unsafe fn inet_ntop_w(family: i32, src: *const c_void, dst: *mut u16, size: i32) -> *mut u16 {
    trace_call!("InetNtopW", family, src, dst, size);
    if src.is_null() || dst.is_null() {
        set_last_error(WSAEFAULT);
        return std::ptr::null_mut();
    }
    let Some(s) = render_binary(family, src) else {
        set_last_error(WSAEFAULT);
        return std::ptr::null_mut();
    };
    if !write_wstr(dst, size.max(0) as usize, &s) {
        set_last_error(WSAENOBUFS);
        return std::ptr::null_mut();
    }
    dst
}

unsafe fn sockaddr_to_text(sa: *const c_void) -> Option<String> {
    let family = *(sa as *const u16);
    if i32::from(family) == AF_INET {
        let sin = &*(sa as *const SockaddrIn);
        let ip = Ipv4Addr::from(sin.addr);
        let port = u16::from_be(sin.port);
        if port != 0 {
            Some(format!("{ip}:{port}"))
        } else {
            Some(ip.to_string())
        }
    } else {
        None
    }
}

/// # Safety
/// `addr` must point to a sockaddr of `addr_len` bytes; the string buffer
/// and its in/out length must be valid.
pub unsafe fn wsa_address_to_string_a(
    addr: *const c_void,
    addr_len: u32,
    _protocol_info: *const c_void,
    out: *mut u8,
    out_len: *mut u32,
) -> i32 {
    trace_call!("WSAAddressToStringA", addr, addr_len, out, out_len);
    if addr.is_null() || out_len.is_null() {
        set_last_error(WSAEFAULT);
        return -1;
    }
    let Some(s) = sockaddr_to_text(addr) else {
        set_last_error(WSAEINVAL);
        return -1;
    };
    let needed = (s.len() + 1) as u32;
    if out.is_null() || *out_len < needed {
        *out_len = needed;
        set_last_error(WSAEFAULT);
        return -1;
    }
    write_cstr(out, *out_len as usize, &s);
    *out_len = needed;
    0
}

/// # Safety
/// As the ANSI variant, with a wide output buffer.
pub unsafe fn wsa_address_to_string_w(
    addr: *const c_void,
    addr_len: u32,
    _protocol_info: *const c_void,
    out: *mut u16,
    out_len: *mut u32,
) -> i32 {
    trace_call!("WSAAddressToStringW", addr, addr_len, out, out_len);
    if addr.is_null() || out_len.is_null() {
        set_last_error(WSAEFAULT);
        return -1;
    }
    let Some(s) = sockaddr_to_text(addr) else {
        set_last_error(WSAEINVAL);
        return -1;
    };
    let needed = (s.encode_utf16().count() + 1) as u32;
    if out.is_null() || *out_len < needed {
        *out_len = needed;
        set_last_error(WSAEFAULT);
        return -1;
    }
    write_wstr(out, *out_len as usize, &s);
    *out_len = needed;
    0
}

unsafe fn string_to_sockaddr(text: &str, addr: *mut c_void, addr_len: *mut i32) -> i32 {
    // Accept "a.b.c.d" or "a.b.c.d:port".
    let (host, port) = match text.rsplit_once(':') {
        Some((h, p)) => match p.parse::<u16>() {
            Ok(port) => (h, port),
            Err(_) => (text, 0),
        },
        None => (text, 0),
    };
    let Ok(ip) = host.parse::<Ipv4Addr>() else {
        set_last_error(WSAEINVAL);
        return -1;
    };
    if (*addr_len as usize) < std::mem::size_of::<SockaddrIn>() {
        *addr_len = std::mem::size_of::<SockaddrIn>() as i32;
        set_last_error(WSAEFAULT);
        return -1;
    }
    let sin = &mut *(addr as *mut SockaddrIn);
    sin.family = AF_INET as u16;
    sin.port = port.to_be();
    sin.addr = ip.octets();
    sin.zero = [0; 8];
    *addr_len = std::mem::size_of::<SockaddrIn>() as i32;
    0
}

/// # Safety
/// `text` must be NUL-terminated; `addr`/`addr_len` must be valid.
pub unsafe fn wsa_string_to_address_a(
    text: *const u8,
    _family: i32,
    _protocol_info: *const c_void,
    addr: *mut c_void,
    addr_len: *mut i32,
) -> i32 {
    trace_call!("WSAStringToAddressA", text, addr, addr_len);
    if text.is_null() || addr.is_null() || addr_len.is_null() {
        set_last_error(WSAEFAULT);
        return -1;
    }
    string_to_sockaddr(&cstr_to_string(text), addr, addr_len)
}

/// # Safety
/// As the ANSI variant, with a wide input string.
pub unsafe fn wsa_string_to_address_w(
    text: *const u16,
    _family: i32,
    _protocol_info: *const c_void,
    addr: *mut c_void,
    addr_len: *mut i32,
) -> i32 {
    trace_call!("WSAStringToAddressW", text, addr, addr_len);
    if text.is_null() || addr.is_null() || addr_len.is_null() {
        set_last_error(WSAEFAULT);
        return -1;
    }
    string_to_sockaddr(&wstr_to_string(text), addr, addr_len)
}

fn local_hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Some(String::from_utf8_lossy(&buf[..len]).into_owned())
}

/// # Safety
/// `name` must be valid for `namelen` bytes.
pub unsafe fn gethostname(name: *mut u8, namelen: i32) -> i32 {
    trace_call!("Gethostname", name, namelen);
    let Some(hn) = local_hostname() else {
        return -1;
    };
    if name.is_null() || !write_cstr(name, namelen.max(0) as usize, &hn) {
        set_last_error(WSAEFAULT);
        return -1;
    }
    0
}

/// # Safety
/// `name` must be valid for `namelen` u16 slots.
pub unsafe fn get_host_name_w(name: *mut u16, namelen: i32) -> i32 {
    trace_call!("GetHostNameW", name, namelen);
    let Some(hn) = local_hostname() else {
        return -1;
    };
    if name.is_null() || !write_wstr(name, namelen.max(0) as usize, &hn) {
        set_last_error(WSAEFAULT);
        return -1;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn inet_addr_network_order() {
        let s = b"192.168.1.254\0";
        let v = unsafe { inet_addr(s.as_ptr()) };
        // Network order means the in-memory bytes follow the dotted quad.
        assert_eq!(v.to_ne_bytes(), [0xC0, 0xA8, 0x01, 0xFE]);
        let bad = b"not an ip\0";
        assert_eq!(unsafe { inet_addr(bad.as_ptr()) }, INADDR_NONE);
    }

    #[test]
    fn pton_fills_exact_bytes() {
        let s = b"192.168.1.254\0";
        let mut buf = [0u8; 4];
        let rc = unsafe { inet_pton(AF_INET, s.as_ptr(), buf.as_mut_ptr() as *mut c_void) };
        assert_eq!(rc, 1);
        assert_eq!(buf, [0xC0, 0xA8, 0x01, 0xFE]);
    }

    #[test]
    fn pton_rejects_garbage_without_touching_output() {
        let s = b"512.1.1.1\0";
        let mut buf = [0xEEu8; 4];
        let rc = unsafe { inet_pton(AF_INET, s.as_ptr(), buf.as_mut_ptr() as *mut c_void) };
        assert_eq!(rc, 0);
        assert_eq!(buf, [0xEE; 4]);
    }

    #[test]
    fn ntop_renders_and_checks_space() {
        let octets = [0xC0u8, 0xA8, 0x01, 0xFE];
        let mut dst = [0u8; 16];
        let rc = unsafe {
            inet_ntop(
                AF_INET,
                octets.as_ptr() as *const c_void,
                dst.as_mut_ptr(),
                16,
            )
        };
        assert!(!rc.is_null());
        assert_eq!(&dst[..14], b"192.168.1.254\0");

        let mut tiny = [0u8; 4];
        let rc = unsafe {
            inet_ntop(
                AF_INET,
                octets.as_ptr() as *const c_void,
                tiny.as_mut_ptr(),
                4,
            )
        };
        assert!(rc.is_null());
    }

    #[test]
    fn wide_variants_roundtrip() {
        let wide: Vec<u16> = "::1\0".encode_utf16().collect();
        let mut buf = [0u8; 16];
        let rc = unsafe { inet_pton_w(AF_INET6, wide.as_ptr(), buf.as_mut_ptr() as *mut c_void) };
        assert_eq!(rc, 1);
        assert_eq!(buf[15], 1);

        let mut out = [0u16; 46];
        let rc = unsafe {
            inet_ntop_w(
                AF_INET6,
                buf.as_ptr() as *const c_void,
                out.as_mut_ptr(),
                46,
            )
        };
        assert!(!rc.is_null());
        let s = String::from_utf16_lossy(&out[..3]);
        assert_eq!(s, "::1");
    }

    #[test]
    fn address_string_conversions() {
        let mut sin = SockaddrIn {
            family: AF_INET as u16,
            port: 443u16.to_be(),
            addr: [10, 0, 0, 1],
            zero: [0; 8],
        };
        let mut out = [0u8; 32];
        let mut len = 32u32;
        let rc = unsafe {
            wsa_address_to_string_a(
                &sin as *const _ as *const c_void,
                16,
                std::ptr::null(),
                out.as_mut_ptr(),
                &mut len,
            )
        };
        assert_eq!(rc, 0);
        assert_eq!(&out[..len as usize - 1], b"10.0.0.1:443");

        sin = unsafe { std::mem::zeroed() };
        let mut sa_len = 16i32;
        let text = b"172.16.9.3:8080\0";
        let rc = unsafe {
            wsa_string_to_address_a(
                text.as_ptr(),
                AF_INET,
                std::ptr::null(),
                &mut sin as *mut _ as *mut c_void,
                &mut sa_len,
            )
        };
        assert_eq!(rc, 0);
        assert_eq!(sin.addr, [172, 16, 9, 3]);
        assert_eq!(u16::from_be(sin.port), 8080);
    }

    proptest! {
        /// inet_ntop ∘ inet_pton is the identity on valid IPv4 strings.
        #[test]
        fn v4_text_roundtrip(a: u8, b: u8, c: u8, d: u8) {
            let text = format!("{a}.{b}.{c}.{d}\0");
            let mut bin = [0u8; 4];
            let rc = unsafe { inet_pton(AF_INET, text.as_ptr(), bin.as_mut_ptr() as *mut c_void) };
            prop_assert_eq!(rc, 1);
            let mut back = [0u8; 16];
            let rc = unsafe { inet_ntop(AF_INET, bin.as_ptr() as *const c_void, back.as_mut_ptr(), 16) };
            prop_assert!(!rc.is_null());
            let len = back.iter().position(|&x| x == 0).unwrap();
            prop_assert_eq!(&back[..len + 1], text.as_bytes());
        }

        /// inet_pton ∘ inet_ntop is the identity on IPv6 binaries.
        #[test]
        fn v6_binary_roundtrip(bytes: [u8; 16]) {
            let mut text = [0u8; 64];
            let rc = unsafe { inet_ntop(AF_INET6, bytes.as_ptr() as *const c_void, text.as_mut_ptr(), 64) };
            prop_assert!(!rc.is_null());
            let mut back = [0u8; 16];
            let rc = unsafe { inet_pton(AF_INET6, text.as_ptr(), back.as_mut_ptr() as *mut c_void) };
            prop_assert_eq!(rc, 1);
            prop_assert_eq!(back, bytes);
        }
    }
}

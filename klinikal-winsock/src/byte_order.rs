//! Host/network byte order conversion: the 16/32/64-bit integer and
//! floating-point families, plus the socket-bound WSA wrappers.

use crate::error::{set_last_error, WSAEFAULT};

pub fn htons(hostshort: u16) -> u16 {
    trace_call!("Htons", hostshort);
    hostshort.to_be()
}

pub fn ntohs(netshort: u16) -> u16 {
    trace_call!("Ntohs", netshort);
    u16::from_be(netshort)
}

pub fn htonl(hostlong: u32) -> u32 {
    trace_call!("Htonl", hostlong);
    hostlong.to_be()
}

pub fn ntohl(netlong: u32) -> u32 {
    trace_call!("Ntohl", netlong);
    u32::from_be(netlong)
}

pub fn htonll(hostlonglong: u64) -> u64 {
    trace_call!("Htonll", hostlonglong);
    hostlonglong.to_be()
}

pub fn ntohll(netlonglong: u64) -> u64 {
    trace_call!("Ntohll", netlonglong);
    u64::from_be(netlonglong)
}

pub fn htonf(hostfloat: f32) -> f32 {
    trace_call!("Htonf", hostfloat);
    f32::from_bits(hostfloat.to_bits().to_be())
}

pub fn ntohf(netfloat: f32) -> f32 {
    trace_call!("Ntohf", netfloat);
    f32::from_bits(u32::from_be(netfloat.to_bits()))
}

pub fn htond(hostdouble: f64) -> f64 {
    trace_call!("Htond", hostdouble);
    f64::from_bits(hostdouble.to_bits().to_be())
}

pub fn ntohd(netdouble: f64) -> f64 {
    trace_call!("Ntohd", netdouble);
    f64::from_bits(u64::from_be(netdouble.to_bits()))
}

/// # Safety
/// `out` must be a valid writable pointer or null (reported as WSAEFAULT).
pub unsafe fn wsa_htonl(s: u64, hostlong: u32, out: *mut u32) -> i32 {
    trace_call!("WSAHtonl", s, hostlong, out);
    if out.is_null() {
        set_last_error(WSAEFAULT);
        return -1;
    }
    *out = htonl(hostlong);
    0
}

/// # Safety
/// `out` must be a valid writable pointer or null.
pub unsafe fn wsa_htons(s: u64, hostshort: u16, out: *mut u16) -> i32 {
    trace_call!("WSAHtons", s, hostshort, out);
    if out.is_null() {
        set_last_error(WSAEFAULT);
        return -1;
    }
    *out = htons(hostshort);
    0
}

/// # Safety
/// `out` must be a valid writable pointer or null.
pub unsafe fn wsa_ntohl(s: u64, netlong: u32, out: *mut u32) -> i32 {
    trace_call!("WSANtohl", s, netlong, out);
    if out.is_null() {
        set_last_error(WSAEFAULT);
        return -1;
    }
    *out = ntohl(netlong);
    0
}

/// # Safety
/// `out` must be a valid writable pointer or null.
pub unsafe fn wsa_ntohs(s: u64, netshort: u16, out: *mut u16) -> i32 {
    trace_call!("WSANtohs", s, netshort, out);
    if out.is_null() {
        set_last_error(WSAEFAULT);
        return -1;
    }
    *out = ntohs(netshort);
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_swaps_on_little_endian() {
        if cfg!(target_endian = "little") {
            assert_eq!(htons(0x1234), 0x3412);
            assert_eq!(htonl(0x1234_5678), 0x7856_3412);
        }
        assert_eq!(ntohs(htons(0x1234)), 0x1234);
    }

    #[test]
    fn wsa_wrappers_guard_null() {
        unsafe {
            assert_eq!(wsa_htons(0, 1, std::ptr::null_mut()), -1);
            let mut out = 0u16;
            assert_eq!(wsa_htons(0, 0x1234, &mut out), 0);
            assert_eq!(out, htons(0x1234));
        }
    }

    proptest! {
        #[test]
        fn u16_roundtrip(x: u16) {
            prop_assert_eq!(ntohs(htons(x)), x);
        }

        #[test]
        fn u32_roundtrip(x: u32) {
            prop_assert_eq!(ntohl(htonl(x)), x);
        }

        #[test]
        fn u64_roundtrip(x: u64) {
            prop_assert_eq!(ntohll(htonll(x)), x);
        }

        #[test]
        fn f32_roundtrip(x: f32) {
            let back = ntohf(htonf(x));
            prop_assert_eq!(back.to_bits(), x.to_bits());
        }

        #[test]
        fn f64_roundtrip(x: f64) {
            let back = ntohd(htond(x));
            prop_assert_eq!(back.to_bits(), x.to_bits());
        }
    }
}

//! The error bus: Winsock error codes, the process-wide last-error cell,
//! and the single point where transport errors become numeric codes.

use std::sync::atomic::{AtomicI32, Ordering};

use klinikal_netstack::NetError;

pub const WSA_IO_INCOMPLETE: i32 = 996;
pub const WSA_IO_PENDING: i32 = 997;

pub const WSAEINTR: i32 = 10004;
pub const WSAEFAULT: i32 = 10014;
pub const WSAEINVAL: i32 = 10022;
pub const WSAEWOULDBLOCK: i32 = 10035;
pub const WSAEINPROGRESS: i32 = 10036;
pub const WSAENOTSOCK: i32 = 10038;
pub const WSAEDESTADDRREQ: i32 = 10039;
pub const WSAEMSGSIZE: i32 = 10040;
pub const WSAEPROTONOSUPPORT: i32 = 10043;
pub const WSAEOPNOTSUPP: i32 = 10045;
pub const WSAEAFNOSUPPORT: i32 = 10047;
pub const WSAEADDRINUSE: i32 = 10048;
pub const WSAEADDRNOTAVAIL: i32 = 10049;
pub const WSAECONNRESET: i32 = 10054;
pub const WSAENOBUFS: i32 = 10055;
pub const WSAENOTCONN: i32 = 10057;
pub const WSAETIMEDOUT: i32 = 10060;
pub const WSAECONNREFUSED: i32 = 10061;
pub const WSAEHOSTUNREACH: i32 = 10065;
pub const WSA_E_NO_MORE: i32 = 10110;
pub const WSAHOST_NOT_FOUND: i32 = 11001;

/// Catch-all for transport failures with no specific mapping.
pub const WSA_GENERIC: i32 = 10001;

static LAST_ERROR: AtomicI32 = AtomicI32::new(0);

pub fn set_last_error(code: i32) {
    LAST_ERROR.store(code, Ordering::SeqCst);
}

pub fn last_error() -> i32 {
    LAST_ERROR.load(Ordering::SeqCst)
}

/// Returns the error status for the last failed operation.
pub fn wsa_get_last_error() -> i32 {
    trace_call!("WSAGetLastError");
    last_error()
}

/// Sets the error code retrievable by WSAGetLastError.
pub fn wsa_set_last_error(code: i32) {
    trace_call!("WSASetLastError", code);
    set_last_error(code);
}

/// Translate a transport error into a Winsock code. Deadline expiry is
/// classified before anything else, matching the documented contract.
pub fn map_net_error(err: &NetError) -> i32 {
    if err.is_timeout() {
        return match err {
            NetError::WouldBlock => WSAEWOULDBLOCK,
            _ => WSAETIMEDOUT,
        };
    }
    match err {
        NetError::ConnectionRefused => WSAECONNREFUSED,
        NetError::ConnectionReset => WSAECONNRESET,
        NetError::HostUnreachable | NetError::NetworkUnreachable => WSAEHOSTUNREACH,
        NetError::AddrInUse => WSAEADDRINUSE,
        NetError::AddrNotAvail => WSAEADDRNOTAVAIL,
        NetError::MsgSize => WSAEMSGSIZE,
        NetError::ProtoNotSupported => WSAEPROTONOSUPPORT,
        NetError::OpNotSupported => WSAEOPNOTSUPP,
        NetError::Closed => WSAENOTSOCK,
        NetError::NotConnected => WSAENOTCONN,
        NetError::DestinationRequired => WSAEDESTADDRREQ,
        NetError::InvalidAddress(_) | NetError::MalformedPacket(_) => WSAEINVAL,
        NetError::TimedOut | NetError::WouldBlock => unreachable!("handled above"),
        NetError::LookupFailed(_) => WSA_GENERIC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_error_cell_is_process_wide() {
        // A value no other concurrently running test writes.
        wsa_set_last_error(424_242);
        assert_eq!(wsa_get_last_error(), 424_242);
        wsa_set_last_error(0);
    }

    #[test]
    fn timeout_classified_first() {
        assert_eq!(map_net_error(&NetError::TimedOut), WSAETIMEDOUT);
        assert_eq!(map_net_error(&NetError::WouldBlock), WSAEWOULDBLOCK);
    }

    #[test]
    fn numeric_outputs_match_the_contract() {
        assert_eq!(map_net_error(&NetError::ConnectionRefused), 10061);
        assert_eq!(map_net_error(&NetError::ConnectionReset), 10054);
        assert_eq!(map_net_error(&NetError::HostUnreachable), 10065);
        assert_eq!(map_net_error(&NetError::NetworkUnreachable), 10065);
        assert_eq!(map_net_error(&NetError::AddrInUse), 10048);
        assert_eq!(map_net_error(&NetError::AddrNotAvail), 10049);
        assert_eq!(map_net_error(&NetError::MsgSize), 10040);
        assert_eq!(map_net_error(&NetError::ProtoNotSupported), 10043);
        assert_eq!(map_net_error(&NetError::OpNotSupported), 10045);
        assert_eq!(map_net_error(&NetError::Closed), 10038);
        assert_eq!(
            map_net_error(&NetError::LookupFailed("x".into())),
            WSA_GENERIC
        );
    }
}

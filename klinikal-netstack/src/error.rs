use thiserror::Error;

/// Transport-level errors.
///
/// The variants are deliberately close to the conditions the Winsock layer
/// has to report; the bridge's error bus is the only place these are turned
/// into numeric codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    #[error("i/o timeout")]
    TimedOut,

    #[error("operation would block")]
    WouldBlock,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("connection reset")]
    ConnectionReset,

    #[error("no route to host")]
    HostUnreachable,

    #[error("network is unreachable")]
    NetworkUnreachable,

    #[error("address already in use")]
    AddrInUse,

    #[error("address not available")]
    AddrNotAvail,

    #[error("message too long")]
    MsgSize,

    #[error("protocol not supported")]
    ProtoNotSupported,

    #[error("operation not supported")]
    OpNotSupported,

    #[error("use of closed endpoint")]
    Closed,

    #[error("not connected")]
    NotConnected,

    #[error("destination address required")]
    DestinationRequired,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("lookup failed: {0}")]
    LookupFailed(String),
}

impl NetError {
    /// Whether this error is a deadline expiry. Checked before any other
    /// classification by the bridge's error translation.
    pub fn is_timeout(&self) -> bool {
        matches!(self, NetError::TimedOut | NetError::WouldBlock)
    }
}

pub type Result<T> = std::result::Result<T, NetError>;

//! The stack facade: lazy initialization of the userspace transport from
//! the WireGuard configuration file, and the glue between the netstack and
//! the tunnel device.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use klinikal_netstack::{Link, Stack, StackConfig};
use klinikal_wire::{
    decode_key_base64, key_from_hex, key_to_hex, Device, DeviceConfig, PeerConfig, WireError,
};

/// Canonical configuration path probed on startup and on first use.
pub const DEFAULT_CONFIG_PATH: &str = "wg.conf";

const DEFAULT_MTU: usize = 1420;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("missing [Interface] section")]
    MissingInterface,
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error(transparent)]
    Key(#[from] WireError),
}

/// One parsed [Peer] section. Keys travel as hex once decoded from the
/// file's base64, which is the rendering the device control-plane takes.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub public_key_hex: String,
    pub endpoint: Option<SocketAddr>,
    pub allowed_ips: Vec<ipnet::IpNet>,
    pub persistent_keepalive: Option<u16>,
}

/// Parsed bridge configuration; constructible in memory for embedders and
/// tests.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub addresses: Vec<IpAddr>,
    pub dns: Vec<IpAddr>,
    pub mtu: usize,
    pub private_key_hex: Option<String>,
    pub listen_port: Option<u16>,
    pub peers: Vec<PeerEntry>,
}

impl BridgeConfig {
    /// A link-less configuration serving in-process traffic only.
    pub fn local_only(addresses: Vec<IpAddr>, dns: Vec<IpAddr>) -> BridgeConfig {
        BridgeConfig {
            addresses,
            dns,
            mtu: DEFAULT_MTU,
            private_key_hex: None,
            listen_port: None,
            peers: Vec::new(),
        }
    }
}

/// The initialized transport: the netstack plus (when peers are
/// configured) the tunnel device carrying its frames.
pub struct StackHandle {
    pub net: Stack,
    device: Option<Arc<Device>>,
    pub dns: Vec<IpAddr>,
}

struct DeviceLink(Arc<Device>);

impl Link for DeviceLink {
    fn transmit(&self, frame: &[u8]) {
        self.0.transmit(frame);
    }
}

static STACK: Lazy<RwLock<Option<Arc<StackHandle>>>> = Lazy::new(|| RwLock::new(None));

/// Parse the minimal WireGuard INI format: one [Interface] section and any
/// number of [Peer] sections.
pub fn parse_config(text: &str) -> Result<BridgeConfig, ConfigError> {
    #[derive(Default)]
    struct RawPeer {
        public_key: Option<String>,
        endpoint: Option<String>,
        allowed_ips: Option<String>,
        keepalive: Option<String>,
    }

    let mut in_interface = false;
    let mut saw_interface = false;
    let mut private_key = None;
    let mut address = None;
    let mut dns = None;
    let mut mtu = None;
    let mut listen_port = None;
    let mut peers: Vec<RawPeer> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            let section = line.trim_matches(|c| c == '[' || c == ']').trim();
            in_interface = section.eq_ignore_ascii_case("Interface");
            if in_interface {
                saw_interface = true;
            } else if section.eq_ignore_ascii_case("Peer") {
                peers.push(RawPeer::default());
            }
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().to_string();
        if in_interface {
            match key.to_ascii_lowercase().as_str() {
                "privatekey" => private_key = Some(value),
                "address" => address = Some(value),
                "dns" => dns = Some(value),
                "mtu" => mtu = Some(value),
                "listenport" => listen_port = Some(value),
                _ => {}
            }
        } else if let Some(peer) = peers.last_mut() {
            match key.to_ascii_lowercase().as_str() {
                "publickey" => peer.public_key = Some(value),
                "endpoint" => peer.endpoint = Some(value),
                "allowedips" => peer.allowed_ips = Some(value),
                "persistentkeepalive" => peer.keepalive = Some(value),
                _ => {}
            }
        }
    }

    if !saw_interface {
        return Err(ConfigError::MissingInterface);
    }

    let private_key_hex = match private_key {
        Some(b64) => Some(key_to_hex(&decode_key_base64(&b64)?)),
        None => None,
    };

    let addresses = parse_ip_list(address.as_deref().unwrap_or("")).map_err(|reason| {
        ConfigError::Invalid {
            key: "Address",
            reason,
        }
    })?;
    // DNS entries that fail to parse are skipped, not fatal.
    let dns = parse_ip_list(dns.as_deref().unwrap_or("")).unwrap_or_default();

    let mtu = match mtu {
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
            key: "MTU",
            reason: v.clone(),
        })?,
        None => DEFAULT_MTU,
    };
    let listen_port = match listen_port {
        Some(v) => Some(v.parse().map_err(|_| ConfigError::Invalid {
            key: "ListenPort",
            reason: v.clone(),
        })?),
        None => None,
    };

    let mut entries = Vec::with_capacity(peers.len());
    for raw in peers {
        let Some(public_b64) = raw.public_key else {
            return Err(ConfigError::Invalid {
                key: "PublicKey",
                reason: "missing in [Peer]".into(),
            });
        };
        let public_key_hex = key_to_hex(&decode_key_base64(&public_b64)?);

        let endpoint = match raw.endpoint {
            Some(ep) => match resolve_endpoint(&ep) {
                Ok(sa) => Some(sa),
                Err(reason) => {
                    // An unresolvable endpoint leaves the peer passive.
                    warn!(endpoint = %ep, %reason, "peer endpoint not resolvable");
                    None
                }
            },
            None => None,
        };

        let allowed_ips = match raw.allowed_ips {
            Some(list) => {
                let mut nets = Vec::new();
                for item in list.split(',') {
                    let item = item.trim();
                    if item.is_empty() {
                        continue;
                    }
                    let net = item.parse().map_err(|_| ConfigError::Invalid {
                        key: "AllowedIPs",
                        reason: item.to_string(),
                    })?;
                    nets.push(net);
                }
                nets
            }
            None => vec!["0.0.0.0/0".parse().unwrap(), "::/0".parse().unwrap()],
        };

        let persistent_keepalive = match raw.keepalive {
            Some(v) => Some(v.parse().map_err(|_| ConfigError::Invalid {
                key: "PersistentKeepalive",
                reason: v.clone(),
            })?),
            None => None,
        };

        entries.push(PeerEntry {
            public_key_hex,
            endpoint,
            allowed_ips,
            persistent_keepalive,
        });
    }

    Ok(BridgeConfig {
        addresses,
        dns,
        mtu,
        private_key_hex,
        listen_port,
        peers: entries,
    })
}

/// Comma-separated addresses, each either a bare IP or a CIDR whose host
/// part is taken.
fn parse_ip_list(s: &str) -> Result<Vec<IpAddr>, String> {
    let mut out = Vec::new();
    for item in s.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let host = item.split('/').next().unwrap_or(item);
        let ip: IpAddr = host.parse().map_err(|_| format!("invalid IP/CIDR {item}"))?;
        out.push(ip);
    }
    Ok(out)
}

/// Peer endpoints resolve through the host resolver: the tunnel cannot
/// carry its own rendezvous traffic.
fn resolve_endpoint(endpoint: &str) -> Result<SocketAddr, String> {
    endpoint
        .to_socket_addrs()
        .map_err(|e| e.to_string())?
        .next()
        .ok_or_else(|| "no addresses".to_string())
}

/// Initialize from a configuration file. Idempotent: an initialized stack
/// stays as it is.
pub fn initialize_stack(path: &str) -> Result<(), ConfigError> {
    if STACK.read().is_some() {
        return Ok(());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    let config = parse_config(&text)?;
    initialize_with(config)
}

/// Initialize from an in-memory configuration.
pub fn initialize_with(config: BridgeConfig) -> Result<(), ConfigError> {
    let mut slot = STACK.write();
    if slot.is_some() {
        return Ok(());
    }

    let net = Stack::new(StackConfig {
        addresses: config.addresses.clone(),
        dns: config.dns.clone(),
        mtu: config.mtu,
    });

    let device = if !config.peers.is_empty() {
        let private_key_hex = config.private_key_hex.as_deref().ok_or(ConfigError::Invalid {
            key: "PrivateKey",
            reason: "required when peers are configured".into(),
        })?;
        let mut peers = Vec::with_capacity(config.peers.len());
        for entry in &config.peers {
            peers.push(PeerConfig {
                public_key: key_from_hex(&entry.public_key_hex)?,
                endpoint: entry.endpoint,
                allowed_ips: entry.allowed_ips.clone(),
                persistent_keepalive: entry.persistent_keepalive,
            });
        }
        let device = Arc::new(Device::new(DeviceConfig {
            private_key: key_from_hex(private_key_hex)?,
            listen_port: config.listen_port,
            peers,
        })?);

        let ingress_stack = net.clone();
        device.set_ingress(move |frame| ingress_stack.inject(frame));
        net.attach_link(Arc::new(DeviceLink(device.clone())));
        device.up()?;
        debug!("tunnel device up");
        Some(device)
    } else {
        None
    };

    *slot = Some(Arc::new(StackHandle {
        net,
        device,
        dns: config.dns,
    }));
    Ok(())
}

/// The initialized transport, lazily probing the canonical configuration
/// path on first use.
pub fn get_stack() -> Option<Arc<StackHandle>> {
    if let Some(handle) = STACK.read().clone() {
        return Some(handle);
    }
    if Path::new(DEFAULT_CONFIG_PATH).exists() {
        if let Err(err) = initialize_stack(DEFAULT_CONFIG_PATH) {
            warn!(%err, "stack initialization failed");
            return None;
        }
        return STACK.read().clone();
    }
    None
}

/// The DNS servers used for reverse lookups, if the stack is up.
pub fn get_dns() -> Option<Vec<IpAddr>> {
    get_stack().map(|handle| handle.dns.clone())
}

pub fn is_initialized() -> bool {
    STACK.read().is_some()
}

/// Tear the transport down; the WSACleanup path.
pub fn close_stack() {
    let handle = STACK.write().take();
    if let Some(handle) = handle {
        if let Some(device) = &handle.device {
            device.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONF: &str = "\
# tunnel for the bridge
[Interface]
PrivateKey = GGV0Z6AcZvgFZSHVDYUnHbCNLjtCSXSMRXRUS+bqV04=
Address = 10.7.0.2/32, fd00::2/128
DNS = 10.7.0.1, 1.1.1.1
MTU = 1400
ListenPort = 51821

[Peer]
PublicKey = W8Wy5pWDoxWpUypMWKtUdS0JJbJezVFSquBqzTGSImM=
Endpoint = 127.0.0.1:51820
AllowedIPs = 0.0.0.0/0
PersistentKeepalive = 25
";

    #[test]
    fn parses_interface_and_peer() {
        let cfg = parse_config(CONF).unwrap();
        assert_eq!(cfg.addresses.len(), 2);
        assert_eq!(cfg.addresses[0], "10.7.0.2".parse::<IpAddr>().unwrap());
        assert_eq!(cfg.dns.len(), 2);
        assert_eq!(cfg.mtu, 1400);
        assert_eq!(cfg.listen_port, Some(51821));
        assert_eq!(cfg.peers.len(), 1);
        let peer = &cfg.peers[0];
        assert_eq!(peer.persistent_keepalive, Some(25));
        assert_eq!(peer.allowed_ips.len(), 1);
        assert_eq!(peer.endpoint, Some("127.0.0.1:51820".parse().unwrap()));
        // Keys decode from base64 and travel as 64 hex digits.
        assert_eq!(peer.public_key_hex.len(), 64);
        assert_eq!(cfg.private_key_hex.as_ref().unwrap().len(), 64);
    }

    #[test]
    fn missing_interface_is_an_error() {
        assert!(matches!(
            parse_config("[Peer]\nPublicKey = x\n"),
            Err(ConfigError::MissingInterface)
        ));
    }

    #[test]
    fn bad_key_is_rejected() {
        let conf = "[Interface]\nPrivateKey = not-base64!!\nAddress = 10.0.0.1/24\n";
        assert!(parse_config(conf).is_err());
    }

    #[test]
    fn default_allowed_ips_cover_everything() {
        let conf = "\
[Interface]
PrivateKey = GGV0Z6AcZvgFZSHVDYUnHbCNLjtCSXSMRXRUS+bqV04=
Address = 10.7.0.2/32

[Peer]
PublicKey = W8Wy5pWDoxWpUypMWKtUdS0JJbJezVFSquBqzTGSImM=
";
        let cfg = parse_config(conf).unwrap();
        assert_eq!(cfg.peers[0].allowed_ips.len(), 2);
        assert!(cfg.peers[0].endpoint.is_none());
    }
}

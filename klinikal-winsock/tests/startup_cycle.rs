//! WSAStartup/WSACleanup balance and teardown. Runs as a single test so
//! the registry purge cannot race other scenarios.

use std::ffi::c_void;

use klinikal_winsock::lifecycle::socket;
use klinikal_winsock::registry::registry;
use klinikal_winsock::stack::{initialize_with, is_initialized, BridgeConfig};
use klinikal_winsock::startup::{startup_ref_count, wsa_cleanup, wsa_startup};
use klinikal_winsock::types::{WsaData, AF_INET, IPPROTO_TCP, SOCK_STREAM};

#[test]
fn startup_cleanup_balance_and_teardown() {
    initialize_with(BridgeConfig::local_only(
        vec!["10.7.0.2".parse().unwrap()],
        vec![],
    ))
    .unwrap();

    unsafe {
        // S1: the WSADATA block is populated with the documented values.
        let mut data: WsaData = std::mem::zeroed();
        assert_eq!(wsa_startup(0x0202, &mut data as *mut _ as *mut c_void), 0);
        assert_eq!(data.version, 0x0202);
        assert_eq!(data.high_version, 0x0202);
        assert_eq!(data.max_sockets, 32767);
        assert_eq!(data.max_udp_dg, 65467);
        let desc = std::str::from_utf8(&data.description[..17]).unwrap();
        assert_eq!(desc, "Go-Winsock Bridge");
        let status = std::str::from_utf8(&data.system_status[..7]).unwrap();
        assert_eq!(status, "Running");

        // A null WSADATA pointer is tolerated.
        assert_eq!(wsa_startup(0x0101, std::ptr::null_mut()), 0);
        assert_eq!(startup_ref_count(), 2);

        // Sockets created while initialized survive intermediate cleanups.
        let held = socket(AF_INET, SOCK_STREAM, IPPROTO_TCP);
        assert!(registry().get(held).is_some());

        assert_eq!(wsa_cleanup(), 0);
        assert_eq!(startup_ref_count(), 1);
        assert!(registry().get(held).is_some());
        assert!(is_initialized());

        // The final cleanup purges every handle and tears the stack down.
        assert_eq!(wsa_cleanup(), 0);
        assert_eq!(startup_ref_count(), 0);
        assert!(registry().get(held).is_none());
        assert!(!is_initialized());

        // Cleanup below zero is a no-op.
        assert_eq!(wsa_cleanup(), 0);
        assert_eq!(startup_ref_count(), 0);
    }
}

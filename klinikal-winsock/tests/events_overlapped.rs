//! Event-driven notification and overlapped I/O scenarios.

use std::ffi::c_void;
use std::ptr;

use klinikal_winsock::error::{wsa_get_last_error, WSA_IO_PENDING};
use klinikal_winsock::events::{
    wsa_close_event, wsa_create_event, wsa_reset_event, wsa_set_event,
    wsa_wait_for_multiple_events, WSA_WAIT_TIMEOUT,
};
use klinikal_winsock::ext_io::{
    wsa_get_overlapped_result, wsa_recv, wsa_send, wsa_send_to,
};
use klinikal_winsock::io::send;
use klinikal_winsock::lifecycle::{accept, bind, closesocket, connect, getsockname, listen, socket};
use klinikal_winsock::multiplex::{wsa_enum_network_events, wsa_event_select};
use klinikal_winsock::stack::{initialize_with, BridgeConfig};
use klinikal_winsock::types::{
    SockaddrIn, WsaBuf, WsaNetworkEvents, WsaOverlapped, AF_INET, FD_READ, FD_WRITE,
    INVALID_SOCKET, IPPROTO_TCP, IPPROTO_UDP, SOCK_DGRAM, SOCK_STREAM,
};

// Scenarios assert the process-wide last-error cell, so they run one at a
// time.
static SERIAL: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn setup() -> std::sync::MutexGuard<'static, ()> {
    let guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    initialize_with(BridgeConfig::local_only(
        vec!["10.7.0.2".parse().unwrap()],
        vec![],
    ))
    .unwrap();
    guard
}

fn sockaddr(ip: [u8; 4], port: u16) -> SockaddrIn {
    SockaddrIn {
        family: AF_INET as u16,
        port: port.to_be(),
        addr: ip,
        zero: [0; 8],
    }
}

unsafe fn tcp_pair() -> (u64, u64, u64) {
    let listener = socket(AF_INET, SOCK_STREAM, IPPROTO_TCP);
    let sa = sockaddr([127, 0, 0, 1], 0);
    assert_eq!(bind(listener, &sa as *const _ as *const c_void, 16), 0);
    assert_eq!(listen(listener, 4), 0);

    let mut bound: SockaddrIn = std::mem::zeroed();
    let mut len = 16i32;
    getsockname(listener, &mut bound as *mut _ as *mut c_void, &mut len);
    let port = u16::from_be(bound.port);

    let client = socket(AF_INET, SOCK_STREAM, IPPROTO_TCP);
    let peer = sockaddr([127, 0, 0, 1], port);
    assert_eq!(connect(client, &peer as *const _ as *const c_void, 16), 0);
    let server = accept(listener, ptr::null_mut(), ptr::null_mut());
    assert_ne!(server, INVALID_SOCKET);
    (client, server, listener)
}

/// FD_READ delivery through WSAEventSelect, observed exactly once by
/// WSAEnumNetworkEvents.
#[test]
fn event_select_reports_read_exactly_once() {
    let _serial = setup();
    unsafe {
        let (client, server, listener) = tcp_pair();
        let event = wsa_create_event();

        assert_eq!(wsa_event_select(server, event, FD_READ | FD_WRITE), 0);

        assert_eq!(send(client, b"wake".as_ptr(), 4, 0), 4);

        let handles = [event];
        let index = wsa_wait_for_multiple_events(1, handles.as_ptr(), 0, 5000, 0);
        assert_eq!(index, 0);

        let mut report: WsaNetworkEvents = std::mem::zeroed();
        assert_eq!(wsa_enum_network_events(server, event, &mut report), 0);
        assert_ne!(report.network_events & FD_READ, 0);
        assert!(report.error_code.iter().all(|&c| c == 0));

        // Second enumeration is empty until another event arrives.
        let mut again: WsaNetworkEvents = std::mem::zeroed();
        assert_eq!(wsa_enum_network_events(server, event, &mut again), 0);
        assert_eq!(again.network_events & FD_READ, 0);

        wsa_close_event(event);
        closesocket(client);
        closesocket(server);
        closesocket(listener);
    }
}

/// Readiness that predates the registration is delivered immediately.
#[test]
fn event_select_catches_pending_readiness() {
    let _serial = setup();
    unsafe {
        let (client, server, listener) = tcp_pair();
        assert_eq!(send(client, b"early".as_ptr(), 5, 0), 5);

        let event = wsa_create_event();
        assert_eq!(wsa_event_select(server, event, FD_READ), 0);

        let handles = [event];
        assert_eq!(wsa_wait_for_multiple_events(1, handles.as_ptr(), 0, 1000, 0), 0);

        let mut report: WsaNetworkEvents = std::mem::zeroed();
        wsa_enum_network_events(server, event, &mut report);
        assert_ne!(report.network_events & FD_READ, 0);

        wsa_close_event(event);
        closesocket(client);
        closesocket(server);
        closesocket(listener);
    }
}

#[test]
fn manual_event_signalling() {
    let _serial = setup();
    let a = wsa_create_event();
    let b = wsa_create_event();
    assert_eq!(wsa_set_event(a), 1);
    let handles = [b, a];
    let index = unsafe { wsa_wait_for_multiple_events(2, handles.as_ptr(), 0, 1000, 0) };
    assert_eq!(index, 1);
    // The token was consumed by the wait.
    let rc = unsafe { wsa_wait_for_multiple_events(2, handles.as_ptr(), 0, 50, 0) };
    assert_eq!(rc, WSA_WAIT_TIMEOUT);
    assert_eq!(wsa_reset_event(a), 1);
    wsa_close_event(a);
    wsa_close_event(b);
}

/// Overlapped WSASend: pending at submission, completion published before
/// the event fires, bytes accounted in the result.
#[test]
fn overlapped_send_completes_through_event() {
    let _serial = setup();
    unsafe {
        let (client, server, listener) = tcp_pair();
        let event = wsa_create_event();

        let payload = *b"overlapped payload";
        let mut half_a = payload[..10].to_vec();
        let mut half_b = payload[10..].to_vec();
        let bufs = [
            WsaBuf {
                len: half_a.len() as u32,
                buf: half_a.as_mut_ptr(),
            },
            WsaBuf {
                len: half_b.len() as u32,
                buf: half_b.as_mut_ptr(),
            },
        ];
        let mut overlapped = WsaOverlapped {
            internal: 0,
            internal_high: 0,
            offset: 0,
            offset_high: 0,
            h_event: event,
        };

        let rc = wsa_send(
            client,
            bufs.as_ptr(),
            2,
            ptr::null_mut(),
            0,
            &mut overlapped as *mut _ as *mut c_void,
            ptr::null(),
        );
        assert_eq!(rc, -1);
        assert_eq!(wsa_get_last_error(), WSA_IO_PENDING);

        let mut transferred = 0u32;
        let mut flags = 0u32;
        let ok = wsa_get_overlapped_result(
            client,
            &overlapped as *const _ as *const c_void,
            &mut transferred,
            1,
            &mut flags,
        );
        assert_eq!(ok, 1);
        assert_eq!(transferred as usize, payload.len());

        // The gathered payload arrived in order on the peer.
        let mut got = vec![0u8; payload.len()];
        let mut received = 0u32;
        let mut recv_flags = 0u32;
        let mut rbuf = [WsaBuf {
            len: got.len() as u32,
            buf: got.as_mut_ptr(),
        }];
        let rc = wsa_recv(
            server,
            rbuf.as_mut_ptr(),
            1,
            &mut received,
            &mut recv_flags,
            ptr::null_mut(),
            ptr::null(),
        );
        assert_eq!(rc, 0);
        assert_eq!(received as usize, payload.len());
        assert_eq!(&got[..], &payload[..]);

        wsa_close_event(event);
        closesocket(client);
        closesocket(server);
        closesocket(listener);
    }
}

/// Overlapped WSARecv scatters into caller buffers that must stay alive,
/// then signals the event.
#[test]
fn overlapped_recv_scatters_incoming_bytes() {
    let _serial = setup();
    unsafe {
        let (client, server, listener) = tcp_pair();
        let event = wsa_create_event();

        let mut first = [0u8; 3];
        let mut second = [0u8; 16];
        let bufs = [
            WsaBuf {
                len: first.len() as u32,
                buf: first.as_mut_ptr(),
            },
            WsaBuf {
                len: second.len() as u32,
                buf: second.as_mut_ptr(),
            },
        ];
        let mut overlapped = WsaOverlapped {
            internal: 0,
            internal_high: 0,
            offset: 0,
            offset_high: 0,
            h_event: event,
        };

        let rc = wsa_recv(
            server,
            bufs.as_ptr(),
            2,
            ptr::null_mut(),
            ptr::null_mut(),
            &mut overlapped as *mut _ as *mut c_void,
            ptr::null(),
        );
        assert_eq!(rc, -1);
        assert_eq!(wsa_get_last_error(), WSA_IO_PENDING);

        assert_eq!(send(client, b"scatter me".as_ptr(), 10, 0), 10);

        let mut transferred = 0u32;
        let ok = wsa_get_overlapped_result(
            server,
            &overlapped as *const _ as *const c_void,
            &mut transferred,
            1,
            ptr::null_mut(),
        );
        assert_eq!(ok, 1);
        assert_eq!(transferred, 10);
        assert_eq!(&first, b"sca");
        assert_eq!(&second[..7], b"tter me");

        wsa_close_event(event);
        closesocket(client);
        closesocket(server);
        closesocket(listener);
    }
}

/// A result pointer with no tracking entry reports synchronous completion.
#[test]
fn missing_overlapped_entry_is_synchronous_success() {
    let _serial = setup();
    unsafe {
        let overlapped = WsaOverlapped {
            internal: 0,
            internal_high: 0,
            offset: 0,
            offset_high: 0,
            h_event: ptr::null_mut(),
        };
        let mut transferred = 99u32;
        let ok = wsa_get_overlapped_result(
            0,
            &overlapped as *const _ as *const c_void,
            &mut transferred,
            0,
            ptr::null_mut(),
        );
        assert_eq!(ok, 1);
        assert_eq!(transferred, 0);
    }
}

/// WSASendTo runs synchronously and scatters like sendto.
#[test]
fn wsa_send_to_gathers_datagram() {
    let _serial = setup();
    unsafe {
        let receiver = socket(AF_INET, SOCK_DGRAM, IPPROTO_UDP);
        let sa = sockaddr([127, 0, 0, 1], 0);
        bind(receiver, &sa as *const _ as *const c_void, 16);
        let mut bound: SockaddrIn = std::mem::zeroed();
        let mut len = 16i32;
        getsockname(receiver, &mut bound as *mut _ as *mut c_void, &mut len);

        let sender = socket(AF_INET, SOCK_DGRAM, IPPROTO_UDP);
        let mut part_a = *b"hel";
        let mut part_b = *b"lo";
        let bufs = [
            WsaBuf {
                len: 3,
                buf: part_a.as_mut_ptr(),
            },
            WsaBuf {
                len: 2,
                buf: part_b.as_mut_ptr(),
            },
        ];
        let mut sent = 0u32;
        let dst = sockaddr([127, 0, 0, 1], u16::from_be(bound.port));
        let rc = wsa_send_to(
            sender,
            bufs.as_ptr(),
            2,
            &mut sent,
            0,
            &dst as *const _ as *const c_void,
            16,
            ptr::null_mut(),
            ptr::null(),
        );
        assert_eq!(rc, 0);
        assert_eq!(sent, 5);

        let mut buf = [0u8; 8];
        let n = klinikal_winsock::io::recvfrom(
            receiver,
            buf.as_mut_ptr(),
            8,
            0,
            ptr::null_mut(),
            ptr::null_mut(),
        );
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], b"hello");

        closesocket(sender);
        closesocket(receiver);
    }
}

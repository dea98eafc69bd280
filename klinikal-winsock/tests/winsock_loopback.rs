//! Lifecycle, synchronous I/O and multiplexing scenarios driven through
//! the pointer-level API, over an in-memory transport.

use std::ffi::c_void;
use std::ptr;

use klinikal_winsock::error::{
    wsa_get_last_error, WSAECONNREFUSED, WSAEINVAL, WSAENOTSOCK, WSAEOPNOTSUPP, WSAEWOULDBLOCK,
};
use klinikal_winsock::io::{recv, recvfrom, send, sendto};
use klinikal_winsock::lifecycle::{
    accept, bind, closesocket, connect, getpeername, getsockname, listen, shutdown, socket,
    wsa_duplicate_socket_a,
};
use klinikal_winsock::multiplex::{
    select, wsa_fd_is_set, wsa_poll, POLLNVAL, POLLRDNORM, POLLWRNORM,
};
use klinikal_winsock::options::{
    getsockopt, ioctlsocket, setsockopt, wsa_ioctl, FIONBIO, FIONREAD, SOL_SOCKET, SO_ERROR,
    SO_RCVBUF, SO_TYPE, TCP_NODELAY, WSAID_ACCEPTEX, WSAID_CONNECTEX,
};
use klinikal_winsock::registry::registry;
use klinikal_winsock::stack::{initialize_with, BridgeConfig};
use klinikal_winsock::types::{
    FdSet, SockaddrIn, Timeval, WsaPollFd, AF_INET, INVALID_SOCKET, IPPROTO_TCP, IPPROTO_UDP,
    MSG_PEEK, SD_SEND, SOCK_DGRAM, SOCK_STREAM,
};

// Scenarios assert the process-wide last-error cell, so they run one at a
// time.
static SERIAL: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn setup() -> std::sync::MutexGuard<'static, ()> {
    let guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
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

/// Local port a bound/listening socket ended up on.
unsafe fn local_port(s: u64) -> u16 {
    let mut sa: SockaddrIn = std::mem::zeroed();
    let mut len = 16i32;
    assert_eq!(getsockname(s, &mut sa as *mut _ as *mut c_void, &mut len), 0);
    u16::from_be(sa.port)
}

/// Builds a connected (client, server, listener) triple on loopback.
unsafe fn tcp_pair() -> (u64, u64, u64) {
    let listener = socket(AF_INET, SOCK_STREAM, IPPROTO_TCP);
    let sa = sockaddr([127, 0, 0, 1], 0);
    assert_eq!(bind(listener, &sa as *const _ as *const c_void, 16), 0);
    assert_eq!(listen(listener, 1), 0);
    let port = local_port(listener);

    let client = socket(AF_INET, SOCK_STREAM, IPPROTO_TCP);
    let peer = sockaddr([127, 0, 0, 1], port);
    assert_eq!(connect(client, &peer as *const _ as *const c_void, 16), 0);

    let mut accepted_from: SockaddrIn = std::mem::zeroed();
    let mut from_len = 16i32;
    let server = accept(
        listener,
        &mut accepted_from as *mut _ as *mut c_void,
        &mut from_len,
    );
    assert_ne!(server, INVALID_SOCKET);
    assert_eq!(i32::from(accepted_from.family), AF_INET);
    (client, server, listener)
}

#[test]
fn stream_lifecycle_and_exchange() {
    let _serial = setup();
    unsafe {
        let (client, server, listener) = tcp_pair();

        // Registered handles resolve until closed.
        assert!(registry().get(client).is_some());

        assert_eq!(send(client, b"ping".as_ptr(), 4, 0), 4);
        let mut buf = [0u8; 4];
        assert_eq!(recv(server, buf.as_mut_ptr(), 4, 0), 4);
        assert_eq!(&buf, b"ping");

        assert_eq!(send(server, b"pong".as_ptr(), 4, 0), 4);
        assert_eq!(recv(client, buf.as_mut_ptr(), 4, 0), 4);
        assert_eq!(&buf, b"pong");

        // Peer address of the client is the listener's endpoint.
        let mut peer: SockaddrIn = std::mem::zeroed();
        let mut len = 16i32;
        assert_eq!(
            getpeername(client, &mut peer as *mut _ as *mut c_void, &mut len),
            0
        );
        assert_eq!(peer.addr, [127, 0, 0, 1]);
        assert_eq!(u16::from_be(peer.port), local_port(listener));

        // Half-close: the server drains then sees a clean EOF.
        assert_eq!(shutdown(client, SD_SEND), 0);
        assert_eq!(recv(server, buf.as_mut_ptr(), 4, 0), 0);

        assert_eq!(closesocket(client), 0);
        assert!(registry().get(client).is_none());
        assert_eq!(closesocket(server), 0);
        assert_eq!(closesocket(listener), 0);
    }
}

#[test]
fn msg_peek_does_not_consume() {
    let _serial = setup();
    unsafe {
        let (client, server, listener) = tcp_pair();
        assert_eq!(send(client, b"abcd".as_ptr(), 4, 0), 4);

        let mut buf = [0u8; 8];
        assert_eq!(recv(server, buf.as_mut_ptr(), 4, MSG_PEEK), 4);
        assert_eq!(&buf[..4], b"abcd");

        // FIONREAD sees the peeked bytes.
        let mut avail = 0u32;
        assert_eq!(ioctlsocket(server, FIONREAD as i32, &mut avail), 0);
        assert_eq!(avail, 4);

        buf.fill(0);
        assert_eq!(recv(server, buf.as_mut_ptr(), 8, 0), 4);
        assert_eq!(&buf[..4], b"abcd");

        closesocket(client);
        closesocket(server);
        closesocket(listener);
    }
}

#[test]
fn nonblocking_recv_would_block() {
    let _serial = setup();
    unsafe {
        let (client, server, listener) = tcp_pair();
        let mut on = 1u32;
        assert_eq!(ioctlsocket(server, FIONBIO as i32, &mut on), 0);

        let mut buf = [0u8; 4];
        assert_eq!(recv(server, buf.as_mut_ptr(), 4, 0), -1);
        assert_eq!(wsa_get_last_error(), WSAEWOULDBLOCK);

        // Once data arrives the same call drains it.
        assert_eq!(send(client, b"x".as_ptr(), 1, 0), 1);
        assert_eq!(recv(server, buf.as_mut_ptr(), 4, 0), 1);

        closesocket(client);
        closesocket(server);
        closesocket(listener);
    }
}

#[test]
fn connect_refused_without_listener() {
    let _serial = setup();
    unsafe {
        let s = socket(AF_INET, SOCK_STREAM, IPPROTO_TCP);
        let sa = sockaddr([127, 0, 0, 1], 1);
        assert_eq!(connect(s, &sa as *const _ as *const c_void, 16), -1);
        assert_eq!(wsa_get_last_error(), WSAECONNREFUSED);

        // The failure is also visible through SO_ERROR, exactly once.
        let mut code = 0i32;
        let mut len = 4i32;
        assert_eq!(
            getsockopt(
                s,
                SOL_SOCKET,
                SO_ERROR,
                &mut code as *mut _ as *mut c_void,
                &mut len
            ),
            0
        );
        assert_eq!(code, WSAECONNREFUSED);
        getsockopt(
            s,
            SOL_SOCKET,
            SO_ERROR,
            &mut code as *mut _ as *mut c_void,
            &mut len,
        );
        assert_eq!(code, 0);
        closesocket(s);
    }
}

#[test]
fn double_bind_is_invalid() {
    let _serial = setup();
    unsafe {
        let s = socket(AF_INET, SOCK_STREAM, IPPROTO_TCP);
        let sa = sockaddr([127, 0, 0, 1], 0);
        assert_eq!(bind(s, &sa as *const _ as *const c_void, 16), 0);
        assert_eq!(bind(s, &sa as *const _ as *const c_void, 16), -1);
        assert_eq!(wsa_get_last_error(), WSAEINVAL);
        closesocket(s);
    }
}

#[test]
fn unknown_handle_paths() {
    let _serial = setup();
    unsafe {
        assert_eq!(closesocket(0xF00D), -1);
        assert_eq!(wsa_get_last_error(), WSAENOTSOCK);
        assert_eq!(listen(0xF00D, 1), -1);
        assert_eq!(wsa_get_last_error(), WSAENOTSOCK);
        assert_eq!(wsa_duplicate_socket_a(0xF00D, 0, ptr::null_mut()), -1);
        assert_eq!(wsa_get_last_error(), WSAEOPNOTSUPP);
    }
}

#[test]
fn datagram_implicit_bind_roundtrip() {
    let _serial = setup();
    unsafe {
        let receiver = socket(AF_INET, SOCK_DGRAM, IPPROTO_UDP);
        let sa = sockaddr([127, 0, 0, 1], 0);
        assert_eq!(bind(receiver, &sa as *const _ as *const c_void, 16), 0);
        let port = local_port(receiver);

        // Unbound sender: sendto binds implicitly and succeeds.
        let sender = socket(AF_INET, SOCK_DGRAM, IPPROTO_UDP);
        let dst = sockaddr([127, 0, 0, 1], port);
        assert_eq!(
            sendto(
                sender,
                b"x".as_ptr(),
                1,
                0,
                &dst as *const _ as *const c_void,
                16
            ),
            1
        );
        // The implicit bind landed on an ephemeral port.
        assert_ne!(local_port(sender), 0);

        let mut buf = [0u8; 4];
        let mut from: SockaddrIn = std::mem::zeroed();
        let mut fromlen = 16i32;
        let n = recvfrom(
            receiver,
            buf.as_mut_ptr(),
            4,
            0,
            &mut from as *mut _ as *mut c_void,
            &mut fromlen,
        );
        assert_eq!(n, 1);
        assert_eq!(buf[0], b'x');
        assert_eq!(i32::from(from.family), AF_INET);
        assert_eq!(u16::from_be(from.port), local_port(sender));
        assert_eq!(fromlen, 16);

        closesocket(sender);
        closesocket(receiver);
    }
}

#[test]
fn connected_datagram_ignores_destination() {
    let _serial = setup();
    unsafe {
        let receiver = socket(AF_INET, SOCK_DGRAM, IPPROTO_UDP);
        let sa = sockaddr([127, 0, 0, 1], 0);
        bind(receiver, &sa as *const _ as *const c_void, 16);
        let port = local_port(receiver);

        let sender = socket(AF_INET, SOCK_DGRAM, IPPROTO_UDP);
        let peer = sockaddr([127, 0, 0, 1], port);
        assert_eq!(connect(sender, &peer as *const _ as *const c_void, 16), 0);

        // The bogus destination is ignored on a connected socket.
        let elsewhere = sockaddr([127, 0, 0, 1], 9);
        assert_eq!(
            sendto(
                sender,
                b"hi".as_ptr(),
                2,
                0,
                &elsewhere as *const _ as *const c_void,
                16
            ),
            2
        );

        let mut buf = [0u8; 4];
        assert_eq!(recv(receiver, buf.as_mut_ptr(), 4, 0), -1);
        // recv requires a connected endpoint; use recvfrom on the bound one.
        let n = recvfrom(receiver, buf.as_mut_ptr(), 4, 0, ptr::null_mut(), ptr::null_mut());
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], b"hi");

        closesocket(sender);
        closesocket(receiver);
    }
}

#[test]
fn option_bytes_roundtrip() {
    let _serial = setup();
    unsafe {
        let s = socket(AF_INET, SOCK_STREAM, IPPROTO_TCP);

        let set: u32 = 65536;
        assert_eq!(
            setsockopt(
                s,
                SOL_SOCKET,
                SO_RCVBUF,
                &set as *const _ as *const c_void,
                4
            ),
            0
        );
        let mut got: u32 = 0;
        let mut len = 4i32;
        assert_eq!(
            getsockopt(
                s,
                SOL_SOCKET,
                SO_RCVBUF,
                &mut got as *mut _ as *mut c_void,
                &mut len
            ),
            0
        );
        assert_eq!(got, set);
        assert_eq!(len, 4);

        let on: u32 = 1;
        assert_eq!(
            setsockopt(s, 6, TCP_NODELAY, &on as *const _ as *const c_void, 4),
            0
        );
        let mut back: u32 = 0;
        len = 4;
        getsockopt(s, 6, TCP_NODELAY, &mut back as *mut _ as *mut c_void, &mut len);
        assert_eq!(back, 1);

        // SO_TYPE is computed, not stored.
        let mut ty = 0i32;
        len = 4;
        getsockopt(s, SOL_SOCKET, SO_TYPE, &mut ty as *mut _ as *mut c_void, &mut len);
        assert_eq!(ty, SOCK_STREAM);
        closesocket(s);

        let d = socket(AF_INET, SOCK_DGRAM, IPPROTO_UDP);
        len = 4;
        getsockopt(d, SOL_SOCKET, SO_TYPE, &mut ty as *mut _ as *mut c_void, &mut len);
        assert_eq!(ty, SOCK_DGRAM);
        closesocket(d);
    }
}

#[test]
fn select_reports_arrivals() {
    let _serial = setup();
    unsafe {
        let (client, server, listener) = tcp_pair();

        let mut readfds = FdSet {
            count: 1,
            array: [0; 64],
        };
        readfds.array[0] = server as u32;
        let zero = Timeval { sec: 0, usec: 0 };
        assert_eq!(
            select(0, &mut readfds, ptr::null_mut(), ptr::null_mut(), &zero),
            0
        );
        assert_eq!(readfds.count, 0);

        assert_eq!(send(client, b"!".as_ptr(), 1, 0), 1);

        readfds.count = 1;
        readfds.array[0] = server as u32;
        let patient = Timeval { sec: 2, usec: 0 };
        let n = select(0, &mut readfds, ptr::null_mut(), ptr::null_mut(), &patient);
        assert_eq!(n, 1);
        assert_eq!(readfds.count, 1);
        assert_eq!(u64::from(readfds.array[0]), server);
        assert_eq!(wsa_fd_is_set(server, &readfds), 1);

        // A fresh stream is immediately writable.
        let mut writefds = FdSet {
            count: 1,
            array: [0; 64],
        };
        writefds.array[0] = client as u32;
        let n = select(0, ptr::null_mut(), &mut writefds, ptr::null_mut(), &zero);
        assert_eq!(n, 1);

        closesocket(client);
        closesocket(server);
        closesocket(listener);
    }
}

#[test]
fn poll_readiness_and_nval() {
    let _serial = setup();
    unsafe {
        let (client, server, listener) = tcp_pair();
        send(client, b"data".as_ptr(), 4, 0);

        let mut fds = [
            WsaPollFd {
                fd: server as u32,
                events: POLLRDNORM,
                revents: 0,
            },
            WsaPollFd {
                fd: client as u32,
                events: POLLWRNORM,
                revents: 0,
            },
            WsaPollFd {
                fd: 0xDEAD,
                events: POLLRDNORM,
                revents: 0,
            },
        ];
        let n = wsa_poll(fds.as_mut_ptr(), 3, 100);
        assert_eq!(n, 3);
        assert_ne!(fds[0].revents & POLLRDNORM, 0);
        assert_ne!(fds[1].revents & POLLWRNORM, 0);
        assert_eq!(fds[2].revents, POLLNVAL);

        closesocket(client);
        closesocket(server);
        closesocket(listener);
    }
}

#[test]
fn extension_pointers_are_stable() {
    let _serial = setup();
    unsafe {
        let s = socket(AF_INET, SOCK_STREAM, IPPROTO_TCP);
        let mut first: usize = 0;
        let mut returned = 0u32;
        let rc = wsa_ioctl(
            s,
            0xC800_0006,
            WSAID_ACCEPTEX.as_ptr() as *const c_void,
            16,
            &mut first as *mut _ as *mut c_void,
            std::mem::size_of::<usize>() as u32,
            &mut returned,
            ptr::null_mut(),
            ptr::null(),
        );
        assert_eq!(rc, 0);
        assert_ne!(first, 0);
        assert_eq!(returned as usize, std::mem::size_of::<usize>());

        let mut second: usize = 0;
        wsa_ioctl(
            s,
            0xC800_0006,
            WSAID_ACCEPTEX.as_ptr() as *const c_void,
            16,
            &mut second as *mut _ as *mut c_void,
            std::mem::size_of::<usize>() as u32,
            &mut returned,
            ptr::null_mut(),
            ptr::null(),
        );
        assert_eq!(first, second);

        let mut connect_ptr: usize = 0;
        wsa_ioctl(
            s,
            0xC800_0006,
            WSAID_CONNECTEX.as_ptr() as *const c_void,
            16,
            &mut connect_ptr as *mut _ as *mut c_void,
            std::mem::size_of::<usize>() as u32,
            &mut returned,
            ptr::null_mut(),
            ptr::null(),
        );
        assert_ne!(connect_ptr, 0);
        assert_ne!(connect_ptr, first);
        closesocket(s);
    }
}

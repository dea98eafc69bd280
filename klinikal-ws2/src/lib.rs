//! ws2_32 export surface.
//!
//! One `extern "system"` export per Winsock symbol, each taking exactly the
//! parameter layout of its Win32 counterpart and forwarding to
//! `klinikal-winsock`. `extern "system"` yields stdcall on 32-bit Windows
//! (the Winsock convention) and the platform C ABI elsewhere.
//!
//! SOCKET is pointer-sized at this boundary; the internal 64-bit handles
//! truncate losslessly until the counter overflows 2^32, and
//! INVALID_SOCKET (~0) truncates to the correct Win32 value.
//!
//! Safety: every function inherits the raw-pointer contract of its Win32
//! counterpart. Buffers must be valid for the lengths the caller passes,
//! strings NUL-terminated, and out-parameters writable. None of these
//! functions retain caller pointers past the call except where Winsock
//! documents it (overlapped buffers, WSAOVERLAPPED blocks).

use std::ffi::c_void;

use klinikal_winsock::types::{FdSet, Timeval, WsaBuf, WsaMsg, WsaNetworkEvents};
use klinikal_winsock::{
    addr, byte_order, conn_ext, error, events, ext_io, io, lifecycle, multiplex, name, options,
    proto_svc, startup, stubs,
};

// ── Startup / teardown ──────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "system" fn WSAStartup(version_requested: u16, wsa_data: *mut c_void) -> i32 {
    startup::wsa_startup(version_requested, wsa_data)
}

#[no_mangle]
pub unsafe extern "system" fn WSACleanup() -> i32 {
    startup::wsa_cleanup()
}

#[no_mangle]
pub unsafe extern "system" fn WSAGetLastError() -> i32 {
    error::wsa_get_last_error()
}

#[no_mangle]
pub unsafe extern "system" fn WSASetLastError(code: i32) {
    error::wsa_set_last_error(code)
}

// ── Socket lifecycle ────────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "system" fn socket(af: i32, socktype: i32, protocol: i32) -> usize {
    lifecycle::socket(af, socktype, protocol) as usize
}

#[no_mangle]
pub unsafe extern "system" fn WSASocketA(
    af: i32,
    socktype: i32,
    protocol: i32,
    protocol_info: *const c_void,
    group: u32,
    flags: u32,
) -> usize {
    lifecycle::wsa_socket_a(af, socktype, protocol, protocol_info, group, flags) as usize
}

#[no_mangle]
pub unsafe extern "system" fn WSASocketW(
    af: i32,
    socktype: i32,
    protocol: i32,
    protocol_info: *const c_void,
    group: u32,
    flags: u32,
) -> usize {
    lifecycle::wsa_socket_w(af, socktype, protocol, protocol_info, group, flags) as usize
}

#[no_mangle]
pub unsafe extern "system" fn closesocket(s: usize) -> i32 {
    lifecycle::closesocket(s as u64)
}

#[no_mangle]
pub unsafe extern "system" fn WSADuplicateSocketA(
    s: usize,
    process_id: u32,
    protocol_info: *mut c_void,
) -> i32 {
    lifecycle::wsa_duplicate_socket_a(s as u64, process_id, protocol_info)
}

#[no_mangle]
pub unsafe extern "system" fn WSADuplicateSocketW(
    s: usize,
    process_id: u32,
    protocol_info: *mut c_void,
) -> i32 {
    lifecycle::wsa_duplicate_socket_w(s as u64, process_id, protocol_info)
}

#[no_mangle]
pub unsafe extern "system" fn bind(s: usize, name: *const c_void, namelen: i32) -> i32 {
    lifecycle::bind(s as u64, name, namelen)
}

#[no_mangle]
pub unsafe extern "system" fn listen(s: usize, backlog: i32) -> i32 {
    lifecycle::listen(s as u64, backlog)
}

#[no_mangle]
pub unsafe extern "system" fn accept(s: usize, addr: *mut c_void, addrlen: *mut i32) -> usize {
    lifecycle::accept(s as u64, addr, addrlen) as usize
}

#[no_mangle]
pub unsafe extern "system" fn connect(s: usize, name: *const c_void, namelen: i32) -> i32 {
    lifecycle::connect(s as u64, name, namelen)
}

#[no_mangle]
pub unsafe extern "system" fn shutdown(s: usize, how: i32) -> i32 {
    lifecycle::shutdown(s as u64, how)
}

#[no_mangle]
pub unsafe extern "system" fn getsockname(s: usize, name: *mut c_void, namelen: *mut i32) -> i32 {
    lifecycle::getsockname(s as u64, name, namelen)
}

#[no_mangle]
pub unsafe extern "system" fn getpeername(s: usize, name: *mut c_void, namelen: *mut i32) -> i32 {
    lifecycle::getpeername(s as u64, name, namelen)
}

#[no_mangle]
pub unsafe extern "system" fn WSAAccept(
    s: usize,
    addr: *mut c_void,
    addrlen: *mut i32,
    condition: *const c_void,
    callback_data: u32,
) -> usize {
    conn_ext::wsa_accept(s as u64, addr, addrlen, condition, callback_data) as usize
}

#[no_mangle]
pub unsafe extern "system" fn WSAConnect(
    s: usize,
    name: *const c_void,
    namelen: i32,
    caller_data: *const c_void,
    callee_data: *mut c_void,
    sqos: *const c_void,
    gqos: *const c_void,
) -> i32 {
    conn_ext::wsa_connect(s as u64, name, namelen, caller_data, callee_data, sqos, gqos)
}

#[no_mangle]
pub unsafe extern "system" fn WSAConnectByNameA(
    s: usize,
    nodename: *const u8,
    servicename: *const u8,
    local_len: *mut u32,
    local: *mut c_void,
    remote_len: *mut u32,
    remote: *mut c_void,
    timeout: *const Timeval,
    reserved: *mut c_void,
) -> i32 {
    conn_ext::wsa_connect_by_name_a(
        s as u64,
        nodename,
        servicename,
        local_len,
        local,
        remote_len,
        remote,
        timeout,
        reserved,
    )
}

#[no_mangle]
pub unsafe extern "system" fn WSAConnectByNameW(
    s: usize,
    nodename: *const u16,
    servicename: *const u16,
    local_len: *mut u32,
    local: *mut c_void,
    remote_len: *mut u32,
    remote: *mut c_void,
    timeout: *const Timeval,
    reserved: *mut c_void,
) -> i32 {
    conn_ext::wsa_connect_by_name_w(
        s as u64,
        nodename,
        servicename,
        local_len,
        local,
        remote_len,
        remote,
        timeout,
        reserved,
    )
}

#[no_mangle]
pub unsafe extern "system" fn WSAConnectByList(
    s: usize,
    address_list: *const c_void,
    local_len: *mut u32,
    local: *mut c_void,
    remote_len: *mut u32,
    remote: *mut c_void,
    timeout: *const Timeval,
    reserved: *mut c_void,
) -> i32 {
    conn_ext::wsa_connect_by_list(
        s as u64,
        address_list,
        local_len,
        local,
        remote_len,
        remote,
        timeout,
        reserved,
    )
}

// ── Synchronous I/O ─────────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "system" fn send(s: usize, buf: *const u8, len: i32, flags: i32) -> i32 {
    io::send(s as u64, buf, len, flags)
}

#[no_mangle]
pub unsafe extern "system" fn recv(s: usize, buf: *mut u8, len: i32, flags: i32) -> i32 {
    io::recv(s as u64, buf, len, flags)
}

#[no_mangle]
pub unsafe extern "system" fn sendto(
    s: usize,
    buf: *const u8,
    len: i32,
    flags: i32,
    to: *const c_void,
    tolen: i32,
) -> i32 {
    io::sendto(s as u64, buf, len, flags, to, tolen)
}

#[no_mangle]
pub unsafe extern "system" fn recvfrom(
    s: usize,
    buf: *mut u8,
    len: i32,
    flags: i32,
    from: *mut c_void,
    fromlen: *mut i32,
) -> i32 {
    io::recvfrom(s as u64, buf, len, flags, from, fromlen)
}

// ── Extended I/O ────────────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "system" fn WSASend(
    s: usize,
    buffers: *const WsaBuf,
    count: u32,
    bytes_sent: *mut u32,
    flags: u32,
    overlapped: *mut c_void,
    completion_routine: *const c_void,
) -> i32 {
    ext_io::wsa_send(s as u64, buffers, count, bytes_sent, flags, overlapped, completion_routine)
}

#[no_mangle]
pub unsafe extern "system" fn WSARecv(
    s: usize,
    buffers: *const WsaBuf,
    count: u32,
    bytes_received: *mut u32,
    flags: *mut u32,
    overlapped: *mut c_void,
    completion_routine: *const c_void,
) -> i32 {
    ext_io::wsa_recv(
        s as u64,
        buffers,
        count,
        bytes_received,
        flags,
        overlapped,
        completion_routine,
    )
}

#[no_mangle]
pub unsafe extern "system" fn WSASendTo(
    s: usize,
    buffers: *const WsaBuf,
    count: u32,
    bytes_sent: *mut u32,
    flags: u32,
    to: *const c_void,
    tolen: i32,
    overlapped: *mut c_void,
    completion_routine: *const c_void,
) -> i32 {
    ext_io::wsa_send_to(
        s as u64,
        buffers,
        count,
        bytes_sent,
        flags,
        to,
        tolen,
        overlapped,
        completion_routine,
    )
}

#[no_mangle]
pub unsafe extern "system" fn WSARecvFrom(
    s: usize,
    buffers: *const WsaBuf,
    count: u32,
    bytes_received: *mut u32,
    flags: *mut u32,
    from: *mut c_void,
    fromlen: *mut i32,
    overlapped: *mut c_void,
    completion_routine: *const c_void,
) -> i32 {
    ext_io::wsa_recv_from(
        s as u64,
        buffers,
        count,
        bytes_received,
        flags,
        from,
        fromlen,
        overlapped,
        completion_routine,
    )
}

#[no_mangle]
pub unsafe extern "system" fn WSASendMsg(
    s: usize,
    msg: *mut WsaMsg,
    flags: u32,
    bytes_sent: *mut u32,
    overlapped: *mut c_void,
    completion_routine: *const c_void,
) -> i32 {
    ext_io::wsa_send_msg(s as u64, msg, flags, bytes_sent, overlapped, completion_routine)
}

#[no_mangle]
pub unsafe extern "system" fn WSARecvMsg(
    s: usize,
    msg: *mut WsaMsg,
    bytes_received: *mut u32,
    overlapped: *mut c_void,
    completion_routine: *const c_void,
) -> i32 {
    ext_io::wsa_recv_msg(s as u64, msg, bytes_received, overlapped, completion_routine)
}

#[no_mangle]
pub unsafe extern "system" fn WSASendDisconnect(s: usize, disconnect_data: *const c_void) -> i32 {
    ext_io::wsa_send_disconnect(s as u64, disconnect_data)
}

#[no_mangle]
pub unsafe extern "system" fn WSARecvDisconnect(s: usize, disconnect_data: *const c_void) -> i32 {
    ext_io::wsa_recv_disconnect(s as u64, disconnect_data)
}

#[no_mangle]
pub unsafe extern "system" fn WSAGetOverlappedResult(
    s: usize,
    overlapped: *const c_void,
    bytes_transferred: *mut u32,
    wait: i32,
    flags: *mut u32,
) -> i32 {
    ext_io::wsa_get_overlapped_result(s as u64, overlapped, bytes_transferred, wait, flags)
}

// ── Options and control ─────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "system" fn setsockopt(
    s: usize,
    level: i32,
    optname: i32,
    optval: *const c_void,
    optlen: i32,
) -> i32 {
    options::setsockopt(s as u64, level, optname, optval, optlen)
}

#[no_mangle]
pub unsafe extern "system" fn getsockopt(
    s: usize,
    level: i32,
    optname: i32,
    optval: *mut c_void,
    optlen: *mut i32,
) -> i32 {
    options::getsockopt(s as u64, level, optname, optval, optlen)
}

#[no_mangle]
pub unsafe extern "system" fn ioctlsocket(s: usize, cmd: i32, argp: *mut u32) -> i32 {
    options::ioctlsocket(s as u64, cmd, argp)
}

#[no_mangle]
pub unsafe extern "system" fn WSAIoctl(
    s: usize,
    control_code: u32,
    in_buffer: *const c_void,
    in_len: u32,
    out_buffer: *mut c_void,
    out_len: u32,
    bytes_returned: *mut u32,
    overlapped: *mut c_void,
    completion_routine: *const c_void,
) -> i32 {
    options::wsa_ioctl(
        s as u64,
        control_code,
        in_buffer,
        in_len,
        out_buffer,
        out_len,
        bytes_returned,
        overlapped,
        completion_routine,
    )
}

#[no_mangle]
pub unsafe extern "system" fn WSANSPIoctl(
    lookup: *mut c_void,
    control_code: u32,
    in_buffer: *const c_void,
    in_len: u32,
    out_buffer: *mut c_void,
    out_len: u32,
    bytes_returned: *mut u32,
    completion: *mut c_void,
) -> i32 {
    options::wsa_nsp_ioctl(
        lookup,
        control_code,
        in_buffer,
        in_len,
        out_buffer,
        out_len,
        bytes_returned,
        completion,
    )
}

// ── Multiplexing and events ─────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "system" fn select(
    nfds: i32,
    readfds: *mut FdSet,
    writefds: *mut FdSet,
    exceptfds: *mut FdSet,
    timeout: *const Timeval,
) -> i32 {
    multiplex::select(nfds, readfds, writefds, exceptfds, timeout)
}

#[no_mangle]
pub unsafe extern "system" fn WSAPoll(fd_array: *mut c_void, count: u32, timeout_ms: i32) -> i32 {
    multiplex::wsa_poll(fd_array as *mut _, count, timeout_ms)
}

#[no_mangle]
pub unsafe extern "system" fn WSAEventSelect(
    s: usize,
    event: *mut c_void,
    network_events: i32,
) -> i32 {
    multiplex::wsa_event_select(s as u64, event, network_events)
}

#[no_mangle]
pub unsafe extern "system" fn WSAEnumNetworkEvents(
    s: usize,
    event: *mut c_void,
    network_events: *mut WsaNetworkEvents,
) -> i32 {
    multiplex::wsa_enum_network_events(s as u64, event, network_events)
}

#[no_mangle]
pub unsafe extern "system" fn WSAAsyncSelect(
    s: usize,
    hwnd: *mut c_void,
    msg: u32,
    network_events: i32,
) -> i32 {
    multiplex::wsa_async_select(s as u64, hwnd, msg, network_events)
}

#[no_mangle]
pub unsafe extern "system" fn ProcessSocketNotifications(
    completion_port: *mut c_void,
    registration_count: u32,
    registration_infos: *mut c_void,
    timeout_ms: u32,
    completion_count: u32,
    completion_infos: *mut c_void,
    received_count: *mut u32,
) -> i32 {
    multiplex::process_socket_notifications(
        completion_port,
        registration_count,
        registration_infos,
        timeout_ms,
        completion_count,
        completion_infos,
        received_count,
    )
}

#[no_mangle]
pub unsafe extern "system" fn SocketNotificationRetrieveEvents(
    registration: *mut c_void,
    events_out: *mut c_void,
) -> i32 {
    multiplex::socket_notification_retrieve_events(registration, events_out)
}

#[no_mangle]
pub unsafe extern "system" fn __WSAFDIsSet(s: usize, set: *const FdSet) -> i32 {
    multiplex::wsa_fd_is_set(s as u64, set)
}

#[no_mangle]
pub unsafe extern "system" fn WSACreateEvent() -> *mut c_void {
    events::wsa_create_event()
}

#[no_mangle]
pub unsafe extern "system" fn WSACloseEvent(event: *mut c_void) -> i32 {
    events::wsa_close_event(event)
}

#[no_mangle]
pub unsafe extern "system" fn WSASetEvent(event: *mut c_void) -> i32 {
    events::wsa_set_event(event)
}

#[no_mangle]
pub unsafe extern "system" fn WSAResetEvent(event: *mut c_void) -> i32 {
    events::wsa_reset_event(event)
}

#[no_mangle]
pub unsafe extern "system" fn WSAWaitForMultipleEvents(
    count: u32,
    events_in: *const *mut c_void,
    wait_all: i32,
    timeout_ms: u32,
    alertable: i32,
) -> u32 {
    events::wsa_wait_for_multiple_events(count, events_in, wait_all, timeout_ms, alertable)
}

// ── Byte order ──────────────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "system" fn htons(hostshort: u16) -> u16 {
    byte_order::htons(hostshort)
}

#[no_mangle]
pub unsafe extern "system" fn ntohs(netshort: u16) -> u16 {
    byte_order::ntohs(netshort)
}

#[no_mangle]
pub unsafe extern "system" fn htonl(hostlong: u32) -> u32 {
    byte_order::htonl(hostlong)
}

#[no_mangle]
pub unsafe extern "system" fn ntohl(netlong: u32) -> u32 {
    byte_order::ntohl(netlong)
}

#[no_mangle]
pub unsafe extern "system" fn htonll(hostlonglong: u64) -> u64 {
    byte_order::htonll(hostlonglong)
}

#[no_mangle]
pub unsafe extern "system" fn ntohll(netlonglong: u64) -> u64 {
    byte_order::ntohll(netlonglong)
}

#[no_mangle]
pub unsafe extern "system" fn htonf(hostfloat: f32) -> f32 {
    byte_order::htonf(hostfloat)
}

#[no_mangle]
pub unsafe extern "system" fn ntohf(netfloat: f32) -> f32 {
    byte_order::ntohf(netfloat)
}

#[no_mangle]
pub unsafe extern "system" fn htond(hostdouble: f64) -> f64 {
    byte_order::htond(hostdouble)
}

#[no_mangle]
pub unsafe extern "system" fn ntohd(netdouble: f64) -> f64 {
    byte_order::ntohd(netdouble)
}

#[no_mangle]
pub unsafe extern "system" fn WSAHtonl(s: usize, hostlong: u32, out: *mut u32) -> i32 {
    byte_order::wsa_htonl(s as u64, hostlong, out)
}

#[no_mangle]
pub unsafe extern "system" fn WSAHtons(s: usize, hostshort: u16, out: *mut u16) -> i32 {
    byte_order::wsa_htons(s as u64, hostshort, out)
}

#[no_mangle]
pub unsafe extern "system" fn WSANtohl(s: usize, netlong: u32, out: *mut u32) -> i32 {
    byte_order::wsa_ntohl(s as u64, netlong, out)
}

#[no_mangle]
pub unsafe extern "system" fn WSANtohs(s: usize, netshort: u16, out: *mut u16) -> i32 {
    byte_order::wsa_ntohs(s as u64, netshort, out)
}

// ── Address conversion ──────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "system" fn inet_addr(cp: *const u8) -> u32 {
    addr::inet_addr(cp)
}

#[no_mangle]
pub unsafe extern "system" fn inet_ntoa(in_addr: u32) -> *mut u8 {
    addr::inet_ntoa(in_addr)
}

#[no_mangle]
pub unsafe extern "system" fn inet_pton(family: i32, src: *const u8, dst: *mut c_void) -> i32 {
    addr::inet_pton(family, src, dst)
}

#[no_mangle]
pub unsafe extern "system" fn inet_ntop(
    family: i32,
    src: *const c_void,
    dst: *mut u8,
    size: i32,
) -> *mut u8 {
    addr::inet_ntop(family, src, dst, size)
}

#[no_mangle]
pub unsafe extern "system" fn InetPtonW(family: i32, src: *const u16, dst: *mut c_void) -> i32 {
    addr::inet_pton_w(family, src, dst)
}

#[no_mangle]
pub unsafe extern "system" fn InetNtopW(
    family: i32,
    src: *const c_void,
    dst: *mut u16,
    size: i32,
) -> *mut u16 {
    addr::inet_ntop_w(family, src, dst, size)
}

#[no_mangle]
pub unsafe extern "system" fn WSAAddressToStringA(
    address: *const c_void,
    address_length: u32,
    protocol_info: *const c_void,
    out: *mut u8,
    out_len: *mut u32,
) -> i32 {
    addr::wsa_address_to_string_a(address, address_length, protocol_info, out, out_len)
}

#[no_mangle]
pub unsafe extern "system" fn WSAAddressToStringW(
    address: *const c_void,
    address_length: u32,
    protocol_info: *const c_void,
    out: *mut u16,
    out_len: *mut u32,
) -> i32 {
    addr::wsa_address_to_string_w(address, address_length, protocol_info, out, out_len)
}

#[no_mangle]
pub unsafe extern "system" fn WSAStringToAddressA(
    address_string: *const u8,
    address_family: i32,
    protocol_info: *const c_void,
    address: *mut c_void,
    address_length: *mut i32,
) -> i32 {
    addr::wsa_string_to_address_a(
        address_string,
        address_family,
        protocol_info,
        address,
        address_length,
    )
}

#[no_mangle]
pub unsafe extern "system" fn WSAStringToAddressW(
    address_string: *const u16,
    address_family: i32,
    protocol_info: *const c_void,
    address: *mut c_void,
    address_length: *mut i32,
) -> i32 {
    addr::wsa_string_to_address_w(
        address_string,
        address_family,
        protocol_info,
        address,
        address_length,
    )
}

// ── Name services ───────────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "system" fn gethostname(name: *mut u8, namelen: i32) -> i32 {
    addr::gethostname(name, namelen)
}

#[no_mangle]
pub unsafe extern "system" fn GetHostNameW(name: *mut u16, namelen: i32) -> i32 {
    addr::get_host_name_w(name, namelen)
}

#[no_mangle]
pub unsafe extern "system" fn gethostbyname(name: *const u8) -> *mut c_void {
    name::gethostbyname(name)
}

#[no_mangle]
pub unsafe extern "system" fn gethostbyaddr(
    addr_bytes: *const u8,
    len: i32,
    addr_type: i32,
) -> *mut c_void {
    name::gethostbyaddr(addr_bytes, len, addr_type)
}

#[no_mangle]
pub unsafe extern "system" fn getaddrinfo(
    node: *const u8,
    service: *const u8,
    hints: *const c_void,
    res: *mut *mut c_void,
) -> i32 {
    name::getaddrinfo(node, service, hints, res)
}

#[no_mangle]
pub unsafe extern "system" fn GetAddrInfoW(
    node: *const u16,
    service: *const u16,
    hints: *const c_void,
    res: *mut *mut c_void,
) -> i32 {
    name::get_addr_info_w(node, service, hints, res)
}

#[no_mangle]
pub unsafe extern "system" fn freeaddrinfo(ai: *mut c_void) {
    name::freeaddrinfo(ai)
}

#[no_mangle]
pub unsafe extern "system" fn FreeAddrInfoW(ai: *mut c_void) {
    name::free_addr_info_w(ai)
}

#[no_mangle]
pub unsafe extern "system" fn getnameinfo(
    sa: *const c_void,
    salen: i32,
    host: *mut u8,
    hostlen: u32,
    serv: *mut u8,
    servlen: u32,
    flags: i32,
) -> i32 {
    name::getnameinfo(sa, salen, host, hostlen, serv, servlen, flags)
}

#[no_mangle]
pub unsafe extern "system" fn GetNameInfoW(
    sa: *const c_void,
    salen: i32,
    host: *mut u16,
    hostlen: u32,
    serv: *mut u16,
    servlen: u32,
    flags: i32,
) -> i32 {
    name::get_name_info_w(sa, salen, host, hostlen, serv, servlen, flags)
}

#[no_mangle]
pub unsafe extern "system" fn getprotobyname(proto_name: *const u8) -> *mut c_void {
    proto_svc::getprotobyname(proto_name)
}

#[no_mangle]
pub unsafe extern "system" fn getprotobynumber(proto: i32) -> *mut c_void {
    proto_svc::getprotobynumber(proto)
}

#[no_mangle]
pub unsafe extern "system" fn getservbyname(
    service_name: *const u8,
    proto: *const u8,
) -> *mut c_void {
    proto_svc::getservbyname(service_name, proto)
}

#[no_mangle]
pub unsafe extern "system" fn getservbyport(port: i32, proto: *const u8) -> *mut c_void {
    proto_svc::getservbyport(port, proto)
}

#[no_mangle]
pub unsafe extern "system" fn WSAEnumProtocolsA(
    protocols: *const i32,
    buffer: *mut c_void,
    buffer_len: *mut u32,
) -> i32 {
    proto_svc::wsa_enum_protocols_a(protocols, buffer, buffer_len)
}

#[no_mangle]
pub unsafe extern "system" fn WSAEnumProtocolsW(
    protocols: *const i32,
    buffer: *mut c_void,
    buffer_len: *mut u32,
) -> i32 {
    proto_svc::wsa_enum_protocols_w(protocols, buffer, buffer_len)
}

// ── Namespace, service discovery, QOS stubs ─────────────────────────────

#[no_mangle]
pub unsafe extern "system" fn WSAEnumNameSpaceProvidersA(
    buffer_length: *mut u32,
    buffer: *mut c_void,
) -> i32 {
    stubs::wsa_enum_name_space_providers_a(buffer_length, buffer)
}

#[no_mangle]
pub unsafe extern "system" fn WSAEnumNameSpaceProvidersW(
    buffer_length: *mut u32,
    buffer: *mut c_void,
) -> i32 {
    stubs::wsa_enum_name_space_providers_w(buffer_length, buffer)
}

#[no_mangle]
pub unsafe extern "system" fn WSAEnumNameSpaceProvidersExA(
    buffer_length: *mut u32,
    buffer: *mut c_void,
) -> i32 {
    stubs::wsa_enum_name_space_providers_ex_a(buffer_length, buffer)
}

#[no_mangle]
pub unsafe extern "system" fn WSAEnumNameSpaceProvidersExW(
    buffer_length: *mut u32,
    buffer: *mut c_void,
) -> i32 {
    stubs::wsa_enum_name_space_providers_ex_w(buffer_length, buffer)
}

#[no_mangle]
pub unsafe extern "system" fn WSALookupServiceBeginA(
    restrictions: *const c_void,
    control_flags: u32,
    lookup: *mut *mut c_void,
) -> i32 {
    stubs::wsa_lookup_service_begin_a(restrictions, control_flags, lookup)
}

#[no_mangle]
pub unsafe extern "system" fn WSALookupServiceBeginW(
    restrictions: *const c_void,
    control_flags: u32,
    lookup: *mut *mut c_void,
) -> i32 {
    stubs::wsa_lookup_service_begin_w(restrictions, control_flags, lookup)
}

#[no_mangle]
pub unsafe extern "system" fn WSALookupServiceNextA(
    lookup: *mut c_void,
    control_flags: u32,
    buffer_length: *mut u32,
    results: *mut c_void,
) -> i32 {
    stubs::wsa_lookup_service_next_a(lookup, control_flags, buffer_length, results)
}

#[no_mangle]
pub unsafe extern "system" fn WSALookupServiceNextW(
    lookup: *mut c_void,
    control_flags: u32,
    buffer_length: *mut u32,
    results: *mut c_void,
) -> i32 {
    stubs::wsa_lookup_service_next_w(lookup, control_flags, buffer_length, results)
}

#[no_mangle]
pub unsafe extern "system" fn WSALookupServiceEnd(lookup: *mut c_void) -> i32 {
    stubs::wsa_lookup_service_end(lookup)
}

#[no_mangle]
pub unsafe extern "system" fn WSASetServiceA(
    reg_info: *const c_void,
    operation: i32,
    control_flags: u32,
) -> i32 {
    stubs::wsa_set_service_a(reg_info, operation, control_flags)
}

#[no_mangle]
pub unsafe extern "system" fn WSASetServiceW(
    reg_info: *const c_void,
    operation: i32,
    control_flags: u32,
) -> i32 {
    stubs::wsa_set_service_w(reg_info, operation, control_flags)
}

#[no_mangle]
pub unsafe extern "system" fn WSAGetServiceClassInfoA(
    provider_id: *const c_void,
    service_class_id: *const c_void,
    buffer_length: *mut u32,
    service_class_info: *mut c_void,
) -> i32 {
    stubs::wsa_get_service_class_info_a(
        provider_id,
        service_class_id,
        buffer_length,
        service_class_info,
    )
}

#[no_mangle]
pub unsafe extern "system" fn WSAGetServiceClassInfoW(
    provider_id: *const c_void,
    service_class_id: *const c_void,
    buffer_length: *mut u32,
    service_class_info: *mut c_void,
) -> i32 {
    stubs::wsa_get_service_class_info_w(
        provider_id,
        service_class_id,
        buffer_length,
        service_class_info,
    )
}

#[no_mangle]
pub unsafe extern "system" fn WSAGetServiceClassNameByClassIdA(
    service_class_id: *const c_void,
    service_class_name: *mut u8,
    buffer_length: *mut u32,
) -> i32 {
    stubs::wsa_get_service_class_name_by_class_id_a(
        service_class_id,
        service_class_name,
        buffer_length,
    )
}

#[no_mangle]
pub unsafe extern "system" fn WSAGetServiceClassNameByClassIdW(
    service_class_id: *const c_void,
    service_class_name: *mut u16,
    buffer_length: *mut u32,
) -> i32 {
    stubs::wsa_get_service_class_name_by_class_id_w(
        service_class_id,
        service_class_name,
        buffer_length,
    )
}

#[no_mangle]
pub unsafe extern "system" fn WSAInstallServiceClassA(service_class_info: *const c_void) -> i32 {
    stubs::wsa_install_service_class_a(service_class_info)
}

#[no_mangle]
pub unsafe extern "system" fn WSAInstallServiceClassW(service_class_info: *const c_void) -> i32 {
    stubs::wsa_install_service_class_w(service_class_info)
}

#[no_mangle]
pub unsafe extern "system" fn WSARemoveServiceClass(service_class_id: *const c_void) -> i32 {
    stubs::wsa_remove_service_class(service_class_id)
}

#[no_mangle]
pub unsafe extern "system" fn WSAProviderConfigChange(
    notification_handle: *mut *mut c_void,
    overlapped: *mut c_void,
    completion_routine: *const c_void,
) -> i32 {
    stubs::wsa_provider_config_change(notification_handle, overlapped, completion_routine)
}

#[no_mangle]
pub unsafe extern "system" fn WSAGetQOSByName(
    s: usize,
    qos_name: *const c_void,
    qos: *mut c_void,
) -> i32 {
    stubs::wsa_get_qos_by_name(s as u64, qos_name, qos)
}

// ── Extension functions ─────────────────────────────────────────────────
// The addresses WSAIoctl resolves for the AcceptEx/ConnectEx GUIDs point
// at these same core functions, so the pointers stay stable for the
// process lifetime.

#[no_mangle]
pub unsafe extern "system" fn AcceptEx(
    listen_socket: usize,
    accept_socket: usize,
    output_buffer: *mut c_void,
    receive_data_length: u32,
    local_address_length: u32,
    remote_address_length: u32,
    bytes_received: *mut u32,
    overlapped: *mut c_void,
) -> i32 {
    conn_ext::accept_ex(
        listen_socket as u64,
        accept_socket as u64,
        output_buffer,
        receive_data_length,
        local_address_length,
        remote_address_length,
        bytes_received,
        overlapped,
    )
}

#[no_mangle]
pub unsafe extern "system" fn ConnectEx(
    s: usize,
    sa: *const c_void,
    namelen: i32,
    send_buffer: *mut c_void,
    send_data_length: u32,
    bytes_sent: *mut u32,
    overlapped: *mut c_void,
) -> i32 {
    conn_ext::connect_ex(
        s as u64,
        sa,
        namelen,
        send_buffer,
        send_data_length,
        bytes_sent,
        overlapped,
    )
}

//! Extended data transfer: scatter-gather WSASend/WSARecv with true
//! overlapped dispatch on worker threads, the sendto/recvfrom wrappers,
//! WSAMSG routing, disconnects and overlapped-result retrieval.

use std::ffi::c_void;

use tracing::warn;

use crate::error::{
    map_net_error, set_last_error, WSAEFAULT, WSAEINVAL, WSAENOTSOCK, WSA_IO_INCOMPLETE,
    WSA_IO_PENDING,
};
use crate::events;
use crate::io;
use crate::lifecycle;
use crate::registry::{registry, OverlappedResult};
use crate::types::{WsaBuf, WsaMsg, WsaOverlapped, SD_RECEIVE, SD_SEND};

/// A WSABUF descriptor snapshot that can cross into a worker thread. The
/// caller owns the memory and must keep it alive until the overlapped
/// operation completes; that is the Winsock contract.
#[derive(Clone, Copy)]
struct BufDesc {
    ptr: usize,
    len: u32,
}

unsafe fn snapshot_buffers(buffers: *const WsaBuf, count: u32) -> Vec<BufDesc> {
    std::slice::from_raw_parts(buffers, count as usize)
        .iter()
        .map(|b| BufDesc {
            ptr: b.buf as usize,
            len: b.len,
        })
        .collect()
}

/// Concatenate every WSABUF into one owned buffer.
unsafe fn gather_buffers(buffers: *const WsaBuf, count: u32) -> Vec<u8> {
    let bufs = std::slice::from_raw_parts(buffers, count as usize);
    let total: usize = bufs.iter().map(|b| b.len as usize).sum();
    let mut out = Vec::with_capacity(total);
    for b in bufs {
        if !b.buf.is_null() && b.len > 0 {
            out.extend_from_slice(std::slice::from_raw_parts(b.buf, b.len as usize));
        }
    }
    out
}

/// Spread `data` across the descriptor list in order; returns bytes
/// copied.
unsafe fn scatter_into(descs: &[BufDesc], data: &[u8]) -> u32 {
    let mut off = 0usize;
    for d in descs {
        if off >= data.len() {
            break;
        }
        let n = (d.len as usize).min(data.len() - off);
        if d.ptr != 0 && n > 0 {
            std::ptr::copy_nonoverlapping(data.as_ptr().add(off), d.ptr as *mut u8, n);
            off += n;
        }
    }
    off as u32
}

unsafe fn total_capacity(buffers: *const WsaBuf, count: u32) -> usize {
    std::slice::from_raw_parts(buffers, count as usize)
        .iter()
        .map(|b| b.len as usize)
        .sum()
}

fn publish_completion(key: usize, result: OverlappedResult, event: usize) {
    // Publication must happen before the event signal.
    registry().set_overlapped(key, result);
    if event != 0 {
        events::wsa_set_event(event as *mut c_void);
    }
}

/// Gather-then-write. The synchronous path returns 0 on full success; the
/// overlapped path snapshots the payload (the caller may free the WSABUF
/// array immediately), runs on a worker thread, and reports WSA_IO_PENDING.
///
/// # Safety
/// `buffers` must point to `count` valid WSABUFs; out-pointers must be
/// valid or null.
pub unsafe fn wsa_send(
    s: u64,
    buffers: *const WsaBuf,
    count: u32,
    bytes_sent: *mut u32,
    _flags: u32,
    overlapped: *mut c_void,
    _completion_routine: *const c_void,
) -> i32 {
    trace_call!("WSASend", s, buffers, count, bytes_sent, overlapped);
    let Some(st) = registry().get(s) else {
        set_last_error(WSAENOTSOCK);
        return -1;
    };
    let Some(endpoint) = st.endpoint() else {
        set_last_error(WSAENOTSOCK);
        return -1;
    };
    if buffers.is_null() || count == 0 {
        set_last_error(WSAEINVAL);
        return -1;
    }

    if !overlapped.is_null() {
        let ov = &*(overlapped as *const WsaOverlapped);
        let key = overlapped as usize;
        let event = ov.h_event as usize;
        registry().set_overlapped(key, OverlappedResult::default());

        // Snapshot the payload before returning: the caller may free the
        // gather array as soon as we report pending.
        let data = gather_buffers(buffers, count);
        std::thread::spawn(move || {
            let result = match endpoint.write(&data) {
                Ok(n) => OverlappedResult {
                    bytes: n as u32,
                    error: 0,
                    complete: true,
                    flags: 0,
                },
                Err(err) => OverlappedResult {
                    bytes: 0,
                    error: map_net_error(&err),
                    complete: true,
                    flags: 0,
                },
            };
            publish_completion(key, result, event);
        });

        set_last_error(WSA_IO_PENDING);
        return -1;
    }

    let data = gather_buffers(buffers, count);
    match endpoint.write(&data) {
        Ok(n) => {
            if !bytes_sent.is_null() {
                *bytes_sent = n as u32;
            }
            0
        }
        Err(err) => {
            set_last_error(map_net_error(&err));
            -1
        }
    }
}

/// Read-then-scatter. The overlapped path snapshots the buffer
/// *descriptors* (the caller must keep the backing memory alive) and
/// scatters on the worker thread.
///
/// # Safety
/// As [`wsa_send`]; additionally the scatter memory must outlive an
/// overlapped operation.
pub unsafe fn wsa_recv(
    s: u64,
    buffers: *const WsaBuf,
    count: u32,
    bytes_received: *mut u32,
    _flags: *mut u32,
    overlapped: *mut c_void,
    _completion_routine: *const c_void,
) -> i32 {
    trace_call!("WSARecv", s, buffers, count, bytes_received, overlapped);
    let Some(st) = registry().get(s) else {
        set_last_error(WSAENOTSOCK);
        return -1;
    };
    let Some(endpoint) = st.endpoint() else {
        set_last_error(WSAENOTSOCK);
        return -1;
    };
    if buffers.is_null() || count == 0 {
        set_last_error(WSAEINVAL);
        return -1;
    }
    let capacity = total_capacity(buffers, count);

    if !overlapped.is_null() {
        let ov = &*(overlapped as *const WsaOverlapped);
        let key = overlapped as usize;
        let event = ov.h_event as usize;
        registry().set_overlapped(key, OverlappedResult::default());

        let descs = snapshot_buffers(buffers, count);
        std::thread::spawn(move || {
            let mut tmp = vec![0u8; capacity];
            let result = match endpoint.read(&mut tmp) {
                Ok(n) => {
                    let copied = if n > 0 {
                        unsafe { scatter_into(&descs, &tmp[..n]) }
                    } else {
                        0
                    };
                    OverlappedResult {
                        bytes: copied,
                        error: 0,
                        complete: true,
                        flags: 0,
                    }
                }
                Err(err) => OverlappedResult {
                    bytes: 0,
                    error: map_net_error(&err),
                    complete: true,
                    flags: 0,
                },
            };
            publish_completion(key, result, event);
        });

        set_last_error(WSA_IO_PENDING);
        return -1;
    }

    let mut tmp = vec![0u8; capacity];
    match endpoint.read(&mut tmp) {
        Ok(n) => {
            if n > 0 {
                let descs = snapshot_buffers(buffers, count);
                scatter_into(&descs, &tmp[..n]);
            }
            if !bytes_received.is_null() {
                *bytes_received = n as u32;
            }
            0
        }
        Err(err) => {
            set_last_error(map_net_error(&err));
            -1
        }
    }
}

/// Collapses the gather array and delegates to sendto. Overlapped mode is
/// executed synchronously.
///
/// # Safety
/// As [`wsa_send`], plus `to` must be a readable sockaddr.
pub unsafe fn wsa_send_to(
    s: u64,
    buffers: *const WsaBuf,
    count: u32,
    bytes_sent: *mut u32,
    flags: u32,
    to: *const c_void,
    tolen: i32,
    overlapped: *mut c_void,
    _completion_routine: *const c_void,
) -> i32 {
    trace_call!("WSASendTo", s, buffers, count, bytes_sent, to, tolen, overlapped);
    if buffers.is_null() || count == 0 {
        set_last_error(WSAEINVAL);
        return -1;
    }
    if !overlapped.is_null() {
        warn!("WSASendTo overlapped I/O not implemented, running synchronously");
    }
    let data = gather_buffers(buffers, count);
    let n = io::sendto(s, data.as_ptr(), data.len() as i32, flags as i32, to, tolen);
    if n == -1 {
        return -1;
    }
    if !bytes_sent.is_null() {
        *bytes_sent = n as u32;
    }
    0
}

/// Receives into a temporary buffer via recvfrom, then scatters.
/// Overlapped mode is executed synchronously.
///
/// # Safety
/// As [`wsa_recv`], plus `from`/`fromlen` must be null or valid.
pub unsafe fn wsa_recv_from(
    s: u64,
    buffers: *const WsaBuf,
    count: u32,
    bytes_received: *mut u32,
    flags: *mut u32,
    from: *mut c_void,
    fromlen: *mut i32,
    overlapped: *mut c_void,
    _completion_routine: *const c_void,
) -> i32 {
    trace_call!("WSARecvFrom", s, buffers, count, bytes_received, from, fromlen, overlapped);
    if buffers.is_null() || count == 0 {
        set_last_error(WSAEINVAL);
        return -1;
    }
    if !overlapped.is_null() {
        warn!("WSARecvFrom overlapped I/O not implemented, running synchronously");
    }
    let capacity = total_capacity(buffers, count);
    let call_flags = if flags.is_null() { 0 } else { *flags as i32 };

    let mut tmp = vec![0u8; capacity];
    let n = io::recvfrom(
        s,
        tmp.as_mut_ptr(),
        capacity as i32,
        call_flags,
        from,
        fromlen,
    );
    if n == -1 {
        return -1;
    }
    if n > 0 {
        let descs = snapshot_buffers(buffers, count);
        scatter_into(&descs, &tmp[..n as usize]);
    }
    if !bytes_received.is_null() {
        *bytes_received = n as u32;
    }
    0
}

/// Terminates reception; maps to shutdown(SD_RECEIVE).
///
/// # Safety
/// `_disconnect_data` is never dereferenced.
pub unsafe fn wsa_recv_disconnect(s: u64, _disconnect_data: *const c_void) -> i32 {
    trace_call!("WSARecvDisconnect", s);
    lifecycle::shutdown(s, SD_RECEIVE)
}

/// Initiates send-side termination; maps to shutdown(SD_SEND).
///
/// # Safety
/// `_disconnect_data` is never dereferenced.
pub unsafe fn wsa_send_disconnect(s: u64, _disconnect_data: *const c_void) -> i32 {
    trace_call!("WSASendDisconnect", s);
    lifecycle::shutdown(s, SD_SEND)
}

/// WSAMSG send: a present destination routes through sendto, otherwise
/// through WSASend. Ancillary data is ignored.
///
/// # Safety
/// `msg` must point to a valid WSAMSG and its buffers.
pub unsafe fn wsa_send_msg(
    s: u64,
    msg: *mut WsaMsg,
    flags: u32,
    bytes_sent: *mut u32,
    overlapped: *mut c_void,
    completion_routine: *const c_void,
) -> i32 {
    trace_call!("WSASendMsg", s, msg, flags, bytes_sent, overlapped);
    if msg.is_null() {
        set_last_error(WSAEFAULT);
        return -1;
    }
    let m = &*msg;

    if !m.name.is_null() && m.namelen > 0 && !m.buffers.is_null() && m.buffer_count > 0 {
        let data = gather_buffers(m.buffers, m.buffer_count);
        let n = io::sendto(
            s,
            data.as_ptr(),
            data.len() as i32,
            flags as i32,
            m.name,
            m.namelen,
        );
        if n == -1 {
            return -1;
        }
        if !bytes_sent.is_null() {
            *bytes_sent = n as u32;
        }
        return 0;
    }

    if !m.buffers.is_null() && m.buffer_count > 0 {
        return wsa_send(
            s,
            m.buffers,
            m.buffer_count,
            bytes_sent,
            flags,
            overlapped,
            completion_routine,
        );
    }

    set_last_error(WSAEINVAL);
    -1
}

/// WSAMSG receive: a present name buffer routes through recvfrom,
/// otherwise through WSARecv. Control data is cleared.
///
/// # Safety
/// `msg` must point to a valid WSAMSG and its buffers.
pub unsafe fn wsa_recv_msg(
    s: u64,
    msg: *mut WsaMsg,
    bytes_received: *mut u32,
    overlapped: *mut c_void,
    completion_routine: *const c_void,
) -> i32 {
    trace_call!("WSARecvMsg", s, msg, bytes_received, overlapped);
    if msg.is_null() {
        set_last_error(WSAEFAULT);
        return -1;
    }
    let m = &mut *msg;

    if !m.name.is_null() && !m.buffers.is_null() && m.buffer_count > 0 {
        let capacity = total_capacity(m.buffers, m.buffer_count);
        let mut namelen = m.namelen;
        let mut tmp = vec![0u8; capacity];
        let n = io::recvfrom(
            s,
            tmp.as_mut_ptr(),
            capacity as i32,
            0,
            m.name,
            &mut namelen,
        );
        if n == -1 {
            return -1;
        }
        m.namelen = namelen;
        if n > 0 {
            let descs = snapshot_buffers(m.buffers, m.buffer_count);
            scatter_into(&descs, &tmp[..n as usize]);
        }
        if !bytes_received.is_null() {
            *bytes_received = n as u32;
        }
        m.control.len = 0;
        return 0;
    }

    if !m.buffers.is_null() && m.buffer_count > 0 {
        let mut flags = 0u32;
        let rc = wsa_recv(
            s,
            m.buffers,
            m.buffer_count,
            bytes_received,
            &mut flags,
            overlapped,
            completion_routine,
        );
        m.flags = flags;
        m.control.len = 0;
        return rc;
    }

    set_last_error(WSAEINVAL);
    -1
}

/// Retrieves an overlapped completion: optionally waits on the embedded
/// event, then consumes the tracking entry. A missing entry is treated as
/// a synchronous completion with zero bytes.
///
/// # Safety
/// `overlapped` must point to the WSAOVERLAPPED used at submission;
/// out-pointers must be valid or null.
pub unsafe fn wsa_get_overlapped_result(
    s: u64,
    overlapped: *const c_void,
    bytes_transferred: *mut u32,
    wait: i32,
    flags: *mut u32,
) -> i32 {
    trace_call!("WSAGetOverlappedResult", s, overlapped, bytes_transferred, wait, flags);
    if overlapped.is_null() {
        set_last_error(WSAEINVAL);
        return 0;
    }
    let ov = &*(overlapped as *const WsaOverlapped);
    let key = overlapped as usize;

    if wait != 0 && !ov.h_event.is_null() {
        if let Some(slot) = registry().get_event(ov.h_event as usize) {
            slot.wait(None);
        }
    }

    let Some(result) = registry().take_overlapped(key) else {
        // No tracking entry: the operation completed synchronously.
        if !bytes_transferred.is_null() {
            *bytes_transferred = 0;
        }
        return 1;
    };

    if !bytes_transferred.is_null() {
        *bytes_transferred = result.bytes;
    }
    if !flags.is_null() {
        *flags = result.flags;
    }
    if !result.complete {
        set_last_error(WSA_IO_INCOMPLETE);
        return 0;
    }
    if result.error != 0 {
        set_last_error(result.error);
        return 0;
    }
    1
}

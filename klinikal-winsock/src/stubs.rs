//! Link-compatibility stubs: namespace providers, service discovery and
//! service classes, QOS, provider-change notification. Their success and
//! failure codes match the documented bridge behaviour so native code can
//! detect and skip these paths.

use std::ffi::c_void;

use crate::error::{set_last_error, WSA_E_NO_MORE};

/// # Safety
/// `buffer_length` must be null or valid.
pub unsafe fn wsa_enum_name_space_providers_a(
    buffer_length: *mut u32,
    _buffer: *mut c_void,
) -> i32 {
    trace_call!("WSAEnumNameSpaceProvidersA", buffer_length);
    if !buffer_length.is_null() {
        *buffer_length = 0;
    }
    0
}

/// # Safety
/// `buffer_length` must be null or valid.
pub unsafe fn wsa_enum_name_space_providers_w(
    buffer_length: *mut u32,
    _buffer: *mut c_void,
) -> i32 {
    trace_call!("WSAEnumNameSpaceProvidersW", buffer_length);
    if !buffer_length.is_null() {
        *buffer_length = 0;
    }
    0
}

/// # Safety
/// `buffer_length` must be null or valid.
pub unsafe fn wsa_enum_name_space_providers_ex_a(
    buffer_length: *mut u32,
    _buffer: *mut c_void,
) -> i32 {
    trace_call!("WSAEnumNameSpaceProvidersExA", buffer_length);
    if !buffer_length.is_null() {
        *buffer_length = 0;
    }
    0
}

/// # Safety
/// `buffer_length` must be null or valid.
pub unsafe fn wsa_enum_name_space_providers_ex_w(
    buffer_length: *mut u32,
    _buffer: *mut c_void,
) -> i32 {
    trace_call!("WSAEnumNameSpaceProvidersExW", buffer_length);
    if !buffer_length.is_null() {
        *buffer_length = 0;
    }
    0
}

/// Hands out a dummy lookup handle; Next then reports no more records.
///
/// # Safety
/// `lookup` must be null or valid.
pub unsafe fn wsa_lookup_service_begin_a(
    _restrictions: *const c_void,
    _control_flags: u32,
    lookup: *mut *mut c_void,
) -> i32 {
    trace_call!("WSALookupServiceBeginA", lookup);
    if !lookup.is_null() {
        *lookup = 0xDEAD_BEEFusize as *mut c_void;
    }
    0
}

/// # Safety
/// `lookup` must be null or valid.
pub unsafe fn wsa_lookup_service_begin_w(
    _restrictions: *const c_void,
    _control_flags: u32,
    lookup: *mut *mut c_void,
) -> i32 {
    trace_call!("WSALookupServiceBeginW", lookup);
    if !lookup.is_null() {
        *lookup = 0xDEAD_BEEFusize as *mut c_void;
    }
    0
}

/// # Safety
/// Nothing is dereferenced.
pub unsafe fn wsa_lookup_service_next_a(
    _lookup: *mut c_void,
    _control_flags: u32,
    _buffer_length: *mut u32,
    _results: *mut c_void,
) -> i32 {
    trace_call!("WSALookupServiceNextA");
    set_last_error(WSA_E_NO_MORE);
    -1
}

/// # Safety
/// Nothing is dereferenced.
pub unsafe fn wsa_lookup_service_next_w(
    _lookup: *mut c_void,
    _control_flags: u32,
    _buffer_length: *mut u32,
    _results: *mut c_void,
) -> i32 {
    trace_call!("WSALookupServiceNextW");
    set_last_error(WSA_E_NO_MORE);
    -1
}

pub fn wsa_lookup_service_end(_lookup: *mut c_void) -> i32 {
    trace_call!("WSALookupServiceEnd");
    0
}

pub fn wsa_set_service_a(_reg_info: *const c_void, _operation: i32, _control_flags: u32) -> i32 {
    trace_call!("WSASetServiceA");
    0
}

pub fn wsa_set_service_w(_reg_info: *const c_void, _operation: i32, _control_flags: u32) -> i32 {
    trace_call!("WSASetServiceW");
    0
}

pub fn wsa_get_service_class_info_a(
    _provider_id: *const c_void,
    _service_class_id: *const c_void,
    _buffer_length: *mut u32,
    _service_class_info: *mut c_void,
) -> i32 {
    trace_call!("WSAGetServiceClassInfoA");
    0
}

pub fn wsa_get_service_class_info_w(
    _provider_id: *const c_void,
    _service_class_id: *const c_void,
    _buffer_length: *mut u32,
    _service_class_info: *mut c_void,
) -> i32 {
    trace_call!("WSAGetServiceClassInfoW");
    0
}

pub fn wsa_get_service_class_name_by_class_id_a(
    _service_class_id: *const c_void,
    _service_class_name: *mut u8,
    _buffer_length: *mut u32,
) -> i32 {
    trace_call!("WSAGetServiceClassNameByClassIdA");
    0
}

pub fn wsa_get_service_class_name_by_class_id_w(
    _service_class_id: *const c_void,
    _service_class_name: *mut u16,
    _buffer_length: *mut u32,
) -> i32 {
    trace_call!("WSAGetServiceClassNameByClassIdW");
    0
}

pub fn wsa_install_service_class_a(_service_class_info: *const c_void) -> i32 {
    trace_call!("WSAInstallServiceClassA");
    0
}

pub fn wsa_install_service_class_w(_service_class_info: *const c_void) -> i32 {
    trace_call!("WSAInstallServiceClassW");
    0
}

pub fn wsa_remove_service_class(_service_class_id: *const c_void) -> i32 {
    trace_call!("WSARemoveServiceClass");
    0
}

/// Provider-change notification: always succeeds, never fires.
pub fn wsa_provider_config_change(
    _notification_handle: *mut *mut c_void,
    _overlapped: *mut c_void,
    _completion_routine: *const c_void,
) -> i32 {
    trace_call!("WSAProviderConfigChange");
    0
}

/// QOS templates are not modelled; the call succeeds without output.
pub fn wsa_get_qos_by_name(s: u64, _qos_name: *const c_void, _qos: *mut c_void) -> i32 {
    trace_call!("WSAGetQOSByName", s);
    0
}

//! C ABI for linking wear-core as a static library from Android (NDK) or other C/C++ hosts.
//! Host-driven: the host owns discovery and transport, passes inbound bytes in and gets
//! application events back as a JSON array.

use std::ffi::c_void;
use std::os::raw::c_int;
use std::slice;

use crate::codec;
use crate::data::{self, DataEvent, DataItem, DataSyncStore};
use crate::host::{Event, EventQueue};
use crate::protocol::PROTOCOL_VERSION;
use crate::registry::{ListenerId, ListenerRegistry};
use crate::relay;
use crate::value::{Dynamic, DynamicMap};

/// Data event kinds accepted by `wear_core_on_data_changed`.
pub const DATA_EVENT_CHANGED: c_int = 1;
pub const DATA_EVENT_DELETED: c_int = 2;

struct FfiState {
    registry: ListenerRegistry,
    store: DataSyncStore,
}

/// Returns the node protocol version.
#[no_mangle]
pub extern "C" fn wear_core_version() -> u8 {
    PROTOCOL_VERSION
}

/// Create a new instance. Returns an opaque handle.
#[no_mangle]
pub extern "C" fn wear_core_create() -> *mut c_void {
    let state = FfiState {
        registry: ListenerRegistry::new(),
        store: DataSyncStore::new(),
    };
    Box::into_raw(Box::new(state)) as *mut c_void
}

/// Destroy an instance. No-op if h is null.
#[no_mangle]
pub extern "C" fn wear_core_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut FfiState) };
}

/// Register a message listener (kind 0) or data listener (kind 1). Returns 0, or -1 on error.
#[no_mangle]
pub extern "C" fn wear_core_listen(h: *mut c_void, kind: c_int, id: i64) -> c_int {
    let Some(state) = (unsafe { state_mut(h) }) else {
        return -1;
    };
    match kind {
        0 => state.registry.register_message_listener(ListenerId(id)),
        1 => state.registry.register_data_listener(ListenerId(id)),
        _ => return -1,
    }
    0
}

/// Remove one registration. Returns 1 if removed, 0 if not registered, -1 on error.
#[no_mangle]
pub extern "C" fn wear_core_unlisten(h: *mut c_void, kind: c_int, id: i64) -> c_int {
    let Some(state) = (unsafe { state_mut(h) }) else {
        return -1;
    };
    let removed = match kind {
        0 => state.registry.deregister_message_listener(ListenerId(id)),
        1 => state.registry.deregister_data_listener(ListenerId(id)),
        _ => return -1,
    };
    removed as c_int
}

/// Encode a JSON object (UTF-8) into payload bytes for the host to send to each node.
/// Unsupported values are dropped. Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn wear_core_encode_message(
    json: *const u8,
    json_len: usize,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let Some(map) = (unsafe { json_map(json, json_len) }) else {
        return -1;
    };
    match codec::encode_dynamic(&map) {
        Ok(bytes) => unsafe { write_out(&bytes, out_buf, out_buf_len) },
        Err(_) => -1,
    }
}

/// Write a data item from a JSON object. Fills out_buf with the encoded item data and
/// out_version with its version. Returns bytes written, or -1 on error (bad path, bad JSON).
#[no_mangle]
pub extern "C" fn wear_core_write_data(
    h: *mut c_void,
    path: *const u8,
    path_len: usize,
    json: *const u8,
    json_len: usize,
    out_version: *mut u64,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let Some(state) = (unsafe { state_mut(h) }) else {
        return -1;
    };
    if out_version.is_null() {
        return -1;
    }
    let Some(path) = (unsafe { utf8(path, path_len) }) else {
        return -1;
    };
    let Some(map) = (unsafe { json_map(json, json_len) }) else {
        return -1;
    };
    let item = match state.store.write(path, &map) {
        Ok(item) => item,
        Err(_) => return -1,
    };
    let n = unsafe { write_out(&item.data, out_buf, out_buf_len) };
    if n >= 0 {
        unsafe { *out_version = item.version };
    }
    n
}

/// On message received from a node. Writes the resulting events as a JSON array.
/// Returns bytes written, 0 if nothing is delivered (bad payload, other channel, no listeners),
/// or -1 on error.
#[no_mangle]
pub extern "C" fn wear_core_on_message_received(
    h: *mut c_void,
    channel: *const u8,
    channel_len: usize,
    msg: *const u8,
    msg_len: usize,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let Some(state) = (unsafe { state_mut(h) }) else {
        return -1;
    };
    let Some(channel) = (unsafe { utf8(channel, channel_len) }) else {
        return -1;
    };
    if msg.is_null() {
        return -1;
    }
    let bytes = unsafe { slice::from_raw_parts(msg, msg_len) };
    let queue = EventQueue::new();
    relay::deliver_inbound(channel, bytes, state.registry.message_listeners(), &queue);
    unsafe { write_events(queue.drain(), out_buf, out_buf_len) }
}

/// On data event from the data layer. `kind` is DATA_EVENT_CHANGED or DATA_EVENT_DELETED;
/// for deletions `data` may be null. Writes the resulting events as a JSON array.
/// Returns bytes written, 0 if nothing is delivered, -1 on error.
#[no_mangle]
pub extern "C" fn wear_core_on_data_changed(
    h: *mut c_void,
    kind: c_int,
    path: *const u8,
    path_len: usize,
    data: *const u8,
    data_len: usize,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let Some(state) = (unsafe { state_mut(h) }) else {
        return -1;
    };
    let Some(path) = (unsafe { utf8(path, path_len) }) else {
        return -1;
    };
    let event = match kind {
        DATA_EVENT_CHANGED => {
            if data.is_null() {
                return -1;
            }
            let bytes = unsafe { slice::from_raw_parts(data, data_len) };
            DataEvent::changed(DataItem {
                path: path.to_string(),
                version: 0,
                data: bytes.to_vec(),
            })
        }
        DATA_EVENT_DELETED => DataEvent::deleted(path),
        _ => return -1,
    };
    let queue = EventQueue::new();
    data::fan_out_changes(&[event], state.registry.data_listeners(), &queue);
    unsafe { write_events(queue.drain(), out_buf, out_buf_len) }
}

unsafe fn state_mut<'a>(h: *mut c_void) -> Option<&'a mut FfiState> {
    if h.is_null() {
        return None;
    }
    Some(&mut *(h as *mut FfiState))
}

unsafe fn utf8<'a>(ptr: *const u8, len: usize) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    std::str::from_utf8(slice::from_raw_parts(ptr, len)).ok()
}

unsafe fn json_map(ptr: *const u8, len: usize) -> Option<DynamicMap> {
    let text = utf8(ptr, len)?;
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    match Dynamic::from(value) {
        Dynamic::Map(map) => Some(map),
        _ => None,
    }
}

/// Serialize events as `[{"method": ..., "arguments": ...}, ...]`. Empty list writes nothing.
unsafe fn write_events(events: Vec<Event>, out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if events.is_empty() {
        return 0;
    }
    let json: Vec<serde_json::Value> = events.iter().map(Event::to_json).collect();
    match serde_json::to_vec(&json) {
        Ok(bytes) => write_out(&bytes, out_buf, out_buf_len),
        Err(_) => -1,
    }
}

/// Copy `bytes` into out_buf. Returns bytes written, or -1 if out_buf is null or too small.
unsafe fn write_out(bytes: &[u8], out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if out_buf.is_null() || bytes.len() > out_buf_len || bytes.len() > c_int::MAX as usize {
        return -1;
    }
    out_buf.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
    bytes.len() as c_int
}

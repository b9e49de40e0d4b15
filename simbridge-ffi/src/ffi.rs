//! # C Call Surface
//!
//! Every function returns an [`ErrorCode`] and records an [`ErrorDetail`] for
//! the calling thread, on success as well as on failure, so the detail never
//! belongs to an older call. Read it with [`simbridge_get_last_error_detail`]
//! from the thread that made the call.
//!
//! Handles are opaque tokens resolved through a table of live indexes, so a
//! destroyed handle returns `HandleDestroyed` from every call. Panics never unwind into the host; they surface as `Runtime`.
//!
//! # Safety
//!
//! All pointers must be null or valid for the access the function documents.
//! Element buffers must be aligned for their element type. Strings are
//! NUL-terminated UTF-8 unless a length is passed.

#![allow(clippy::missing_safety_doc)]

use std::any::Any;
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_void, CStr};
use std::mem;
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use parking_lot::RwLock;
use tracing::debug;

use simbridge_core::alloc::{release_detached, ReleaseFn};
use simbridge_core::config::{LogFormat, LogLevel, LoggingConfig};
use simbridge_core::error::{Error, Result, ResultExt};
use simbridge_core::{
    logging, Allocator, DataEncoding, DistanceKind, ErrorCode, ErrorDetail, ParamType, ParamValue,
    ParameterSet, RawAllocator, SparseElement,
};
use simbridge_engine::registry;

use crate::construct::{DataInput, DataOutput};
use crate::handle::IndexHandle;
use crate::query::ResultBuffer;

/// Largest query accepted, in elements
pub const MAX_QUERY_ELEMENTS: usize = 1 << 28;

/// Caller-allocated result arrays
#[repr(C)]
#[derive(Debug)]
pub struct SbResult {
    pub ids: *mut i32,
    pub distances: *mut f32,
    /// Valid entries after a fill
    pub size: usize,
    /// Length of both arrays
    pub capacity: usize,
}

/// Error detail copied out through a host allocator
#[repr(C)]
#[derive(Debug)]
pub struct SbErrorDetail {
    pub code: ErrorCode,
    pub message: *mut c_char,
    pub file: *mut c_char,
    pub line: u32,
}

// ============================================================================
// Error channel
// ============================================================================

thread_local! {
    static LAST_ERROR: RefCell<ErrorDetail> = RefCell::new(ErrorDetail::success("no call made yet"));
}

fn set_last_error(detail: ErrorDetail) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = detail);
}

/// Detail of the most recent call on this thread
pub fn last_error() -> ErrorDetail {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `f`, turning a panic into `Runtime`
fn guard<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(Error::runtime(format!("panic: {}", panic_message(payload)))))
}

/// Record the outcome for this thread and return its code
#[track_caller]
fn finish(result: Result<()>, success: &'static str) -> ErrorCode {
    match result {
        Ok(()) => {
            set_last_error(ErrorDetail::success(success));
            ErrorCode::Success
        }
        Err(err) => {
            let code = err.code();
            debug!(code = %code, error = %err, "Call failed");
            set_last_error(err.detail());
            code
        }
    }
}

// ============================================================================
// Pointer helpers
// ============================================================================

/// Opaque index token handed to the host. Tokens count up from 1 and are
/// never reused, so a stale token cannot alias a newer index.
#[repr(C)]
pub struct SbIndex {
    _opaque: [u8; 0],
}

struct LiveIndex(*mut IndexHandle);

// The pointer is owned by the table; callers serialize writes per handle.
unsafe impl Send for LiveIndex {}
unsafe impl Sync for LiveIndex {}

fn live_handles() -> &'static RwLock<HashMap<usize, LiveIndex>> {
    static LIVE: OnceLock<RwLock<HashMap<usize, LiveIndex>>> = OnceLock::new();
    LIVE.get_or_init(|| RwLock::new(HashMap::new()))
}

fn register(handle: IndexHandle) -> Result<*mut SbIndex> {
    static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);
    let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    if token == 0 {
        return Err(Error::runtime("index handle tokens exhausted"));
    }
    let ptr = Box::into_raw(Box::new(handle));
    live_handles().write().insert(token, LiveIndex(ptr));
    Ok(token as *mut SbIndex)
}

fn lookup(handle: *const SbIndex) -> Result<*mut IndexHandle> {
    if handle.is_null() {
        return Err(Error::null_pointer("index handle is null"));
    }
    live_handles()
        .read()
        .get(&(handle as usize))
        .map(|live| live.0)
        .ok_or_else(|| Error::handle_destroyed())
}

unsafe fn index_ref<'a>(handle: *const SbIndex) -> Result<&'a IndexHandle> {
    Ok(&*lookup(handle)?)
}

unsafe fn index_mut<'a>(handle: *mut SbIndex) -> Result<&'a mut IndexHandle> {
    Ok(&mut *lookup(handle)?)
}

unsafe fn out_ref<'a, T>(out: *mut T, what: &str) -> Result<&'a mut T> {
    out.as_mut()
        .ok_or_else(|| Error::null_pointer(format!("{} output pointer is null", what)))
}

unsafe fn c_str<'a>(s: *const c_char, what: &str) -> Result<&'a str> {
    if s.is_null() {
        return Err(Error::null_pointer(format!("{} is null", what)));
    }
    CStr::from_ptr(s)
        .to_str()
        .map_err(|_| Error::invalid_argument(format!("{} is not valid UTF-8", what)))
}

fn check_layout<T>(ptr: *const T, len: usize) -> Result<()> {
    if ptr.align_offset(mem::align_of::<T>()) != 0 {
        return Err(Error::invalid_argument(format!(
            "buffer is not aligned to {} bytes",
            mem::align_of::<T>()
        )));
    }
    match len.checked_mul(mem::size_of::<T>()) {
        Some(bytes) if bytes <= isize::MAX as usize => Ok(()),
        _ => Err(Error::invalid_argument(format!("buffer of {} elements is too large", len))),
    }
}

unsafe fn raw_slice<'a, T>(ptr: *const T, len: usize, what: &str) -> Result<&'a [T]> {
    if ptr.is_null() {
        return Err(Error::null_pointer(format!("{} is null", what)));
    }
    check_layout(ptr, len)?;
    Ok(slice::from_raw_parts(ptr, len))
}

/// Like [`raw_slice`], but a null pointer is fine for an empty buffer
unsafe fn raw_slice_mut<'a, T>(ptr: *mut T, len: usize, what: &str) -> Result<&'a mut [T]> {
    if len == 0 {
        return Ok(&mut []);
    }
    if ptr.is_null() {
        return Err(Error::null_pointer(format!("{} is null", what)));
    }
    check_layout(ptr, len)?;
    Ok(slice::from_raw_parts_mut(ptr, len))
}

unsafe fn optional_ids<'a>(ids: *const i32, count: usize) -> Result<Option<&'a [i32]>> {
    if ids.is_null() {
        Ok(None)
    } else {
        raw_slice(ids, count, "id array").map(Some)
    }
}

unsafe fn host_allocator(raw: *const RawAllocator) -> Result<Allocator> {
    match raw.as_ref() {
        Some(raw) => Allocator::from_raw(raw),
        None => Err(Error::null_pointer("allocator is null")),
    }
}

/// The caller's allocator if given, else the handle's
unsafe fn allocator_or(raw: *const RawAllocator, index: &IndexHandle) -> Result<Allocator> {
    if raw.is_null() {
        Ok(index.allocator().clone())
    } else {
        host_allocator(raw)
    }
}

unsafe fn params_or_empty<'a>(params: *const ParameterSet, allocator: &Allocator) -> Cow<'a, ParameterSet> {
    match params.as_ref() {
        Some(params) => Cow::Borrowed(params),
        None => Cow::Owned(ParameterSet::new(allocator.clone())),
    }
}

/// View `count` elements at `data` as a record of `encoding`
unsafe fn raw_input<'a>(encoding: DataEncoding, data: *const c_void, count: usize) -> Result<DataInput<'a>> {
    Ok(match encoding {
        DataEncoding::DenseFloatVector => DataInput::Dense(raw_slice(data as *const f32, count, "record data")?),
        DataEncoding::SparseFloatVector => {
            DataInput::Sparse(raw_slice(data as *const SparseElement, count, "record data")?)
        }
        DataEncoding::DenseByteVector => DataInput::Bytes(raw_slice(data as *const u8, count, "record data")?),
        DataEncoding::LengthPrefixedString => DataInput::Text(raw_slice(data as *const u8, count, "record data")?),
    })
}

unsafe fn raw_query<'a>(encoding: DataEncoding, data: *const c_void, count: usize) -> Result<DataInput<'a>> {
    if count > MAX_QUERY_ELEMENTS {
        return Err(Error::query_too_large(format!(
            "query of {} elements exceeds {}",
            count, MAX_QUERY_ELEMENTS
        )));
    }
    raw_input(encoding, data, count)
}

/// Per-row pointers with a uniform count or a per-row count array
unsafe fn raw_rows<'a>(
    encoding: DataEncoding,
    rows: *const *const c_void,
    count: usize,
    element_count: usize,
    element_counts: *const usize,
) -> Result<Vec<DataInput<'a>>> {
    let rows = raw_slice(rows, count, "row pointer array")?;
    let counts = if element_counts.is_null() {
        None
    } else {
        Some(raw_slice(element_counts, count, "element count array")?)
    };
    rows.iter()
        .enumerate()
        .map(|(i, &row)| {
            let n = counts.map_or(element_count, |c| c[i]);
            raw_input(encoding, row, n).with_context(|| format!("row {}", i))
        })
        .collect()
}

unsafe fn result_buffer<'a>(result: &SbResult) -> Result<ResultBuffer<'a>> {
    let ids = raw_slice_mut(result.ids, result.capacity, "result ids")?;
    let distances = raw_slice_mut(result.distances, result.capacity, "result distances")?;
    ResultBuffer::new(ids, distances)
}

fn nonzero(count: usize, what: &str) -> Result<()> {
    if count == 0 {
        return Err(Error::invalid_argument(format!("{} must be positive", what)));
    }
    Ok(())
}

// ============================================================================
// Library
// ============================================================================

/// Library version as a static NUL-terminated string
#[no_mangle]
pub extern "C" fn simbridge_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

/// Resolve the space registry ahead of the first index
#[no_mangle]
pub extern "C" fn simbridge_init() -> ErrorCode {
    finish(
        guard(|| {
            let registry = registry::spaces();
            for encoding in DataEncoding::ALL {
                debug!(encoding = %encoding, spaces = ?registry.names_for(encoding), "Spaces available");
            }
            Ok(())
        }),
        "Library initialized",
    )
}

/// Install a `tracing` subscriber writing to stderr (0 = trace .. 4 = error)
#[no_mangle]
pub extern "C" fn simbridge_init_logging(level: u32, json: bool) -> ErrorCode {
    finish(
        guard(|| {
            let level = LogLevel::from_u32(level)
                .ok_or_else(|| Error::invalid_argument(format!("unknown log level {}", level)))?;
            let format = if json { LogFormat::Json } else { LogFormat::Text };
            logging::init(&LoggingConfig { level, format })
        }),
        "Logging initialized",
    )
}

/// Copy this thread's last error detail; strings come from `allocator`.
/// A null argument returns `NullPointer` and leaves the detail in place.
#[no_mangle]
pub unsafe extern "C" fn simbridge_get_last_error_detail(
    detail: *mut SbErrorDetail,
    allocator: *const RawAllocator,
) -> ErrorCode {
    if detail.is_null() || allocator.is_null() {
        return ErrorCode::NullPointer;
    }
    let snapshot = last_error();
    finish(
        guard(|| {
            let detail = out_ref(detail, "error detail")?;
            let allocator = host_allocator(allocator)?;
            let message = allocator.dup_str(&snapshot.message)?;
            let file = allocator.dup_str(snapshot.file)?;
            *detail = SbErrorDetail {
                code: snapshot.code,
                message: message.into_raw() as *mut c_char,
                file: file.into_raw() as *mut c_char,
                line: snapshot.line,
            };
            Ok(())
        }),
        "Error detail retrieved",
    )
}

/// Release the strings of a detail filled by [`simbridge_get_last_error_detail`]
#[no_mangle]
pub unsafe extern "C" fn simbridge_free_error_detail(detail: *mut SbErrorDetail, allocator: *const RawAllocator) {
    if let Some(detail) = detail.as_mut() {
        simbridge_free_string(detail.message, allocator);
        simbridge_free_string(detail.file, allocator);
        detail.message = ptr::null_mut();
        detail.file = ptr::null_mut();
    }
}

/// Release a string returned by this library through `allocator`
#[no_mangle]
pub unsafe extern "C" fn simbridge_free_string(s: *mut c_char, allocator: *const RawAllocator) {
    if s.is_null() {
        return;
    }
    if let Some(free) = allocator.as_ref().and_then(|a| a.free.map(|f| (f, a.ctx))) {
        (free.0)(s as *mut c_void, free.1);
    }
}

// ============================================================================
// Parameters
// ============================================================================

#[no_mangle]
pub unsafe extern "C" fn simbridge_params_create(
    allocator: *const RawAllocator,
    out: *mut *mut ParameterSet,
) -> ErrorCode {
    finish(
        guard(|| {
            let out = out_ref(out, "parameter set")?;
            let allocator = host_allocator(allocator)?;
            *out = Box::into_raw(Box::new(ParameterSet::new(allocator)));
            Ok(())
        }),
        "Parameter set created",
    )
}

/// Append `name=value`. `value` points to an `int32_t` (type 0), a `double`
/// (type 1), or is itself a string (type 2).
#[no_mangle]
pub unsafe extern "C" fn simbridge_params_add(
    params: *mut ParameterSet,
    name: *const c_char,
    type_tag: u32,
    value: *const c_void,
) -> ErrorCode {
    finish(
        guard(|| {
            let params = params
                .as_mut()
                .ok_or_else(|| Error::null_pointer("parameter set is null"))?;
            let name = c_str(name, "parameter name")?;
            if value.is_null() {
                return Err(Error::null_pointer(format!("value of parameter '{}' is null", name)));
            }
            let value = match ParamType::from_u32(type_tag)? {
                ParamType::Int => ParamValue::Int(ptr::read_unaligned(value as *const i32)),
                ParamType::Double => ParamValue::Double(ptr::read_unaligned(value as *const f64)),
                ParamType::Str => ParamValue::Str(c_str(value as *const c_char, "parameter value")?),
            };
            params.add(name, value);
            Ok(())
        }),
        "Parameter added",
    )
}

#[no_mangle]
pub unsafe extern "C" fn simbridge_params_free(params: *mut ParameterSet) {
    if !params.is_null() {
        drop(Box::from_raw(params));
    }
}

// ============================================================================
// Index lifecycle
// ============================================================================

/// Create an index; `space_params` may be null
#[no_mangle]
pub unsafe extern "C" fn simbridge_index_create(
    encoding: u32,
    distance_kind: u32,
    space: *const c_char,
    space_params: *const ParameterSet,
    method: *const c_char,
    allocator: *const RawAllocator,
    out: *mut *mut SbIndex,
) -> ErrorCode {
    finish(
        guard(|| {
            let out = out_ref(out, "index handle")?;
            *out = ptr::null_mut();
            let encoding = DataEncoding::from_u32(encoding)?;
            let distance_kind = DistanceKind::from_u32(distance_kind)?;
            let space = c_str(space, "space name")?;
            let method = c_str(method, "method name")?;
            let allocator = host_allocator(allocator)?;
            let params = params_or_empty(space_params, &allocator);
            let index = IndexHandle::create(encoding, distance_kind, space, &params, method, allocator.clone())?;
            *out = register(index)?;
            Ok(())
        }),
        "Index created",
    )
}

/// Destroy a handle; a second destroy returns `HandleDestroyed`
#[no_mangle]
pub unsafe extern "C" fn simbridge_index_destroy(handle: *mut SbIndex) -> ErrorCode {
    finish(
        guard(|| {
            if handle.is_null() {
                return Err(Error::null_pointer("index handle is null"));
            }
            let live = live_handles()
                .write()
                .remove(&(handle as usize))
                .ok_or_else(|| Error::handle_destroyed())?;
            drop(Box::from_raw(live.0));
            Ok(())
        }),
        "Index destroyed",
    )
}

/// Build the method over all records; `params` may be null
#[no_mangle]
pub unsafe extern "C" fn simbridge_index_build(
    handle: *mut SbIndex,
    params: *const ParameterSet,
    print_progress: bool,
) -> ErrorCode {
    finish(
        guard(|| {
            let index = index_mut(handle)?;
            let params = params_or_empty(params, index.allocator());
            index.build(&params, print_progress)
        }),
        "Index built",
    )
}

/// Drop the built method and every record
#[no_mangle]
pub unsafe extern "C" fn simbridge_index_reset(handle: *mut SbIndex) -> ErrorCode {
    finish(
        guard(|| {
            index_mut(handle)?.reset();
            Ok(())
        }),
        "Index reset",
    )
}

#[no_mangle]
pub unsafe extern "C" fn simbridge_set_query_time_params(
    handle: *mut SbIndex,
    params: *const ParameterSet,
) -> ErrorCode {
    finish(
        guard(|| {
            let index = index_mut(handle)?;
            let params = params
                .as_ref()
                .ok_or_else(|| Error::null_pointer("parameter set is null"))?;
            index.set_query_time_params(params)
        }),
        "Query time parameters set",
    )
}

#[no_mangle]
pub unsafe extern "C" fn simbridge_set_thread_pool_size(handle: *mut SbIndex, size: usize) -> ErrorCode {
    finish(
        guard(|| index_mut(handle)?.set_thread_pool_size(size)),
        "Thread pool size set",
    )
}

#[no_mangle]
pub unsafe extern "C" fn simbridge_get_thread_pool_size(handle: *const SbIndex, out: *mut usize) -> ErrorCode {
    finish(
        guard(|| {
            let out = out_ref(out, "thread pool size")?;
            *out = index_ref(handle)?.thread_pool_size();
            Ok(())
        }),
        "Thread pool size retrieved",
    )
}

/// Start the batch-query worker pool now instead of on the first batch
#[no_mangle]
pub unsafe extern "C" fn simbridge_initialize_pool(handle: *const SbIndex) -> ErrorCode {
    finish(guard(|| index_ref(handle)?.initialize_pool()), "Query pool initialized")
}

#[no_mangle]
pub unsafe extern "C" fn simbridge_data_qty(handle: *const SbIndex, out: *mut usize) -> ErrorCode {
    finish(
        guard(|| {
            let out = out_ref(out, "record count")?;
            *out = index_ref(handle)?.data_qty();
            Ok(())
        }),
        "Record count retrieved",
    )
}

/// Approximate bytes held by the index; 0 before build
#[no_mangle]
pub unsafe extern "C" fn simbridge_index_memory_usage(handle: *const SbIndex, out: *mut usize) -> ErrorCode {
    finish(
        guard(|| {
            let out = out_ref(out, "memory usage")?;
            *out = index_ref(handle)?.memory_usage();
            Ok(())
        }),
        "Memory usage retrieved",
    )
}

/// Space name, allocated with `allocator` (or the index's when null)
#[no_mangle]
pub unsafe extern "C" fn simbridge_get_space_type(
    handle: *const SbIndex,
    allocator: *const RawAllocator,
    out: *mut *mut c_char,
) -> ErrorCode {
    finish(
        guard(|| {
            let out = out_ref(out, "space name")?;
            let index = index_ref(handle)?;
            let name = allocator_or(allocator, index)?.dup_str(index.space_type())?;
            *out = name.into_raw() as *mut c_char;
            Ok(())
        }),
        "Space type retrieved",
    )
}

/// Method name, allocated with `allocator` (or the index's when null)
#[no_mangle]
pub unsafe extern "C" fn simbridge_get_method(
    handle: *const SbIndex,
    allocator: *const RawAllocator,
    out: *mut *mut c_char,
) -> ErrorCode {
    finish(
        guard(|| {
            let out = out_ref(out, "method name")?;
            let index = index_ref(handle)?;
            let name = allocator_or(allocator, index)?.dup_str(index.method_name())?;
            *out = name.into_raw() as *mut c_char;
            Ok(())
        }),
        "Method retrieved",
    )
}

// ============================================================================
// Records
// ============================================================================

/// Append one record of `element_count` elements (floats, sparse pairs,
/// bytes or characters, by the index's encoding)
#[no_mangle]
pub unsafe extern "C" fn simbridge_add_data_point(
    handle: *mut SbIndex,
    data: *const c_void,
    element_count: usize,
    id: i32,
) -> ErrorCode {
    finish(
        guard(|| {
            let index = index_mut(handle)?;
            let input = raw_input(index.header().encoding, data, element_count)?;
            index.add_data_point(input, id)
        }),
        "Data point added",
    )
}

/// Append `count` records given as row pointers. Rows have `element_count`
/// elements unless `element_counts` gives one count per row. `ids` may be
/// null, in which case each record's id is its position.
#[no_mangle]
pub unsafe extern "C" fn simbridge_add_data_point_batch(
    handle: *mut SbIndex,
    rows: *const *const c_void,
    count: usize,
    element_count: usize,
    element_counts: *const usize,
    ids: *const i32,
) -> ErrorCode {
    finish(
        guard(|| {
            nonzero(count, "record count")?;
            let index = index_mut(handle)?;
            let inputs = raw_rows(index.header().encoding, rows, count, element_count, element_counts)?;
            index.add_data_point_batch(&inputs, optional_ids(ids, count)?)
        }),
        "Data points added",
    )
}

/// Append `count` byte rows of `dim` bytes from one contiguous buffer
#[no_mangle]
pub unsafe extern "C" fn simbridge_add_data_point_batch_uint8(
    handle: *mut SbIndex,
    data: *const u8,
    count: usize,
    dim: usize,
    ids: *const i32,
) -> ErrorCode {
    finish(
        guard(|| {
            nonzero(count, "record count")?;
            let index = index_mut(handle)?;
            let total = count
                .checked_mul(dim)
                .ok_or_else(|| Error::invalid_argument("count * dim overflows"))?;
            let flat = raw_slice(data, total, "byte rows")?;
            index.add_byte_batch(flat, dim, optional_ids(ids, count)?)
        }),
        "Data points added",
    )
}

/// Append `count` strings; with `lengths` null each string is NUL-terminated
#[no_mangle]
pub unsafe extern "C" fn simbridge_add_data_point_batch_string(
    handle: *mut SbIndex,
    strings: *const *const c_char,
    lengths: *const usize,
    count: usize,
    ids: *const i32,
) -> ErrorCode {
    finish(
        guard(|| {
            nonzero(count, "record count")?;
            let index = index_mut(handle)?;
            let strings = raw_slice(strings, count, "string array")?;
            let lengths = if lengths.is_null() {
                None
            } else {
                Some(raw_slice(lengths, count, "length array")?)
            };
            let inputs = strings
                .iter()
                .enumerate()
                .map(|(i, &s)| {
                    if s.is_null() {
                        return Err(Error::null_pointer(format!("string {} is null", i)));
                    }
                    Ok(match lengths {
                        Some(lengths) => DataInput::Text(slice::from_raw_parts(s as *const u8, lengths[i])),
                        None => DataInput::Text(CStr::from_ptr(s).to_bytes()),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            index.add_data_point_batch(&inputs, optional_ids(ids, count)?)
        }),
        "Data points added",
    )
}

/// Like [`simbridge_add_data_point_batch`] with the row layout named by
/// `data_mode`: 0 dense float, 1 sparse, 2 uint8
#[no_mangle]
pub unsafe extern "C" fn simbridge_add_data_point_batch_pointers(
    handle: *mut SbIndex,
    data_mode: u32,
    rows: *const *const c_void,
    count: usize,
    element_count: usize,
    element_counts: *const usize,
    ids: *const i32,
) -> ErrorCode {
    finish(
        guard(|| {
            let encoding = match data_mode {
                0 => DataEncoding::DenseFloatVector,
                1 => DataEncoding::SparseFloatVector,
                2 => DataEncoding::DenseByteVector,
                other => return Err(Error::invalid_argument(format!("unknown data mode {}", other))),
            };
            nonzero(count, "record count")?;
            let index = index_mut(handle)?;
            let inputs = raw_rows(encoding, rows, count, element_count, element_counts)?;
            index.add_data_point_batch(&inputs, optional_ids(ids, count)?)
        }),
        "Data points added",
    )
}

#[no_mangle]
pub unsafe extern "C" fn simbridge_get_distance(
    handle: *const SbIndex,
    pos1: usize,
    pos2: usize,
    out: *mut f32,
) -> ErrorCode {
    finish(
        guard(|| {
            let out = out_ref(out, "distance")?;
            *out = index_ref(handle)?.get_distance(pos1, pos2)?;
            Ok(())
        }),
        "Distance computed",
    )
}

/// Element count of the record at `position`
#[no_mangle]
pub unsafe extern "C" fn simbridge_get_data_point_size(
    handle: *const SbIndex,
    position: usize,
    out: *mut usize,
) -> ErrorCode {
    finish(
        guard(|| {
            let out = out_ref(out, "record size")?;
            *out = index_ref(handle)?.get_data_point_size(position)?;
            Ok(())
        }),
        "Record size retrieved",
    )
}

/// Copy the record at `position` into `buffer` of `capacity` elements
#[no_mangle]
pub unsafe extern "C" fn simbridge_get_data_point_fill(
    handle: *const SbIndex,
    position: usize,
    buffer: *mut c_void,
    capacity: usize,
    out_count: *mut usize,
) -> ErrorCode {
    finish(
        guard(|| {
            let out_count = out_ref(out_count, "element count")?;
            let index = index_ref(handle)?;
            let output = match index.header().encoding {
                DataEncoding::DenseFloatVector => {
                    DataOutput::Dense(raw_slice_mut(buffer as *mut f32, capacity, "record buffer")?)
                }
                DataEncoding::SparseFloatVector => {
                    DataOutput::Sparse(raw_slice_mut(buffer as *mut SparseElement, capacity, "record buffer")?)
                }
                DataEncoding::DenseByteVector => {
                    DataOutput::Bytes(raw_slice_mut(buffer as *mut u8, capacity, "record buffer")?)
                }
                DataEncoding::LengthPrefixedString => {
                    DataOutput::Text(raw_slice_mut(buffer as *mut u8, capacity, "record buffer")?)
                }
            };
            *out_count = index.get_data_point_fill(position, output)?;
            Ok(())
        }),
        "Record copied",
    )
}

/// NUL-terminated copy of a string record; `out_len` (optional) excludes
/// the terminator
#[no_mangle]
pub unsafe extern "C" fn simbridge_get_data_point_string(
    handle: *const SbIndex,
    position: usize,
    allocator: *const RawAllocator,
    out: *mut *mut c_char,
    out_len: *mut usize,
) -> ErrorCode {
    finish(
        guard(|| {
            let out = out_ref(out, "string")?;
            let index = index_ref(handle)?;
            let copy = index.get_data_point_string(position, &allocator_or(allocator, index)?)?;
            if let Some(len) = out_len.as_mut() {
                *len = copy.len() - 1;
            }
            *out = copy.into_raw() as *mut c_char;
            Ok(())
        }),
        "String record copied",
    )
}

/// Detached copy of a dense record, released by calling `*out_release(*out)`
#[no_mangle]
pub unsafe extern "C" fn simbridge_borrow_data_dense(
    handle: *const SbIndex,
    position: usize,
    allocator: *const RawAllocator,
    out: *mut *mut f32,
    out_len: *mut usize,
    out_release: *mut Option<ReleaseFn>,
) -> ErrorCode {
    finish(
        guard(|| {
            let out = out_ref(out, "data")?;
            let out_len = out_ref(out_len, "length")?;
            let out_release = out_ref(out_release, "release function")?;
            let index = index_ref(handle)?;
            let copy = index.borrow_data_dense(position, &allocator_or(allocator, index)?)?;
            *out_len = copy.len() / mem::size_of::<f32>();
            *out = copy.into_raw() as *mut f32;
            *out_release = Some(release_detached);
            Ok(())
        }),
        "Dense record borrowed",
    )
}

/// Detached copy of a sparse record's pairs, released by `*out_release(*out)`
#[no_mangle]
pub unsafe extern "C" fn simbridge_borrow_data_sparse(
    handle: *const SbIndex,
    position: usize,
    allocator: *const RawAllocator,
    out: *mut *mut SparseElement,
    out_len: *mut usize,
    out_release: *mut Option<ReleaseFn>,
) -> ErrorCode {
    finish(
        guard(|| {
            let out = out_ref(out, "data")?;
            let out_len = out_ref(out_len, "length")?;
            let out_release = out_ref(out_release, "release function")?;
            let index = index_ref(handle)?;
            let copy = index.borrow_data_sparse(position, &allocator_or(allocator, index)?)?;
            *out_len = copy.len() / mem::size_of::<SparseElement>();
            *out = copy.into_raw() as *mut SparseElement;
            *out_release = Some(release_detached);
            Ok(())
        }),
        "Sparse record borrowed",
    )
}

// ============================================================================
// Queries
// ============================================================================

#[no_mangle]
pub unsafe extern "C" fn simbridge_knn_query_get_size(
    handle: *const SbIndex,
    query: *const c_void,
    element_count: usize,
    k: usize,
    out_size: *mut usize,
) -> ErrorCode {
    finish(
        guard(|| {
            let out_size = out_ref(out_size, "result size")?;
            let index = index_ref(handle)?;
            let query = raw_query(index.header().encoding, query, element_count)?;
            *out_size = index.knn_query_get_size(query, k)?;
            Ok(())
        }),
        "k-NN result size computed",
    )
}

/// Fill `result` nearest-first; on any failure `result->size` is 0
#[no_mangle]
pub unsafe extern "C" fn simbridge_knn_query_fill(
    handle: *const SbIndex,
    query: *const c_void,
    element_count: usize,
    k: usize,
    result: *mut SbResult,
) -> ErrorCode {
    finish(
        guard(|| {
            let result = out_ref(result, "result")?;
            result.size = 0;
            let index = index_ref(handle)?;
            let query = raw_query(index.header().encoding, query, element_count)?;
            let mut buffer = result_buffer(result)?;
            index.knn_query_fill(query, k, &mut buffer)?;
            result.size = buffer.size();
            Ok(())
        }),
        "k-NN query executed",
    )
}

/// Run `query_count` k-NN fills on the index's worker pool, one result per
/// query. Per-query element counts come from `element_counts` when given.
#[no_mangle]
pub unsafe extern "C" fn simbridge_knn_query_batch(
    handle: *const SbIndex,
    queries: *const *const c_void,
    query_count: usize,
    element_count: usize,
    element_counts: *const usize,
    k: usize,
    results: *mut SbResult,
) -> ErrorCode {
    finish(
        guard(|| {
            nonzero(query_count, "query count")?;
            let index = index_ref(handle)?;
            let results = raw_slice_mut(results, query_count, "result array")?;
            for result in results.iter_mut() {
                result.size = 0;
            }
            let inputs = raw_rows(index.header().encoding, queries, query_count, element_count, element_counts)?;
            if let Some(i) = inputs.iter().position(|q| q.len() > MAX_QUERY_ELEMENTS) {
                return Err(Error::query_too_large(format!("query {} exceeds {} elements", i, MAX_QUERY_ELEMENTS)));
            }
            let mut buffers = results
                .iter()
                .map(|r| result_buffer(r))
                .collect::<Result<Vec<_>>>()?;

            let outcome = index.knn_query_batch(&inputs, k, &mut buffers);
            for (result, buffer) in results.iter_mut().zip(&buffers) {
                result.size = buffer.size();
            }
            outcome
        }),
        "k-NN batch executed",
    )
}

#[no_mangle]
pub unsafe extern "C" fn simbridge_range_query_get_size(
    handle: *const SbIndex,
    query: *const c_void,
    element_count: usize,
    radius: f32,
    out_size: *mut usize,
) -> ErrorCode {
    finish(
        guard(|| {
            let out_size = out_ref(out_size, "result size")?;
            let index = index_ref(handle)?;
            let query = raw_query(index.header().encoding, query, element_count)?;
            *out_size = index.range_query_get_size(query, radius)?;
            Ok(())
        }),
        "Range result size computed",
    )
}

/// Fill `result` with every record within `radius`, nearest-first
#[no_mangle]
pub unsafe extern "C" fn simbridge_range_query_fill(
    handle: *const SbIndex,
    query: *const c_void,
    element_count: usize,
    radius: f32,
    result: *mut SbResult,
) -> ErrorCode {
    finish(
        guard(|| {
            let result = out_ref(result, "result")?;
            result.size = 0;
            let index = index_ref(handle)?;
            let query = raw_query(index.header().encoding, query, element_count)?;
            let mut buffer = result_buffer(result)?;
            index.range_query_fill(query, radius, &mut buffer)?;
            result.size = buffer.size();
            Ok(())
        }),
        "Range query executed",
    )
}

// ============================================================================
// Persistence
// ============================================================================

#[no_mangle]
pub unsafe extern "C" fn simbridge_save_index(
    handle: *const SbIndex,
    path: *const c_char,
    include_data: bool,
) -> ErrorCode {
    finish(
        guard(|| {
            let index = index_ref(handle)?;
            let path = c_str(path, "path")?;
            index.save(path, include_data)
        }),
        "Index saved",
    )
}

#[no_mangle]
pub unsafe extern "C" fn simbridge_load_index(
    path: *const c_char,
    encoding: u32,
    distance_kind: u32,
    allocator: *const RawAllocator,
    include_data: bool,
    out: *mut *mut SbIndex,
) -> ErrorCode {
    finish(
        guard(|| {
            let out = out_ref(out, "index handle")?;
            *out = ptr::null_mut();
            let path = c_str(path, "path")?;
            let encoding = DataEncoding::from_u32(encoding)?;
            let distance_kind = DistanceKind::from_u32(distance_kind)?;
            let allocator = host_allocator(allocator)?;
            let index = IndexHandle::load(path, encoding, distance_kind, allocator, include_data)?;
            *out = register(index)?;
            Ok(())
        }),
        "Index loaded",
    )
}

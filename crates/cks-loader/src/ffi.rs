//! The C ABI a dynamically loaded checksum plugin must expose.
//!
//! A plugin library is found at `lib/libXrdCksCalc<name>.so` (or a
//! caller-supplied pattern) and exports one symbol, `XrdCksCalcInit`, with
//! this signature. Since trait objects are not FFI-safe, the boundary is a
//! plain C vtable of function pointers plus an opaque context pointer --
//! the same shape the loaded library's native counterpart (`XrdCksCalc`'s
//! own virtual table) already has.
use std::ffi::c_void;
use std::os::raw::c_char;

#[repr(C)]
pub struct CksCalcVTable {
    pub init: unsafe extern "C" fn(ctx: *mut c_void),
    pub update: unsafe extern "C" fn(ctx: *mut c_void, data: *const u8, len: usize),
    /// Writes up to `out_cap` digest bytes into `out`, returning the number
    /// of bytes written (the algorithm's digest size).
    pub finish: unsafe extern "C" fn(ctx: *mut c_void, out: *mut u8, out_cap: usize) -> usize,
    pub destroy: unsafe extern "C" fn(ctx: *mut c_void),
}

#[repr(C)]
pub struct CksCalcHandle {
    pub ctx: *mut c_void,
    pub vtable: *const CksCalcVTable,
    pub digest_size: usize,
}

/// `XrdCksCalcInit(name, parms) -> *mut CksCalcHandle`, or null on failure.
pub type PluginInitFn =
    unsafe extern "C" fn(name: *const c_char, parms: *const c_char) -> *mut CksCalcHandle;

pub const ENTRY_POINT_SYMBOL: &[u8] = b"XrdCksCalcInit";

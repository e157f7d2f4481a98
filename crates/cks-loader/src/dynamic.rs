use crate::ffi::{CksCalcHandle, CksCalcVTable};
use cks_calc::CksCalc;
use std::sync::Arc;

/// Adapts a [`CksCalcHandle`] produced by a dynamically loaded plugin to the
/// [`CksCalc`] trait. Keeps the owning `libloading::Library` alive for as
/// long as any instance minted from it exists.
pub struct DynamicCalc {
    handle: *mut CksCalcHandle,
    name: &'static str,
    digest: Vec<u8>,
    // Kept only to extend the library's lifetime; never read directly.
    _library: Arc<libloading::Library>,
}

// The plugin contract requires the vtable functions to be callable from any
// thread; `CksManager` never shares a single calculator across threads
// concurrently (each Calc() call owns its instance).
unsafe impl Send for DynamicCalc {}

impl DynamicCalc {
    /// # Safety
    /// `handle` must have been produced by the plugin's `XrdCksCalcInit`
    /// entry point and not yet passed to any other `DynamicCalc`.
    pub unsafe fn new(
        handle: *mut CksCalcHandle,
        name: &'static str,
        library: Arc<libloading::Library>,
    ) -> Self {
        let digest_size = (*handle).digest_size;
        DynamicCalc {
            handle,
            name,
            digest: vec![0; digest_size],
            _library: library,
        }
    }

    fn vtable(&self) -> &CksCalcVTable {
        unsafe { &*(*self.handle).vtable }
    }
}

impl std::fmt::Debug for DynamicCalc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicCalc").field("name", &self.name).finish()
    }
}

impl Drop for DynamicCalc {
    fn drop(&mut self) {
        unsafe {
            (self.vtable().destroy)((*self.handle).ctx);
            drop(Box::from_raw(self.handle));
        }
    }
}

impl CksCalc for DynamicCalc {
    fn init(&mut self) {
        unsafe { (self.vtable().init)((*self.handle).ctx) }
    }

    fn update(&mut self, data: &[u8]) {
        unsafe { (self.vtable().update)((*self.handle).ctx, data.as_ptr(), data.len()) }
    }

    fn finish(&mut self) -> &[u8] {
        let written = unsafe {
            (self.vtable().finish)(
                (*self.handle).ctx,
                self.digest.as_mut_ptr(),
                self.digest.len(),
            )
        };
        &self.digest[..written]
    }

    fn algorithm(&self) -> (&'static str, usize) {
        (self.name, self.digest.len())
    }

    fn new_instance(&self) -> Box<dyn CksCalc> {
        // Plugins are re-entered through the same entry point to mint a
        // fresh instance; the loader, not this adapter, owns that call so
        // that the library handle bookkeeping stays in one place.
        panic!("new_instance() on a DynamicCalc must be routed through CksLoader::load")
    }
}

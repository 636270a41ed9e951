//! Context handed to a running entry point
//!
//! The context is a `#[repr(C)]` view over host-owned state. The host builds
//! it from anything implementing [`Host`]; the service only ever sees the
//! safe accessors below.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::time::Duration;

/// Host-side callbacks backing a [`ServiceContext`]
pub trait Host: Sync {
    /// Whether the runtime has asked the service to stop
    fn is_cancelled(&self) -> bool;

    /// Record a failure; the run ends as FAILED with this message
    fn report_error(&self, message: &str);

    /// Record the port the service listens on
    fn report_port(&self, port: u16);
}

/// One borrowed UTF-8 argument, laid out for the C ABI
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawArg<'a> {
    ptr: *const u8,
    len: usize,
    _marker: PhantomData<&'a str>,
}

impl<'a> RawArg<'a> {
    pub fn new(arg: &'a str) -> Self {
        Self {
            ptr: arg.as_ptr(),
            len: arg.len(),
            _marker: PhantomData,
        }
    }

    fn as_str(&self) -> &'a str {
        // Safety: built from a &'a str in `new`, so the bytes are valid UTF-8
        // and outlive 'a.
        unsafe { std::str::from_utf8_unchecked(std::slice::from_raw_parts(self.ptr, self.len)) }
    }
}

/// Context passed to every entry point
#[repr(C)]
pub struct ServiceContext<'a> {
    args: *const RawArg<'a>,
    args_len: usize,
    host: *const c_void,
    is_cancelled: extern "C" fn(*const c_void) -> bool,
    report_error: extern "C" fn(*const c_void, *const u8, usize),
    report_port: extern "C" fn(*const c_void, u16),
    _marker: PhantomData<&'a ()>,
}

extern "C" fn is_cancelled_shim<H: Host>(host: *const c_void) -> bool {
    // Safety: `host` was created from a &'a H in `ServiceContext::new`.
    let host = unsafe { &*(host as *const H) };
    host.is_cancelled()
}

extern "C" fn report_error_shim<H: Host>(host: *const c_void, ptr: *const u8, len: usize) {
    let host = unsafe { &*(host as *const H) };
    let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
    host.report_error(&String::from_utf8_lossy(bytes));
}

extern "C" fn report_port_shim<H: Host>(host: *const c_void, port: u16) {
    let host = unsafe { &*(host as *const H) };
    host.report_port(port);
}

impl<'a> ServiceContext<'a> {
    /// Build a context over host state. Used by the runtime, not by services.
    pub fn new<H: Host>(args: &'a [RawArg<'a>], host: &'a H) -> Self {
        Self {
            args: args.as_ptr(),
            args_len: args.len(),
            host: host as *const H as *const c_void,
            is_cancelled: is_cancelled_shim::<H>,
            report_error: report_error_shim::<H>,
            report_port: report_port_shim::<H>,
            _marker: PhantomData,
        }
    }

    /// Arguments passed to the service
    pub fn args(&self) -> Vec<&'a str> {
        if self.args_len == 0 {
            return Vec::new();
        }
        // Safety: points at the slice given to `new`, which outlives 'a.
        let raw = unsafe { std::slice::from_raw_parts(self.args, self.args_len) };
        raw.iter().map(RawArg::as_str).collect()
    }

    /// Look up a `key=value` argument
    pub fn arg(&self, key: &str) -> Option<&'a str> {
        self.args().into_iter().find_map(|arg| {
            arg.split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }

    /// Whether the runtime has requested a stop
    pub fn is_cancelled(&self) -> bool {
        (self.is_cancelled)(self.host)
    }

    /// Report a failure to the runtime
    pub fn fail(&self, message: &str) {
        (self.report_error)(self.host, message.as_ptr(), message.len())
    }

    /// Report the port this service listens on
    pub fn set_port(&self, port: u16) {
        (self.report_port)(self.host, port)
    }

    /// Block the calling thread until a stop is requested
    pub fn park_until_cancelled(&self, tick: Duration) {
        while !self.is_cancelled() {
            std::thread::sleep(tick);
        }
    }
}

impl std::fmt::Debug for ServiceContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("args", &self.args())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

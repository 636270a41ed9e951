//! Entry point descriptor and export macro
//!
//! The descriptor is the artifact's "startable" contract. It carries the
//! declarations the runtime validates before launching anything: the entry
//! must be public, callable without an instance, return nothing and accept a
//! sequence of strings.
//!
//! # Example
//!
//! ```ignore
//! use svcrun_sdk::prelude::*;
//!
//! service_entry!("payment.PaymentApp", fn run(ctx: &ServiceContext) -> Result<(), ServiceError> {
//!     ctx.set_port(8080);
//!     while !ctx.is_cancelled() {
//!         std::thread::sleep(std::time::Duration::from_millis(100));
//!     }
//!     Ok(())
//! });
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::{ServiceContext, ServiceError};

/// Version of the descriptor layout. Bumped on any incompatible change.
pub const ABI_VERSION: u32 = 1;

/// Signature of the function the runtime invokes
pub type StartFn = extern "C-unwind" fn(ctx: &ServiceContext<'_>);

/// Declared visibility of the entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Visibility {
    Public = 0,
    Private = 1,
}

/// Whether the entry needs an instance before it can be called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Receiver {
    Static = 0,
    Instance = 1,
}

/// Declared return type of the entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReturnKind {
    Unit = 0,
    Value = 1,
}

/// Declared parameter list of the entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParamKind {
    /// A single sequence of strings
    StringArgs = 0,
    None = 1,
    Other = 2,
}

macro_rules! impl_from_raw {
    ($ty:ident { $($variant:ident),+ }) => {
        impl $ty {
            /// Decode a raw discriminant read from a loaded artifact
            pub fn from_raw(raw: u8) -> Option<Self> {
                $(if raw == $ty::$variant as u8 {
                    return Some($ty::$variant);
                })+
                None
            }
        }
    };
}

impl_from_raw!(Visibility { Public, Private });
impl_from_raw!(Receiver { Static, Instance });
impl_from_raw!(ReturnKind { Unit, Value });
impl_from_raw!(ParamKind { StringArgs, None, Other });

/// The exported entry point descriptor
///
/// Discriminants are stored as raw bytes because the host reads them out of
/// foreign memory; use the accessors to decode them.
#[repr(C)]
pub struct EntryPoint {
    pub abi_version: u32,
    pub visibility: u8,
    pub receiver: u8,
    pub returns: u8,
    pub params: u8,
    pub start: StartFn,
}

impl EntryPoint {
    /// A descriptor satisfying the full startable contract
    pub const fn new(start: StartFn) -> Self {
        Self {
            abi_version: ABI_VERSION,
            visibility: Visibility::Public as u8,
            receiver: Receiver::Static as u8,
            returns: ReturnKind::Unit as u8,
            params: ParamKind::StringArgs as u8,
            start,
        }
    }

    pub const fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility as u8;
        self
    }

    pub const fn with_receiver(mut self, receiver: Receiver) -> Self {
        self.receiver = receiver as u8;
        self
    }

    pub const fn with_returns(mut self, returns: ReturnKind) -> Self {
        self.returns = returns as u8;
        self
    }

    pub const fn with_params(mut self, params: ParamKind) -> Self {
        self.params = params as u8;
        self
    }

    pub fn visibility(&self) -> Option<Visibility> {
        Visibility::from_raw(self.visibility)
    }

    pub fn receiver(&self) -> Option<Receiver> {
        Receiver::from_raw(self.receiver)
    }

    pub fn returns(&self) -> Option<ReturnKind> {
        ReturnKind::from_raw(self.returns)
    }

    pub fn params(&self) -> Option<ParamKind> {
        ParamKind::from_raw(self.params)
    }
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoint")
            .field("abi_version", &self.abi_version)
            .field("visibility", &self.visibility())
            .field("receiver", &self.receiver())
            .field("returns", &self.returns())
            .field("params", &self.params())
            .finish_non_exhaustive()
    }
}

/// Run a service body, routing errors and panics to the host
///
/// Errors and panics are reported through [`ServiceContext::fail`] with
/// their message, so the run ends FAILED with a readable error.
pub fn run_guarded<F>(ctx: &ServiceContext<'_>, body: F)
where
    F: FnOnce(&ServiceContext<'_>) -> Result<(), ServiceError>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| body(ctx))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => ctx.fail(&err.to_string()),
        Err(payload) => ctx.fail(&panic_message(payload.as_ref())),
    }
}

/// Extract a readable message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "service panicked".to_string()
    }
}

/// Export a service entry point under its conventional symbol name
#[macro_export]
macro_rules! service_entry {
    ($symbol:literal, fn $name:ident($ctx:ident: &ServiceContext) -> Result<(), ServiceError> $body:block) => {
        fn $name($ctx: &$crate::ServiceContext<'_>) -> ::std::result::Result<(), $crate::ServiceError> $body

        #[doc(hidden)]
        extern "C-unwind" fn __svcrun_start(ctx: &$crate::ServiceContext<'_>) {
            $crate::entry::run_guarded(ctx, $name)
        }

        #[doc(hidden)]
        #[export_name = $symbol]
        pub static __SVCRUN_ENTRY_POINT: $crate::EntryPoint = $crate::EntryPoint::new(__svcrun_start);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C-unwind" fn noop(_ctx: &ServiceContext<'_>) {}

    #[test]
    fn test_default_descriptor_is_startable() {
        let entry = EntryPoint::new(noop);
        assert_eq!(entry.abi_version, ABI_VERSION);
        assert_eq!(entry.visibility(), Some(Visibility::Public));
        assert_eq!(entry.receiver(), Some(Receiver::Static));
        assert_eq!(entry.returns(), Some(ReturnKind::Unit));
        assert_eq!(entry.params(), Some(ParamKind::StringArgs));
    }

    #[test]
    fn test_builder_overrides() {
        let entry = EntryPoint::new(noop)
            .with_visibility(Visibility::Private)
            .with_returns(ReturnKind::Value);
        assert_eq!(entry.visibility(), Some(Visibility::Private));
        assert_eq!(entry.returns(), Some(ReturnKind::Value));
        assert_eq!(entry.receiver(), Some(Receiver::Static));
    }

    #[test]
    fn test_unknown_discriminant() {
        assert_eq!(Visibility::from_raw(7), None);
        assert_eq!(ParamKind::from_raw(2), Some(ParamKind::Other));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "service panicked");
    }
}

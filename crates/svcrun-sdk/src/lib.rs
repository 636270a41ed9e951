//! svcrun SDK - Types and macros for writing services launched by svcrun
//!
//! A service artifact is a `cdylib` exporting one [`EntryPoint`] descriptor
//! under its conventional symbol name (for `payment-service` that is
//! `payment.PaymentApp`). The runtime loads the artifact into an isolated
//! scope, validates the descriptor and calls its `start` function on a
//! dedicated worker, handing it a [`ServiceContext`].

pub mod context;
pub mod entry;
pub mod error;

pub mod prelude {
    //! Common imports for svcrun services
    pub use crate::context::ServiceContext;
    pub use crate::entry::EntryPoint;
    pub use crate::error::ServiceError;
    pub use crate::service_entry;
}

// Re-export key types at crate root
pub use context::{Host, RawArg, ServiceContext};
pub use entry::{EntryPoint, ParamKind, Receiver, ReturnKind, StartFn, Visibility, ABI_VERSION};
pub use error::ServiceError;

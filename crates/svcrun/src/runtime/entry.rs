//! Entry point resolution
//!
//! Finds the canonical startable symbol of a service inside its isolated
//! scope and checks the descriptor against the startable contract before
//! anything is launched.

use std::fmt;
use std::sync::{Arc, Weak};

use svcrun_sdk::{EntryPoint, ParamKind, Receiver, ReturnKind, ServiceContext, StartFn, Visibility, ABI_VERSION};

use super::context::ExecutionContext;
use super::loader::SymbolScope;
use crate::error::{Result, RuntimeError};

/// Naming convention mapping service names to entry symbols
///
/// `payment-service` becomes `payment.PaymentApp`: the suffix is stripped,
/// the base name is the symbol's namespace and its capitalized form plus
/// `App` is the symbol itself.
#[derive(Debug, Clone)]
pub struct EntryPointConvention {
    suffix: String,
    namespace: Option<String>,
}

impl Default for EntryPointConvention {
    fn default() -> Self {
        Self {
            suffix: "-service".to_string(),
            namespace: None,
        }
    }
}

impl EntryPointConvention {
    pub fn new(suffix: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            suffix: suffix.into(),
            namespace,
        }
    }

    /// Conventional entry symbol for `service`
    pub fn symbol_for(&self, service: &str) -> String {
        let base = service.strip_suffix(self.suffix.as_str()).unwrap_or(service);

        let mut chars = base.chars();
        let capitalized: String = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };

        match &self.namespace {
            Some(ns) => format!("{ns}.{base}.{capitalized}App"),
            None => format!("{base}.{capitalized}App"),
        }
    }
}

/// A validated, callable entry point
///
/// Holds a strong reference to the scope it came from, so the code behind
/// `start` stays mapped for as long as this handle exists.
pub struct ResolvedEntryPoint {
    service: String,
    symbol: String,
    start: StartFn,
    scope: Arc<dyn SymbolScope>,
}

impl ResolvedEntryPoint {
    pub fn service_name(&self) -> &str {
        &self.service
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Non-owning reference to the scope backing this entry point
    pub fn scope(&self) -> Weak<dyn SymbolScope> {
        Arc::downgrade(&self.scope)
    }

    /// Invoke the entry point on the calling thread
    pub fn invoke(&self, ctx: &ServiceContext<'_>) {
        (self.start)(ctx)
    }
}

impl fmt::Debug for ResolvedEntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedEntryPoint")
            .field("service", &self.service)
            .field("symbol", &self.symbol)
            .finish()
    }
}

/// Resolves and validates entry points
#[derive(Debug, Clone, Default)]
pub struct EntryPointResolver {
    convention: EntryPointConvention,
}

impl EntryPointResolver {
    pub fn new(convention: EntryPointConvention) -> Self {
        Self { convention }
    }

    pub fn convention(&self) -> &EntryPointConvention {
        &self.convention
    }

    /// Resolve the entry point of the context's service
    ///
    /// Uses the context's entry symbol override if one was set, otherwise the
    /// naming convention, and binds the chosen symbol back into the context.
    pub fn resolve(&self, ctx: &mut ExecutionContext) -> Result<ResolvedEntryPoint> {
        let service = ctx.service_name().to_string();
        let symbol = ctx
            .entry_symbol()
            .map(str::to_string)
            .unwrap_or_else(|| self.convention.symbol_for(&service));

        tracing::debug!(service = %service, symbol = %symbol, "Resolving entry point");

        let scope = ctx
            .loader()
            .cloned()
            .ok_or_else(|| RuntimeError::EntryPointMissing {
                service: service.clone(),
                symbol: symbol.clone(),
                reason: "no loader attached to the execution context".to_string(),
            })?;

        let start = {
            let entry = scope.lookup(&symbol).ok_or_else(|| RuntimeError::EntryPointMissing {
                service: service.clone(),
                symbol: symbol.clone(),
                reason: "symbol not exported by the service or its dependencies".to_string(),
            })?;

            validate(&service, &symbol, entry)?;
            entry.start
        };

        ctx.bind_entry_symbol(symbol.clone());

        tracing::info!(service = %service, symbol = %symbol, "Resolved entry point");

        Ok(ResolvedEntryPoint {
            service,
            symbol,
            start,
            scope,
        })
    }
}

/// Check a descriptor against the startable contract
///
/// Every check maps to its own error kind. A wrong parameter list counts as
/// a missing entry point: no entry accepting a string sequence exists.
pub fn validate(service: &str, symbol: &str, entry: &EntryPoint) -> Result<()> {
    if entry.abi_version != ABI_VERSION {
        return Err(RuntimeError::EntryPointMissing {
            service: service.to_string(),
            symbol: symbol.to_string(),
            reason: format!(
                "descriptor ABI version {} does not match runtime version {}",
                entry.abi_version, ABI_VERSION
            ),
        });
    }

    if entry.params() != Some(ParamKind::StringArgs) {
        return Err(RuntimeError::EntryPointMissing {
            service: service.to_string(),
            symbol: symbol.to_string(),
            reason: "no entry point accepting a sequence of strings".to_string(),
        });
    }

    if entry.visibility() != Some(Visibility::Public) {
        return Err(RuntimeError::EntryPointNotPublic {
            service: service.to_string(),
            symbol: symbol.to_string(),
        });
    }

    if entry.receiver() != Some(Receiver::Static) {
        return Err(RuntimeError::EntryPointNotStatic {
            service: service.to_string(),
            symbol: symbol.to_string(),
        });
    }

    if entry.returns() != Some(ReturnKind::Unit) {
        return Err(RuntimeError::EntryPointWrongReturnType {
            service: service.to_string(),
            symbol: symbol.to_string(),
        });
    }

    Ok(())
}

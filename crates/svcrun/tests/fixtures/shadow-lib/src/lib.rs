//! Dependency artifact used by the dynamic loading tests
//!
//! Exports `payment.PaymentApp` as well, so scope order decides which
//! definition a lookup finds. Each entry reports a distinct port.

use svcrun_sdk::prelude::*;

pub const SHADOW_PAYMENT_PORT: u16 = 1;
pub const SHADOW_APP_PORT: u16 = 2;

service_entry!("payment.PaymentApp", fn shadow_payment(ctx: &ServiceContext) -> Result<(), ServiceError> {
    ctx.set_port(SHADOW_PAYMENT_PORT);
    Ok(())
});

extern "C-unwind" fn shadow_start(ctx: &ServiceContext<'_>) {
    ctx.set_port(SHADOW_APP_PORT);
}

#[export_name = "shadow.ShadowApp"]
pub static SHADOW_APP: EntryPoint = EntryPoint::new(shadow_start);

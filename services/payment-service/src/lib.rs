//! Sample payment service
//!
//! Built as `build/payment-service/payment-service.<ext>` and started with
//! `svcrun run payment-service --set port=9090`.

use std::time::Duration;

use svcrun_sdk::prelude::*;

const DEFAULT_PORT: u16 = 8080;

service_entry!("payment.PaymentApp", fn start(ctx: &ServiceContext) -> Result<(), ServiceError> {
    println!("[payment] Starting payment service...");

    let port = match ctx.arg("port") {
        Some(raw) => raw
            .parse()
            .map_err(|_| ServiceError::Config(format!("invalid port '{raw}'")))?,
        None => DEFAULT_PORT,
    };
    ctx.set_port(port);

    let user = ctx.arg("user").unwrap_or("user123");
    println!("[payment] Auth result for {user}: {}", authenticate(user));
    println!("[payment] Payment service running on port {port}");

    ctx.park_until_cancelled(Duration::from_millis(100));

    println!("[payment] Payment service shutting down");
    Ok(())
});

fn authenticate(user: &str) -> bool {
    !user.is_empty()
}

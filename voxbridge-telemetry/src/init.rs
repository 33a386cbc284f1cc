//! Telemetry initialization

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

fn env_filter() -> Result<EnvFilter, Box<dyn std::error::Error + Send + Sync>> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new("info")?),
    }
}

/// Initialize console logging.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Only the first
/// call installs a subscriber; later calls are no-ops.
///
/// # Example
/// ```
/// use voxbridge_telemetry::init_telemetry;
/// init_telemetry("voxbridge-call").expect("Failed to initialize telemetry");
/// ```
pub fn init_telemetry(service_name: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut result = Ok(());
    INIT.call_once(|| {
        let filter = match env_filter() {
            Ok(filter) => filter,
            Err(e) => {
                result = Err(e);
                return;
            }
        };

        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .try_init();

        match installed {
            Ok(()) => tracing::info!(service.name = service_name, "Telemetry initialized"),
            Err(e) => result = Err(e.into()),
        }
    });
    result
}

/// Initialize newline-delimited JSON logging.
///
/// Shares the once-guard with [`init_telemetry`]; whichever runs first wins.
pub fn init_json_telemetry(
    service_name: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut result = Ok(());
    INIT.call_once(|| {
        let filter = match env_filter() {
            Ok(filter) => filter,
            Err(e) => {
                result = Err(e);
                return;
            }
        };

        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_line_number(true),
            )
            .try_init();

        match installed {
            Ok(()) => tracing::info!(service.name = service_name, "JSON telemetry initialized"),
            Err(e) => result = Err(e.into()),
        }
    });
    result
}

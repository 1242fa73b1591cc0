use tracing_subscriber::{fmt, EnvFilter};

use crate::Result;

/// Initialize tracing for the service.
///
/// Default: info for our crates, warn for everything else. Can be overridden
/// with `RUST_LOG`. Safe to call more than once (later calls are no-ops),
/// which keeps test setups simple.
pub fn init(service_name: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,tgm=info,tgm_core=info,tgm_telegram=info,tgm_server=info,tgm_feed=info,{service_name}=info"
        ))
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init();

    Ok(())
}

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Installs the global fmt subscriber on stderr. `RUST_LOG` wins over the
/// crate default of `info`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("invoice_migration=info"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

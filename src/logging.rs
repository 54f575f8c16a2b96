// Tracing setup shared by the binaries

use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber; `RUST_LOG` overrides `default_level`.
/// Safe to call more than once.
pub fn init_tracing(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

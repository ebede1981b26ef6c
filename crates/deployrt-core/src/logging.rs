use tracing_subscriber::EnvFilter;

/// Installs a process-wide `tracing` subscriber for binaries, tests, and
/// benchmarks that embed this crate. Library code never calls this
/// itself; it only emits events through the `tracing` macros.
pub fn init_default() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Best-effort: a second call (or a
/// subscriber installed by the host application) is left in place.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

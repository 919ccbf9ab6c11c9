// Logging initialization for embedding processes.

/// Initialize the global tracing subscriber. Respects `RUST_LOG`; defaults
/// to `info` when unset. Panics if a subscriber is already installed.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}

/// Like [`init`], but a no-op when a subscriber is already installed.
/// Useful in tests where multiple entry points race to initialize.
pub fn try_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}

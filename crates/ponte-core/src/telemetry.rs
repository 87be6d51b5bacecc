use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset: bus internals at debug in
/// debug builds, info otherwise.
fn default_filter() -> EnvFilter {
    let directive = if cfg!(debug_assertions) {
        "info,ponte_core=debug"
    } else {
        "info"
    };
    EnvFilter::new(directive)
}

/// Install the global tracing subscriber for the bus process.
///
/// Debug builds log human-readable lines with targets; release builds
/// emit JSON for log aggregation. `RUST_LOG` overrides the default
/// filter. Call once at startup; a second call panics (the global
/// subscriber is already set).
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if cfg!(debug_assertions) {
        builder.init();
    } else {
        builder.json().init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_scopes_bus_internals() {
        let filter = default_filter().to_string();
        assert!(filter.contains("info"));
        if cfg!(debug_assertions) {
            assert!(filter.contains("ponte_core=debug"));
        }
    }
}

//! Logging initialization for the CLI.
//!
//! Logging is owned by the CLI crate; the library only emits `tracing`
//! events. Logs always go to stderr so stdout stays parseable.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber.
///
/// * `verbosity` - 0 = RUST_LOG or WARN, 1 = DEBUG, 2+ = TRACE for pathmux targets
/// * `json` - emit JSON lines instead of human-readable text
///
/// JSON output format:
/// ```json
/// {"timestamp":"...","level":"DEBUG","target":"pathmux_core::session","span":{"cmd":"resolve"},"fields":{"message":"..."}}
/// ```
pub fn init(verbosity: u8, json: bool) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let subscriber = tracing_subscriber::registry().with(filter(verbosity, rust_log.as_deref()));

    if json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

/// Without -v, RUST_LOG decides alone (WARN when unset or invalid). With -v,
/// our own crates are raised to DEBUG or TRACE whatever RUST_LOG says about
/// them.
fn filter(verbosity: u8, rust_log: Option<&str>) -> EnvFilter {
    let mut filter = rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));

    let level = match verbosity {
        0 => return filter,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    for target in ["pathmux", "pathmux_core"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directives(verbosity: u8, rust_log: Option<&str>) -> String {
        filter(verbosity, rust_log).to_string().to_lowercase()
    }

    #[test]
    fn test_rust_log_kept_without_verbose() {
        let shown = directives(0, Some("pathmux_core=trace"));
        assert!(shown.contains("pathmux_core=trace"));
        assert!(!shown.contains("pathmux_core=warn"));
    }

    #[test]
    fn test_verbose_raises_own_crates() {
        let shown = directives(1, Some("pathmux_core=trace"));
        assert!(shown.contains("pathmux_core=debug"));
        assert!(shown.contains("pathmux=debug"));

        assert!(directives(2, None).contains("pathmux_core=trace"));
    }

    #[test]
    fn test_defaults_to_warn() {
        let shown = directives(0, None);
        assert!(shown.contains("warn"));
        assert!(!shown.contains("pathmux"));
    }
}

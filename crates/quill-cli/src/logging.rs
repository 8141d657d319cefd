//! Tracing subscriber setup from the `logging` config section.

use quill_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Filter directives: base level first, then per-crate overrides.
pub fn directives(logging: &LoggingConfig, verbose: bool) -> String {
    let base = if verbose {
        "debug"
    } else {
        logging.level.as_deref().unwrap_or("info")
    };
    let mut parts = vec![base.to_string()];
    parts.extend(logging.filters.iter().filter(|f| !f.trim().is_empty()).cloned());
    parts.join(",")
}

/// Install the global subscriber. `RUST_LOG` wins unless `verbose` is set.
pub fn init(logging: Option<&LoggingConfig>, verbose: bool) {
    let logging = logging.cloned().unwrap_or_default();
    let filter = if verbose {
        EnvFilter::new(directives(&logging, true))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(&logging, false)))
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let json = logging.format == "json";
    let stdout = logging.output == "stdout";
    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}

//! Process-wide log subscriber for stand binaries
//!
//! `RUST_LOG` wins over the level passed by the caller. A global subscriber
//! can only be installed once; later calls are no-ops.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset: `level` for stand crates, `warn`
/// for everything else.
fn default_filter(level: Level) -> EnvFilter {
    let level = level.as_str().to_ascii_lowercase();
    EnvFilter::new(format!(
        "warn,standd={level},stand_core={level},stand_state={level},gitlab_provider={level}"
    ))
}

/// Install the global subscriber; `json` switches to newline-delimited JSON.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    let json_layer = json.then(|| fmt::layer().json().with_current_span(true));
    let text_layer = (!json).then(|| fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_scopes_stand_crates() {
        let rendered = default_filter(Level::DEBUG).to_string();
        assert!(rendered.contains("stand_core=debug"));
    }

    #[test]
    fn repeated_init_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}

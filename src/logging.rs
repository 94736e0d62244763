//! Logging setup.
//!
//! Diagnostics go to stderr through `tracing`; command output stays on
//! stdout so it can be piped. Filter precedence: `RUST_LOG`, then `--debug`,
//! then `[logging] level`.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_directive(level: &str, debug: bool) -> String {
    let level = if debug { "debug" } else { level };
    // dependencies stay at warn unless RUST_LOG says otherwise
    format!("warn,memex={level},memex_core={level}")
}

pub fn init_logging(level: &str, debug: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(level, debug)))?;

    let console_layer = fmt::layer()
        .with_target(debug)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_overrides_configured_level() {
        assert_eq!(
            default_directive("info", true),
            "warn,memex=debug,memex_core=debug"
        );
        assert_eq!(
            default_directive("error", false),
            "warn,memex=error,memex_core=error"
        );
    }
}

//! Tracing setup for the `dq` binary.
//!
//! Library code only emits events; installing a subscriber is left to
//! whichever process embeds the crate. Output goes to **stderr** so stdout
//! stays parseable when `--json` is used.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` (the `[logging]`
/// level from the config) applies. ANSI colours are used only when stderr
/// is a terminal. Calling this twice is harmless: the second call is ignored.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .try_init();
}

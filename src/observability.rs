//! Structured logging setup (ambient stack): `tracing-subscriber` with an
//! env filter, the same way the teacher wires up its own `tracing` stack in
//! `main.rs` (`EnvFilter::from_default_env()` plus one `fmt` layer), with a
//! JSON-formatted option using the `json` feature the teacher's own
//! `Cargo.toml` already declares for this dependency.

use tracing_subscriber::EnvFilter;

/// Initializes global tracing: one `fmt` layer filtered by `directive`
/// (e.g. `"tabrelay=info"`), falling back to `RUST_LOG` when set.
/// `json` selects newline-delimited-JSON output over the human-readable
/// default, for processes running under a log collector (§6.5).
///
/// # Panics
///
/// Panics if `directive` is not a valid `tracing` filter directive; this is
/// a startup-time configuration error, not a runtime condition.
pub fn init_tracing(directive: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Initializes a minimal stdout subscriber for test binaries and short-lived
/// admin commands, safe to call more than once within a process.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tabrelay=debug")))
        .with_test_writer()
        .try_init();
}

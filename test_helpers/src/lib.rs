#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

//! Helpers shared by the test suites of the workspace crates.

use std::sync::Once;

pub mod timeout;

static LOG_SETUP: Once = Once::new();

/// Installs a tracing subscriber writing to stderr, honoring `RUST_LOG` and
/// defaulting to `debug` when it is unset. Safe to call more than once.
pub fn start_logging() {
    LOG_SETUP.call_once(|| {
        if std::env::var("RUST_LOG").is_err() {
            std::env::set_var("RUST_LOG", "debug");
        }

        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    })
}

/// Enables logging only when `RUST_LOG` is set, so test output stays quiet by
/// default but `RUST_LOG=debug cargo test` shows everything.
pub fn maybe_start_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        start_logging()
    }
}

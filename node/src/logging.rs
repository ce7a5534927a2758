//! # Structured Logging
//!
//! Initializes the `tracing` subscriber with a pretty or JSON formatter and
//! `RUST_LOG`-style filtering. Output goes to stderr; stdout is reserved for
//! command output such as `init` and `version`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::LogFormatArg;

/// Filter directives applied when `RUST_LOG` is unset: `level` for our own
/// crates, `warn` for everything else.
pub fn default_directives(level: &str) -> String {
    format!("warn,trustmesh_node={level},trustmesh_protocol={level}")
}

/// Initialize the global tracing subscriber. Call once, early in `main()`.
///
/// `RUST_LOG` overrides `level` when set, e.g.
///
/// ```text
/// RUST_LOG=trustmesh_protocol::p2p=trace,trustmesh_protocol::consensus=debug
/// ```
pub fn init_logging(level: &str, format: LogFormatArg) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    match format {
        LogFormatArg::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_line_number(true),
                )
                .init();
        }
        LogFormatArg::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr).with_target(true))
                .init();
        }
    }

    tracing::debug!(?format, "logging initialized");
}

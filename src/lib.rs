//! Ingestion and serving edge of the eventmaster event store.
//!
//! Two front doors feed the same store:
//! - [`ingest`]: one-shot rsyslog-style TCP/TLS connections carrying
//!   `^0`-delimited records, decoded by topic through a [`parser::ParserRegistry`];
//! - [`http`]: the API router, where every route is timed and its response
//!   status counted in [`metrics::Metrics`].

pub mod config;
pub mod event;
pub mod http;
pub mod ingest;
pub mod metrics;
pub mod parser;
pub mod store;

/// Build-time version info.
pub mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash from the `GIT_COMMIT` build env, or "unknown".
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

//! Release metadata handed to tracer creation.

/// Current release version of the SeaORM instrumentation.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Semantic version string supplied to tracer creation.
pub fn sem_version() -> String {
    format!("semver:{VERSION}")
}

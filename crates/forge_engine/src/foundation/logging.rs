//! Logging setup on top of the `log` facade

pub use log::{debug, info, warn, error, trace};

/// Initialize the logging system
///
/// `default_filter` is used unless `RUST_LOG` is set. Calling this more than
/// once is harmless; later calls are ignored.
pub fn init(default_filter: &str) {
    let env = env_logger::Env::default().default_filter_or(default_filter);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}

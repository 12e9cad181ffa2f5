//! Tracing setup for the worker binary.

use ecoalert_core::config::load_dotenv;
use tracing_subscriber::EnvFilter;

/// Load `.env`, then install the fmt subscriber filtered by `RUST_LOG`
/// (default `info`), so a `RUST_LOG` set in `.env` takes effect.
pub fn init() {
    let filter = filter_after(load_dotenv);
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Run `load_env`, then read the log filter from the environment it left.
pub fn filter_after(load_env: impl FnOnce()) -> EnvFilter {
    load_env();
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

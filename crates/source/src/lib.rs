//! Data source access for the monitoring pipeline.
//!
//! This crate provides:
//! - `DataSource` trait for pluggable upstream providers
//! - `TtlCache` absorbing duplicate fetches inside a freshness window
//! - Sliding-window `RateLimiter`, one per upstream source
//! - `SourceAdapter` combining cache, limiter, timeout and retry
//! - OpenWeather HTTP source

pub mod adapter;
pub mod cache;
pub mod limiter;
pub mod openweather;
pub mod retry;
pub mod traits;

pub use adapter::{cache_key, SourceAdapter};
pub use cache::TtlCache;
pub use limiter::{Permit, RateLimiter, RateLimiterRegistry};
pub use openweather::OpenWeatherSource;
pub use retry::RetryPolicy;
pub use traits::{DataSource, FetchError, FetchErrorKind, Params};

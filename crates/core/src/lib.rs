pub mod alert;
pub mod config;
pub mod duration;
pub mod error;
pub mod snapshot;

pub use alert::*;
pub use config::MonitorConfig;
pub use duration::parse_duration;
pub use error::*;
pub use snapshot::*;

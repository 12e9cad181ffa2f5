//! Notification delivery for alerts and broadcasts.
//!
//! Supported sinks:
//! - **Webhook**: JSON payloads to any HTTP endpoint
//! - **Log**: structured `tracing` events
//!
//! The [`Dispatcher`] delivers each notification to every configured sink
//! and reports per-sink outcomes; one failing sink never blocks the others.

pub mod dispatcher;
pub mod log;
pub mod traits;
pub mod webhook;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use log::LogSink;
pub use traits::{DispatchResult, Notification, Sink, SinkError};
pub use webhook::WebhookSink;

/// Error types for the API client, aggregation and reporting
pub mod error;

/// Configuration management
pub mod config;

/// Replication stream records
pub mod streams;

/// Admin API client
pub mod api;

/// Two-stage stream aggregation
pub mod aggregator;

/// Error reporting facade and backends
pub mod notify;

/// Text rendering for the command line
pub mod render;

// Re-export commonly used types
pub use aggregator::{StageState, StreamAggregator, StreamsSnapshot};
pub use api::{StreamSource, VtadminClient};
pub use config::Config;
pub use error::{AggregationError, ConfigError, HttpError, NotifyError};
pub use notify::{ErrorReporter, NotificationBackend, SanitizedEnvironment};
pub use streams::{ReplicationStream, StreamState};

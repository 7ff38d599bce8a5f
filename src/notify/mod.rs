/// Error reporting facade and notification backends
pub mod bugsnag;
pub mod environment;
pub mod report;
pub mod reporter;

pub use bugsnag::BugsnagBackend;
pub use environment::{SanitizedEnvironment, ALLOWED_KEYS};
pub use report::{ErrorReport, Reportable};
pub use reporter::{ErrorReporter, NotificationBackend};

use crate::config::Config;
use crate::error::ConfigError;
use std::sync::Arc;

/// Build the reporter with every backend this build knows about
///
/// Backends without configuration are filtered out here, once.
pub fn reporter_from_config(config: Arc<Config>) -> Result<ErrorReporter, ConfigError> {
    let bugsnag: Arc<dyn NotificationBackend> = Arc::new(BugsnagBackend::new(config.clone())?);
    Ok(ErrorReporter::new(config, vec![("bugsnag", bugsnag)]))
}

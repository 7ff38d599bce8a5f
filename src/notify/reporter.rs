use crate::config::Config;
use crate::error::NotifyError;
use crate::notify::environment::SanitizedEnvironment;
use crate::notify::report::{ErrorReport, Reportable};
use log::{debug, warn};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Once};

/// Binding to a client-side monitoring service
///
/// Adding a service means implementing these three methods and registering the
/// implementation with [`ErrorReporter::new`]; the reporter never branches on which
/// backend it is talking to.
pub trait NotificationBackend: Send + Sync {
    /// Set up the monitoring client. Called once, as early as possible. Backends that can
    /// capture unhandled errors (panics) install that capture here.
    fn initialize(&self) -> Result<(), NotifyError>;

    /// Whether the backend is configured. Evaluated once, at registration.
    fn is_enabled(&self) -> bool;

    /// Deliver a handled error along with the sanitized environment and optional metadata
    fn notify<'a>(
        &'a self,
        error: &'a ErrorReport,
        env: &'a SanitizedEnvironment,
        metadata: Option<&'a Value>,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;
}

/// Process-wide facade delivering errors to every enabled backend
pub struct ErrorReporter {
    backends: Vec<(&'static str, Arc<dyn NotificationBackend>)>,
    config: Arc<Config>,
    init: Once,
}

impl ErrorReporter {
    /// Register backends in order, keeping only those reporting `is_enabled()`
    pub fn new(
        config: Arc<Config>,
        backends: Vec<(&'static str, Arc<dyn NotificationBackend>)>,
    ) -> Self {
        let backends = backends
            .into_iter()
            .filter(|(_, backend)| backend.is_enabled())
            .collect();

        Self {
            backends,
            config,
            init: Once::new(),
        }
    }

    /// A reporter with no backends; every call is a no-op
    pub fn disabled(config: Arc<Config>) -> Self {
        Self::new(config, Vec::new())
    }

    /// Names of the enabled backends, in registration order
    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|(name, _)| *name).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Initialize every enabled backend in registration order
    ///
    /// Only the first call has any effect. Backend failures are logged and skipped.
    pub fn initialize(&self) {
        self.init.call_once(|| {
            for (name, backend) in &self.backends {
                match backend.initialize() {
                    Ok(()) => debug!("Initialized error reporting backend {}", name),
                    Err(e) => warn!("Failed to initialize error reporting backend {}: {}", name, e),
                }
            }
        });
    }

    /// Notify every enabled backend of a handled error
    pub async fn notify(&self, error: &(dyn Reportable + Send + Sync), metadata: Option<Value>) {
        if self.backends.is_empty() {
            return;
        }
        self.notify_report(ErrorReport::from_reportable(error), metadata)
            .await;
    }

    /// Notify every enabled backend with a prepared report
    ///
    /// The sanitized environment is captured fresh for each call.
    pub async fn notify_report(&self, report: ErrorReport, metadata: Option<Value>) {
        if self.backends.is_empty() {
            return;
        }

        let env = SanitizedEnvironment::from_config(&self.config);
        for (name, backend) in &self.backends {
            if let Err(e) = backend.notify(&report, &env, metadata.as_ref()).await {
                warn!("Error reporting backend {} failed: {}", name, e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ENV_GIT_BRANCH;
    use crate::error::HttpError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub(crate) type Call = (String, ErrorReport, SanitizedEnvironment, Option<Value>);

    /// Backend that records every call into a shared journal
    pub(crate) struct RecordingBackend {
        name: &'static str,
        enabled: bool,
        fail_notify: bool,
        initialized: AtomicUsize,
        journal: Arc<Mutex<Vec<Call>>>,
    }

    impl RecordingBackend {
        pub(crate) fn new(
            name: &'static str,
            enabled: bool,
            journal: Arc<Mutex<Vec<Call>>>,
        ) -> Self {
            Self {
                name,
                enabled,
                fail_notify: false,
                initialized: AtomicUsize::new(0),
                journal,
            }
        }

        fn failing(mut self) -> Self {
            self.fail_notify = true;
            self
        }
    }

    impl NotificationBackend for RecordingBackend {
        fn initialize(&self) -> Result<(), NotifyError> {
            self.initialized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        fn notify<'a>(
            &'a self,
            error: &'a ErrorReport,
            env: &'a SanitizedEnvironment,
            metadata: Option<&'a Value>,
        ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>> {
            Box::pin(async move {
                self.journal.lock().unwrap().push((
                    self.name.to_string(),
                    error.clone(),
                    env.clone(),
                    metadata.cloned(),
                ));
                if self.fail_notify {
                    Err(NotifyError::Rejected {
                        status: 500,
                        body: "down".to_string(),
                    })
                } else {
                    Ok(())
                }
            })
        }
    }

    fn fetch_error() -> HttpError {
        HttpError::Fetch {
            endpoint: "http://localhost:14200/clusters".to_string(),
            reason: "connection refused".to_string(),
        }
    }

    #[tokio::test]
    async fn test_notify_reaches_only_enabled_backends_in_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::new(RecordingBackend::new("first", true, journal.clone()));
        let off = Arc::new(RecordingBackend::new("off", false, journal.clone()));
        let second = Arc::new(RecordingBackend::new("second", true, journal.clone()));

        let reporter = ErrorReporter::new(
            Arc::new(Config::default()),
            vec![
                ("first", first.clone() as Arc<dyn NotificationBackend>),
                ("off", off.clone() as Arc<dyn NotificationBackend>),
                ("second", second.clone() as Arc<dyn NotificationBackend>),
            ],
        );
        assert_eq!(reporter.backend_names(), vec!["first", "second"]);

        reporter.notify(&fetch_error(), None).await;

        let calls = journal.lock().unwrap();
        let names: Vec<&str> = calls.iter().map(|c| c.0.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(calls[0].1.error_class, "HttpFetchError");
    }

    #[tokio::test]
    async fn test_initialize_runs_once_per_enabled_backend() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let on = Arc::new(RecordingBackend::new("on", true, journal.clone()));
        let off = Arc::new(RecordingBackend::new("off", false, journal));

        let reporter = ErrorReporter::new(
            Arc::new(Config::default()),
            vec![
                ("on", on.clone() as Arc<dyn NotificationBackend>),
                ("off", off.clone() as Arc<dyn NotificationBackend>),
            ],
        );
        reporter.initialize();
        reporter.initialize();

        assert_eq!(on.initialized.load(Ordering::SeqCst), 1);
        assert_eq!(off.initialized.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_backends_is_a_noop() {
        let reporter = ErrorReporter::disabled(Arc::new(Config::default()));
        assert!(reporter.is_empty());
        reporter.initialize();
        reporter.notify(&fetch_error(), Some(json!({"k": "v"}))).await;
    }

    #[tokio::test]
    async fn test_metadata_and_env_forwarded() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(RecordingBackend::new("rec", true, journal.clone()));

        let mut config = Config::default();
        config.build.git_branch = Some("main".to_string());
        config.bugsnag.api_key = Some("secret".to_string());

        let reporter = ErrorReporter::new(
            Arc::new(config),
            vec![("rec", backend as Arc<dyn NotificationBackend>)],
        );
        reporter
            .notify(&fetch_error(), Some(json!({"view": "workflows"})))
            .await;

        let calls = journal.lock().unwrap();
        let (_, report, env, metadata) = &calls[0];
        assert_eq!(env.get(ENV_GIT_BRANCH), Some("main"));
        assert_eq!(metadata.as_ref().unwrap()["view"], json!("workflows"));
        assert_eq!(report.properties["reason"], json!("connection refused"));
        assert!(!serde_json::to_string(env).unwrap().contains("secret"));
    }

    #[tokio::test]
    async fn test_failing_backend_does_not_stop_delivery() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let broken = Arc::new(RecordingBackend::new("broken", true, journal.clone()).failing());
        let healthy = Arc::new(RecordingBackend::new("healthy", true, journal.clone()));

        let reporter = ErrorReporter::new(
            Arc::new(Config::default()),
            vec![
                ("broken", broken as Arc<dyn NotificationBackend>),
                ("healthy", healthy as Arc<dyn NotificationBackend>),
            ],
        );
        reporter.notify(&fetch_error(), None).await;

        assert_eq!(journal.lock().unwrap().len(), 2);
    }
}

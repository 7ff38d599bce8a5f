//! Bugsnag notification backend
//!
//! Delivers handled errors through the Bugsnag error reporting API and, once
//! initialized, reports panics as unhandled errors.

use crate::config::Config;
use crate::error::{ConfigError, NotifyError};
use crate::notify::environment::SanitizedEnvironment;
use crate::notify::report::ErrorReport;
use crate::notify::reporter::NotificationBackend;
use chrono::Utc;
use log::{debug, warn};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

const PAYLOAD_VERSION: &str = "5";

/// Bugsnag backend, enabled when an API key is configured
#[derive(Clone)]
pub struct BugsnagBackend {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
    release_stage: String,
    config: Arc<Config>,
}

/// Top-level body of a notify request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BugsnagPayload {
    api_key: String,
    payload_version: &'static str,
    notifier: BugsnagNotifier,
    events: Vec<BugsnagEvent>,
}

#[derive(Debug, Serialize)]
struct BugsnagNotifier {
    name: &'static str,
    version: &'static str,
    url: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BugsnagEvent {
    exceptions: Vec<BugsnagException>,
    unhandled: bool,
    severity: &'static str,
    severity_reason: SeverityReason,
    app: BugsnagApp,
    meta_data: Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BugsnagException {
    error_class: String,
    message: String,
    stacktrace: Vec<StackFrame>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StackFrame {
    file: String,
    line_number: u32,
    column_number: u32,
    method: String,
}

#[derive(Debug, Serialize)]
struct SeverityReason {
    #[serde(rename = "type")]
    reason_type: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BugsnagApp {
    release_stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

impl BugsnagBackend {
    /// Create a backend from the `[bugsnag]` section of the configuration
    pub fn new(config: Arc<Config>) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key: config
                .bugsnag
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            endpoint: config.bugsnag.endpoint.clone(),
            release_stage: config.bugsnag.release_stage.clone(),
            config,
        })
    }

    fn api_url(&self) -> String {
        format!("{}/", self.endpoint.trim_end_matches('/'))
    }

    /// Build the request body for one report
    ///
    /// Each harvested property of the error becomes its own metadata tab, next to the
    /// sanitized environment (`env`) and the caller's metadata (`metadata`).
    fn build_payload(
        &self,
        api_key: &str,
        error: &ErrorReport,
        env: &SanitizedEnvironment,
        metadata: Option<&Value>,
        frames: Vec<StackFrame>,
    ) -> BugsnagPayload {
        let mut meta_data = Map::new();
        meta_data.insert(
            "env".to_string(),
            serde_json::to_value(env).unwrap_or(Value::Null),
        );
        for (name, value) in &error.properties {
            meta_data.insert(name.clone(), as_tab(value));
        }
        if let Some(metadata) = metadata {
            meta_data.insert("metadata".to_string(), as_tab(metadata));
        }

        let (severity, reason) = if error.unhandled {
            ("error", "unhandledException")
        } else {
            ("warning", "handledException")
        };

        BugsnagPayload {
            api_key: api_key.to_string(),
            payload_version: PAYLOAD_VERSION,
            notifier: BugsnagNotifier {
                name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
                url: "https://github.com/vitessio/vitess",
            },
            events: vec![BugsnagEvent {
                exceptions: vec![BugsnagException {
                    error_class: error.error_class.clone(),
                    message: error.message.clone(),
                    stacktrace: frames,
                }],
                unhandled: error.unhandled,
                severity,
                severity_reason: SeverityReason {
                    reason_type: reason,
                },
                app: BugsnagApp {
                    release_stage: self.release_stage.clone(),
                    version: self.config.build.git_commit.clone(),
                },
                meta_data,
            }],
        }
    }

    async fn send(
        &self,
        error: &ErrorReport,
        env: &SanitizedEnvironment,
        metadata: Option<&Value>,
        frames: Vec<StackFrame>,
    ) -> Result<(), NotifyError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(());
        };
        let payload = self.build_payload(api_key, error, env, metadata, frames);

        let response = self
            .client
            .post(self.api_url())
            .header("Bugsnag-Api-Key", api_key)
            .header("Bugsnag-Payload-Version", PAYLOAD_VERSION)
            .header("Bugsnag-Sent-At", Utc::now().to_rfc3339())
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotifyError::Rejected { status, body });
        }

        debug!("Delivered {} to Bugsnag", error.error_class);
        Ok(())
    }

    /// Send `report` from a dedicated thread with its own runtime and wait for the outcome
    ///
    /// Usable from any context, including inside a Tokio runtime that is shutting down.
    fn deliver_blocking(
        &self,
        report: ErrorReport,
        frames: Vec<StackFrame>,
    ) -> Result<(), NotifyError> {
        let backend = self.clone();
        let delivery = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| NotifyError::Initialization(e.to_string()))?;
            let env = SanitizedEnvironment::from_config(&backend.config);
            runtime.block_on(backend.send(&report, &env, None, frames))
        });

        delivery.join().unwrap_or_else(|_| {
            Err(NotifyError::Initialization(
                "panic report delivery thread panicked".to_string(),
            ))
        })
    }
}

/// Bugsnag metadata tabs must be objects
fn as_tab(value: &Value) -> Value {
    match value {
        Value::Object(_) => value.clone(),
        other => json!({ "value": other }),
    }
}

impl NotificationBackend for BugsnagBackend {
    /// Chain a panic hook that reports panics as unhandled errors
    ///
    /// The hook blocks the panicking thread until delivery finishes or the request times
    /// out, so the report is sent even when the panic tears down the runtime.
    fn initialize(&self) -> Result<(), NotifyError> {
        if self.api_key.is_none() {
            return Err(NotifyError::Initialization(
                "no Bugsnag API key configured".to_string(),
            ));
        }

        let backend = self.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let message = info
                .payload()
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            let frames = info
                .location()
                .map(|loc| {
                    vec![StackFrame {
                        file: loc.file().to_string(),
                        line_number: loc.line(),
                        column_number: loc.column(),
                        method: "panic".to_string(),
                    }]
                })
                .unwrap_or_default();

            let report = ErrorReport::new("Panic", message, Map::new()).unhandled();
            if let Err(e) = backend.deliver_blocking(report, frames) {
                warn!("Failed to report panic to Bugsnag: {}", e);
            }

            previous(info);
        }));

        debug!("Bugsnag panic reporting installed");
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    fn notify<'a>(
        &'a self,
        error: &'a ErrorReport,
        env: &'a SanitizedEnvironment,
        metadata: Option<&'a Value>,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>> {
        Box::pin(self.send(error, env, metadata, Vec::new()))
    }
}

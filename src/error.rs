use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body carried by a `{ok: false}` response envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

/// Code and message reported by the API for a failed request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorEnvelope {
    /// Render as "<code> <message>", using "undefined" for missing parts
    pub fn describe(&self) -> String {
        let detail = self.error.clone().unwrap_or_default();
        format!(
            "{} {}",
            detail.code.as_deref().unwrap_or("undefined"),
            detail.message.as_deref().unwrap_or("undefined")
        )
    }
}

/// Errors that can occur when talking to the admin API
#[derive(Error, Debug, Clone)]
pub enum HttpError {
    /// The JSON response envelope is an unexpected shape
    #[error("{message}")]
    MalformedResponse {
        message: String,
        endpoint: String,
        response_json: serde_json::Value,
    },

    /// The envelope reported `ok: false`
    #[error("[status {status}] {endpoint}: {}", .response.describe())]
    ResponseNotOk {
        endpoint: String,
        status: u16,
        response: ErrorEnvelope,
    },

    /// The request never produced a response (connection refused, DNS, TLS, timeout)
    #[error("{endpoint}")]
    Fetch { endpoint: String, reason: String },

    /// The envelope was fine but an entity did not match its typed shape
    #[error("invalid {entity} from {endpoint}: {reason}")]
    Decode {
        endpoint: String,
        entity: &'static str,
        reason: String,
    },
}

impl HttpError {
    /// Endpoint the failed request was issued against
    pub fn endpoint(&self) -> &str {
        match self {
            HttpError::MalformedResponse { endpoint, .. }
            | HttpError::ResponseNotOk { endpoint, .. }
            | HttpError::Fetch { endpoint, .. }
            | HttpError::Decode { endpoint, .. } => endpoint,
        }
    }
}

/// Errors that can occur during one aggregation cycle
#[derive(Error, Debug, Clone)]
pub enum AggregationError {
    #[error("failed to fetch clusters: {0}")]
    Clusters(#[source] HttpError),

    #[error("failed to fetch streams for cluster {cluster}: {source}")]
    ClusterStreams {
        cluster: String,
        #[source]
        source: HttpError,
    },

    #[error("duplicate stream key {key}")]
    DuplicateStream { key: String },
}

/// Errors that can occur when delivering to a monitoring backend
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Backend initialization failed: {0}")]
    Initialization(String),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ok_display_includes_status_code_and_message() {
        let err = HttpError::ResponseNotOk {
            endpoint: "/clusters".to_string(),
            status: 500,
            response: ErrorEnvelope {
                error: Some(ErrorDetail {
                    code: Some("unknown".to_string()),
                    message: Some("topo unavailable".to_string()),
                }),
            },
        };

        assert_eq!(
            err.to_string(),
            "[status 500] /clusters: unknown topo unavailable"
        );
    }

    #[test]
    fn test_not_ok_display_without_error_body() {
        let err = HttpError::ResponseNotOk {
            endpoint: "/vrep/streams?cluster=c1".to_string(),
            status: 404,
            response: ErrorEnvelope::default(),
        };

        assert_eq!(
            err.to_string(),
            "[status 404] /vrep/streams?cluster=c1: undefined undefined"
        );
    }

    #[test]
    fn test_cluster_streams_error_names_cluster() {
        let err = AggregationError::ClusterStreams {
            cluster: "east".to_string(),
            source: HttpError::Fetch {
                endpoint: "http://api/vrep/streams?cluster=east".to_string(),
                reason: "connection refused".to_string(),
            },
        };

        assert!(err.to_string().contains("cluster east"));
        assert_eq!(
            HttpError::Fetch {
                endpoint: "e".to_string(),
                reason: "r".to_string()
            }
            .endpoint(),
            "e"
        );
    }
}

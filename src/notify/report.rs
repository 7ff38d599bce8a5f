use crate::error::{AggregationError, HttpError};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Property names never harvested into report metadata; backends capture them natively
const NATIVE_PROPERTIES: [&str; 2] = ["stack", "message"];

/// An error that can describe itself to a monitoring backend
pub trait Reportable: std::error::Error {
    /// Class name shown by the monitoring service
    fn error_class(&self) -> &'static str;

    /// Context carried by the error (endpoint, raw payload, status...)
    fn properties(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// A handled error, flattened for delivery to notification backends
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub error_class: String,
    pub message: String,
    /// Harvested properties of the error, one metadata tab each
    pub properties: Map<String, Value>,
    /// True when the error escaped without being handled (panics)
    pub unhandled: bool,
}

impl ErrorReport {
    pub fn new(
        error_class: impl Into<String>,
        message: impl Into<String>,
        mut properties: Map<String, Value>,
    ) -> Self {
        for name in NATIVE_PROPERTIES {
            properties.remove(name);
        }
        Self {
            error_class: error_class.into(),
            message: message.into(),
            properties,
            unhandled: false,
        }
    }

    pub fn from_reportable(error: &(impl Reportable + ?Sized)) -> Self {
        let mut properties = error.properties();
        properties.insert("name".to_string(), json!(error.error_class()));
        Self::new(error.error_class(), error.to_string(), properties)
    }

    pub fn unhandled(mut self) -> Self {
        self.unhandled = true;
        self
    }
}

impl Reportable for HttpError {
    fn error_class(&self) -> &'static str {
        match self {
            HttpError::MalformedResponse { .. } => "MalformedHttpResponseError",
            HttpError::ResponseNotOk { .. } => "HttpResponseNotOkError",
            HttpError::Fetch { .. } => "HttpFetchError",
            HttpError::Decode { .. } => "HttpDecodeError",
        }
    }

    fn properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("endpoint".to_string(), json!(self.endpoint()));
        match self {
            HttpError::MalformedResponse { response_json, .. } => {
                props.insert("responseJson".to_string(), response_json.clone());
            }
            HttpError::ResponseNotOk {
                status, response, ..
            } => {
                props.insert("status".to_string(), json!(status));
                props.insert("response".to_string(), json!(response));
            }
            HttpError::Fetch { reason, .. } => {
                props.insert("reason".to_string(), json!(reason));
            }
            HttpError::Decode { entity, reason, .. } => {
                props.insert("entity".to_string(), json!(entity));
                props.insert("reason".to_string(), json!(reason));
            }
        }
        props
    }
}

impl Reportable for AggregationError {
    fn error_class(&self) -> &'static str {
        match self {
            AggregationError::Clusters(source) => source.error_class(),
            AggregationError::ClusterStreams { source, .. } => source.error_class(),
            AggregationError::DuplicateStream { .. } => "DuplicateStreamError",
        }
    }

    fn properties(&self) -> Map<String, Value> {
        match self {
            AggregationError::Clusters(source) => source.properties(),
            AggregationError::ClusterStreams { cluster, source } => {
                let mut props = source.properties();
                props.insert("cluster".to_string(), json!(cluster));
                props
            }
            AggregationError::DuplicateStream { key } => {
                let mut props = Map::new();
                props.insert("key".to_string(), json!(key));
                props
            }
        }
    }
}

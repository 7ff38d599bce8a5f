use crate::api::envelope::{extract_clusters, extract_streams, parse_body, unwrap_envelope};
use crate::config::{Config, FetchCredentials};
use crate::error::{ConfigError, HttpError};
use crate::notify::ErrorReporter;
use crate::streams::{ClusterId, ReplicationStream};
use log::{debug, warn};
use reqwest::{Client, Url};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Source of cluster and replication stream data
pub trait StreamSource: Send + Sync {
    /// List the identifiers of every managed cluster
    fn fetch_clusters<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ClusterId>, HttpError>> + Send + 'a>>;

    /// List the replication streams of one cluster, in backend order
    fn fetch_streams<'a>(
        &'a self,
        cluster: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ReplicationStream>, HttpError>> + Send + 'a>>;

    /// Fetch one stream's detail as an untyped document
    fn fetch_stream<'a>(
        &'a self,
        cluster: &'a str,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Value, HttpError>> + Send + 'a>>;
}

/// HTTP client for the cluster administration API
///
/// Every failed call is reported to the attached [`ErrorReporter`] and then returned
/// unchanged; nothing is retried here.
pub struct VtadminClient {
    client: Client,
    address: String,
    credentials: FetchCredentials,
    token: Option<String>,
    reporter: Option<Arc<ErrorReporter>>,
}

impl VtadminClient {
    /// Create a client for the `[api]` section of the configuration
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            address: config.api.address.trim_end_matches('/').to_string(),
            credentials: config
                .api
                .fetch_credentials
                .unwrap_or(FetchCredentials::SameOrigin),
            token: config.api.token.clone(),
            reporter: None,
        })
    }

    /// Report failed calls to `reporter`
    pub fn with_reporter(mut self, reporter: Arc<ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.address, endpoint)
    }

    /// Whether the bearer token goes out with a request to `url`
    fn attach_token(&self, url: &str) -> bool {
        match self.credentials {
            FetchCredentials::Omit => false,
            FetchCredentials::Include => true,
            FetchCredentials::SameOrigin => match (Url::parse(url), Url::parse(&self.address)) {
                (Ok(target), Ok(api)) => target.origin() == api.origin(),
                _ => false,
            },
        }
    }

    /// Issue a GET against `endpoint` and return the validated envelope's `result`
    async fn vtfetch(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Value, HttpError> {
        match self.fetch_envelope(endpoint, query).await {
            Ok(result) => Ok(result),
            Err(e) => Err(self.report(e).await),
        }
    }

    async fn fetch_envelope(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, HttpError> {
        let url = self.url(endpoint);
        let label = endpoint_label(endpoint, query);
        debug!("GET {}", label);

        let mut request = self.client.get(&url).query(query);
        if let Some(token) = self.token.as_deref() {
            if self.attach_token(&url) {
                request = request.bearer_auth(token);
            }
        }

        let response = request.send().await.map_err(|e| HttpError::Fetch {
            endpoint: label.clone(),
            reason: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| HttpError::Fetch {
            endpoint: label.clone(),
            reason: e.to_string(),
        })?;

        let json = parse_body(&label, &body)?;
        unwrap_envelope(&label, status, json)
    }

    /// Notify the reporter of `error` and hand it back
    async fn report<E>(&self, error: E) -> E
    where
        E: crate::notify::Reportable + Send + Sync + 'static,
    {
        warn!("Request failed: {}", error);
        if let Some(reporter) = &self.reporter {
            reporter.notify(&error, None).await;
        }
        error
    }
}

fn endpoint_label(endpoint: &str, query: &[(&str, &str)]) -> String {
    if query.is_empty() {
        return endpoint.to_string();
    }
    let pairs: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}?{}", endpoint, pairs.join("&"))
}

impl StreamSource for VtadminClient {
    fn fetch_clusters<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ClusterId>, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            let result = self.vtfetch("/clusters", &[]).await?;
            match extract_clusters("/clusters", result) {
                Ok(clusters) => Ok(clusters),
                Err(e) => Err(self.report(e).await),
            }
        })
    }

    fn fetch_streams<'a>(
        &'a self,
        cluster: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ReplicationStream>, HttpError>> + Send + 'a>>
    {
        Box::pin(async move {
            let query = [("cluster", cluster)];
            let result = self.vtfetch("/vrep/streams", &query).await?;
            match extract_streams(&endpoint_label("/vrep/streams", &query), cluster, result) {
                Ok(streams) => Ok(streams),
                Err(e) => Err(self.report(e).await),
            }
        })
    }

    fn fetch_stream<'a>(
        &'a self,
        cluster: &'a str,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Value, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            self.vtfetch("/vrep/stream", &[("cluster", cluster), ("id", id)])
                .await
        })
    }
}

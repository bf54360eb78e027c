//! Single-request execution with metrics recording.

use reqwest::Method;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;
use uuid::Uuid;

use super::ClientConfiguration;
use crate::domain::HttpRequestSpec;
use crate::error::ExecutionError;
use crate::metrics::IterationMetrics;
use crate::template::PlaceholderResolver;

/// A request with every placeholder expanded, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl ResolvedRequest {
    /// Expands `spec` through `resolver`.
    pub fn resolve(
        iteration: &str,
        spec: &HttpRequestSpec,
        resolver: &dyn PlaceholderResolver,
    ) -> Result<Self, ExecutionError> {
        let build_err = |message: String| ExecutionError::RequestBuild {
            iteration: iteration.to_string(),
            message,
        };

        let method = Method::from_bytes(spec.method.as_bytes())
            .map_err(|e| build_err(format!("invalid method '{}': {e}", spec.method)))?;
        let url = resolver
            .resolve(&spec.url)
            .map_err(|e| build_err(format!("url: {e}")))?;
        url::Url::parse(&url).map_err(|e| build_err(format!("invalid URL '{url}': {e}")))?;

        let mut headers = Vec::with_capacity(spec.headers.len());
        for (name, value) in &spec.headers {
            let value = resolver
                .resolve(value)
                .map_err(|e| build_err(format!("header '{name}': {e}")))?;
            headers.push((name.clone(), value));
        }

        let body = spec
            .body
            .as_deref()
            .map(|b| resolver.resolve(b))
            .transpose()
            .map_err(|e| build_err(format!("body: {e}")))?;

        Ok(Self {
            method,
            url,
            headers,
            body,
        })
    }

    /// Approximate HTTP/1.1 wire size of the request.
    pub fn wire_size(&self) -> u64 {
        // "METHOD URL HTTP/1.1\r\n"
        let request_line = self.method.as_str().len() + 1 + self.url.len() + 11;
        let headers: usize = self
            .headers
            .iter()
            .map(|(k, v)| k.len() + 2 + v.len() + 2)
            .sum();
        let body = self.body.as_ref().map_or(0, String::len);
        (request_line + headers + 2 + body) as u64
    }
}

/// What came back from one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOutcome {
    pub status: u16,
    pub elapsed: Duration,
    pub bytes_received: u64,
}

/// One pooled client handle.
#[derive(Debug, Clone)]
pub struct HttpClient {
    id: Uuid,
    config: ClientConfiguration,
    inner: reqwest::Client,
}

impl HttpClient {
    pub(crate) fn build(config: &ClientConfiguration) -> Result<Self, ExecutionError> {
        let inner = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .pool_idle_timeout(config.pool_idle_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| ExecutionError::ClientBuild {
                message: e.to_string(),
            })?;
        Ok(Self {
            id: Uuid::new_v4(),
            config: config.clone(),
            inner,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ClientConfiguration {
        &self.config
    }

    /// Sends `request` and records it into `metrics`.
    ///
    /// Recording order: connection opened, request sent, then on a response
    /// the duration, `(code, reason)`, bytes sent and received, and finally
    /// the connection closed as successful. A transport failure records no
    /// response code and closes the connection as failed.
    pub async fn send(
        &self,
        request: &ResolvedRequest,
        metrics: &IterationMetrics,
    ) -> Result<RequestOutcome, reqwest::Error> {
        metrics.increase_connections();
        let started = Instant::now();

        let mut builder = self.inner.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let result = async {
            let response = builder.send().await?;
            let status = response.status();
            // "HTTP/1.1 200 OK\r\n" plus header lines and the blank line
            let head: usize = 9
                + 4
                + status.canonical_reason().map_or(0, str::len)
                + 2
                + response
                    .headers()
                    .iter()
                    .map(|(k, v)| k.as_str().len() + 2 + v.len() + 2)
                    .sum::<usize>()
                + 2;
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, (head + body.len()) as u64))
        }
        .await;

        match result {
            Ok((status, bytes_received)) => {
                let elapsed = started.elapsed();
                metrics.update_duration(elapsed.as_secs_f64() * 1000.0);
                metrics.update_response_code(
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown"),
                );
                metrics.update_data_sent(request.wire_size());
                metrics.update_data_received(bytes_received);
                metrics.decrease_connections(true);
                trace!(client_id = %self.id, status = status.as_u16(), ?elapsed, "request completed");
                Ok(RequestOutcome {
                    status: status.as_u16(),
                    elapsed,
                    bytes_received,
                })
            }
            Err(err) => {
                metrics.decrease_connections(false);
                trace!(client_id = %self.id, error = %err, "request failed");
                Err(err)
            }
        }
    }

    /// [`send`](Self::send), abandoned as soon as `cancel` fires.
    ///
    /// Returns `None` when cancelled. An abandoned request closes its
    /// connection as failed and records nothing else.
    pub async fn send_cancellable(
        &self,
        request: &ResolvedRequest,
        metrics: &IterationMetrics,
        cancel: &CancellationToken,
    ) -> Option<Result<RequestOutcome, reqwest::Error>> {
        if cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            result = self.send(request, metrics) => Some(result),
            _ = cancel.cancelled() => {
                metrics.decrease_connections(false);
                trace!(client_id = %self.id, "request abandoned");
                None
            }
        }
    }
}

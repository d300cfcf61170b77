//! SPARQL protocol request execution.
//!
//! One [`QueryRequest`] becomes exactly one HTTP request:
//! - [`query_form`] - query classification and GET/POST selection
//! - [`classify`] - mapping transport failures and error responses to [`QueryError`]
//!
//! Nothing here retries. A failed request is reported once and the caller
//! decides whether to run it again.

pub mod classify;
pub mod query_form;


use crate::config::TransportConfig;
use crate::error::{QueryError, Result};
use crate::types::{Outcome, QueryRequest};
use classify::ErrorClassifier;
use query_form::{QueryForm, RequestPlan, plan_request};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// A received 2xx response with its body fully read
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response `Content-Type`, or the requested MIME type when the server sent none
    pub content_type: String,
    /// Verbatim response body
    pub body: String,
    /// Form of the query that produced this response
    pub form: QueryForm,
    /// Request sent until headers received
    pub network_time: Duration,
    /// Headers received until body fully read
    pub download_time: Duration,
}

/// Executes SPARQL protocol requests (cloneable - all fields are Arc-wrapped)
#[derive(Clone, Debug)]
pub struct TransportExecutor {
    client: reqwest::Client,
    config: Arc<TransportConfig>,
    classifier: Arc<ErrorClassifier>,
}

impl TransportExecutor {
    /// Create an executor with its own HTTP client
    ///
    /// # Errors
    ///
    /// Returns [`Error::Client`](crate::Error::Client) if the HTTP client cannot be built.
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        Ok(Self::with_client(builder.build()?, config))
    }

    /// Create an executor around an existing HTTP client
    pub fn with_client(client: reqwest::Client, config: &TransportConfig) -> Self {
        Self {
            client,
            config: Arc::new(config.clone()),
            classifier: Arc::new(ErrorClassifier::new(config)),
        }
    }

    /// Default deadline applied when a request carries none
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Decide how `request` will be sent without sending it
    ///
    /// # Errors
    ///
    /// Returns a `network` error if the endpoint URL cannot be parsed.
    pub fn plan(&self, request: &QueryRequest) -> std::result::Result<RequestPlan, QueryError> {
        let endpoint = Url::parse(request.endpoint_url()).map_err(|e| {
            QueryError::network(format!("invalid endpoint URL '{}'", request.endpoint_url()))
                .with_cause(&e)
        })?;
        Ok(plan_request(
            &endpoint,
            request.query_text(),
            request.desired_format(),
            self.config.max_get_url_length,
        ))
    }

    /// Execute `request` once
    ///
    /// The request's own timeout applies, falling back to the configured default.
    ///
    /// # Returns
    ///
    /// - `Ok(Outcome::Completed(response))` for a 2xx response
    /// - `Ok(Outcome::Cancelled)` if the request's token was cancelled
    ///
    /// # Errors
    ///
    /// - `timeout` if the deadline expired
    /// - `cors` or `network` if no response was received
    /// - `protocol-violation` or `http` for non-2xx responses
    pub async fn execute(
        &self,
        request: &QueryRequest,
    ) -> std::result::Result<Outcome<HttpResponse>, QueryError> {
        let timeout = request.timeout().unwrap_or_else(|| self.default_timeout());
        self.execute_until(request, Instant::now() + timeout, timeout)
            .await
    }

    /// Execute `request`, aborting at `deadline`
    ///
    /// `timeout` is only used to describe the deadline in the error message.
    pub(crate) async fn execute_until(
        &self,
        request: &QueryRequest,
        deadline: Instant,
        timeout: Duration,
    ) -> std::result::Result<Outcome<HttpResponse>, QueryError> {
        let plan = self.plan(request)?;
        let token = request.cancellation_token();

        tracing::debug!(
            endpoint = request.endpoint_url(),
            method = %plan.method,
            form = ?plan.form,
            accept = plan.accept,
            "sending query"
        );

        // Dropping the send future aborts the in-flight request
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(endpoint = request.endpoint_url(), "query cancelled during transport");
                Ok(Outcome::Cancelled)
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(endpoint = request.endpoint_url(), ?timeout, "query deadline expired during transport");
                Err(QueryError::timeout(timeout))
            }
            result = self.send(request, plan) => result.map(Outcome::Completed),
        }
    }

    async fn send(
        &self,
        request: &QueryRequest,
        plan: RequestPlan,
    ) -> std::result::Result<HttpResponse, QueryError> {
        let endpoint = request.endpoint_url();
        let RequestPlan {
            form,
            method,
            url,
            content_type,
            body,
            accept,
        } = plan;

        let mut builder = self.client.request(method, url).header(ACCEPT, accept);
        if let (Some(content_type), Some(body)) = (content_type, body) {
            builder = builder.header(CONTENT_TYPE, content_type).body(body);
        }

        let started = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| self.classifier.classify_send_error(&e, endpoint))?;
        let network_time = started.elapsed();

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| request.desired_format().mime_type().to_string());

        let body_started = Instant::now();
        let body = response.text().await.map_err(|e| {
            QueryError::network(format!(
                "connection to {endpoint} was lost while receiving the response"
            ))
            .with_status(status.as_u16())
            .with_cause(&e)
        })?;
        let download_time = body_started.elapsed();

        if !status.is_success() {
            let error = self
                .classifier
                .classify_error_response(status.as_u16(), &body);
            tracing::warn!(
                endpoint,
                status = status.as_u16(),
                kind = %error.kind,
                "endpoint rejected query"
            );
            return Err(error);
        }

        tracing::debug!(
            endpoint,
            status = status.as_u16(),
            bytes = body.len(),
            content_type = %content_type,
            ?network_time,
            ?download_time,
            "received response"
        );

        Ok(HttpResponse {
            status: status.as_u16(),
            content_type,
            body,
            form,
            network_time,
            download_time,
        })
    }
}

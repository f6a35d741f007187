//! Submission boundary and the HTTP collector client.
//!
//! [`Submitter::submit`] must not block: the HTTP client spawns the request on
//! the tokio runtime and reports the [`SubmissionOutcome`] on a channel that
//! the monitor's event loop drains.

use super::submission::SubmissionPayload;
use log::debug;
#[cfg(feature = "http")]
use super::submission::SubmissionOutcome;
#[cfg(feature = "http")]
use crate::config::CollectorConfig;
#[cfg(feature = "http")]
use anyhow::{anyhow, Result};
#[cfg(feature = "http")]
use std::time::Duration;
#[cfg(feature = "http")]
use tokio::sync::mpsc;
#[cfg(feature = "http")]
use tokio::time::{timeout_at, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRequest {
    pub url: String,
    pub method: Method,
    pub payload: SubmissionPayload,
}

pub trait Submitter {
    fn submit(&mut self, request: SubmissionRequest);
}

/// Recording submitter used in tests and dry runs.
impl Submitter for Vec<SubmissionRequest> {
    fn submit(&mut self, request: SubmissionRequest) {
        debug!("Recorded submission to {}", request.url);
        self.push(request);
    }
}

/// Posts payloads as JSON with reqwest.
#[cfg(feature = "http")]
pub struct HttpCollector {
    client: reqwest::Client,
    timeout: Duration,
    outcomes: mpsc::UnboundedSender<SubmissionOutcome>,
}

#[cfg(feature = "http")]
impl HttpCollector {
    pub fn new(config: &CollectorConfig, outcomes: mpsc::UnboundedSender<SubmissionOutcome>) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(config.timeout_seconds as u64),
            outcomes,
        }
    }

    /// Perform one exchange and map it to an outcome. Never fails; every
    /// error becomes a `TransportError`.
    pub async fn post(
        client: &reqwest::Client,
        request_timeout: Duration,
        request: &SubmissionRequest,
    ) -> SubmissionOutcome {
        match Self::exchange(client, request_timeout, request).await {
            Ok(outcome) => outcome,
            Err(e) => SubmissionOutcome::TransportError {
                status: e
                    .downcast_ref::<reqwest::Error>()
                    .and_then(|re| re.status())
                    .map(|s| s.as_u16()),
                error: e.to_string(),
            },
        }
    }

    /// The timeout bounds the whole exchange, body included. A body that
    /// stalls after the headers is a transport failure with that status.
    async fn exchange(
        client: &reqwest::Client,
        request_timeout: Duration,
        request: &SubmissionRequest,
    ) -> Result<SubmissionOutcome> {
        let deadline = Instant::now() + request_timeout;
        let builder = match request.method {
            Method::Post => client.post(&request.url),
        };
        let response = timeout_at(deadline, builder.json(&request.payload).send())
            .await
            .map_err(|_| anyhow!("Request timeout after {:?}", request_timeout))??;
        let status = response.status().as_u16();
        match timeout_at(deadline, response.text()).await {
            Ok(Ok(body)) => Ok(SubmissionOutcome::Response { status, body }),
            Ok(Err(e)) => Ok(SubmissionOutcome::TransportError {
                status: Some(status),
                error: format!("failed to read response body: {}", e),
            }),
            Err(_) => Ok(SubmissionOutcome::TransportError {
                status: Some(status),
                error: format!("Response body timeout after {:?}", request_timeout),
            }),
        }
    }
}

#[cfg(feature = "http")]
impl Submitter for HttpCollector {
    fn submit(&mut self, request: SubmissionRequest) {
        let client = self.client.clone();
        let outcomes = self.outcomes.clone();
        let request_timeout = self.timeout;
        debug!("POST {}", request.url);
        tokio::spawn(async move {
            let outcome = HttpCollector::post(&client, request_timeout, &request).await;
            if outcomes.send(outcome).is_err() {
                debug!("Submission outcome dropped, monitor gone");
            }
        });
    }
}

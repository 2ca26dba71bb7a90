//! Transport interface and the ureq-backed HTTP transport.

use crate::error::{Result, SoapError};
use crate::transcript::TrafficSink;
use std::time::Duration;
use tracing::debug;
use ureq::config::AutoHeaderValue;
use ureq::Agent;

/// An outgoing HTTP POST.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received HTTP response. Error statuses are ordinary responses.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Synchronous request/response transport.
///
/// Implementations must write every part of the exchange they complete into
/// `sink`, in order: outgoing headers, outgoing body, incoming headers,
/// incoming body.
pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest, sink: &mut dyn TrafficSink) -> Result<HttpResponse>;
}

/// Write the outgoing half of an exchange into `sink`.
pub fn record_request(request: &HttpRequest, sink: &mut dyn TrafficSink) {
    let (host, path) = split_url(&request.url);
    let mut headers = format!("POST {} HTTP/1.1\nHost: {}", path, host);
    for (name, value) in &request.headers {
        headers.push('\n');
        headers.push_str(name);
        headers.push_str(": ");
        headers.push_str(value);
    }
    sink.outgoing_headers(&headers);
    sink.outgoing_body(&request.body);
}

/// Write the incoming half of an exchange into `sink`.
pub fn record_response(response: &HttpResponse, sink: &mut dyn TrafficSink) {
    let mut headers = format!("HTTP/1.1 {}", response.status);
    for (name, value) in &response.headers {
        headers.push('\n');
        headers.push_str(name);
        headers.push_str(": ");
        headers.push_str(value);
    }
    sink.incoming_headers(&headers);
    sink.incoming_body(&response.body);
}

pub(crate) fn split_url(url: &str) -> (&str, &str) {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    match rest.find('/') {
        Some(index) => (&rest[..index], &rest[index..]),
        None => (rest, "/"),
    }
}

/// HTTP transport built on a blocking ureq agent.
pub struct UreqTransport {
    agent: Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        Self::with_timeout(None)
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        // Fault responses arrive with 500 status and must still be read.
        // Accept-Encoding comes from the request, never from the agent.
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .accept_encoding(AutoHeaderValue::None)
            .timeout_global(timeout)
            .build();
        let agent: Agent = config.into();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: &HttpRequest, sink: &mut dyn TrafficSink) -> Result<HttpResponse> {
        record_request(request, sink);

        let mut builder = self.agent.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let mut response = builder
            .send(request.body.as_str())
            .map_err(|e| SoapError::Transport(format!("{}: {}", request.url, e)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| SoapError::Transport(format!("Failed to read response body: {}", e)))?;

        debug!(url = %request.url, status = status, bytes = body.len(), "Received response");

        let response = HttpResponse {
            status,
            headers,
            body,
        };
        record_response(&response, sink);
        Ok(response)
    }
}

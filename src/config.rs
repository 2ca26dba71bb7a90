//! Configuration types for the SOAP RPC client.

use crate::credentials::DEFAULT_TOKEN_EXPIRY_SECS;
use crate::error::{Result, SoapError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Request header names the client sends, in wire order.
pub const HEADER_ALLOW_LIST: &[&str] = &[
    "authToken",
    "developerToken",
    "userAgent",
    "clientCustomerId",
    "validateOnly",
    "partialFailure",
];

/// Main configuration for the SOAP RPC client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// General settings
    pub settings: SettingsConfig,

    /// Request header values
    pub headers: RequestHeaders,

    /// Wire encoding conventions
    pub encoding: EncodingConfig,
}

impl ClientConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| SoapError::Config(format!("Invalid configuration: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Validate arguments against the schema before sending
    pub strict: bool,

    /// Return the response body as text instead of decoding it, faults
    /// included
    pub raw_response: bool,

    /// Wrap results in a one-element list
    pub wrap_in_tuple: bool,

    /// Route log records to the console and keep call traces
    pub debug: bool,

    /// Skip log records and fault handling; the response body is returned
    /// as text
    pub raw_debug: bool,

    /// Ask for gzip responses; `identity` is requested otherwise
    pub compress: bool,

    /// Re-indent XML in log records
    pub pretty_xml: bool,

    /// Emit the `soap_xml` record
    pub xml_log: bool,

    /// Emit the `request_info` record
    pub request_log: bool,

    /// Login token lifetime
    pub auth_token_expiry_secs: i64,

    /// Transport timeout, none by default
    pub timeout_secs: Option<u64>,

    /// Field names masked in logged request bodies
    pub masked_fields: Vec<String>,

    /// Header combinations accepted as authentication; one must be fully
    /// present before a call. Not checked when a header signer is set.
    pub required_headers: Vec<Vec<String>>,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            strict: true,
            raw_response: false,
            wrap_in_tuple: false,
            debug: false,
            raw_debug: false,
            compress: false,
            pretty_xml: false,
            xml_log: true,
            request_log: true,
            auth_token_expiry_secs: DEFAULT_TOKEN_EXPIRY_SECS,
            timeout_secs: None,
            masked_fields: vec![
                "password".to_string(),
                "Password".to_string(),
                "authToken".to_string(),
            ],
            required_headers: vec![
                vec!["authToken".to_string()],
                vec!["email".to_string(), "password".to_string()],
            ],
        }
    }
}

/// Request header values.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestHeaders {
    pub auth_token: Option<String>,
    pub developer_token: Option<String>,
    pub user_agent: Option<String>,
    pub client_customer_id: Option<String>,
    /// Boolean-ish flag ("y", "true", "0", ...)
    pub validate_only: Option<String>,
    /// Boolean-ish flag ("y", "true", "0", ...)
    pub partial_failure: Option<String>,
    /// Login identity, never sent as a header
    pub email: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for RequestHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("RequestHeaders")
            .field("auth_token", &redacted(&self.auth_token))
            .field("developer_token", &redacted(&self.developer_token))
            .field("user_agent", &self.user_agent)
            .field("client_customer_id", &self.client_customer_id)
            .field("validate_only", &self.validate_only)
            .field("partial_failure", &self.partial_failure)
            .field("email", &self.email)
            .field("password", &redacted(&self.password))
            .finish()
    }
}

impl RequestHeaders {
    /// Non-empty header value by wire name.
    pub fn get(&self, name: &str) -> Option<&str> {
        let value = match name {
            "authToken" => &self.auth_token,
            "developerToken" => &self.developer_token,
            "userAgent" => &self.user_agent,
            "clientCustomerId" => &self.client_customer_id,
            "validateOnly" => &self.validate_only,
            "partialFailure" => &self.partial_failure,
            "email" => &self.email,
            "password" => &self.password,
            _ => return None,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }

    /// Allow-listed headers to send, in wire order. Flag headers are
    /// normalized to `true`/`false`; `skip` names headers incompatible with
    /// the active credential scheme.
    pub fn to_wire(&self, skip: &[&str]) -> Result<Vec<(String, String)>> {
        let mut wire = Vec::new();
        for name in HEADER_ALLOW_LIST {
            if skip.contains(name) {
                continue;
            }
            let Some(value) = self.get(name) else {
                continue;
            };
            let value = match *name {
                "validateOnly" | "partialFailure" => parse_bool_flag(value)?.to_string(),
                _ => value.to_string(),
            };
            wire.push((name.to_string(), value));
        }
        Ok(wire)
    }
}

/// Wire encoding conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Wrap each list item in an `item_element`
    pub wrap_lists: bool,

    pub item_element: String,

    /// Namespace of the request header element, defaults to the service
    /// namespace
    pub header_namespace: Option<String>,

    /// Explicit namespace URI -> prefix mappings
    pub namespace_prefixes: HashMap<String, String>,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            wrap_lists: false,
            item_element: "item".to_string(),
            header_namespace: None,
            namespace_prefixes: HashMap::new(),
        }
    }
}

/// Parse a boolean-ish string.
pub fn parse_bool_flag(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "y" | "yes" | "t" | "true" => Ok(true),
        "0" | "n" | "no" | "f" | "false" => Ok(false),
        other => Err(SoapError::Config(format!(
            "Invalid boolean flag '{}', expecting one of y/yes/t/true/1 or n/no/f/false/0",
            other
        ))),
    }
}

/// Check that at least one combination of header names is fully present.
/// No combinations means nothing is required.
pub fn validate_required_headers<S: AsRef<str>>(
    headers: &RequestHeaders,
    combinations: &[Vec<S>],
) -> Result<()> {
    let satisfied = combinations.is_empty()
        || combinations
            .iter()
            .any(|names| names.iter().all(|name| headers.get(name.as_ref()).is_some()));
    if satisfied {
        Ok(())
    } else {
        Err(SoapError::violation(
            "Required authentication header is missing",
        ))
    }
}

//! Transcript of a single protocol exchange.
//!
//! The transport writes the four parts of an exchange (outgoing headers and
//! body, incoming headers and body) into a [`TrafficSink`]. [`Transcript`]
//! is the sink used by the call orchestrator: it keeps the raw bytes, parses
//! bodies lazily, and extracts headers, faults and diagnostics from them.

use crate::error::{Result, SoapError};
use crate::parser::{self, XmlElement};
use crate::value::Value;
use indexmap::IndexMap;
use once_cell::unsync::OnceCell;
use regex::Regex;

/// Receiver of raw protocol traffic.
pub trait TrafficSink {
    fn outgoing_headers(&mut self, headers: &str);
    fn outgoing_body(&mut self, body: &str);
    fn incoming_headers(&mut self, headers: &str);
    fn incoming_body(&mut self, body: &str);
}

/// Candidate tag paths for response header values, tried in order.
pub const RESPONSE_TIME_PATHS: &[&str] = &[
    "responseTime",
    "Header/ResponseHeader/responseTime",
    "ns2:responseTime",
];
pub const REQUEST_ID_PATHS: &[&str] = &[
    "requestId",
    "Header/ResponseHeader/requestId",
    "ns2:requestId",
];
pub const OPERATIONS_PATHS: &[&str] = &[
    "operations",
    "Header/ResponseHeader/operations",
    "ns2:operations",
];
pub const UNITS_PATHS: &[&str] = &["units", "Header/ResponseHeader/units", "ns2:units"];

/// Mask written in place of sensitive values.
pub const MASK: &str = "xxxxxx";

const BANNER_WIDTH: usize = 72;
const HEADERS_OUT: &str = "Outgoing HTTP headers";
const BODY_OUT: &str = "Outgoing SOAP";
const HEADERS_IN: &str = "Incoming HTTP headers";
const BODY_IN: &str = "Incoming SOAP";

/// Progress of the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptState {
    Empty,
    HeadersSent,
    BodySent,
    HeadersReceived,
    Complete,
}

/// Captured traffic of one call.
#[derive(Debug, Default)]
pub struct Transcript {
    headers_out: Option<String>,
    body_out: Option<String>,
    headers_in: Option<String>,
    body_in: Option<String>,
    masked_fields: Vec<String>,
    pretty: bool,
    parsed_out: OnceCell<Option<XmlElement>>,
    parsed_in: OnceCell<Option<XmlElement>>,
}

impl TrafficSink for Transcript {
    fn outgoing_headers(&mut self, headers: &str) {
        self.headers_out = Some(headers.to_string());
    }

    fn outgoing_body(&mut self, body: &str) {
        self.body_out = Some(body.to_string());
        self.parsed_out = OnceCell::new();
    }

    fn incoming_headers(&mut self, headers: &str) {
        self.headers_in = Some(headers.to_string());
    }

    fn incoming_body(&mut self, body: &str) {
        self.body_in = Some(body.to_string());
        self.parsed_in = OnceCell::new();
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Field names whose values are masked in [`Transcript::masked_body_out`].
    pub fn with_masked_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.masked_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Re-indent XML bodies when they are surfaced for diagnostics.
    pub fn with_pretty_xml(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn state(&self) -> TranscriptState {
        match (
            &self.headers_out,
            &self.body_out,
            &self.headers_in,
            &self.body_in,
        ) {
            (Some(_), Some(_), Some(_), Some(_)) => TranscriptState::Complete,
            (Some(_), Some(_), Some(_), None) => TranscriptState::HeadersReceived,
            (Some(_), Some(_), None, _) => TranscriptState::BodySent,
            (Some(_), None, _, _) => TranscriptState::HeadersSent,
            _ => TranscriptState::Empty,
        }
    }

    /// True when all four parts were captured and the response is not an
    /// HTML error page.
    pub fn is_handshake_complete(&self) -> bool {
        self.state() == TranscriptState::Complete
            && !self.body_in.as_deref().map(parser::is_html).unwrap_or(false)
    }

    /// Whether the response is a well-formed SOAP envelope with a body.
    pub fn is_soap(&self) -> bool {
        self.incoming_document()
            .filter(|root| parser::envelope_version(root).is_some())
            .and_then(|root| root.child("Body"))
            .is_some()
    }

    pub fn headers_out(&self) -> Option<&str> {
        self.headers_out.as_deref()
    }

    pub fn headers_in(&self) -> Option<&str> {
        self.headers_in.as_deref()
    }

    /// Incoming body exactly as received.
    pub fn raw_body_in(&self) -> Option<&str> {
        self.body_in.as_deref()
    }

    /// Incoming body for display.
    pub fn body_in(&self) -> Option<String> {
        self.body_in.as_deref().map(|body| self.present(body))
    }

    /// Outgoing body for display, with sensitive values masked. The
    /// transmitted bytes are not affected.
    pub fn masked_body_out(&self) -> Option<String> {
        let body = self.body_out.as_deref()?;
        let mut masked = body.to_string();
        for field in &self.masked_fields {
            let pattern = format!(r">[^<]*</((?:[\w.-]+:)?{})>", regex::escape(field));
            if let Ok(re) = Regex::new(&pattern) {
                masked = re
                    .replace_all(&masked, format!(">{}</$1>", MASK).as_str())
                    .into_owned();
            }
        }
        Some(self.present(&masked))
    }

    fn present(&self, body: &str) -> String {
        if self.pretty {
            parser::pretty_print(body)
        } else {
            body.to_string()
        }
    }

    fn outgoing_document(&self) -> Option<&XmlElement> {
        self.parsed_out
            .get_or_init(|| {
                self.body_out
                    .as_deref()
                    .and_then(|body| parser::parse_document(body).ok())
            })
            .as_ref()
    }

    fn incoming_document(&self) -> Option<&XmlElement> {
        self.parsed_in
            .get_or_init(|| {
                self.body_in
                    .as_deref()
                    .and_then(|body| parser::parse_document(body).ok())
            })
            .as_ref()
    }

    fn require_incoming(&self) -> Result<&XmlElement> {
        if self.body_in.is_none() {
            return Err(SoapError::MalformedTranscript(
                "No incoming message was captured".to_string(),
            ));
        }
        self.incoming_document().ok_or_else(|| {
            SoapError::MalformedTranscript(
                "Unable to parse incoming message".to_string(),
            )
        })
    }

    /// First non-empty response header value among the candidate paths.
    pub fn header_value(&self, paths: &[&str]) -> Option<String> {
        let header = self.incoming_document()?.child("Header")?;
        paths
            .iter()
            .filter_map(|path| header.find_path(path))
            .map(|element| element.text())
            .find(|text| !text.is_empty())
            .map(String::from)
    }

    pub fn response_time(&self) -> Option<String> {
        self.header_value(RESPONSE_TIME_PATHS)
    }

    pub fn request_id(&self) -> Option<String> {
        self.header_value(REQUEST_ID_PATHS)
    }

    pub fn operations(&self) -> Option<String> {
        self.header_value(OPERATIONS_PATHS)
    }

    pub fn units(&self) -> Option<String> {
        self.header_value(UNITS_PATHS)
    }

    /// First element inside the incoming Body: the operation response or
    /// the fault.
    pub fn response_element(&self) -> Option<&XmlElement> {
        self.incoming_document()?.child("Body")?.children.first()
    }

    fn outgoing_call(&self) -> Option<&XmlElement> {
        self.outgoing_document()?.child("Body")?.children.first()
    }

    /// Name of the operation element in the outgoing body.
    pub fn call_name(&self) -> Option<String> {
        self.outgoing_call().map(|call| call.local_name().to_string())
    }

    /// Operators used in a mutate request and how often each appears, e.g.
    /// `{"ADD": 2, "SET": 1}`. `None` for requests without operators and for
    /// `get` calls.
    pub fn operator_counts(&self) -> Option<IndexMap<String, usize>> {
        let call = self.outgoing_call()?;
        if call.local_name() == "get" {
            return None;
        }
        let mut counts: IndexMap<String, usize> = IndexMap::new();
        for operation in call.children_named("operations") {
            if let Some(operator) = operation.child("operator") {
                *counts.entry(operator.text().to_string()).or_default() += 1;
            }
        }
        if counts.is_empty() {
            None
        } else {
            Some(counts)
        }
    }

    /// The response's `Fault` element, if the body holds one.
    fn fault_element(&self) -> Result<Option<&XmlElement>> {
        let root = self.require_incoming()?;
        let body = root.child("Body").ok_or_else(|| {
            SoapError::MalformedTranscript("Incoming message has no Body".to_string())
        })?;
        Ok(body.children.first().filter(|first| first.local_name() == "Fault"))
    }

    /// Normalized fault record, or `None` when the response is not a fault.
    ///
    /// Repeated siblings become a list, `Foo.Type` elements become `type`,
    /// `ApiExceptionFault`/`fault` wrappers are unwrapped and `errors` is
    /// always a list.
    pub fn fault(&self) -> Result<Option<Value>> {
        Ok(self.fault_element()?.map(walk_fault))
    }

    /// Fault reader for the common `ApiExceptionFault` shape, used when the
    /// generic walk produces a fault without detail.
    pub fn fault_fallback(&self) -> Result<Option<Value>> {
        let Some(fault) = self.fault_element()? else {
            return Ok(None);
        };

        let text = |name: &str| {
            fault
                .child(name)
                .map(|e| Value::from(e.text()))
                .unwrap_or_else(|| Value::from(""))
        };
        let mut detail: IndexMap<String, Value> = IndexMap::new();
        let mut errors = Vec::new();
        if let Some(wrapper) = fault.child("detail").and_then(|d| d.children.first()) {
            for child in &wrapper.children {
                match child.local_name() {
                    "message" => {
                        detail.insert("message".to_string(), Value::from(child.text()));
                    }
                    "errors" => errors.push(flat_error(child)),
                    _ => {}
                }
            }
        }
        detail.insert("errors".to_string(), Value::List(errors));

        Ok(Some(Value::record([
            ("faultcode", text("faultcode")),
            ("faultstring", text("faultstring")),
            ("detail", Value::Record(detail)),
        ])))
    }

    /// Human readable rendering of the normalized fault. Empty when there is
    /// no fault or the response cannot be parsed.
    pub fn fault_as_string(&self) -> String {
        match self.fault() {
            Ok(Some(fault)) => format_fault(&fault),
            _ => String::new(),
        }
    }

    /// Banner-delimited dump of the exchange.
    pub fn render(&self) -> String {
        let masked = self.masked_body_out();
        let body_in = self.body_in();
        let parts = [
            (HEADERS_OUT, self.headers_out.as_deref()),
            (BODY_OUT, masked.as_deref()),
            (HEADERS_IN, self.headers_in.as_deref()),
            (BODY_IN, body_in.as_deref()),
        ];
        let separator = "*".repeat(BANNER_WIDTH);
        parts
            .iter()
            .filter_map(|(title, content)| {
                content.map(|c| format!("{}\n{}\n{}", banner(title), c.trim_end(), separator))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Rebuild a transcript from a dump produced by [`Transcript::render`].
    pub fn from_dump(dump: &str) -> Result<Self> {
        let separator = "*".repeat(BANNER_WIDTH);
        let mut transcript = Transcript::new();
        let mut found = false;

        for part in dump.split(separator.as_str()) {
            let part = part.trim_matches('\n');
            let Some((first_line, rest)) = part.split_once('\n') else {
                continue;
            };
            let content = rest.trim_matches('\n');
            let title = first_line
                .trim_start_matches('*')
                .trim_end_matches('*')
                .trim();
            match title {
                HEADERS_OUT => transcript.outgoing_headers(content),
                BODY_OUT => transcript.outgoing_body(content),
                HEADERS_IN => transcript.incoming_headers(content),
                BODY_IN => transcript.incoming_body(content),
                _ => continue,
            }
            found = true;
        }

        if !found {
            return Err(SoapError::MalformedTranscript(
                "Expecting a SOAP request, response, or both".to_string(),
            ));
        }
        Ok(transcript)
    }
}

fn banner(title: &str) -> String {
    let head = format!("*** {} ", title);
    let pad = BANNER_WIDTH.saturating_sub(head.len());
    format!("{}{}", head, "*".repeat(pad))
}

/// Normalized key for a fault element: `ApiError.Type` becomes `type`.
fn fault_key(element: &XmlElement) -> String {
    let name = element.local_name();
    match name.split_once('.') {
        Some((_, suffix)) => suffix.to_lowercase(),
        None => name.to_string(),
    }
}

fn walk_fault(element: &XmlElement) -> Value {
    let mut record: IndexMap<String, Value> = IndexMap::new();
    for child in &element.children {
        let key = fault_key(child);
        let value = if child.is_leaf() {
            Value::from(child.text())
        } else {
            let nested = walk_fault(child);
            if key == "ApiExceptionFault" || key == "fault" {
                return nested;
            }
            nested
        };

        match record.get_mut(&key) {
            Some(Value::List(items)) => items.push(value),
            Some(existing) => {
                let first = std::mem::take(existing);
                *existing = Value::List(vec![first, value]);
            }
            None if key == "errors" && !child.is_leaf() => {
                record.insert(key, Value::List(vec![value]));
            }
            None => {
                record.insert(key, value);
            }
        }
    }
    Value::Record(record)
}

fn flat_error(element: &XmlElement) -> Value {
    let mut record: IndexMap<String, Value> = IndexMap::new();
    for child in &element.children {
        let value = if child.is_leaf() {
            Value::from(child.text())
        } else {
            flat_error(child)
        };
        record.insert(fault_key(child), value);
    }
    Value::Record(record)
}

fn format_fault(value: &Value) -> String {
    let mut out = String::new();
    if let Some(record) = value.as_record() {
        for (key, item) in record {
            match item {
                Value::List(items) => {
                    for entry in items {
                        out.push_str(&format!("\n\n{}\n", key));
                        out.push_str(&format_fault(entry));
                    }
                }
                Value::Record(_) => {
                    out.push_str(&format!("\n{}: {{\n{}\n}}", key, format_fault(item)));
                }
                Value::Text(text) => out.push_str(&format!("\n{}: {}", key, text)),
                other => out.push_str(&format!("\n{}: {}", key, other.kind())),
            }
        }
    } else if let Some(text) = value.as_str() {
        out.push_str(text);
    }
    out.trim().to_string()
}

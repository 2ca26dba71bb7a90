//! Service endpoints: the call orchestrator and the lazy method registry.
//!
//! A call runs under the client's session lock from start to finish:
//! credential refresh, header injection, arity check, validation and packing,
//! dispatch through a fresh [`Transcript`], log records, fault handling, then
//! decoding and cardinality restoration. The lock guard is dropped on every
//! return path.

use crate::client::{ClientShared, Session};
use crate::diagnostics::LogTarget;
use crate::error::{ApiFault, Result, SoapError};
use crate::marshal::{Marshaler, NamespacePrefixer, SoapRequest};
use crate::parser;
use crate::restore::{decode_response, Restorer};
use crate::schema::{OperationDescriptor, TypeDirectory};
use crate::transcript::Transcript;
use crate::transport::{split_url, HttpRequest, HttpResponse};
use crate::validator::SchemaValidator;
use crate::value::Value;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn, Level};

const USER_AGENT: &str = concat!("soap-rpc-client/", env!("CARGO_PKG_VERSION"));

/// Dynamic dispatch by operation name.
pub trait Invoke {
    fn invoke(&self, name: &str, args: &[Value]) -> Result<Value>;
}

type CallFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// A remote operation bound to its service.
#[derive(Clone)]
pub struct RemoteMethod {
    name: String,
    call: Arc<CallFn>,
}

impl RemoteMethod {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.call)(args)
    }
}

impl fmt::Debug for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMethod").field("name", &self.name).finish()
    }
}

/// Everything a call needs. Shared by the registry's closures.
struct Endpoint {
    name: String,
    url: String,
    directory: Arc<TypeDirectory>,
    prefixer: NamespacePrefixer,
    client: Arc<ClientShared>,
}

/// A remote SOAP service.
pub struct SoapService {
    endpoint: Arc<Endpoint>,
    registry: Mutex<HashMap<String, RemoteMethod>>,
}

impl SoapService {
    pub(crate) fn new(
        client: Arc<ClientShared>,
        name: String,
        url: String,
        directory: Arc<TypeDirectory>,
    ) -> Self {
        let prefixer = NamespacePrefixer::new(client.config.encoding.namespace_prefixes.clone());
        Self {
            endpoint: Arc::new(Endpoint {
                name,
                url,
                directory,
                prefixer,
                client,
            }),
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.endpoint.name
    }

    pub fn url(&self) -> &str {
        &self.endpoint.url
    }

    pub fn directory(&self) -> &TypeDirectory {
        &self.endpoint.directory
    }

    /// Names of the operations this service offers.
    pub fn operations(&self) -> Vec<String> {
        self.endpoint.directory.operation_names().to_vec()
    }

    /// Look up an operation, binding and caching it on first use.
    pub fn method(&self, name: &str) -> Result<RemoteMethod> {
        let mut registry = self.registry.lock();
        if let Some(method) = registry.get(name) {
            return Ok(method.clone());
        }

        let operation = Arc::new(self.endpoint.directory.operation(name)?.clone());
        let endpoint = Arc::clone(&self.endpoint);
        let method = RemoteMethod {
            name: operation.name.clone(),
            call: Arc::new(move |args: &[Value]| endpoint.call(&operation, args)),
        };
        debug!(service = %self.endpoint.name, operation = %method.name, "Bound remote method");
        registry.insert(name.to_string(), method.clone());
        Ok(method)
    }

    /// Send a caller-built SOAP envelope and return the raw response text.
    pub fn call_raw(&self, message: &str) -> Result<Value> {
        self.endpoint.call_raw(message)
    }
}

impl Invoke for SoapService {
    fn invoke(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.method(name)?.call(args)
    }
}

impl Endpoint {
    fn call(&self, operation: &OperationDescriptor, args: &[Value]) -> Result<Value> {
        let mut session = self.client.session.lock();
        let result = self.dispatch(&mut session, operation, args);
        self.keep_trace(&mut session, &result);
        result
    }

    fn call_raw(&self, message: &str) -> Result<Value> {
        let mut session = self.client.session.lock();
        let result = self.dispatch_raw(message);
        self.keep_trace(&mut session, &result);
        result
    }

    fn keep_trace(&self, session: &mut Session, result: &Result<Value>) {
        if !self.client.config.settings.debug {
            return;
        }
        if let Err(e) = result {
            session.last_trace = Some(format!("{:?}", e));
        }
    }

    fn dispatch(
        &self,
        session: &mut Session,
        operation: &OperationDescriptor,
        args: &[Value],
    ) -> Result<Value> {
        let settings = &self.client.config.settings;

        self.client.check_required_headers(session)?;
        self.client.ensure_credential(session)?;
        let header = self.client.wire_headers(session)?;

        if args.len() != operation.inputs.len() {
            return Err(SoapError::Arity {
                operation: operation.name.clone(),
                expected: operation.inputs.len(),
                given: args.len(),
            });
        }
        let params = self.pack_inputs(operation, args)?;

        let request = SoapRequest {
            header_namespace: self
                .client
                .config
                .encoding
                .header_namespace
                .clone()
                .unwrap_or_else(|| self.directory.namespace().to_string()),
            header,
            operation: operation.name.clone(),
            namespace: self.directory.namespace().to_string(),
            prefixes: self.prefixes(operation),
            params,
        };
        let body = request.to_xml()?;

        let started = Utc::now();
        let mut transcript = self.transcript();
        let sent = self
            .client
            .transport
            .send(&self.http_request(body)?, &mut transcript);

        if settings.raw_debug {
            return self.raw_result(&transcript, sent);
        }

        let is_fault = matches!(transcript.fault(), Ok(Some(_)));
        self.emit_records(&transcript, started, &operation.name, is_fault);

        // Raw mode hands faults back to the caller untouched.
        let response = self.check_exchange(&transcript, sent, !settings.raw_response)?;
        if settings.raw_response {
            return Ok(self.wrap(Value::Text(response.body)));
        }
        if response.status >= 400 {
            return Err(SoapError::Transport(format!(
                "HTTP {} from {}",
                response.status, self.url
            )));
        }

        let decoded = match transcript.response_element() {
            Some(element) => decode_response(element, &operation.outputs),
            None => Value::Null,
        };
        let result = Restorer::new(&self.directory)
            .item_element(&self.client.config.encoding.item_element)
            .restore(decoded, &operation.outputs);

        let units = transcript.units().and_then(|u| u.parse().ok());
        let operations = transcript.operations().and_then(|o| o.parse().ok());
        session.usage.record(units, operations);

        Ok(self.wrap(result))
    }

    fn dispatch_raw(&self, message: &str) -> Result<Value> {
        let started = Utc::now();
        let mut transcript = self.transcript();
        let sent = self
            .client
            .transport
            .send(&self.http_request(message.to_string())?, &mut transcript);

        if self.client.config.settings.raw_debug {
            return self.raw_result(&transcript, sent);
        }

        let is_fault = matches!(transcript.fault(), Ok(Some(_)));
        let method = transcript.call_name().unwrap_or_default();
        self.emit_records(&transcript, started, &method, is_fault);

        let response = self.check_exchange(&transcript, sent, true)?;
        Ok(self.wrap(Value::Text(response.body)))
    }

    /// Validate and pack positional arguments against the operation inputs.
    fn pack_inputs(
        &self,
        operation: &OperationDescriptor,
        args: &[Value],
    ) -> Result<Vec<(String, crate::value::WireValue)>> {
        let settings = &self.client.config.settings;
        let encoding = &self.client.config.encoding;
        let validator = SchemaValidator::new(&self.directory);
        let marshaler = Marshaler::new(&self.directory, &self.prefixer)
            .wrap_lists(encoding.wrap_lists, &encoding.item_element);

        let mut params = Vec::with_capacity(args.len());
        for (input, arg) in operation.inputs.iter().zip(args) {
            let namespace = if input.namespace.is_empty() {
                self.directory.namespace()
            } else {
                input.namespace.as_str()
            };
            if settings.strict {
                validator.validate(arg, namespace, &input.type_name, &input.max_occurs)?;
            }
            let packed = marshaler.pack(arg, namespace, &input.type_name)?;
            params.push((input.name.clone(), packed));
        }
        Ok(params)
    }

    /// Prefix declarations for the operation element. Operations without
    /// inputs only declare the default namespace.
    fn prefixes(&self, operation: &OperationDescriptor) -> Vec<(String, String)> {
        if operation.inputs.is_empty() {
            return Vec::new();
        }
        let mut prefixes: Vec<(String, String)> = Vec::new();
        for namespace in self.directory.namespaces() {
            let prefix = self.prefixer.prefix(namespace);
            if prefixes.iter().any(|(p, _)| *p == prefix) {
                continue;
            }
            prefixes.push((prefix, namespace.to_string()));
        }
        prefixes
    }

    fn http_request(&self, body: String) -> Result<HttpRequest> {
        let settings = &self.client.config.settings;
        let mut headers = vec![
            (
                "Content-Type".to_string(),
                "text/xml; charset=utf-8".to_string(),
            ),
            ("SOAPAction".to_string(), "\"\"".to_string()),
            ("User-Agent".to_string(), USER_AGENT.to_string()),
        ];
        if let Some(signer) = &self.client.signer {
            headers.push(("Authorization".to_string(), signer.authorization(&self.url)?));
        }
        let encoding = if settings.compress { "gzip" } else { "identity" };
        headers.push(("Accept-Encoding".to_string(), encoding.to_string()));
        Ok(HttpRequest {
            url: self.url.clone(),
            headers,
            body,
        })
    }

    fn transcript(&self) -> Transcript {
        let settings = &self.client.config.settings;
        Transcript::new()
            .with_masked_fields(settings.masked_fields.iter().cloned())
            .with_pretty_xml(settings.pretty_xml)
    }

    /// Turn the captured exchange into a response, or the error it carries.
    /// Faults are raised only when `raise_faults` is set.
    fn check_exchange(
        &self,
        transcript: &Transcript,
        sent: Result<HttpResponse>,
        raise_faults: bool,
    ) -> Result<HttpResponse> {
        if !transcript.is_handshake_complete() {
            let html = transcript.raw_body_in().and_then(parser::error_from_html);
            let message = match (html, sent) {
                (Some(message), _) => message,
                (None, Err(e)) => e.to_string(),
                (None, Ok(_)) => "Unknown error.".to_string(),
            };
            return Err(SoapError::Transport(message));
        }
        let response = sent.map_err(|e| SoapError::Local(e.to_string()))?;
        if !transcript.is_soap() {
            return Err(SoapError::Transport("Unknown error.".to_string()));
        }
        if raise_faults {
            if let Some(fault) = fault_error(transcript) {
                return Err(fault);
            }
        }
        Ok(response)
    }

    fn raw_result(&self, transcript: &Transcript, sent: Result<HttpResponse>) -> Result<Value> {
        if !transcript.is_handshake_complete() {
            return Err(match sent {
                Err(e) => e,
                Ok(_) => SoapError::Transport("Unknown error.".to_string()),
            });
        }
        let response = sent?;
        Ok(self.wrap(Value::Text(response.body)))
    }

    /// Lists already are tuples and void stays void.
    fn wrap(&self, value: Value) -> Value {
        match value {
            Value::List(_) | Value::Null => value,
            single if self.client.config.settings.wrap_in_tuple => Value::List(vec![single]),
            single => single,
        }
    }

    fn emit_records(
        &self,
        transcript: &Transcript,
        started: DateTime<Utc>,
        method: &str,
        is_fault: bool,
    ) {
        let settings = &self.client.config.settings;
        let sink = &self.client.diagnostics;
        let level = if is_fault { Level::WARN } else { Level::INFO };

        let xml_target = LogTarget::from_flags(settings.xml_log, settings.debug);
        if xml_target != LogTarget::None {
            let message = format!(
                "StartTime: {}\n{}\nStopTime: {}",
                started.to_rfc3339(),
                transcript.render(),
                Utc::now().to_rfc3339()
            );
            sink.record("soap_xml", level, xml_target, &message);
        }

        let request_target = LogTarget::from_flags(settings.request_log, settings.debug);
        if request_target != LogTarget::None {
            let (host, _) = split_url(&self.url);
            let operators = transcript
                .operator_counts()
                .map(|counts| {
                    counts
                        .iter()
                        .map(|(operator, count)| format!("{}:{}", operator, count))
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default();
            let message = format!(
                "host={} service={} method={} operator={} responseTime={} operations={} units={} requestId={} isFault={}",
                host,
                self.name,
                method,
                operators,
                transcript.response_time().unwrap_or_default(),
                transcript.operations().unwrap_or_default(),
                transcript.units().unwrap_or_default(),
                transcript.request_id().unwrap_or_default(),
                is_fault
            );
            sink.record("request_info", level, request_target, &message);
        }
    }
}

/// The classified remote fault carried by the response, if any.
fn fault_error(transcript: &Transcript) -> Option<SoapError> {
    match transcript.fault() {
        Ok(Some(fault)) => {
            let fault = if fault.get("detail").map(Value::is_empty).unwrap_or(true) {
                transcript.fault_fallback().ok().flatten().unwrap_or(fault)
            } else {
                fault
            };
            let fault = ApiFault::from_record(fault);
            warn!(category = %fault.category, message = %fault.message, "Remote fault");
            Some(SoapError::RemoteFault(Box::new(fault)))
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "Unable to parse fault");
            Some(SoapError::Local(
                transcript.raw_body_in().unwrap_or_default().to_string(),
            ))
        }
    }
}

//! The client: shared configuration, credentials, usage counters and the
//! per-client call lock.
//!
//! All services created from one [`SoapClient`] share a single
//! [`parking_lot::Mutex`] guarding the session. A call holds it for the whole
//! exchange, so calls on one client never interleave.

use crate::config::{validate_required_headers, ClientConfig, RequestHeaders};
use crate::credentials::{
    ChallengeAnswer, Credential, CredentialProvider, CredentialState, HeaderSigner, LoginRequest,
};
use crate::diagnostics::{DiagnosticsSink, TracingSink};
use crate::error::Result;
use crate::schema::TypeDirectory;
use crate::service::SoapService;
use crate::transport::{Transport, UreqTransport};
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info};

/// API usage reported by response headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageCounters {
    pub total_units: u64,
    pub total_operations: u64,
    /// Usage of the last successful call
    pub last_units: u64,
    pub last_operations: u64,
}

impl UsageCounters {
    pub(crate) fn record(&mut self, units: Option<u64>, operations: Option<u64>) {
        self.last_units = units.unwrap_or(0);
        self.last_operations = operations.unwrap_or(0);
        self.total_units += self.last_units;
        self.total_operations += self.last_operations;
    }
}

/// Mutable client state, only touched under the call lock.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) credentials: CredentialState,
    pub(crate) headers: RequestHeaders,
    pub(crate) challenge: Option<ChallengeAnswer>,
    pub(crate) usage: UsageCounters,
    pub(crate) last_trace: Option<String>,
}

pub(crate) struct ClientShared {
    pub(crate) config: ClientConfig,
    pub(crate) session: Mutex<Session>,
    pub(crate) provider: Option<Arc<dyn CredentialProvider>>,
    pub(crate) signer: Option<Arc<dyn HeaderSigner>>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) diagnostics: Arc<dyn DiagnosticsSink>,
}

impl ClientShared {
    /// Fail when none of the configured authentication header combinations
    /// is present. Header signers authenticate on their own.
    pub(crate) fn check_required_headers(&self, session: &Session) -> Result<()> {
        if self.signer.is_some() {
            return Ok(());
        }
        validate_required_headers(&session.headers, &self.config.settings.required_headers)
    }

    /// Refresh the login token when it is absent or expired. Skipped when a
    /// header signer is configured or no provider is available.
    pub(crate) fn ensure_credential(&self, session: &mut Session) -> Result<()> {
        if self.signer.is_some() {
            return Ok(());
        }
        let Some(provider) = &self.provider else {
            return Ok(());
        };
        if !session.credentials.needs_refresh(Utc::now()) {
            return Ok(());
        }

        let request = LoginRequest {
            email: session.headers.email.clone().unwrap_or_default(),
            password: session.headers.password.clone().unwrap_or_default(),
            challenge: session.challenge.take(),
        };
        let credential = session.credentials.refresh(provider.as_ref(), &request)?;
        session.headers.auth_token = Some(credential.token.clone());
        info!(email = %request.email, "Refreshed authentication token");
        Ok(())
    }

    /// Request header entries for the active credential scheme.
    pub(crate) fn wire_headers(&self, session: &Session) -> Result<Vec<(String, String)>> {
        let skip: &[&str] = if self.signer.is_some() {
            &["authToken"]
        } else {
            &[]
        };
        session.headers.to_wire(skip)
    }
}

/// A SOAP RPC client. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct SoapClient {
    shared: Arc<ClientShared>,
}

impl SoapClient {
    /// Client with the default ureq transport and tracing diagnostics.
    pub fn new(config: ClientConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> SoapClientBuilder {
        SoapClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Bind a service endpoint described by `directory`.
    pub fn service(
        &self,
        name: impl Into<String>,
        url: impl Into<String>,
        directory: Arc<TypeDirectory>,
    ) -> SoapService {
        SoapService::new(Arc::clone(&self.shared), name.into(), url.into(), directory)
    }

    pub fn usage(&self) -> UsageCounters {
        self.shared.session.lock().usage
    }

    /// Current request header values.
    pub fn headers(&self) -> RequestHeaders {
        self.shared.session.lock().headers.clone()
    }

    /// Replace request header values for subsequent calls.
    pub fn set_headers(&self, headers: RequestHeaders) {
        self.shared.session.lock().headers = headers;
    }

    pub fn set_validate_only(&self, enabled: bool) {
        self.shared.session.lock().headers.validate_only = Some(enabled.to_string());
    }

    pub fn set_partial_failure(&self, enabled: bool) {
        self.shared.session.lock().headers.partial_failure = Some(enabled.to_string());
    }

    pub fn set_client_customer_id(&self, id: Option<String>) {
        self.shared.session.lock().headers.client_customer_id = id;
    }

    /// Answer for the next login, after an
    /// [`AuthChallenge`](crate::SoapError::AuthChallenge).
    pub fn set_challenge_answer(&self, answer: ChallengeAnswer) {
        self.shared.session.lock().challenge = Some(answer);
    }

    /// Cached login token, if any.
    pub fn credential(&self) -> Option<Credential> {
        self.shared.session.lock().credentials.current().cloned()
    }

    /// Error of the last failed call, kept in debug mode.
    pub fn last_trace(&self) -> Option<String> {
        self.shared.session.lock().last_trace.clone()
    }
}

/// Builder for [`SoapClient`].
pub struct SoapClientBuilder {
    config: ClientConfig,
    provider: Option<Arc<dyn CredentialProvider>>,
    signer: Option<Arc<dyn HeaderSigner>>,
    transport: Option<Arc<dyn Transport>>,
    diagnostics: Option<Arc<dyn DiagnosticsSink>>,
}

impl SoapClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            provider: None,
            signer: None,
            transport: None,
            diagnostics: None,
        }
    }

    pub fn credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn header_signer(mut self, signer: Arc<dyn HeaderSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn build(self) -> SoapClient {
        let settings = &self.config.settings;
        let expiry = Duration::seconds(settings.auth_token_expiry_secs);
        let mut credentials = CredentialState::new(expiry);
        if let Some(token) = self.config.headers.auth_token.as_deref().filter(|t| !t.is_empty()) {
            credentials = credentials.with_credential(Credential::issued_now(token));
        }

        let transport = self.transport.unwrap_or_else(|| {
            let timeout = settings.timeout_secs.map(StdDuration::from_secs);
            Arc::new(UreqTransport::with_timeout(timeout))
        });
        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| Arc::new(TracingSink));

        debug!(
            strict = settings.strict,
            debug = settings.debug,
            has_provider = self.provider.is_some(),
            has_signer = self.signer.is_some(),
            "Created SOAP client"
        );

        let session = Session {
            credentials,
            headers: self.config.headers.clone(),
            challenge: None,
            usage: UsageCounters::default(),
            last_trace: None,
        };
        SoapClient {
            shared: Arc::new(ClientShared {
                config: self.config,
                session: Mutex::new(session),
                provider: self.provider,
                signer: self.signer,
                transport,
                diagnostics,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{BearerToken, StaticCredentialProvider};
    use crate::error::SoapError;

    fn identity() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.headers.email = Some("user@example.com".to_string());
        config.headers.password = Some("secret".to_string());
        config.headers.developer_token = Some("dev".to_string());
        config
    }

    #[test]
    fn test_usage_counters() {
        let mut usage = UsageCounters::default();
        usage.record(Some(10), Some(2));
        usage.record(Some(5), None);
        assert_eq!(usage.total_units, 15);
        assert_eq!(usage.total_operations, 2);
        assert_eq!(usage.last_units, 5);
        assert_eq!(usage.last_operations, 0);
    }

    #[test]
    fn test_config_token_seeds_credential() {
        let mut config = ClientConfig::default();
        config.headers.auth_token = Some("seeded".to_string());
        let client = SoapClient::new(config);
        assert_eq!(client.credential().map(|c| c.token), Some("seeded".to_string()));
    }

    #[test]
    fn test_refresh_through_provider() {
        let client = SoapClient::builder(identity())
            .credential_provider(Arc::new(StaticCredentialProvider::new("fresh")))
            .build();
        let shared = &client.shared;
        let mut session = shared.session.lock();
        shared.ensure_credential(&mut session).unwrap();
        assert_eq!(session.headers.auth_token.as_deref(), Some("fresh"));

        let wire = shared.wire_headers(&session).unwrap();
        assert_eq!(wire[0], ("authToken".to_string(), "fresh".to_string()));
    }

    #[test]
    fn test_refresh_without_identity_fails() {
        let client = SoapClient::builder(ClientConfig::default())
            .credential_provider(Arc::new(StaticCredentialProvider::new("fresh")))
            .build();
        let shared = &client.shared;
        let mut session = shared.session.lock();
        let err = shared.ensure_credential(&mut session).unwrap_err();
        assert!(matches!(err, SoapError::AuthToken(_)));
    }

    #[test]
    fn test_signer_skips_login_and_token_header() {
        let mut config = identity();
        config.headers.auth_token = Some("stale".to_string());
        let client = SoapClient::builder(config)
            .credential_provider(Arc::new(StaticCredentialProvider::new("fresh")))
            .header_signer(Arc::new(BearerToken::new("oauth")))
            .build();
        let shared = &client.shared;
        let mut session = shared.session.lock();
        shared.ensure_credential(&mut session).unwrap();
        assert_eq!(session.headers.auth_token.as_deref(), Some("stale"));

        let wire = shared.wire_headers(&session).unwrap();
        assert!(wire.iter().all(|(name, _)| name != "authToken"));
        assert_eq!(wire[0].0, "developerToken");
    }

    #[test]
    fn test_required_headers_checked() {
        let client = SoapClient::new(ClientConfig::default());
        let shared = &client.shared;
        let err = shared.check_required_headers(&shared.session.lock()).unwrap_err();
        assert!(matches!(err, SoapError::SchemaViolation(_)));

        let client = SoapClient::new(identity());
        let shared = &client.shared;
        assert!(shared.check_required_headers(&shared.session.lock()).is_ok());

        let client = SoapClient::builder(ClientConfig::default())
            .header_signer(Arc::new(BearerToken::new("oauth")))
            .build();
        let shared = &client.shared;
        assert!(shared.check_required_headers(&shared.session.lock()).is_ok());
    }

    #[test]
    fn test_header_setters() {
        let client = SoapClient::new(ClientConfig::default());
        client.set_validate_only(true);
        client.set_client_customer_id(Some("123-456-7890".to_string()));
        let headers = client.headers();
        assert_eq!(headers.get("validateOnly"), Some("true"));
        assert_eq!(headers.get("clientCustomerId"), Some("123-456-7890"));
    }
}

//! Credential provider interface, cached credential state and header signers.

use crate::error::{Result, SoapError};
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Default lifetime of a login token: 23 hours.
pub const DEFAULT_TOKEN_EXPIRY_SECS: i64 = 23 * 60 * 60;

/// A login token and the time it was issued.
#[derive(Clone, PartialEq)]
pub struct Credential {
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(token: impl Into<String>, issued_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            issued_at,
        }
    }

    /// A credential issued now.
    pub fn issued_now(token: impl Into<String>) -> Self {
        Self::new(token, Utc::now())
    }

    pub fn is_expired(&self, expiry: Duration, now: DateTime<Utc>) -> bool {
        now - self.issued_at >= expiry
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Answer to a login challenge, sent along with a retried login.
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeAnswer {
    pub token: String,
    pub answer: String,
}

/// Identity inputs for a login.
#[derive(Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub challenge: Option<ChallengeAnswer>,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Acquires login tokens.
///
/// Implementations return [`SoapError::AuthChallenge`] when the login
/// service requires a challenge to be answered, and [`SoapError::AuthToken`]
/// for any other authentication failure.
pub trait CredentialProvider: Send + Sync {
    fn fetch(&self, request: &LoginRequest) -> Result<Credential>;
}

/// Pre-signed credential scheme. When configured, the login token header is
/// not sent and an `Authorization` HTTP header is added instead.
pub trait HeaderSigner: Send + Sync {
    fn authorization(&self, url: &str) -> Result<String>;
}

/// Provider handing out a fixed token.
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    token: String,
}

impl StaticCredentialProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn fetch(&self, _request: &LoginRequest) -> Result<Credential> {
        Ok(Credential::issued_now(self.token.clone()))
    }
}

/// Signer for an already-obtained bearer (e.g. OAuth2 access) token.
#[derive(Clone)]
pub struct BearerToken {
    token: String,
}

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

impl HeaderSigner for BearerToken {
    fn authorization(&self, _url: &str) -> Result<String> {
        if self.token.is_empty() {
            return Err(SoapError::AuthToken("Bearer token is empty".to_string()));
        }
        Ok(format!("Bearer {}", self.token))
    }
}

/// The client's cached credential.
#[derive(Debug, Clone)]
pub struct CredentialState {
    credential: Option<Credential>,
    expiry: Duration,
}

impl CredentialState {
    pub fn new(expiry: Duration) -> Self {
        Self {
            credential: None,
            expiry,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn current(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Absent or older than the expiry window.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match &self.credential {
            Some(credential) => credential.is_expired(self.expiry, now),
            None => true,
        }
    }

    /// Log in through `provider` and cache the new credential.
    pub fn refresh(
        &mut self,
        provider: &dyn CredentialProvider,
        request: &LoginRequest,
    ) -> Result<&Credential> {
        if request.email.is_empty() || request.password.is_empty() {
            return Err(SoapError::AuthToken(
                "Required authentication headers, 'email' and 'password', are missing"
                    .to_string(),
            ));
        }
        let credential = provider.fetch(request)?;
        Ok(self.credential.insert(credential))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ChallengingProvider;

    impl CredentialProvider for ChallengingProvider {
        fn fetch(&self, request: &LoginRequest) -> Result<Credential> {
            match &request.challenge {
                Some(answer) if answer.answer == "42" => Ok(Credential::issued_now("tok")),
                _ => Err(SoapError::AuthChallenge {
                    token: "ctoken".to_string(),
                    url: "https://login.example.com/challenge".to_string(),
                }),
            }
        }
    }

    fn login(challenge: Option<ChallengeAnswer>) -> LoginRequest {
        LoginRequest {
            email: "user@example.com".to_string(),
            password: "secret".to_string(),
            challenge,
        }
    }

    #[test]
    fn test_expiry_window() {
        let issued = Utc::now();
        let credential = Credential::new("tok", issued);
        let expiry = Duration::seconds(DEFAULT_TOKEN_EXPIRY_SECS);
        assert!(!credential.is_expired(expiry, issued + Duration::hours(22)));
        assert!(credential.is_expired(expiry, issued + Duration::hours(23)));
    }

    #[test]
    fn test_needs_refresh() {
        let now = Utc::now();
        let state = CredentialState::new(Duration::hours(23));
        assert!(state.needs_refresh(now));

        let state = state.with_credential(Credential::new("tok", now - Duration::hours(1)));
        assert!(!state.needs_refresh(now));
        assert!(state.needs_refresh(now + Duration::hours(23)));
    }

    #[test]
    fn test_refresh_requires_identity() {
        let mut state = CredentialState::new(Duration::hours(23));
        let mut request = login(None);
        request.password.clear();
        let err = state
            .refresh(&StaticCredentialProvider::new("tok"), &request)
            .unwrap_err();
        assert!(matches!(err, SoapError::AuthToken(_)));
        assert!(state.current().is_none());
    }

    #[test]
    fn test_challenge_round_trip() {
        let mut state = CredentialState::new(Duration::hours(23));
        let err = state.refresh(&ChallengingProvider, &login(None)).unwrap_err();
        match err {
            SoapError::AuthChallenge { token, url } => {
                assert_eq!(token, "ctoken");
                assert!(url.ends_with("/challenge"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let answer = ChallengeAnswer {
            token: "ctoken".to_string(),
            answer: "42".to_string(),
        };
        let credential = state
            .refresh(&ChallengingProvider, &login(Some(answer)))
            .unwrap();
        assert_eq!(credential.token, "tok");
    }

    #[test]
    fn test_bearer_signer() {
        assert_eq!(
            BearerToken::new("abc").authorization("https://x").unwrap(),
            "Bearer abc"
        );
        assert!(BearerToken::new("").authorization("https://x").is_err());
        assert!(!format!("{:?}", BearerToken::new("abc")).contains("abc"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!("{:?}", login(None));
        assert!(!debug.contains("secret"));
        assert!(!format!("{:?}", Credential::issued_now("tok")).contains("tok\""));
    }
}

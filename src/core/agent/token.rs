use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};

use super::AgentError;

const TOKEN_LIFETIME_SECS: i64 = 3600;

/// Produces a bearer token for each outgoing request.
pub trait TokenSource: Send + Sync {
    fn issue(&self) -> Result<String, AgentError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeypairClaims {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs short-lived RS256 keypair JWTs from a PEM private key.
pub struct KeypairTokenIssuer {
    account: String,
    user: String,
    fingerprint: String,
    key: EncodingKey,
}

impl KeypairTokenIssuer {
    pub fn new(
        account: &str,
        user: &str,
        fingerprint: &str,
        private_key_pem: &[u8],
    ) -> Result<Self, AgentError> {
        if account.trim().is_empty() {
            return Err(AgentError::MissingConfig("account"));
        }
        if user.trim().is_empty() {
            return Err(AgentError::MissingConfig("user"));
        }
        if fingerprint.trim().is_empty() {
            return Err(AgentError::MissingConfig("public_key_fingerprint"));
        }
        let key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| AgentError::Token(format!("invalid RSA private key: {}", e)))?;

        Ok(Self {
            account: account.trim().to_string(),
            user: user.trim().to_uppercase(),
            fingerprint: fingerprint.trim().to_string(),
            key,
        })
    }

    /// `<ACCOUNT>.<USER>`, the token subject.
    pub fn qualified_user(&self) -> String {
        format!("{}.{}", self.account, self.user)
    }

    pub fn claims_at(&self, issued_at: i64) -> KeypairClaims {
        let subject = self.qualified_user();
        KeypairClaims {
            iss: format!("{}.{}", subject, self.fingerprint),
            sub: subject,
            iat: issued_at,
            exp: issued_at + TOKEN_LIFETIME_SECS,
        }
    }
}

impl TokenSource for KeypairTokenIssuer {
    fn issue(&self) -> Result<String, AgentError> {
        let claims = self.claims_at(Utc::now().timestamp());
        encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| AgentError::Token(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) const TEST_PRIVATE_KEY: &str = include_str!("testdata/test_rsa_key.p8");

#[cfg(test)]
pub(crate) const TEST_PUBLIC_KEY: &str = include_str!("testdata/test_rsa_key.pub");

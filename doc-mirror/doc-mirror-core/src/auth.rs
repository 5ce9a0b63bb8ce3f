use crate::model::{Principal, Role};
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Principal {
            id: claims.sub,
            role: claims.role,
        }
    }
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<Claims>;
}

pub struct Hs256Verifier {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256Verifier {
    /// `exp` is checked when present but not required.
    pub fn new(secret: String) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Reject tokens that carry no `exp` claim.
    pub fn require_exp(mut self) -> Self {
        self.validation.required_spec_claims.insert("exp".to_string());
        self
    }
}

#[async_trait]
impl TokenVerifier for Hs256Verifier {
    async fn verify(&self, token: &str) -> Option<Claims> {
        decode::<Claims>(token, &self.key, &self.validation)
            .ok()
            .map(|d| d.claims)
    }
}

/// Verifier that accepts nothing; used when no signing secret is configured.
pub struct RejectAll;

#[async_trait]
impl TokenVerifier for RejectAll {
    async fn verify(&self, _token: &str) -> Option<Claims> {
        None
    }
}

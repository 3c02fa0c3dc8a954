//! JWT verification for the chat transports.
//!
//! Token issuance happens elsewhere; this module only validates HS256
//! signatures against the shared `AUTH_SECRET` and extracts the customer
//! identity from the `sub` claim.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use voxgate_core::error::GatewayError;

/// Claims the gateway cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Customer identity.
    pub sub: String,
    /// Expiry, seconds since epoch. Enforced by validation.
    pub exp: usize,
}

/// Black-box HS256 verifier.
#[derive(Clone)]
pub struct AuthVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl AuthVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Validate a bearer token and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, GatewayError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| GatewayError::Authentication(e.to_string()))
    }

    /// Extract and verify an `Authorization: Bearer …` header.
    pub fn verify_bearer(
        &self,
        headers: &axum::http::HeaderMap,
    ) -> Result<Claims, GatewayError> {
        let token = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| {
                GatewayError::Authentication("missing Authorization bearer token".into())
            })?;
        self.verify(token)
    }
}

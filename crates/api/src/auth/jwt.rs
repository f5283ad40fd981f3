//! JWT access-token generation and validation.
//!
//! Access tokens are HS256-signed JWTs containing a [`Claims`] payload that
//! carries the caller's tenant and capability set.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use waybill_core::permissions::Principal;
use waybill_core::types::PulId;

/// JWT claims embedded in every access token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject -- the user id.
    pub sub: PulId,
    pub org: PulId,
    pub bu: PulId,
    /// The user's role name (e.g. `"admin"`, `"dispatcher"`).
    pub role: String,
    /// Capability strings such as `user:manage`.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: i64,
    /// Unique token identifier (UUID v4).
    pub jti: String,
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Principal {
            user_id: claims.sub,
            organization_id: claims.org,
            business_unit_id: claims.bu,
            role: claims.role,
            permissions: claims.permissions,
        }
    }
}

/// Configuration for JWT token generation and validation.
#[derive(Clone)]
pub struct JwtConfig {
    /// HMAC-SHA256 secret used to sign and verify tokens.
    pub secret: String,
    /// Access token lifetime in minutes.
    pub access_token_expiry_mins: i64,
}

/// Default access token expiry in minutes.
const DEFAULT_ACCESS_EXPIRY_MINS: i64 = 60;

impl JwtConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            access_token_expiry_mins: DEFAULT_ACCESS_EXPIRY_MINS,
        }
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("access_token_expiry_mins", &self.access_token_expiry_mins)
            .finish()
    }
}

/// Generate an HS256 access token for `principal`.
pub fn generate_access_token(
    principal: &Principal,
    config: &JwtConfig,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp();

    let claims = Claims {
        sub: principal.user_id.clone(),
        org: principal.organization_id.clone(),
        bu: principal.business_unit_id.clone(),
        role: principal.role.clone(),
        permissions: principal.permissions.clone(),
        exp: now + config.access_token_expiry_mins * 60,
        iat: now,
        jti: Uuid::new_v4().to_string(),
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
}

/// Validate and decode an access token, returning the embedded [`Claims`].
pub fn validate_token(
    token: &str,
    config: &JwtConfig,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(), // HS256, validates exp
    )?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use waybill_core::permissions::USER_MANAGE;
    use waybill_core::types::prefixes;

    fn test_config() -> JwtConfig {
        JwtConfig::new("test-secret-that-is-long-enough-for-hmac")
    }

    fn principal() -> Principal {
        Principal {
            user_id: PulId::new(prefixes::USER),
            organization_id: PulId::new(prefixes::ORGANIZATION),
            business_unit_id: PulId::new(prefixes::BUSINESS_UNIT),
            role: "dispatcher".into(),
            permissions: vec![USER_MANAGE.to_string()],
        }
    }

    #[test]
    fn token_round_trips_the_principal() {
        let config = test_config();
        let p = principal();
        let token = generate_access_token(&p, &config).expect("token generation should succeed");

        let claims = validate_token(&token, &config).expect("token validation should succeed");
        assert!(claims.exp > claims.iat);
        assert!(!claims.jti.is_empty());

        let back = Principal::from(claims);
        assert_eq!(back.user_id, p.user_id);
        assert_eq!(back.organization_id, p.organization_id);
        assert_eq!(back.business_unit_id, p.business_unit_id);
        assert_eq!(back.permissions, p.permissions);
    }

    #[test]
    fn expired_token_fails() {
        let config = test_config();
        let p = principal();
        // Well past the default 60-second leeway.
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: p.user_id,
            org: p.organization_id,
            bu: p.business_unit_id,
            role: p.role,
            permissions: Vec::new(),
            exp: now - 300,
            iat: now - 600,
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.secret.as_bytes()),
        )
        .expect("encoding should succeed");

        assert!(validate_token(&token, &config).is_err());
    }

    #[test]
    fn different_secret_fails() {
        let token = generate_access_token(&principal(), &JwtConfig::new("secret-alpha"))
            .expect("token generation should succeed");
        assert!(validate_token(&token, &JwtConfig::new("secret-bravo")).is_err());
    }
}

/// JWT validation for Nova services
///
/// Tokens are RS256 (RSA with SHA-256) only. Symmetric algorithms are rejected
/// to rule out algorithm confusion.
///
/// Keys are owned by explicitly constructed values (`JwtValidator`, `JwtIssuer`)
/// that the process bootstrap creates once and hands to whoever needs them.
///
/// ```rust,no_run
/// use crypto_core::jwt::JwtValidator;
///
/// let pem = std::env::var("JWT_PUBLIC_KEY_PEM").unwrap();
/// let validator = JwtValidator::from_rsa_pem(&pem).unwrap();
/// let user_id = validator.user_id("eyJ...").unwrap();
/// ```
use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ACCESS_TOKEN_EXPIRY_HOURS: i64 = 1;

/// JWT algorithm - MUST be RS256 for all Nova services
const JWT_ALGORITHM: Algorithm = Algorithm::RS256;

/// JWT Claims structure - standard claims plus Nova-specific fields
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Token type: "access" or "refresh"
    pub token_type: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
}

/// Validates access tokens against an RSA public key
#[derive(Clone)]
pub struct JwtValidator {
    decoding_key: DecodingKey,
}

impl JwtValidator {
    /// Build a validator from a PEM-encoded RSA public key
    pub fn from_rsa_pem(public_key_pem: &str) -> Result<Self> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| anyhow!("Failed to parse RSA public key: {e}"))?;
        Ok(Self { decoding_key })
    }

    /// Validate and decode a JWT token
    ///
    /// Verifies the RS256 signature and expiration. There is no fallback to
    /// weaker algorithms.
    pub fn validate(&self, token: &str) -> Result<TokenData<Claims>> {
        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.validate_exp = true;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow!("Token validation failed: {e}"))
    }

    /// Extract the user id from a validated access token
    ///
    /// Refresh tokens are rejected: they must never authenticate API calls.
    pub fn user_id(&self, token: &str) -> Result<Uuid> {
        let token_data = self.validate(token)?;
        if token_data.claims.token_type != "access" {
            return Err(anyhow!(
                "Unexpected token type: {}",
                token_data.claims.token_type
            ));
        }
        Uuid::parse_str(&token_data.claims.sub)
            .map_err(|e| anyhow!("Invalid user ID format in token: {e}"))
    }
}

/// Issues access tokens. Only identity-owning services and tests hold the
/// private key.
#[derive(Clone)]
pub struct JwtIssuer {
    encoding_key: EncodingKey,
}

impl JwtIssuer {
    pub fn from_rsa_pem(private_key_pem: &str) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| anyhow!("Failed to parse RSA private key: {e}"))?;
        Ok(Self { encoding_key })
    }

    pub fn issue(&self, user_id: Uuid, token_type: &str, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            token_type: token_type.to_string(),
            email: String::new(),
            username: String::new(),
        };

        encode(&Header::new(JWT_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| anyhow!("Failed to generate {token_type} token: {e}"))
    }

    /// Generate a new access token (1 hour lifetime)
    pub fn issue_access_token(&self, user_id: Uuid) -> Result<String> {
        self.issue(user_id, "access", Duration::hours(ACCESS_TOKEN_EXPIRY_HOURS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test RSA key pair - FOR TESTING ONLY
    const TEST_PRIVATE_KEY: &str = include_str!("../tests/fixtures/jwt_test_private.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("../tests/fixtures/jwt_test_public.pem");

    fn keys() -> (JwtIssuer, JwtValidator) {
        (
            JwtIssuer::from_rsa_pem(TEST_PRIVATE_KEY).unwrap(),
            JwtValidator::from_rsa_pem(TEST_PUBLIC_KEY).unwrap(),
        )
    }

    #[test]
    fn test_validate_valid_token() {
        let (issuer, validator) = keys();
        let user_id = Uuid::new_v4();
        let token = issuer.issue_access_token(user_id).unwrap();

        assert_eq!(token.matches('.').count(), 2);
        let data = validator.validate(&token).unwrap();
        assert_eq!(data.claims.sub, user_id.to_string());
        assert_eq!(data.claims.token_type, "access");
        assert_eq!(validator.user_id(&token).unwrap(), user_id);
    }

    #[test]
    fn test_validate_invalid_token() {
        let (_, validator) = keys();
        assert!(validator.validate("invalid.token.here").is_err());
    }

    #[test]
    fn test_validate_tampered_token() {
        let (issuer, validator) = keys();
        let token = issuer.issue_access_token(Uuid::new_v4()).unwrap();

        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        parts[2] = parts[2].chars().rev().collect();
        assert!(validator.validate(&parts.join(".")).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let (issuer, validator) = keys();
        let token = issuer
            .issue(Uuid::new_v4(), "access", Duration::hours(-2))
            .unwrap();
        assert!(validator.validate(&token).is_err());
    }

    #[test]
    fn test_refresh_token_cannot_authenticate() {
        let (issuer, validator) = keys();
        let token = issuer
            .issue(Uuid::new_v4(), "refresh", Duration::days(30))
            .unwrap();
        assert!(validator.validate(&token).is_ok());
        assert!(validator.user_id(&token).is_err());
    }

    #[test]
    fn test_bad_pem_rejected() {
        assert!(JwtValidator::from_rsa_pem("not a key").is_err());
        assert!(JwtIssuer::from_rsa_pem("not a key").is_err());
    }
}

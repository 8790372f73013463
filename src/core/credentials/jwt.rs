//! JWT-backed claim issuance and verification
//!
//! Room claims are signed with HS256. A claim is a pure value: issuing one
//! never creates a room, and verifying one yields exactly the payload that
//! was signed, plus standard expiry/issuer checks.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::relay::{RoomClaim, User};

/// Default claim expiration time (1 hour): long enough to hand a join link
/// to someone, short enough that a leaked token goes stale.
const CLAIM_EXPIRATION_MINUTES: i64 = 60;

/// Byte length of generated secure ids (hex-encoded, so twice as many chars)
const SECURE_ID_BYTES: usize = 32;

/// Credentials configuration
#[derive(Clone)]
pub struct CredentialsConfig {
    /// Secret key for signing claims
    pub secret: String,
    /// Claim expiration in minutes
    pub claim_expiration_minutes: i64,
    /// Token issuer
    pub issuer: String,
}

impl CredentialsConfig {
    /// Create a new credentials configuration
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            claim_expiration_minutes: CLAIM_EXPIRATION_MINUTES,
            issuer: "syncrelay".to_string(),
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Result<Self, CredentialsError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| CredentialsError::MissingSecret)?;

        let expiration = std::env::var("JWT_CLAIM_EXPIRATION_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(CLAIM_EXPIRATION_MINUTES);

        let issuer = std::env::var("JWT_ISSUER").unwrap_or_else(|_| "syncrelay".to_string());

        Ok(Self {
            secret,
            claim_expiration_minutes: expiration,
            issuer,
        })
    }

    /// Set claim expiration
    pub fn claim_expiration(mut self, minutes: i64) -> Self {
        self.claim_expiration_minutes = minutes;
        self
    }

    /// Set issuer
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }
}

/// Credentials errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("JWT_SECRET environment variable not set")]
    MissingSecret,

    #[error("Token encoding failed: {0}")]
    EncodingError(String),

    #[error("Token decoding failed: {0}")]
    DecodingError(String),

    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Claim payload rejected")]
    RejectedClaim,
}

impl From<jsonwebtoken::errors::Error> for CredentialsError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => CredentialsError::Expired,
            ErrorKind::InvalidToken | ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                CredentialsError::InvalidToken
            }
            _ => CredentialsError::DecodingError(err.to_string()),
        }
    }
}

/// JWT payload: the room claim fields verbatim, plus registered claims.
#[derive(Debug, Serialize, Deserialize)]
struct ClaimPayload {
    /// Target room id
    room: String,
    /// User identity embedded at issuance
    user: User,
    /// Host role flag
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    host: bool,
    /// Issued at (Unix timestamp)
    iat: i64,
    /// Expiration time (Unix timestamp)
    exp: i64,
    /// Issuer
    iss: String,
    /// Unique identifier for this token
    jti: String,
}

/// Credentials manager: opaque id generation plus claim signing and
/// verification.
#[derive(Clone)]
pub struct CredentialsManager {
    config: CredentialsConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl CredentialsManager {
    /// Create a new credentials manager
    pub fn new(config: CredentialsConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// Create a credentials manager from environment variables
    pub fn from_env() -> Result<Self, CredentialsError> {
        let config = CredentialsConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Generate a cryptographically unpredictable unique id.
    ///
    /// Used for room ids and any other peer-facing token that must not be
    /// guessable.
    pub fn secure_id(&self) -> String {
        let mut bytes = [0u8; SECURE_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Sign a room claim. The decoded payload carries the claim fields
    /// exactly as given.
    pub fn generate_jwt(&self, claim: &RoomClaim) -> Result<String, CredentialsError> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.config.claim_expiration_minutes);

        let payload = ClaimPayload {
            room: claim.room.clone(),
            user: claim.user.clone(),
            host: claim.host,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.config.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &payload, &self.encoding_key)
            .map_err(|e| CredentialsError::EncodingError(e.to_string()))
    }

    /// Verify a claim token: signature, expiry, issuer, then the caller's
    /// shape predicate. Returns the embedded claim on success.
    pub fn verify_jwt<F>(&self, token: &str, predicate: F) -> Result<RoomClaim, CredentialsError>
    where
        F: FnOnce(&RoomClaim) -> bool,
    {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.config.issuer]);
        // Strict expiration checking
        validation.leeway = 0;

        let data = decode::<ClaimPayload>(token, &self.decoding_key, &validation)?;

        let claim = RoomClaim {
            room: data.claims.room,
            user: data.claims.user,
            host: data.claims.host,
        };

        if !predicate(&claim) {
            return Err(CredentialsError::RejectedClaim);
        }

        Ok(claim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_manager() -> CredentialsManager {
        CredentialsManager::new(CredentialsConfig::new(
            "test_secret_key_for_testing_only_32bytes!",
        ))
    }

    fn host_claim() -> RoomClaim {
        RoomClaim {
            room: "a1b2c3".to_string(),
            user: User::new("u1", "Ann").with_email("a@x.com"),
            host: true,
        }
    }

    // ========================================================================
    // Secure Id Tests
    // ========================================================================

    #[test]
    fn test_secure_id_length_and_charset() {
        let manager = create_test_manager();
        let id = manager.secure_id();

        assert_eq!(id.len(), SECURE_ID_BYTES * 2);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_secure_ids_are_unique() {
        let manager = create_test_manager();
        let ids: Vec<String> = (0..100).map(|_| manager.secure_id()).collect();

        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    // ========================================================================
    // Claim Roundtrip Tests
    // ========================================================================

    #[test]
    fn test_claim_roundtrip_exact() {
        let manager = create_test_manager();
        let claim = host_claim();

        let token = manager.generate_jwt(&claim).unwrap();
        let decoded = manager.verify_jwt(&token, |_| true).unwrap();

        // The decoded payload equals the issued claim exactly
        assert_eq!(decoded, claim);
    }

    #[test]
    fn test_guest_claim_roundtrip() {
        let manager = create_test_manager();
        let claim = RoomClaim {
            room: "a1b2c3".to_string(),
            user: User::new("u2", "Bob"),
            host: false,
        };

        let token = manager.generate_jwt(&claim).unwrap();
        let decoded = manager.verify_jwt(&token, |_| true).unwrap();

        assert_eq!(decoded, claim);
        assert!(!decoded.host);
    }

    #[test]
    fn test_predicate_rejection() {
        let manager = create_test_manager();
        let token = manager.generate_jwt(&host_claim()).unwrap();

        let result = manager.verify_jwt(&token, |c| c.room == "other-room");
        assert!(matches!(result, Err(CredentialsError::RejectedClaim)));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let issuing = create_test_manager();
        let verifying = CredentialsManager::new(CredentialsConfig::new("a_different_secret"));

        let token = issuing.generate_jwt(&host_claim()).unwrap();
        let result = verifying.verify_jwt(&token, |_| true);

        assert!(matches!(result, Err(CredentialsError::InvalidToken)));
    }

    #[test]
    fn test_expired_claim_fails() {
        let config =
            CredentialsConfig::new("test_secret_key_for_testing_only_32bytes!").claim_expiration(-1);
        let manager = CredentialsManager::new(config);

        let token = manager.generate_jwt(&host_claim()).unwrap();
        let result = manager.verify_jwt(&token, |_| true);

        assert!(matches!(result, Err(CredentialsError::Expired)));
    }

    #[test]
    fn test_garbage_token_fails() {
        let manager = create_test_manager();
        assert!(manager.verify_jwt("not.a.token", |_| true).is_err());
    }

    #[test]
    fn test_wrong_issuer_fails() {
        let issuing = CredentialsManager::new(
            CredentialsConfig::new("test_secret_key_for_testing_only_32bytes!").issuer("other"),
        );
        let verifying = create_test_manager();

        let token = issuing.generate_jwt(&host_claim()).unwrap();
        assert!(verifying.verify_jwt(&token, |_| true).is_err());
    }

    // ========================================================================
    // Config Tests
    // ========================================================================

    #[test]
    fn test_config_builder() {
        let config = CredentialsConfig::new("secret")
            .claim_expiration(5)
            .issuer("my_relay");

        assert_eq!(config.claim_expiration_minutes, 5);
        assert_eq!(config.issuer, "my_relay");
    }

    #[test]
    fn test_config_defaults() {
        let config = CredentialsConfig::new("secret");
        assert_eq!(config.claim_expiration_minutes, CLAIM_EXPIRATION_MINUTES);
        assert_eq!(config.issuer, "syncrelay");
    }
}

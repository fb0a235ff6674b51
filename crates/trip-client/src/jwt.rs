//! JWT claim inspection
//!
//! Decode-only helpers for looking inside access and refresh tokens.
//! Signatures are never verified client-side; verification belongs to
//! the issuing server. Nothing decoded here feeds a trust decision
//! beyond expiry.
//!
//! Decode failures are swallowed: claim access is advisory, so a
//! malformed token yields an empty claim set and a logged warning
//! rather than an error.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde_json::{Map, Value};
use tracing::warn;

/// Claim names registered by RFC 7519.
const REGISTERED_CLAIMS: [&str; 7] = ["iss", "sub", "aud", "exp", "nbf", "iat", "jti"];

/// Decoded JWT payload: a claim-name to value mapping with typed
/// accessors for the claims the session layer cares about and an
/// escape hatch for everything else.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// Look up a claim by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Expiry instant, if the token carries a numeric `exp` claim.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.0
            .get("exp")?
            .as_i64()
            .and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    /// All claims except the RFC 7519 registered set.
    pub fn custom(&self) -> Map<String, Value> {
        self.0
            .iter()
            .filter(|(key, _)| !REGISTERED_CLAIMS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Whether the decode produced any claims at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The full claim mapping.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Decode a token's payload without verifying its signature.
///
/// A token that is not three dot-separated segments, or whose payload
/// is not valid base64url-encoded JSON, yields an empty claim set.
pub fn decode_claims(token: &str) -> Claims {
    match try_decode(token) {
        Ok(claims) => Claims(claims),
        Err(err) => {
            warn!("JWT payload decode failed: {err}");
            Claims::default()
        }
    }
}

// Parses the whole token, not just the payload segment: a damaged
// header or signature segment yields empty claims even when the
// payload alone would decode.
fn try_decode(token: &str) -> Result<Map<String, Value>, jsonwebtoken::errors::Error> {
    let header = decode_header(token)?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    // Dummy key; signature validation is disabled above.
    let data =
        decode::<Map<String, Value>>(token, &DecodingKey::from_secret(&[]), &validation)?;

    Ok(data.claims)
}

/// Expiry instant of a token, if its payload decodes and carries `exp`.
pub fn expires_at(token: &str) -> Option<DateTime<Utc>> {
    decode_claims(token).expires_at()
}

/// Whether a token is past its `exp` claim.
///
/// A token without a readable expiry counts as expired.
pub fn is_expired(token: &str) -> bool {
    match expires_at(token) {
        Some(exp) => exp <= Utc::now(),
        None => true,
    }
}

/// Whether a token expires within `threshold` from now.
///
/// A token without a readable expiry always counts as expiring soon,
/// so callers fall through to a refresh attempt.
pub fn is_expiring_soon(token: &str, threshold: Duration) -> bool {
    match expires_at(token) {
        Some(exp) => exp - Utc::now() <= threshold,
        None => true,
    }
}

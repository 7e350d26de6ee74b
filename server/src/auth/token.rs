use std::time::Duration;

use anyhow::anyhow;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::{Principal, TokenAuthority};
use crate::config::AuthConfig;
use crate::error::ClinicalError;
use crate::models::UserRole;

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: UserRole,
    pub name: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

/// HS256 JSON Web Tokens signed with a shared secret.
pub struct HmacTokenAuthority {
    secret: Vec<u8>,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl HmacTokenAuthority {
    pub fn new(
        secret: impl AsRef<[u8]>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.secret, &config.issuer, &config.audience, config.token_ttl)
    }

    fn mac(&self) -> Result<HmacSha256, ClinicalError> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ClinicalError::Internal(anyhow!("failed to create HMAC: {e}")))
    }

    pub fn issue_at(&self, principal: &Principal, now: i64) -> Result<String, ClinicalError> {
        let claims = Claims {
            sub: principal.user_id.to_string(),
            role: principal.role,
            name: principal.display_name.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };
        self.sign(&claims)
    }

    /// Signs arbitrary claims as-is.
    pub fn sign(&self, claims: &Claims) -> Result<String, ClinicalError> {
        let claims_json = serde_json::to_vec(claims)
            .map_err(|e| ClinicalError::Internal(anyhow!("failed to serialize claims: {e}")))?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER),
            URL_SAFE_NO_PAD.encode(claims_json)
        );

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", signing_input, signature))
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<Principal, ClinicalError> {
        let invalid = |reason: &str| ClinicalError::InvalidToken(reason.to_string());

        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("malformed token"));
        };

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| invalid("malformed signature"))?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| invalid("signature mismatch"))?;

        let header: Header = URL_SAFE_NO_PAD
            .decode(header_b64)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| invalid("malformed header"))?;
        if header.alg != "HS256" {
            return Err(invalid("unsupported algorithm"));
        }

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| invalid("malformed claims"))?;

        if claims.exp <= now {
            return Err(invalid("token expired"));
        }
        if claims.iss != self.issuer || claims.aud != self.audience {
            return Err(invalid("token issued for another service"));
        }
        let user_id = claims.sub.parse().map_err(|_| invalid("malformed subject"))?;

        Ok(Principal {
            user_id,
            role: claims.role,
            display_name: claims.name,
        })
    }
}

impl TokenAuthority for HmacTokenAuthority {
    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn issue(&self, principal: &Principal) -> Result<String, ClinicalError> {
        self.issue_at(principal, Utc::now().timestamp())
    }

    fn verify(&self, token: &str) -> Result<Principal, ClinicalError> {
        self.verify_at(token, Utc::now().timestamp())
    }
}

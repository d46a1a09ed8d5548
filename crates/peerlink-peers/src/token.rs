//! Tokens attached to new peer registrations.

use std::path::Path;

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::registry::PeerId;

/// Supplies the credential presented to a peer when connecting to it.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, id: &PeerId) -> Result<String, TokenError>;
}

/// One shared token for every peer.
#[derive(Clone)]
pub struct StaticTokenIssuer {
    token: String,
}

impl StaticTokenIssuer {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Read the shared token from a file, ignoring surrounding whitespace.
    pub fn from_file(path: &Path) -> Result<Self, TokenError> {
        let token = read_secret(path)?;
        Ok(Self::new(String::from_utf8_lossy(&token).into_owned()))
    }
}

#[async_trait]
impl TokenIssuer for StaticTokenIssuer {
    async fn issue(&self, _id: &PeerId) -> Result<String, TokenError> {
        Ok(self.token.clone())
    }
}

/// Claims of a peer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerClaims {
    /// JWT ID (unique per token).
    pub jti: String,
    /// Subject (peer ID being dialled).
    pub sub: String,
    /// Issuer (peer ID of the dialling process), when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiration (unix timestamp).
    pub exp: i64,
}

/// Issues a short-lived HS256 JWT per peer.
#[derive(Clone)]
pub struct JwtTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: Option<String>,
    ttl_secs: i64,
}

impl JwtTokenIssuer {
    /// Create a new `JwtTokenIssuer` with the given secret.
    pub fn new(secret: &[u8], issuer: Option<String>, ttl_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer,
            ttl_secs,
        }
    }

    /// Load the HMAC secret from a file.
    pub fn from_secret_file(
        path: &Path,
        issuer: Option<String>,
        ttl_secs: i64,
    ) -> Result<Self, TokenError> {
        let secret = read_secret(path)?;
        Ok(Self::new(&secret, issuer, ttl_secs))
    }

    /// Sign a token for `id`.
    pub fn issue_for(&self, id: &PeerId) -> Result<String, TokenError> {
        let now = now_secs();
        let exp = now
            .checked_add(self.ttl_secs)
            .ok_or(TokenError::Lifetime(self.ttl_secs))?;
        let claims = PeerClaims {
            jti: uuid::Uuid::new_v4().to_string(),
            sub: id.to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp,
        };
        Ok(jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &self.encoding_key,
        )?)
    }

    /// Validate a token and return its claims.
    pub fn validate(&self, token: &str) -> Result<PeerClaims, TokenError> {
        let data =
            jsonwebtoken::decode::<PeerClaims>(token, &self.decoding_key, &Validation::default())?;
        Ok(data.claims)
    }
}

#[async_trait]
impl TokenIssuer for JwtTokenIssuer {
    async fn issue(&self, id: &PeerId) -> Result<String, TokenError> {
        self.issue_for(id)
    }
}

fn read_secret(path: &Path) -> Result<Vec<u8>, TokenError> {
    let raw = std::fs::read(path).map_err(|source| TokenError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let trimmed = raw.trim_ascii();
    if trimmed.is_empty() {
        return Err(TokenError::Empty(path.to_path_buf()));
    }
    Ok(trimmed.to_vec())
}

fn now_secs() -> i64 {
    #[allow(clippy::cast_possible_wrap)]
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    secs
}

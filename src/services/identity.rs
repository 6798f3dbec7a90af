use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::JwtConfig;
use crate::db::Role;
use crate::error::{AppError, AppResult};
use crate::i18n;

/// The resolved identity behind a request. Passed explicitly into every engine call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl Caller {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
        }
    }

    /// Reject with an authorization error unless the caller holds `role`.
    pub fn require_role(&self, role: Role) -> AppResult<()> {
        if self.role == role {
            return Ok(());
        }
        let key = match role {
            Role::Donor => "forbidden.donor_only",
            Role::Recipient => "forbidden.recipient_only",
        };
        Err(AppError::Forbidden(i18n::t(key)))
    }
}

/// Resolves a request credential into an identity and role claim.
///
/// Session issuance and credential checks live outside this service; the
/// engine trusts whatever the gate returns.
#[async_trait]
pub trait IdentityGate: Send + Sync {
    async fn resolve(&self, credential: &str) -> AppResult<Caller>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
}

/// Identity gate verifying HS256 bearer tokens signed with a shared secret.
#[derive(Clone)]
pub struct JwtIdentityGate {
    secret: String,
    expiration_hours: i64,
}

impl JwtIdentityGate {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            secret: config.secret.clone(),
            expiration_hours: config.expiration_hours,
        }
    }

    /// Mint a token for `caller`. Used by operators and tests; the service
    /// itself never issues credentials.
    pub fn issue(&self, caller: &Caller) -> AppResult<String> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.expiration_hours);
        let claims = Claims {
            sub: caller.id.clone(),
            name: caller.name.clone(),
            role: caller.role,
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Decode and validate a JWT, returning the claims
    pub fn decode(&self, token: &str) -> AppResult<Claims> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }
}

#[async_trait]
impl IdentityGate for JwtIdentityGate {
    async fn resolve(&self, credential: &str) -> AppResult<Caller> {
        let claims = self.decode(credential)?;
        if claims.sub.trim().is_empty() {
            return Err(AppError::Unauthorized);
        }
        Ok(Caller {
            id: claims.sub,
            name: claims.name,
            role: claims.role,
        })
    }
}

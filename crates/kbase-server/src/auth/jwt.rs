use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use kbase_core::{Error, KbaseConfig, Principal, Result};

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws: Option<String>,
    pub iat: usize,
    pub exp: usize,
}

impl JwtService {
    pub fn new(secret: &str, expiry_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiry: Duration::minutes(expiry_minutes),
        }
    }

    pub fn from_config(config: &KbaseConfig) -> Self {
        Self::new(&config.jwt_secret, config.token_ttl_minutes)
    }

    pub fn issue(&self, principal: &Principal) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: principal.user_id,
            role: principal.role.to_string(),
            ws: principal.workspace_id.clone(),
            iat: now.timestamp() as usize,
            exp: (now + self.expiry).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("token signing failed: {}", e)))
    }

    /// Expired, tampered or foreign tokens are `Unauthorized`.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| Error::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbase_core::Role;

    #[test]
    fn test_issue_and_verify() {
        let jwt = JwtService::new("secret", 30);
        let p = Principal::new(7, Role::Editor, Some("hr".into()));
        let claims = jwt.verify(&jwt.issue(&p).unwrap()).unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.role, "editor");
        assert_eq!(claims.ws.as_deref(), Some("hr"));
    }

    #[test]
    fn test_rejects_foreign_and_expired_tokens() {
        let p = Principal::new(1, Role::Member, None);
        let token = JwtService::new("one", 30).issue(&p).unwrap();
        assert!(matches!(JwtService::new("two", 30).verify(&token), Err(Error::Unauthorized)));

        let expired = JwtService::new("one", -10).issue(&p).unwrap();
        assert!(matches!(JwtService::new("one", 30).verify(&expired), Err(Error::Unauthorized)));
    }
}

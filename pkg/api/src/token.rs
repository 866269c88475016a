use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub uid: u64,
    pub username: String,
    pub is_admin: bool,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 session tokens.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, issuer: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            ttl: Duration::hours(ttl_hours.max(1)),
        }
    }

    pub fn issue(&self, uid: u64, username: &str, is_admin: bool) -> anyhow::Result<String> {
        let now = Utc::now();
        let claims = Claims {
            uid,
            username: username.to_string(),
            is_admin,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| anyhow::anyhow!("Failed to sign token: {}", e))
    }

    /// Check signature, issuer and expiry.
    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid token: {}", e))?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_then_verify() {
        let issuer = TokenIssuer::new("secret", "platform", 24);
        let token = issuer.issue(7, "alice", false).unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.uid, 7);
        assert_eq!(claims.username, "alice");
        assert!(!claims.is_admin);
    }

    #[test]
    fn wrong_secret_or_issuer_is_rejected() {
        let token = TokenIssuer::new("secret", "platform", 24)
            .issue(1, "admin", true)
            .unwrap();
        assert!(TokenIssuer::new("other", "platform", 24).verify(&token).is_err());
        assert!(TokenIssuer::new("secret", "elsewhere", 24).verify(&token).is_err());
        assert!(TokenIssuer::new("secret", "platform", 24).verify("not-a-token").is_err());
    }
}

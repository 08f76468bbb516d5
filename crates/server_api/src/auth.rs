use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{Principal, Role, UserId},
    error::{ApiError, ErrorCode},
};

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_seconds: i64,
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-change-me".into(),
            token_ttl_seconds: 8 * 3600,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub name: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn principal(&self) -> Principal {
        Principal {
            id: UserId(self.sub),
            name: self.name.clone(),
            role: self.role,
        }
    }
}

pub fn issue_token(
    cfg: &AuthConfig,
    principal: &Principal,
    now: DateTime<Utc>,
) -> Result<String, ApiError> {
    let claims = Claims {
        sub: principal.id.0,
        name: principal.name.clone(),
        role: principal.role,
        iat: now.timestamp(),
        exp: (now + Duration::seconds(cfg.token_ttl_seconds)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::new(ErrorCode::Internal, format!("token mint failed: {e}")))
}

/// Rejects tokens with a bad signature or past their expiry.
pub fn verify_token(cfg: &AuthConfig, token: &str) -> Result<Claims, ApiError> {
    let mut validation = Validation::default();
    validation.leeway = 0;
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(cfg.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::unauthorized("invalid or expired session"))
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, ApiError> {
    bcrypt::hash(password, cost)
        .map_err(|e| ApiError::new(ErrorCode::Internal, format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

pub fn require_admin(principal: &Principal) -> Result<(), ApiError> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("administrator role required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> Principal {
        Principal {
            id: UserId(7),
            name: "Ops".into(),
            role: Role::Admin,
        }
    }

    #[test]
    fn issued_token_round_trips_principal() {
        let cfg = AuthConfig::default();
        let token = issue_token(&cfg, &admin(), Utc::now()).expect("token");
        let claims = verify_token(&cfg, &token).expect("claims");
        assert_eq!(claims.principal(), admin());
    }

    #[test]
    fn expired_or_foreign_tokens_are_unauthorized() {
        let cfg = AuthConfig::default();
        let stale = issue_token(&cfg, &admin(), Utc::now() - Duration::days(2)).expect("token");
        let err = verify_token(&cfg, &stale).expect_err("expired");
        assert_eq!(err.code, ErrorCode::Unauthorized);

        let other = AuthConfig {
            jwt_secret: "another".into(),
            ..AuthConfig::default()
        };
        let token = issue_token(&other, &admin(), Utc::now()).expect("token");
        assert!(verify_token(&cfg, &token).is_err());
    }

    #[test]
    fn sellers_are_not_admins() {
        let seller = Principal {
            role: Role::Seller,
            ..admin()
        };
        assert_eq!(
            require_admin(&seller).expect_err("forbidden").code,
            ErrorCode::Forbidden
        );
    }
}

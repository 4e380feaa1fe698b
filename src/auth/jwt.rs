use crate::error::{AppError, Result};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub tenant_id: Uuid,
    pub role: String,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Unauthorized("Invalid token".to_string()))
    }
}

/// Create access token (short-lived, 15 minutes). Tokens in production are
/// issued by the identity service.
#[cfg(test)]
pub fn create_access_token(user_id: Uuid, tenant_id: Uuid, role: &str, secret: &str) -> Result<String> {
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    let expiration = Utc::now()
        .checked_add_signed(Duration::minutes(15))
        .ok_or_else(|| AppError::Internal("Token expiry overflow".to_string()))?
        .timestamp();

    let claims = Claims {
        sub: user_id.to_string(),
        tenant_id,
        role: role.to_string(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to create access token: {}", e)))
}

/// Verify JWT token and extract claims
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized("Invalid token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_carries_tenant() {
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        let token = create_access_token(user_id, tenant_id, "recruiter", "secret").unwrap();

        let claims = verify_jwt(&token, "secret").unwrap();
        assert_eq!(claims.user_id().unwrap(), user_id);
        assert_eq!(claims.tenant_id, tenant_id);
        assert_eq!(claims.role, "recruiter");
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = create_access_token(Uuid::new_v4(), Uuid::new_v4(), "candidate", "secret").unwrap();
        assert!(matches!(
            verify_jwt(&token, "other-secret"),
            Err(AppError::Unauthorized(_))
        ));
    }
}

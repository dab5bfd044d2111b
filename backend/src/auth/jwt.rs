use super::models::Claims;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT encoding error: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
    #[error("JWT decoding error: {0}")]
    Decoding(String),
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime: Duration,
}

impl JwtService {
    pub fn new(secret: &str, lifetime_minutes: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            lifetime: Duration::minutes(lifetime_minutes),
        }
    }

    pub fn generate_token(&self, user_id: Uuid) -> Result<String, JwtError> {
        let now = Utc::now();
        let expiration = now + self.lifetime;

        let claims = Claims {
            sub: user_id.to_string(),
            exp: expiration.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        let header = Header::new(Algorithm::HS256);
        encode(&header, &claims, &self.encoding_key).map_err(JwtError::Encoding)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, JwtError> {
        if token.is_empty() || token.split('.').count() != 3 {
            return Err(JwtError::InvalidToken);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(token_data) => {
                log::debug!(
                    "JWT token decoded successfully. User: {}, Exp: {}",
                    token_data.claims.sub,
                    token_data.claims.exp
                );
                Ok(token_data.claims)
            }
            Err(err) => {
                log::debug!("JWT token decode error: {:?}", err);
                match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(JwtError::TokenExpired),
                    jsonwebtoken::errors::ErrorKind::InvalidToken
                    | jsonwebtoken::errors::ErrorKind::InvalidSignature => Err(JwtError::InvalidToken),
                    _ => Err(JwtError::Decoding(err.to_string())),
                }
            }
        }
    }

    /// Verifies `sub` as well and hands back the user id.
    pub fn user_id(&self, token: &str) -> Result<Uuid, JwtError> {
        let claims = self.verify_token(token)?;
        Uuid::parse_str(&claims.sub).map_err(|_| JwtError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_to_same_user() {
        let service = JwtService::new("test-secret", 30);
        let user = Uuid::new_v4();
        let token = service.generate_token(user).unwrap();

        let claims = service.verify_token(&token).unwrap();
        assert_eq!(claims.sub, user.to_string());
        assert_eq!(claims.exp - claims.iat, 30 * 60);
        assert_eq!(service.user_id(&token).unwrap(), user);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = JwtService::new("secret-a", 30)
            .generate_token(Uuid::new_v4())
            .unwrap();
        let result = JwtService::new("secret-b", 30).verify_token(&token);
        assert!(matches!(result, Err(JwtError::InvalidToken)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let service = JwtService::new("test-secret", -5);
        let token = service.generate_token(Uuid::new_v4()).unwrap();
        assert!(matches!(service.verify_token(&token), Err(JwtError::TokenExpired)));
    }

    #[test]
    fn garbage_is_rejected_before_decoding() {
        let service = JwtService::new("test-secret", 30);
        assert!(matches!(service.verify_token(""), Err(JwtError::InvalidToken)));
        assert!(matches!(service.verify_token("not-a-jwt"), Err(JwtError::InvalidToken)));
    }
}

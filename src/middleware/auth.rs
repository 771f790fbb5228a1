use axum::{
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use uuid::Uuid;

use crate::{dto::auth::Claims, error::AppError, models::Role, state::AppState};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

pub fn ensure_any_role(user: &AuthUser, roles: &[Role]) -> Result<(), AppError> {
    if !roles.contains(&user.role) {
        return Err(AppError::forbidden());
    }
    Ok(())
}

pub fn ensure_admin(user: &AuthUser) -> Result<(), AppError> {
    ensure_any_role(user, &[Role::Admin])
}

/// The single "admin, or the owner of this resource" rule used by every read that
/// exposes someone's order or payment.
pub fn ensure_owner_or_admin(user: &AuthUser, owner_id: Uuid) -> Result<(), AppError> {
    if user.is_admin() || user.user_id == owner_id {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}

pub fn decode_claims(token: &str, secret: &str) -> Result<AuthUser, AppError> {
    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))?;

    let user_id = Uuid::parse_str(&decoded.claims.sub)
        .map_err(|_| AppError::Unauthorized("Invalid user id in token".into()))?;
    let role = decoded
        .claims
        .role
        .parse::<Role>()
        .map_err(|_| AppError::Unauthorized("Invalid role in token".into()))?;

    Ok(AuthUser { user_id, role })
}

fn bearer_token(parts: &Parts) -> Result<Option<&str>, AppError> {
    let Some(auth_header) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let auth_str = auth_header
        .to_str()
        .map_err(|_| AppError::Unauthorized("Invalid Authorization header".into()))?;

    let token = auth_str
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid Authorization scheme".into()))?;

    Ok(Some(token.trim()))
}

impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?
            .ok_or_else(|| AppError::Unauthorized("Authorization header required".into()))?;
        let state = AppState::from_ref(state);
        decode_claims(token, &state.config.jwt_secret)
    }
}

/// A missing header means "no identity"; a present but bad token is still rejected.
impl<S> OptionalFromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        match bearer_token(parts)? {
            None => Ok(None),
            Some(token) => {
                let state = AppState::from_ref(state);
                decode_claims(token, &state.config.jwt_secret).map(Some)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn owner_or_admin_policy() {
        let customer = user(Role::Customer);
        let admin = user(Role::Admin);

        assert!(ensure_owner_or_admin(&customer, customer.user_id).is_ok());
        assert!(ensure_owner_or_admin(&admin, customer.user_id).is_ok());
        assert!(matches!(
            ensure_owner_or_admin(&customer, Uuid::new_v4()),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn role_gates() {
        assert!(ensure_admin(&user(Role::Admin)).is_ok());
        assert!(ensure_admin(&user(Role::Customer)).is_err());
        assert!(ensure_any_role(&user(Role::Customer), &[Role::Admin, Role::Customer]).is_ok());
    }

    #[test]
    fn garbage_tokens_are_unauthorized() {
        let err = decode_claims("not-a-jwt", "secret").unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}

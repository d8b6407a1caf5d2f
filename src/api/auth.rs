//! Caller identity
//!
//! Authentication happens upstream. The gateway forwards the verified identity
//! in `x-user-id`, `x-user-email` and `x-user-role`.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::EcommerceError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_ROLE_HEADER: &str = "x-user-role";

const ADMIN_ROLE: &str = "ADMIN";

#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub role: Option<String>,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role.as_deref().is_some_and(|r| r.eq_ignore_ascii_case(ADMIN_ROLE))
    }
}

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts.headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned)
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = EcommerceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, USER_ID_HEADER)
            .and_then(|raw| Uuid::parse_str(&raw).ok())
            .ok_or_else(|| {
                tracing::debug!(uri = %parts.uri, "request without a valid caller identity");
                EcommerceError::Unauthenticated
            })?;
        Ok(Self { id, email: header(parts, USER_EMAIL_HEADER), role: header(parts, USER_ROLE_HEADER) })
    }
}

/// A caller holding the ADMIN role.
#[derive(Clone, Debug)]
pub struct AdminUser(pub CurrentUser);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AdminUser {
    type Rejection = EcommerceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            tracing::warn!(user_id = %user.id, uri = %parts.uri, "admin route denied");
            return Err(EcommerceError::Forbidden);
        }
        Ok(Self(user))
    }
}

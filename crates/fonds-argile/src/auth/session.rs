use std::convert::Infallible;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::roles::UserRole;
use crate::workflows::parcours::amo::EntrepriseAmoId;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const AUTH_METHOD_HEADER: &str = "x-auth-method";
pub const ENTREPRISE_AMO_HEADER: &str = "x-entreprise-amo-id";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthMethod {
    FranceConnect,
    ProConnect,
}

impl AuthMethod {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "franceconnect" | "france_connect" => Some(Self::FranceConnect),
            "proconnect" | "pro_connect" => Some(Self::ProConnect),
            _ => None,
        }
    }
}

/// Identity handed over by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: UserId,
    pub role: UserRole,
    pub auth_method: AuthMethod,
    /// Organisation the agent works for; only meaningful for `UserRole::Amo`.
    pub entreprise_amo_id: Option<EntrepriseAmoId>,
}

impl AuthUser {
    pub fn particulier(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            role: UserRole::Particulier,
            auth_method: AuthMethod::FranceConnect,
            entreprise_amo_id: None,
        }
    }

    pub fn agent(user_id: impl Into<String>, role: UserRole) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            role,
            auth_method: AuthMethod::ProConnect,
            entreprise_amo_id: None,
        }
    }

    pub fn amo(user_id: impl Into<String>, entreprise: EntrepriseAmoId) -> Self {
        Self {
            entreprise_amo_id: Some(entreprise),
            ..Self::agent(user_id, UserRole::Amo)
        }
    }

    pub fn belongs_to(&self, entreprise: &EntrepriseAmoId) -> bool {
        self.role == UserRole::Amo && self.entreprise_amo_id.as_ref() == Some(entreprise)
    }
}

/// Why a route guard refused a request. The two cases lead to different
/// reactions upstream (login redirect vs. forbidden page).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("authentication required")]
    NotAuthenticated,
    #[error("role {actual} is not allowed here")]
    InsufficientRole { actual: String },
}

impl AccessError {
    pub const fn code(&self) -> &'static str {
        match self {
            AccessError::NotAuthenticated => "NOT_AUTHENTICATED",
            AccessError::InsufficientRole { .. } => "INSUFFICIENT_ROLE",
        }
    }
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let status = match self {
            AccessError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            AccessError::InsufficientRole { .. } => StatusCode::FORBIDDEN,
        };
        let body = Json(json!({ "error": self.to_string(), "code": self.code() }));
        (status, body).into_response()
    }
}

pub type AccessCheckResult<'a> = Result<&'a AuthUser, AccessError>;

pub fn check_role_access<'a>(
    session: Option<&'a AuthUser>,
    required_roles: &[UserRole],
) -> AccessCheckResult<'a> {
    let user = session.ok_or(AccessError::NotAuthenticated)?;
    if required_roles.contains(&user.role) {
        Ok(user)
    } else {
        Err(AccessError::InsufficientRole {
            actual: user.role.code().to_string(),
        })
    }
}

/// Session resolved from the headers set by the authenticating proxy in
/// front of the service. Missing identity claims yield an anonymous session
/// rather than a rejection; guards decide what that means.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Session {
    #[default]
    Anonymous,
    Authenticated(AuthUser),
    /// Logged in, but with a role this service does not know. Grants nothing.
    UnrecognisedRole { user_id: UserId, claimed: String },
}

impl Session {
    pub fn user(&self) -> Option<&AuthUser> {
        match self {
            Session::Authenticated(user) => Some(user),
            Session::Anonymous | Session::UnrecognisedRole { .. } => None,
        }
    }

    pub fn require(&self, roles: &[UserRole]) -> Result<&AuthUser, AccessError> {
        match self {
            Session::UnrecognisedRole { claimed, .. } => Err(AccessError::InsufficientRole {
                actual: claimed.clone(),
            }),
            _ => check_role_access(self.user(), roles),
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let (Some(user_id), Some(auth_method)) = (
            header(USER_ID_HEADER),
            header(AUTH_METHOD_HEADER).and_then(AuthMethod::parse),
        ) else {
            return Self::Anonymous;
        };
        let user_id = UserId(user_id.to_string());
        let Some(claimed) = header(USER_ROLE_HEADER) else {
            return Self::UnrecognisedRole {
                user_id,
                claimed: String::new(),
            };
        };
        let Ok(role) = claimed.parse::<UserRole>() else {
            return Self::UnrecognisedRole {
                user_id,
                claimed: claimed.to_string(),
            };
        };

        Self::Authenticated(AuthUser {
            user_id,
            role,
            auth_method,
            entreprise_amo_id: header(ENTREPRISE_AMO_HEADER)
                .map(|raw| EntrepriseAmoId(raw.to_string())),
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}
